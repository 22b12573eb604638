use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::jobmodel::PaymentMethod;
use crate::models::transactionmodel::Transaction;

/// Ledger persistence. Every status-changing statement carries a WHERE
/// guard repeating the state machine, so a concurrent writer cannot move
/// an entry out of a terminal state. Multi-row money movements run inside
/// a single database transaction.
#[async_trait]
pub trait TransactionExt {
    async fn get_transaction_by_job(&self, job_id: Uuid) -> Result<Option<Transaction>, Error>;

    /// Inbound notifications carry only the gateway-assigned reference.
    async fn get_transaction_by_gateway_ref(
        &self,
        gateway_ref: &str,
    ) -> Result<Option<Transaction>, Error>;

    /// Open a payment cycle for a job: claim the job (fails if a cycle
    /// exists), create the pending ledger entry and, for cash, charge the
    /// platform fee eagerly. Returns `None` when the job was already
    /// claimed by a concurrent initiation.
    #[allow(clippy::too_many_arguments)]
    async fn begin_job_payment(
        &self,
        job_id: Uuid,
        from_user: Uuid,
        to_user: Uuid,
        amount_cents: i64,
        fee_cents: i64,
        method: PaymentMethod,
        gateway_payment_id: Option<&str>,
        charge_fee_now: bool,
    ) -> Result<Option<Transaction>, Error>;

    /// Pending ledger entry for an outstanding-fee settlement; not tied to
    /// a job and has no payee.
    async fn create_fee_settlement(
        &self,
        from_user: Uuid,
        amount_cents: i64,
        gateway_payment_id: &str,
    ) -> Result<Transaction, Error>;

    /// `pending -> authorized`, recording the settlement reference.
    /// Returns `None` when the entry is not pending (idempotent replays
    /// and terminal entries are left untouched).
    async fn mark_transaction_authorized(
        &self,
        transaction_id: Uuid,
        gateway_charge_id: Option<&str>,
    ) -> Result<Option<Transaction>, Error>;

    /// `pending|authorized -> failed`. Returns `None` from any other state.
    async fn mark_transaction_failed(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Option<Transaction>, Error>;

    /// Capture the ledger entry and complete the job in one database
    /// transaction: `pending|authorized -> captured`, job becomes
    /// completed/paid with `completed_at` set. Returns `None` when the
    /// ledger guard rejects the capture.
    async fn capture_and_complete_job(
        &self,
        transaction_id: Uuid,
        job_id: Uuid,
        gateway_charge_id: Option<&str>,
    ) -> Result<Option<Transaction>, Error>;

    /// Capture a fee-settlement entry and zero the payer's outstanding
    /// fee in one database transaction.
    async fn settle_fee_settlement(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
        gateway_charge_id: Option<&str>,
    ) -> Result<Option<Transaction>, Error>;
}

#[async_trait]
impl TransactionExt for DBClient {
    async fn get_transaction_by_job(&self, job_id: Uuid) -> Result<Option<Transaction>, Error> {
        sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE job_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_transaction_by_gateway_ref(
        &self,
        gateway_ref: &str,
    ) -> Result<Option<Transaction>, Error> {
        sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE gateway_payment_id = $1",
        )
        .bind(gateway_ref)
        .fetch_optional(&self.pool)
        .await
    }

    async fn begin_job_payment(
        &self,
        job_id: Uuid,
        from_user: Uuid,
        to_user: Uuid,
        amount_cents: i64,
        fee_cents: i64,
        method: PaymentMethod,
        gateway_payment_id: Option<&str>,
        charge_fee_now: bool,
    ) -> Result<Option<Transaction>, Error> {
        let mut txn = self.pool.begin().await?;

        // Single-writer claim: only one initiation may flip the job out of
        // the "no payment cycle" state.
        let claimed = sqlx::query(
            r#"
            UPDATE jobs
            SET payment_method = $2, payment_intent_id = $3, updated_at = NOW()
            WHERE id = $1 AND payment_method IS NULL AND payment_intent_id IS NULL
            "#,
        )
        .bind(job_id)
        .bind(method)
        .bind(gateway_payment_id)
        .execute(&mut *txn)
        .await?;

        if claimed.rows_affected() == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions
                (job_id, from_user, to_user, amount, fee_amount, payment_method, gateway_payment_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(from_user)
        .bind(to_user)
        .bind(amount_cents)
        .bind(fee_cents)
        .bind(method)
        .bind(gateway_payment_id)
        .fetch_one(&mut *txn)
        .await?;

        if charge_fee_now && fee_cents > 0 {
            sqlx::query("UPDATE users SET fee_due = fee_due + $2, updated_at = NOW() WHERE id = $1")
                .bind(from_user)
                .bind(fee_cents)
                .execute(&mut *txn)
                .await?;
        }

        txn.commit().await?;
        Ok(Some(transaction))
    }

    async fn create_fee_settlement(
        &self,
        from_user: Uuid,
        amount_cents: i64,
        gateway_payment_id: &str,
    ) -> Result<Transaction, Error> {
        sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions
                (job_id, from_user, to_user, amount, fee_amount, payment_method, gateway_payment_id, status)
            VALUES (NULL, $1, NULL, $2, 0, 'card', $3, 'pending')
            RETURNING *
            "#,
        )
        .bind(from_user)
        .bind(amount_cents)
        .bind(gateway_payment_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn mark_transaction_authorized(
        &self,
        transaction_id: Uuid,
        gateway_charge_id: Option<&str>,
    ) -> Result<Option<Transaction>, Error> {
        sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = 'authorized',
                gateway_charge_id = COALESCE($2, gateway_charge_id),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(gateway_charge_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_transaction_failed(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Option<Transaction>, Error> {
        sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'authorized')
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
    }

    async fn capture_and_complete_job(
        &self,
        transaction_id: Uuid,
        job_id: Uuid,
        gateway_charge_id: Option<&str>,
    ) -> Result<Option<Transaction>, Error> {
        let mut txn = self.pool.begin().await?;

        let captured = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = 'captured',
                gateway_charge_id = COALESCE($2, gateway_charge_id),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'authorized')
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(gateway_charge_id)
        .fetch_optional(&mut *txn)
        .await?;

        let Some(transaction) = captured else {
            txn.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', paid = TRUE, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&mut *txn)
        .await?;

        txn.commit().await?;
        Ok(Some(transaction))
    }

    async fn settle_fee_settlement(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
        gateway_charge_id: Option<&str>,
    ) -> Result<Option<Transaction>, Error> {
        let mut txn = self.pool.begin().await?;

        let captured = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = 'captured',
                gateway_charge_id = COALESCE($2, gateway_charge_id),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'authorized')
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(gateway_charge_id)
        .fetch_optional(&mut *txn)
        .await?;

        let Some(transaction) = captured else {
            txn.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE users SET fee_due = 0, account_locked = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&mut *txn)
        .await?;

        txn.commit().await?;
        Ok(Some(transaction))
    }
}
