use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::usermodel::User;

#[async_trait]
pub trait UserExt {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, Error>;

    /// Add a charged platform fee to the account. Only completed
    /// fee-bearing transactions may call this.
    async fn increment_fee_due(&self, user_id: Uuid, amount_cents: i64) -> Result<User, Error>;

    /// Zero the outstanding fee and unlock the account. Idempotent:
    /// settling an already-settled account is a harmless no-op.
    async fn settle_fees(&self, user_id: Uuid) -> Result<User, Error>;

    async fn set_stripe_customer_id(&self, user_id: Uuid, customer_id: &str)
        -> Result<User, Error>;

    async fn set_stripe_account_id(&self, user_id: Uuid, account_id: &str) -> Result<User, Error>;

    async fn set_payout_details(
        &self,
        user_id: Uuid,
        details: serde_json::Value,
    ) -> Result<User, Error>;
}

#[async_trait]
impl UserExt for DBClient {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn increment_fee_due(&self, user_id: Uuid, amount_cents: i64) -> Result<User, Error> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET fee_due = fee_due + $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(amount_cents)
        .fetch_one(&self.pool)
        .await
    }

    async fn settle_fees(&self, user_id: Uuid) -> Result<User, Error> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET fee_due = 0, account_locked = FALSE, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn set_stripe_customer_id(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<User, Error> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn set_stripe_account_id(&self, user_id: Uuid, account_id: &str) -> Result<User, Error> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET stripe_account_id = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn set_payout_details(
        &self,
        user_id: Uuid,
        details: serde_json::Value,
    ) -> Result<User, Error> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET payout_details = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(details)
        .fetch_one(&self.pool)
        .await
    }
}
