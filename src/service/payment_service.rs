use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::db::db::DBClient;
use crate::db::jobdb::JobExt;
use crate::db::transactiondb::TransactionExt;
use crate::db::userdb::UserExt;
use crate::mail::mails::send_confirmation_code_email;
use crate::models::jobmodel::{Job, JobStatus, PaymentMethod};
use crate::models::transactionmodel::TransactionStatus;
use crate::models::usermodel::User;
use crate::service::confirmation;
use crate::service::error::PaymentError;
use crate::service::fee;
use crate::service::gateway::{
    fee_payment_reference, job_payment_reference, EventStatus, GatewayEvent, InboundNotification,
    PayableInit, PayablePurpose, PayableRequest, PaymentGateway, PayoutOnboarding,
};
use crate::utils::currency::{format_cents_as_rand, rand_to_cents};

/// What `initiate_payment` hands back to the caller.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentInitiation {
    Cash {
        transaction_id: Uuid,
        fee_cents: i64,
    },
    Card {
        reference: String,
        amount_cents: i64,
        fee_cents: i64,
        init: PayableInit,
    },
}

#[derive(Debug, Serialize)]
pub struct FeeInitiation {
    pub reference: String,
    pub amount_cents: i64,
    pub init: PayableInit,
}

#[derive(Debug, Serialize)]
pub struct CaptureOutcome {
    pub job_id: Uuid,
    pub transaction_id: Uuid,
    pub fee_due_cents: i64,
}

/// The stateful payment workflow: ties a job, its poster and worker, a
/// ledger entry and a gateway call together. Owns every ledger mutation.
pub struct PaymentService {
    db_client: Arc<DBClient>,
    gateway: Arc<dyn PaymentGateway>,
}

impl std::fmt::Debug for PaymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentService")
            .field("gateway", &self.gateway.name())
            .finish()
    }
}

/// Preconditions for opening a payment cycle, separated out so the rules
/// stay checkable without a database.
fn ensure_initiable(job: &Job, caller_id: Uuid) -> Result<Uuid, PaymentError> {
    if job.poster != caller_id {
        return Err(PaymentError::Forbidden(caller_id, job.id));
    }

    let worker = job
        .worker
        .ok_or_else(|| PaymentError::InvalidState("job has no assigned worker".to_string()))?;

    if job.payment_initiated() {
        return Err(PaymentError::InvalidState(
            "payment has already been initiated for this job".to_string(),
        ));
    }

    Ok(worker)
}

/// The platform-wide lockout: an account with unpaid fees starts nothing
/// new until it settles. Checked before any gateway call.
fn ensure_fees_settled(user: &User) -> Result<(), PaymentError> {
    if user.has_outstanding_fees() {
        return Err(PaymentError::FeesOutstanding {
            due_cents: user.fee_due,
        });
    }
    Ok(())
}

impl PaymentService {
    pub fn new(db_client: Arc<DBClient>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db_client, gateway }
    }

    pub async fn initiate_payment(
        &self,
        job_id: Uuid,
        caller: &User,
        method: PaymentMethod,
    ) -> Result<PaymentInitiation, PaymentError> {
        let job = self
            .db_client
            .get_job(job_id)
            .await?
            .ok_or(PaymentError::JobNotFound(job_id))?;

        let worker_id = ensure_initiable(&job, caller.id)?;

        // Re-read the poster so the fee check sees the latest balance.
        let poster = self
            .db_client
            .get_user(caller.id)
            .await?
            .ok_or(PaymentError::UserNotFound(caller.id))?;
        ensure_fees_settled(&poster)?;

        let amount_cents = rand_to_cents(job.price);
        let fee_cents = fee::platform_fee(amount_cents, poster.free_trial_end(), Utc::now());

        match method {
            PaymentMethod::Cash => {
                // Cash fees are charged eagerly; the card fee rides on the
                // captured payment instead.
                let transaction = self
                    .db_client
                    .begin_job_payment(
                        job.id,
                        poster.id,
                        worker_id,
                        amount_cents,
                        fee_cents,
                        PaymentMethod::Cash,
                        None,
                        true,
                    )
                    .await?
                    .ok_or_else(|| {
                        PaymentError::InvalidState(
                            "payment has already been initiated for this job".to_string(),
                        )
                    })?;

                tracing::info!(
                    job_id = %job.id,
                    fee = %format_cents_as_rand(fee_cents),
                    "cash payment cycle opened"
                );

                Ok(PaymentInitiation::Cash {
                    transaction_id: transaction.id,
                    fee_cents,
                })
            }
            PaymentMethod::Card => {
                let customer_ref = self.gateway.ensure_customer(&poster).await?;
                if let Some(customer_ref) = &customer_ref {
                    if poster.stripe_customer_id.as_deref() != Some(customer_ref) {
                        self.db_client
                            .set_stripe_customer_id(poster.id, customer_ref)
                            .await?;
                    }
                }

                let reference = job_payment_reference(job.id);
                let request = PayableRequest {
                    reference: reference.clone(),
                    purpose: PayablePurpose::JobPayment,
                    amount_cents,
                    currency: job.currency.clone(),
                    payer_id: poster.id,
                    payer_name: poster.name.clone(),
                    payer_email: poster.email.clone(),
                    customer_ref,
                    job_id: Some(job.id),
                    worker_id: Some(worker_id),
                    fee_cents,
                    item_name: format!("Job: {}", job.title),
                    item_description: job.description.clone(),
                };

                let init = self.gateway.initiate_payable(&request).await?;
                let gateway_ref = init.gateway_reference(&reference);

                let transaction = self
                    .db_client
                    .begin_job_payment(
                        job.id,
                        poster.id,
                        worker_id,
                        amount_cents,
                        fee_cents,
                        PaymentMethod::Card,
                        Some(&gateway_ref),
                        false,
                    )
                    .await?
                    .ok_or_else(|| {
                        PaymentError::InvalidState(
                            "payment has already been initiated for this job".to_string(),
                        )
                    })?;

                tracing::info!(
                    job_id = %job.id,
                    transaction_id = %transaction.id,
                    gateway = self.gateway.name(),
                    "card payment cycle opened"
                );

                Ok(PaymentInitiation::Card {
                    reference: gateway_ref,
                    amount_cents,
                    fee_cents,
                    init,
                })
            }
        }
    }

    /// Asynchronous, gateway-initiated and unauthenticated beyond the
    /// signature check. Must stay idempotent per gateway reference:
    /// notifications are redelivered and arrive out of order.
    pub async fn handle_gateway_event(
        &self,
        notification: InboundNotification,
    ) -> Result<(), PaymentError> {
        let event = self.gateway.verify_inbound_event(&notification)?;

        let Some(event) = event else {
            tracing::info!(
                gateway = self.gateway.name(),
                "verified gateway notification carried nothing actionable"
            );
            return Ok(());
        };

        match event.status {
            EventStatus::Complete => match event.purpose {
                PayablePurpose::FeeSettlement => self.apply_fee_settlement(&event).await,
                PayablePurpose::JobPayment => self.apply_job_payment_complete(&event).await,
            },
            EventStatus::Failed | EventStatus::Cancelled => {
                self.apply_payment_failure(&event).await
            }
        }
    }

    async fn apply_fee_settlement(&self, event: &GatewayEvent) -> Result<(), PaymentError> {
        let Some(user_id) = event.user_id else {
            return Err(PaymentError::MalformedNotification(
                "fee settlement without a user reference".to_string(),
            ));
        };

        if self.db_client.get_user(user_id).await?.is_none() {
            tracing::warn!(user_id = %user_id, "fee settlement for unknown user, acknowledged");
            return Ok(());
        }

        match self
            .db_client
            .get_transaction_by_gateway_ref(&event.reference)
            .await?
        {
            Some(transaction) if transaction.is_fee_settlement() => {
                match self
                    .db_client
                    .settle_fee_settlement(transaction.id, user_id, event.charge_ref.as_deref())
                    .await?
                {
                    Some(_) => {
                        tracing::info!(user_id = %user_id, "outstanding fees settled and account unlocked")
                    }
                    None => {
                        // Redelivery: the entry already left pending.
                        tracing::info!(
                            reference = %event.reference,
                            "fee settlement notification replayed, no-op"
                        )
                    }
                }
            }
            Some(_) => {
                tracing::warn!(
                    reference = %event.reference,
                    "fee settlement reference points at a job transaction, ignoring"
                );
            }
            None => {
                // No local ledger entry for this settlement; zeroing an
                // already-settled account is harmless either way.
                self.db_client.settle_fees(user_id).await?;
                tracing::info!(user_id = %user_id, "fees settled without a ledger entry");
            }
        }

        Ok(())
    }

    async fn apply_job_payment_complete(&self, event: &GatewayEvent) -> Result<(), PaymentError> {
        let Some(transaction) = self
            .db_client
            .get_transaction_by_gateway_ref(&event.reference)
            .await?
        else {
            tracing::warn!(
                reference = %event.reference,
                "payment notification for unknown transaction, acknowledged"
            );
            return Ok(());
        };

        if !transaction
            .status
            .can_transition(TransactionStatus::Authorized)
        {
            tracing::info!(
                reference = %event.reference,
                status = transaction.status.to_str(),
                "payment notification replayed, no-op"
            );
            return Ok(());
        }

        match self
            .db_client
            .mark_transaction_authorized(transaction.id, event.charge_ref.as_deref())
            .await?
        {
            Some(_) => {
                tracing::info!(
                    reference = %event.reference,
                    job_id = ?event.job_id,
                    "payment authorized, awaiting completion confirmation"
                );
            }
            None => {
                // Lost a race with another delivery of the same event.
                tracing::info!(reference = %event.reference, "authorization already applied");
            }
        }

        Ok(())
    }

    async fn apply_payment_failure(&self, event: &GatewayEvent) -> Result<(), PaymentError> {
        let Some(transaction) = self
            .db_client
            .get_transaction_by_gateway_ref(&event.reference)
            .await?
        else {
            tracing::warn!(
                reference = %event.reference,
                "failure notification for unknown transaction, acknowledged"
            );
            return Ok(());
        };

        if transaction.status.is_terminal() {
            tracing::info!(
                reference = %event.reference,
                status = transaction.status.to_str(),
                "failure notification for a settled entry, no-op"
            );
            return Ok(());
        }

        let reason = match event.status {
            EventStatus::Cancelled => "gateway reported CANCELLED",
            _ => "gateway reported FAILED",
        };

        match self
            .db_client
            .mark_transaction_failed(transaction.id, reason)
            .await?
        {
            Some(_) => {
                tracing::warn!(reference = %event.reference, reason, "payment marked failed")
            }
            None => {
                tracing::info!(
                    reference = %event.reference,
                    "failure notification replayed or entry already terminal, no-op"
                )
            }
        }

        Ok(())
    }

    pub async fn confirm_and_capture(
        &self,
        job_id: Uuid,
        caller: &User,
        confirmation_code: &str,
    ) -> Result<CaptureOutcome, PaymentError> {
        let job = self
            .db_client
            .get_job(job_id)
            .await?
            .ok_or(PaymentError::JobNotFound(job_id))?;

        if job.poster != caller.id {
            return Err(PaymentError::Forbidden(caller.id, job.id));
        }

        let stored_hash = job.confirmation_code.as_deref().ok_or_else(|| {
            PaymentError::InvalidState(
                "no confirmation code has been issued for this job".to_string(),
            )
        })?;

        if !confirmation::verify_code(confirmation_code, stored_hash) {
            return Err(PaymentError::InvalidCode);
        }

        let method = job.payment_method.ok_or_else(|| {
            PaymentError::InvalidState("payment has not been initiated for this job".to_string())
        })?;

        let transaction = self
            .db_client
            .get_transaction_by_job(job.id)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(format!("job {}", job.id)))?;

        let captured = match method {
            PaymentMethod::Cash => self
                .db_client
                .capture_and_complete_job(transaction.id, job.id, None)
                .await?
                .ok_or_else(|| {
                    PaymentError::InvalidState(
                        "transaction can no longer be captured".to_string(),
                    )
                })?,
            PaymentMethod::Card => {
                let intent_id = job.payment_intent_id.clone().ok_or_else(|| {
                    PaymentError::TransactionNotFound(format!("job {} has no payment", job.id))
                })?;

                if transaction.status != TransactionStatus::Authorized {
                    return Err(PaymentError::InvalidState(
                        "payment has not been confirmed by the gateway yet".to_string(),
                    ));
                }

                // A gateway rejection or timeout surfaces here and leaves
                // both the ledger entry and the job untouched.
                let settlement = self.gateway.finalize_payable(&intent_id).await?;
                if let Some(amount_cents) = settlement.amount_cents {
                    tracing::debug!(job_id = %job.id, amount_cents, "gateway capture settled");
                }

                self.db_client
                    .capture_and_complete_job(
                        transaction.id,
                        job.id,
                        settlement.charge_ref.as_deref(),
                    )
                    .await?
                    .ok_or_else(|| {
                        PaymentError::InvalidState(
                            "transaction can no longer be captured".to_string(),
                        )
                    })?
            }
        };

        let poster = self
            .db_client
            .get_user(caller.id)
            .await?
            .ok_or(PaymentError::UserNotFound(caller.id))?;

        tracing::info!(
            job_id = %job.id,
            transaction_id = %captured.id,
            "payment captured and job completed"
        );

        Ok(CaptureOutcome {
            job_id: job.id,
            transaction_id: captured.id,
            fee_due_cents: poster.fee_due,
        })
    }

    pub async fn pay_outstanding_fee(&self, caller: &User) -> Result<FeeInitiation, PaymentError> {
        let user = self
            .db_client
            .get_user(caller.id)
            .await?
            .ok_or(PaymentError::UserNotFound(caller.id))?;

        if user.fee_due <= 0 {
            return Err(PaymentError::InvalidState(
                "no outstanding fees to pay".to_string(),
            ));
        }

        let customer_ref = self.gateway.ensure_customer(&user).await?;
        if let Some(customer_ref) = &customer_ref {
            if user.stripe_customer_id.as_deref() != Some(customer_ref) {
                self.db_client
                    .set_stripe_customer_id(user.id, customer_ref)
                    .await?;
            }
        }

        let reference = fee_payment_reference(user.id);
        let request = PayableRequest {
            reference: reference.clone(),
            purpose: PayablePurpose::FeeSettlement,
            amount_cents: user.fee_due,
            currency: "ZAR".to_string(),
            payer_id: user.id,
            payer_name: user.name.clone(),
            payer_email: user.email.clone(),
            customer_ref,
            job_id: None,
            worker_id: None,
            fee_cents: 0,
            item_name: "Platform Fee Payment".to_string(),
            item_description: "Outstanding platform fees".to_string(),
        };

        let init = self.gateway.initiate_payable(&request).await?;
        let gateway_ref = init.gateway_reference(&reference);

        self.db_client
            .create_fee_settlement(user.id, user.fee_due, &gateway_ref)
            .await?;

        tracing::info!(
            user_id = %user.id,
            amount_cents = user.fee_due,
            "fee settlement payable created"
        );

        Ok(FeeInitiation {
            reference: gateway_ref,
            amount_cents: user.fee_due,
            init,
        })
    }

    /// Worker-initiated. The plaintext code goes to the poster through the
    /// mail collaborator only; it is never part of the response.
    pub async fn issue_confirmation_code(
        &self,
        job_id: Uuid,
        caller: &User,
    ) -> Result<(), PaymentError> {
        let job = self
            .db_client
            .get_job(job_id)
            .await?
            .ok_or(PaymentError::JobNotFound(job_id))?;

        if job.worker != Some(caller.id) {
            return Err(PaymentError::Forbidden(caller.id, job.id));
        }

        if job.status != JobStatus::InProgress {
            return Err(PaymentError::InvalidState(format!(
                "job is {}, must be in progress before a completion code can be issued",
                job.status.to_str()
            )));
        }

        let code = confirmation::generate_code();
        let code_hash = confirmation::hash_code(&code)
            .map_err(|e| PaymentError::Internal(e.to_string()))?;

        self.db_client
            .set_confirmation_code(job.id, &code_hash)
            .await?;

        let poster = self
            .db_client
            .get_user(job.poster)
            .await?
            .ok_or(PaymentError::UserNotFound(job.poster))?;

        send_confirmation_code_email(&poster.email, &poster.name, &job.title, &code)
            .await
            .map_err(|e| PaymentError::Notification(e.to_string()))?;

        tracing::info!(job_id = %job.id, "confirmation code issued and sent to poster");

        Ok(())
    }

    pub async fn create_payout_account(
        &self,
        caller: &User,
    ) -> Result<PayoutOnboarding, PaymentError> {
        let user = self
            .db_client
            .get_user(caller.id)
            .await?
            .ok_or(PaymentError::UserNotFound(caller.id))?;

        let onboarding = self
            .gateway
            .create_payout_account(&user)
            .await?
            .ok_or_else(|| {
                PaymentError::InvalidState(
                    "the active payment gateway does not support hosted payout onboarding"
                        .to_string(),
                )
            })?;

        if user.stripe_account_id.as_deref() != Some(onboarding.account_ref.as_str()) {
            self.db_client
                .set_stripe_account_id(user.id, &onboarding.account_ref)
                .await?;
        }

        Ok(onboarding)
    }

    pub async fn save_payout_details(
        &self,
        caller: &User,
        details: serde_json::Value,
    ) -> Result<(), PaymentError> {
        self.db_client.set_payout_details(caller.id, details).await?;
        tracing::info!(user_id = %caller.id, "worker payout details saved, verification pending");
        Ok(())
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_user(fee_due: i64) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            name: "Thandi Nkosi".to_string(),
            email: "thandi@example.com".to_string(),
            fee_due,
            account_locked: false,
            free_trial_ends_at: None,
            stripe_customer_id: None,
            stripe_account_id: None,
            payout_details: None,
            created_at: now - Duration::days(60),
            updated_at: now,
        }
    }

    fn sample_job(poster: Uuid, worker: Option<Uuid>) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            title: "Garden cleanup".to_string(),
            description: "Clear the back garden".to_string(),
            price: 200.0,
            currency: "ZAR".to_string(),
            poster,
            worker,
            status: JobStatus::InProgress,
            payment_method: None,
            payment_intent_id: None,
            confirmation_code: None,
            paid: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn initiation_requires_the_poster() {
        let poster = sample_user(0);
        let stranger = Uuid::new_v4();
        let job = sample_job(poster.id, Some(Uuid::new_v4()));

        assert!(matches!(
            ensure_initiable(&job, stranger),
            Err(PaymentError::Forbidden(_, _))
        ));
    }

    #[test]
    fn initiation_requires_an_assigned_worker() {
        let poster = sample_user(0);
        let job = sample_job(poster.id, None);

        assert!(matches!(
            ensure_initiable(&job, poster.id),
            Err(PaymentError::InvalidState(_))
        ));
    }

    #[test]
    fn initiation_rejects_a_second_cycle() {
        let poster = sample_user(0);
        let mut job = sample_job(poster.id, Some(Uuid::new_v4()));
        job.payment_method = Some(PaymentMethod::Card);
        job.payment_intent_id = Some("pi_123".to_string());

        assert!(matches!(
            ensure_initiable(&job, poster.id),
            Err(PaymentError::InvalidState(_))
        ));
    }

    #[test]
    fn initiation_passes_for_a_clean_job() {
        let poster = sample_user(0);
        let worker = Uuid::new_v4();
        let job = sample_job(poster.id, Some(worker));

        assert_eq!(ensure_initiable(&job, poster.id).unwrap(), worker);
    }

    #[test]
    fn outstanding_fees_block_everything() {
        let clean = sample_user(0);
        assert!(ensure_fees_settled(&clean).is_ok());

        let indebted = sample_user(2000);
        match ensure_fees_settled(&indebted) {
            Err(PaymentError::FeesOutstanding { due_cents }) => assert_eq!(due_cents, 2000),
            other => panic!("expected FeesOutstanding, got {:?}", other.err()),
        }
    }
}
