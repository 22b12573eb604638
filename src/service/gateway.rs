use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::models::usermodel::User;
use crate::service::payfast::PayFastGateway;
use crate::service::stripe::StripeGateway;

pub const JOB_REFERENCE_PREFIX: &str = "JOB_";
pub const FEE_REFERENCE_PREFIX: &str = "FEE_";

/// Merchant-side payment reference for a job payment cycle.
pub fn job_payment_reference(job_id: Uuid) -> String {
    format!("{}{}_{}", JOB_REFERENCE_PREFIX, job_id.simple(), short_nonce())
}

/// Merchant-side payment reference for an outstanding-fee settlement.
pub fn fee_payment_reference(user_id: Uuid) -> String {
    format!("{}{}_{}", FEE_REFERENCE_PREFIX, user_id.simple(), short_nonce())
}

fn short_nonce() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayablePurpose {
    JobPayment,
    FeeSettlement,
}

/// What a merchant reference was minted for, recovered from its prefix.
pub fn classify_reference(reference: &str) -> Option<PayablePurpose> {
    if reference.starts_with(JOB_REFERENCE_PREFIX) {
        Some(PayablePurpose::JobPayment)
    } else if reference.starts_with(FEE_REFERENCE_PREFIX) {
        Some(PayablePurpose::FeeSettlement)
    } else {
        None
    }
}

/// Everything a gateway needs to put together a payable for the client.
#[derive(Debug, Clone)]
pub struct PayableRequest {
    pub reference: String,
    pub purpose: PayablePurpose,
    pub amount_cents: i64,
    pub currency: String,
    pub payer_id: Uuid,
    pub payer_name: String,
    pub payer_email: String,
    pub customer_ref: Option<String>,
    pub job_id: Option<Uuid>,
    pub worker_id: Option<Uuid>,
    pub fee_cents: i64,
    pub item_name: String,
    pub item_description: String,
}

/// What the caller needs to complete the payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayableInit {
    /// Browser redirect to a signed, hosted payment page.
    Redirect {
        url: String,
        fields: BTreeMap<String, String>,
    },
    /// Client-side confirmation against a tokenized intent.
    ClientConfirm {
        intent_id: String,
        client_secret: String,
    },
}

impl PayableInit {
    /// The reference the gateway will use in later calls and events.
    pub fn gateway_reference(&self, merchant_reference: &str) -> String {
        match self {
            PayableInit::Redirect { .. } => merchant_reference.to_string(),
            PayableInit::ClientConfirm { intent_id, .. } => intent_id.clone(),
        }
    }
}

/// Result of converting an authorized hold into an actual transfer.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub charge_ref: Option<String>,
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Complete,
    Failed,
    Cancelled,
}

/// A verified, classified inbound gateway notification.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub reference: String,
    pub charge_ref: Option<String>,
    pub purpose: PayablePurpose,
    pub status: EventStatus,
    pub user_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
}

/// Raw inbound notification material, per transport style.
#[derive(Debug, Clone)]
pub enum InboundNotification {
    /// Form-encoded fields carrying their own `signature` field.
    Form(BTreeMap<String, String>),
    /// Raw payload with a detached signature header.
    Signed { payload: String, signature: String },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("notification signature verification failed")]
    SignatureInvalid,

    #[error("malformed gateway notification: {0}")]
    MalformedEvent(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutOnboarding {
    pub account_ref: String,
    pub onboarding_url: String,
}

/// The capability set every gateway variant exposes to the payment
/// service. The variant is fixed at startup; nothing branches on it per
/// request.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ensure a gateway-side customer record exists for the payer.
    /// Gateways without a customer concept return `None`.
    async fn ensure_customer(&self, user: &User) -> Result<Option<String>, GatewayError>;

    async fn initiate_payable(&self, request: &PayableRequest)
        -> Result<PayableInit, GatewayError>;

    /// Capture an authorized payable. Redirect-style gateways settle via
    /// their notification channel, so this acknowledges without a call.
    async fn finalize_payable(&self, gateway_ref: &str) -> Result<Settlement, GatewayError>;

    /// Authenticate and classify an inbound notification. `Ok(None)` means
    /// the notification verified but carries nothing actionable.
    fn verify_inbound_event(
        &self,
        notification: &InboundNotification,
    ) -> Result<Option<GatewayEvent>, GatewayError>;

    /// Start hosted payout onboarding for a worker, when supported.
    async fn create_payout_account(
        &self,
        user: &User,
    ) -> Result<Option<PayoutOnboarding>, GatewayError>;
}

/// Deployment-time gateway selection.
pub fn gateway_from_config(config: &Config) -> Arc<dyn PaymentGateway> {
    match config.active_payment_gateway.as_str() {
        "stripe" => Arc::new(StripeGateway::new(config)),
        "payfast" => Arc::new(PayFastGateway::new(config)),
        other => {
            tracing::warn!(
                "Unknown ACTIVE_PAYMENT_GATEWAY '{}', falling back to payfast",
                other
            );
            Arc::new(PayFastGateway::new(config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_classify_by_prefix() {
        let job_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        assert_eq!(
            classify_reference(&job_payment_reference(job_id)),
            Some(PayablePurpose::JobPayment)
        );
        assert_eq!(
            classify_reference(&fee_payment_reference(user_id)),
            Some(PayablePurpose::FeeSettlement)
        );
        assert_eq!(classify_reference("pi_3OqXYZ"), None);
    }

    #[test]
    fn gateway_reference_prefers_intent_id() {
        let redirect = PayableInit::Redirect {
            url: "https://sandbox.payfast.co.za/eng/process".to_string(),
            fields: BTreeMap::new(),
        };
        assert_eq!(redirect.gateway_reference("JOB_abc"), "JOB_abc");

        let confirm = PayableInit::ClientConfirm {
            intent_id: "pi_123".to_string(),
            client_secret: "pi_123_secret".to_string(),
        };
        assert_eq!(confirm.gateway_reference("JOB_abc"), "pi_123");
    }
}
