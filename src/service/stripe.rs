use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::models::usermodel::User;
use crate::service::gateway::{
    EventStatus, GatewayError, GatewayEvent, InboundNotification, PayableInit, PayablePurpose,
    PayableRequest, PaymentGateway, PayoutOnboarding, Settlement,
};

const API_BASE: &str = "https://api.stripe.com/v1";

/// Tokenized intent/capture gateway. Charges are authorized client-side
/// against a manual-capture intent and captured server-side once the
/// poster confirms completion.
pub struct StripeGateway {
    secret_key: String,
    webhook_secret: String,
    app_url: String,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            app_url: config.app_url.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", API_BASE, path))
            .header("Authorization", format!("Bearer {}", self.secret_key))
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("request rejected")
                .to_string();
            return Err(GatewayError::Rejected(message));
        }

        Ok(body)
    }
}

/// Verify a `Stripe-Signature` header against the raw payload: HMAC-SHA256
/// over `"{timestamp}.{payload}"`, compared in constant time against every
/// `v1` entry. Malformed or missing material fails closed.
pub fn verify_webhook_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
) -> Result<(), GatewayError> {
    let mut timestamp: Option<&str> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(GatewayError::SignatureInvalid)?;
    if candidates.is_empty() {
        return Err(GatewayError::SignatureInvalid);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| GatewayError::SignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    for candidate in candidates {
        if bool::from(ConstantTimeEq::ct_eq(
            expected.as_bytes(),
            candidate.as_bytes(),
        )) {
            return Ok(());
        }
    }

    Err(GatewayError::SignatureInvalid)
}

/// Classify a verified webhook body. Events this subsystem did not mint
/// (no purpose metadata, or an unhandled type) come back as `None`.
pub fn parse_webhook_event(body: &Value) -> Result<Option<GatewayEvent>, GatewayError> {
    let event_type = body["type"]
        .as_str()
        .ok_or_else(|| GatewayError::MalformedEvent("missing event type".to_string()))?;

    let status = match event_type {
        // Manual-capture intents report held funds here; automatic-capture
        // fee settlements go straight to succeeded. One authorization path
        // either way.
        "payment_intent.amount_capturable_updated" | "payment_intent.succeeded" => {
            EventStatus::Complete
        }
        "payment_intent.payment_failed" => EventStatus::Failed,
        "payment_intent.canceled" => EventStatus::Cancelled,
        _ => return Ok(None),
    };

    let object = &body["data"]["object"];
    let reference = object["id"]
        .as_str()
        .ok_or_else(|| GatewayError::MalformedEvent("missing intent id".to_string()))?
        .to_string();

    let metadata = &object["metadata"];
    let purpose = match metadata["purpose"].as_str() {
        Some("job_payment") => PayablePurpose::JobPayment,
        Some("platform_fee") => PayablePurpose::FeeSettlement,
        // Not minted by this subsystem.
        _ => return Ok(None),
    };

    let job_id = metadata["job_id"]
        .as_str()
        .and_then(|v| uuid::Uuid::parse_str(v).ok());
    let user_id = metadata["user_id"]
        .as_str()
        .and_then(|v| uuid::Uuid::parse_str(v).ok());
    let charge_ref = object["latest_charge"].as_str().map(|s| s.to_string());

    Ok(Some(GatewayEvent {
        reference,
        charge_ref,
        purpose,
        status,
        user_id,
        job_id,
    }))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn ensure_customer(&self, user: &User) -> Result<Option<String>, GatewayError> {
        if let Some(existing) = &user.stripe_customer_id {
            return Ok(Some(existing.clone()));
        }

        let body = self
            .post_form(
                "/customers",
                &[
                    ("email", user.email.clone()),
                    ("name", user.name.clone()),
                    ("metadata[user_id]", user.id.to_string()),
                ],
            )
            .await?;

        let customer_id = body["id"]
            .as_str()
            .ok_or_else(|| GatewayError::Rejected("missing customer id in response".to_string()))?
            .to_string();

        Ok(Some(customer_id))
    }

    async fn initiate_payable(
        &self,
        request: &PayableRequest,
    ) -> Result<PayableInit, GatewayError> {
        // Job payments hold funds until the poster confirms completion;
        // fee settlements have no confirm step and capture on their own.
        let capture_method = match request.purpose {
            PayablePurpose::JobPayment => "manual",
            PayablePurpose::FeeSettlement => "automatic",
        };
        let purpose = match request.purpose {
            PayablePurpose::JobPayment => "job_payment",
            PayablePurpose::FeeSettlement => "platform_fee",
        };

        let mut params = vec![
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("payment_method_types[]", "card".to_string()),
            ("capture_method", capture_method.to_string()),
            ("description", request.item_name.clone()),
            ("metadata[reference]", request.reference.clone()),
            ("metadata[purpose]", purpose.to_string()),
            ("metadata[user_id]", request.payer_id.to_string()),
            ("metadata[fee_amount]", request.fee_cents.to_string()),
        ];
        if let Some(customer_ref) = &request.customer_ref {
            params.push(("customer", customer_ref.clone()));
        }
        if let Some(job_id) = request.job_id {
            params.push(("metadata[job_id]", job_id.to_string()));
        }
        if let Some(worker_id) = request.worker_id {
            params.push(("metadata[worker_id]", worker_id.to_string()));
        }

        let body = self.post_form("/payment_intents", &params).await?;

        let intent_id = body["id"]
            .as_str()
            .ok_or_else(|| GatewayError::Rejected("missing intent id in response".to_string()))?
            .to_string();
        let client_secret = body["client_secret"]
            .as_str()
            .ok_or_else(|| GatewayError::Rejected("missing client secret in response".to_string()))?
            .to_string();

        Ok(PayableInit::ClientConfirm {
            intent_id,
            client_secret,
        })
    }

    async fn finalize_payable(&self, gateway_ref: &str) -> Result<Settlement, GatewayError> {
        let body = self
            .post_form(&format!("/payment_intents/{}/capture", gateway_ref), &[])
            .await?;

        Ok(Settlement {
            charge_ref: body["latest_charge"].as_str().map(|s| s.to_string()),
            amount_cents: body["amount_received"].as_i64(),
        })
    }

    fn verify_inbound_event(
        &self,
        notification: &InboundNotification,
    ) -> Result<Option<GatewayEvent>, GatewayError> {
        let (payload, signature) = match notification {
            InboundNotification::Signed { payload, signature } => (payload, signature),
            InboundNotification::Form(_) => {
                return Err(GatewayError::MalformedEvent(
                    "expected a raw payload with a signature header".to_string(),
                ))
            }
        };

        verify_webhook_signature(payload, signature, &self.webhook_secret)?;

        let body: Value = serde_json::from_str(payload)
            .map_err(|e| GatewayError::MalformedEvent(format!("invalid JSON payload: {}", e)))?;

        parse_webhook_event(&body)
    }

    async fn create_payout_account(
        &self,
        user: &User,
    ) -> Result<Option<PayoutOnboarding>, GatewayError> {
        let account_ref = match &user.stripe_account_id {
            Some(existing) => existing.clone(),
            None => {
                let body = self
                    .post_form(
                        "/accounts",
                        &[
                            ("type", "express".to_string()),
                            ("email", user.email.clone()),
                            ("metadata[user_id]", user.id.to_string()),
                        ],
                    )
                    .await?;

                body["id"]
                    .as_str()
                    .ok_or_else(|| {
                        GatewayError::Rejected("missing account id in response".to_string())
                    })?
                    .to_string()
            }
        };

        let link = self
            .post_form(
                "/account_links",
                &[
                    ("account", account_ref.clone()),
                    ("refresh_url", format!("{}/payout/onboarding", self.app_url)),
                    (
                        "return_url",
                        format!("{}/payout/onboarding/complete", self.app_url),
                    ),
                    ("type", "account_onboarding".to_string()),
                ],
            )
            .await?;

        let onboarding_url = link["url"]
            .as_str()
            .ok_or_else(|| GatewayError::Rejected("missing onboarding url in response".to_string()))?
            .to_string();

        Ok(Some(PayoutOnboarding {
            account_ref,
            onboarding_url,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign(payload: &str, timestamp: &str, secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_webhook_signature_verifies() {
        let payload = r#"{"type":"payment_intent.succeeded"}"#;
        let secret = "whsec_test_secret";
        let header = format!("t=1712345678,v1={}", sign(payload, "1712345678", secret));

        assert!(verify_webhook_signature(payload, &header, secret).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let payload = r#"{"type":"payment_intent.succeeded"}"#;
        let secret = "whsec_test_secret";
        let header = format!("t=1712345678,v1={}", sign(payload, "1712345678", secret));

        let tampered = r#"{"type":"payment_intent.succeeded","amount":1}"#;
        assert!(matches!(
            verify_webhook_signature(tampered, &header, secret),
            Err(GatewayError::SignatureInvalid)
        ));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let payload = "{}";
        let secret = "whsec_test_secret";

        for header in ["", "t=123", "v1=abcdef", "garbage", "t=,v1="] {
            assert!(
                verify_webhook_signature(payload, header, secret).is_err(),
                "header {:?} must not verify",
                header
            );
        }
    }

    #[test]
    fn any_matching_v1_entry_verifies() {
        let payload = "{}";
        let secret = "whsec_test_secret";
        let good = sign(payload, "42", secret);
        let header = format!("t=42,v1={},v1={}", "0".repeat(64), good);

        assert!(verify_webhook_signature(payload, &header, secret).is_ok());
    }

    #[test]
    fn capturable_intent_parses_as_complete_job_payment() {
        let job_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();
        let body = json!({
            "type": "payment_intent.amount_capturable_updated",
            "data": { "object": {
                "id": "pi_3OqXYZ",
                "latest_charge": "ch_3OqXYZ",
                "metadata": {
                    "purpose": "job_payment",
                    "job_id": job_id.to_string(),
                    "user_id": user_id.to_string()
                }
            }}
        });

        let event = parse_webhook_event(&body).unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Complete);
        assert_eq!(event.purpose, PayablePurpose::JobPayment);
        assert_eq!(event.reference, "pi_3OqXYZ");
        assert_eq!(event.charge_ref.as_deref(), Some("ch_3OqXYZ"));
        assert_eq!(event.job_id, Some(job_id));
        assert_eq!(event.user_id, Some(user_id));
    }

    #[test]
    fn failed_intent_parses_as_failed() {
        let body = json!({
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_3OqXYZ",
                "metadata": { "purpose": "job_payment" }
            }}
        });

        let event = parse_webhook_event(&body).unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Failed);
    }

    #[test]
    fn unhandled_event_types_are_noops() {
        let body = json!({
            "type": "charge.dispute.created",
            "data": { "object": { "id": "dp_1" } }
        });

        assert!(parse_webhook_event(&body).unwrap().is_none());
    }

    #[test]
    fn foreign_intents_without_purpose_are_noops() {
        let body = json!({
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_other", "metadata": {} } }
        });

        assert!(parse_webhook_event(&body).unwrap().is_none());
    }
}
