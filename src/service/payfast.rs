use std::collections::BTreeMap;

use async_trait::async_trait;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::models::usermodel::User;
use crate::service::gateway::{
    classify_reference, EventStatus, GatewayError, GatewayEvent, InboundNotification,
    PayableInit, PayablePurpose, PayableRequest, PaymentGateway, PayoutOnboarding, Settlement,
};
use crate::utils::currency::cents_as_amount_string;

const SANDBOX_URL: &str = "https://sandbox.payfast.co.za/eng/process";
const LIVE_URL: &str = "https://www.payfast.co.za/eng/process";

/// Redirect/signature gateway. The charge itself is carried by a browser
/// redirect built here; settlement arrives later over the ITN channel,
/// authenticated only by the MD5 checksum below.
pub struct PayFastGateway {
    merchant_id: String,
    merchant_key: String,
    passphrase: Option<String>,
    mode: String,
    app_url: String,
    api_base_url: String,
}

impl PayFastGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            merchant_id: config.payfast_merchant_id.clone(),
            merchant_key: config.payfast_merchant_key.clone(),
            passphrase: config.payfast_passphrase.clone(),
            mode: config.payfast_mode.clone(),
            app_url: config.app_url.clone(),
            api_base_url: config.api_base_url.clone(),
        }
    }

    pub fn process_url(&self) -> &'static str {
        if self.mode == "live" {
            LIVE_URL
        } else {
            SANDBOX_URL
        }
    }

    fn build_payable_fields(&self, request: &PayableRequest) -> BTreeMap<String, String> {
        let (name_first, name_last) = split_name(&request.payer_name);

        let (return_path, cancel_path) = match request.purpose {
            PayablePurpose::JobPayment => ("/payment/success", "/payment/cancel"),
            PayablePurpose::FeeSettlement => ("/payment/fee-success", "/payment/fee-cancel"),
        };

        let mut fields = BTreeMap::new();
        fields.insert("merchant_id".to_string(), self.merchant_id.clone());
        fields.insert("merchant_key".to_string(), self.merchant_key.clone());
        fields.insert(
            "return_url".to_string(),
            format!("{}{}", self.app_url, return_path),
        );
        fields.insert(
            "cancel_url".to_string(),
            format!("{}{}", self.app_url, cancel_path),
        );
        fields.insert(
            "notify_url".to_string(),
            format!("{}/api/payments/webhook/payfast", self.api_base_url),
        );
        fields.insert("name_first".to_string(), name_first);
        fields.insert("name_last".to_string(), name_last);
        fields.insert("email_address".to_string(), request.payer_email.clone());
        fields.insert("m_payment_id".to_string(), request.reference.clone());
        fields.insert(
            "amount".to_string(),
            cents_as_amount_string(request.amount_cents),
        );
        fields.insert("item_name".to_string(), request.item_name.clone());
        fields.insert(
            "item_description".to_string(),
            request.item_description.chars().take(100).collect(),
        );

        match request.purpose {
            PayablePurpose::JobPayment => {
                if let Some(job_id) = request.job_id {
                    fields.insert("custom_str1".to_string(), job_id.to_string());
                }
                fields.insert("custom_str2".to_string(), request.payer_id.to_string());
                if let Some(worker_id) = request.worker_id {
                    fields.insert("custom_str3".to_string(), worker_id.to_string());
                }
                fields.insert("custom_int1".to_string(), request.fee_cents.to_string());
            }
            PayablePurpose::FeeSettlement => {
                fields.insert("custom_str1".to_string(), request.payer_id.to_string());
                fields.insert("custom_str2".to_string(), "platform_fee".to_string());
            }
        }

        let signature = generate_signature(&fields, self.passphrase.as_deref());
        fields.insert("signature".to_string(), signature);

        fields
    }
}

/// URL-encode one value the way the signing scheme expects: trimmed,
/// percent-encoded, spaces as `+`.
fn encode_component(value: &str) -> String {
    urlencoding::encode(value.trim()).replace("%20", "+")
}

/// First word / remaining words, with a placeholder for missing parts.
/// Formatting detail of the hosted payment form only.
fn split_name(full_name: &str) -> (String, String) {
    let mut words = full_name.split_whitespace();
    let first = words.next().unwrap_or("User").to_string();
    let rest = words.collect::<Vec<_>>().join(" ");

    if rest.is_empty() {
        (first, "User".to_string())
    } else {
        (first, rest)
    }
}

/// Canonical checksum over a field mapping: non-empty fields in sorted key
/// order, `key=value` pairs URL-encoded and joined with `&`, the optional
/// passphrase appended last, MD5 hex digest over the result. The
/// `signature` key itself is always excluded. Input ordering cannot
/// influence the digest.
pub fn generate_signature(fields: &BTreeMap<String, String>, passphrase: Option<&str>) -> String {
    let mut parts = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        if key == "signature" || value.is_empty() {
            continue;
        }
        parts.push(format!("{}={}", key, encode_component(value)));
    }

    let mut payload = parts.join("&");
    if let Some(phrase) = passphrase {
        payload.push_str(&format!("&passphrase={}", encode_component(phrase)));
    }

    format!("{:x}", md5::compute(payload.as_bytes()))
}

/// Recompute the checksum and compare in constant time. This is the only
/// authenticity check the ITN channel has.
pub fn verify_signature(
    fields: &BTreeMap<String, String>,
    provided_signature: &str,
    passphrase: Option<&str>,
) -> bool {
    let expected = generate_signature(fields, passphrase);
    ConstantTimeEq::ct_eq(expected.as_bytes(), provided_signature.as_bytes()).into()
}

#[async_trait]
impl PaymentGateway for PayFastGateway {
    fn name(&self) -> &'static str {
        "payfast"
    }

    async fn ensure_customer(&self, _user: &User) -> Result<Option<String>, GatewayError> {
        // No customer concept; every payable is self-contained.
        Ok(None)
    }

    async fn initiate_payable(
        &self,
        request: &PayableRequest,
    ) -> Result<PayableInit, GatewayError> {
        let fields = self.build_payable_fields(request);

        Ok(PayableInit::Redirect {
            url: self.process_url().to_string(),
            fields,
        })
    }

    async fn finalize_payable(&self, gateway_ref: &str) -> Result<Settlement, GatewayError> {
        // Funds already moved when the ITN reported COMPLETE; capture is a
        // ledger-side act here.
        tracing::debug!(reference = %gateway_ref, "finalize acknowledged for redirect gateway");
        Ok(Settlement {
            charge_ref: None,
            amount_cents: None,
        })
    }

    fn verify_inbound_event(
        &self,
        notification: &InboundNotification,
    ) -> Result<Option<GatewayEvent>, GatewayError> {
        let fields = match notification {
            InboundNotification::Form(fields) => fields,
            InboundNotification::Signed { .. } => {
                return Err(GatewayError::MalformedEvent(
                    "expected form-encoded ITN fields".to_string(),
                ))
            }
        };

        let provided_signature = fields
            .get("signature")
            .ok_or_else(|| GatewayError::MalformedEvent("missing signature field".to_string()))?;

        if !verify_signature(fields, provided_signature, self.passphrase.as_deref()) {
            return Err(GatewayError::SignatureInvalid);
        }

        let payment_status = fields.get("payment_status").ok_or_else(|| {
            GatewayError::MalformedEvent("missing payment_status field".to_string())
        })?;

        let status = match payment_status.as_str() {
            "COMPLETE" => EventStatus::Complete,
            "FAILED" => EventStatus::Failed,
            "CANCELLED" => EventStatus::Cancelled,
            // PENDING and anything newer: verified, nothing to apply yet.
            _ => return Ok(None),
        };

        let reference = fields
            .get("m_payment_id")
            .ok_or_else(|| GatewayError::MalformedEvent("missing m_payment_id field".to_string()))?
            .clone();

        let purpose = classify_reference(&reference).ok_or_else(|| {
            GatewayError::MalformedEvent(format!("unrecognized payment reference {}", reference))
        })?;

        let charge_ref = fields.get("pf_payment_id").cloned();

        let (job_id, user_id) = match purpose {
            PayablePurpose::JobPayment => (
                fields
                    .get("custom_str1")
                    .and_then(|v| uuid::Uuid::parse_str(v).ok()),
                fields
                    .get("custom_str2")
                    .and_then(|v| uuid::Uuid::parse_str(v).ok()),
            ),
            PayablePurpose::FeeSettlement => (
                None,
                fields
                    .get("custom_str1")
                    .and_then(|v| uuid::Uuid::parse_str(v).ok()),
            ),
        };

        Ok(Some(GatewayEvent {
            reference,
            charge_ref,
            purpose,
            status,
            user_id,
            job_id,
        }))
    }

    async fn create_payout_account(
        &self,
        _user: &User,
    ) -> Result<Option<PayoutOnboarding>, GatewayError> {
        // Worker payouts run off saved bank details, not a hosted flow.
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn gateway(mode: &str, passphrase: Option<&str>) -> PayFastGateway {
        PayFastGateway {
            merchant_id: "10000100".to_string(),
            merchant_key: "46f0cd694581a".to_string(),
            passphrase: passphrase.map(|p| p.to_string()),
            mode: mode.to_string(),
            app_url: "https://jobs.example.com".to_string(),
            api_base_url: "https://api.jobs.example.com".to_string(),
        }
    }

    fn sample_fields() -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("merchant_id".to_string(), "10000100".to_string());
        fields.insert("m_payment_id".to_string(), "JOB_abc123_000000000001".to_string());
        fields.insert("amount".to_string(), "200.00".to_string());
        fields.insert("item_name".to_string(), "Job: Garden cleanup".to_string());
        fields
    }

    #[test]
    fn signature_round_trips() {
        let fields = sample_fields();
        let signature = generate_signature(&fields, None);

        assert!(verify_signature(&fields, &signature, None));
    }

    #[test]
    fn tampering_with_any_field_breaks_the_signature() {
        let fields = sample_fields();
        let signature = generate_signature(&fields, None);

        for key in ["merchant_id", "m_payment_id", "amount", "item_name"] {
            let mut tampered = fields.clone();
            let original = tampered.get(key).unwrap().clone();
            // Flip the first character.
            let mut chars: Vec<char> = original.chars().collect();
            chars[0] = if chars[0] == 'X' { 'Y' } else { 'X' };
            tampered.insert(key.to_string(), chars.into_iter().collect());

            assert!(
                !verify_signature(&tampered, &signature, None),
                "tampered {} must not verify",
                key
            );
        }
    }

    #[test]
    fn signature_key_and_empty_fields_are_excluded() {
        let fields = sample_fields();
        let signature = generate_signature(&fields, None);

        let mut with_extras = fields.clone();
        with_extras.insert("signature".to_string(), signature.clone());
        with_extras.insert("item_description".to_string(), "".to_string());

        assert_eq!(generate_signature(&with_extras, None), signature);
    }

    #[test]
    fn passphrase_changes_the_signature() {
        let fields = sample_fields();

        let without = generate_signature(&fields, None);
        let with = generate_signature(&fields, Some("jt7NOE43FZPn"));

        assert_ne!(without, with);
        assert!(verify_signature(&fields, &with, Some("jt7NOE43FZPn")));
        assert!(!verify_signature(&fields, &with, None));
    }

    #[test]
    fn spaces_encode_as_plus() {
        let mut fields = BTreeMap::new();
        fields.insert("item_name".to_string(), "Job: Garden cleanup".to_string());

        // "Job: Garden cleanup" -> "Job%3A+Garden+cleanup"
        let expected = format!("{:x}", md5::compute(b"item_name=Job%3A+Garden+cleanup"));
        assert_eq!(generate_signature(&fields, None), expected);
    }

    #[test]
    fn process_url_follows_mode() {
        assert_eq!(gateway("sandbox", None).process_url(), SANDBOX_URL);
        assert_eq!(gateway("live", None).process_url(), LIVE_URL);
    }

    #[test]
    fn payable_fields_carry_a_valid_signature() {
        let gw = gateway("sandbox", Some("jt7NOE43FZPn"));
        let job_id = Uuid::new_v4();
        let request = PayableRequest {
            reference: format!("JOB_{}_000000000001", job_id.simple()),
            purpose: PayablePurpose::JobPayment,
            amount_cents: 20000,
            currency: "ZAR".to_string(),
            payer_id: Uuid::new_v4(),
            payer_name: "Thandi Nkosi".to_string(),
            payer_email: "thandi@example.com".to_string(),
            customer_ref: None,
            job_id: Some(job_id),
            worker_id: Some(Uuid::new_v4()),
            fee_cents: 2000,
            item_name: "Job: Garden cleanup".to_string(),
            item_description: "Clear the back garden".to_string(),
        };

        let fields = gw.build_payable_fields(&request);
        let signature = fields.get("signature").unwrap().clone();

        assert!(verify_signature(&fields, &signature, Some("jt7NOE43FZPn")));
        assert_eq!(fields.get("amount").unwrap(), "200.00");
        assert_eq!(fields.get("name_first").unwrap(), "Thandi");
        assert_eq!(fields.get("name_last").unwrap(), "Nkosi");
        assert_eq!(fields.get("custom_int1").unwrap(), "2000");
    }

    #[test]
    fn single_word_names_get_a_placeholder_surname() {
        assert_eq!(
            split_name("Cher"),
            ("Cher".to_string(), "User".to_string())
        );
        assert_eq!(split_name(""), ("User".to_string(), "User".to_string()));
    }

    #[test]
    fn itn_complete_classifies_as_job_payment() {
        let gw = gateway("sandbox", None);
        let job_id = Uuid::new_v4();
        let payer_id = Uuid::new_v4();

        let mut fields = BTreeMap::new();
        fields.insert("payment_status".to_string(), "COMPLETE".to_string());
        fields.insert(
            "m_payment_id".to_string(),
            format!("JOB_{}_000000000001", job_id.simple()),
        );
        fields.insert("pf_payment_id".to_string(), "1089250".to_string());
        fields.insert("custom_str1".to_string(), job_id.to_string());
        fields.insert("custom_str2".to_string(), payer_id.to_string());
        let signature = generate_signature(&fields, None);
        fields.insert("signature".to_string(), signature);

        let event = gw
            .verify_inbound_event(&InboundNotification::Form(fields))
            .unwrap()
            .unwrap();

        assert_eq!(event.purpose, PayablePurpose::JobPayment);
        assert_eq!(event.status, EventStatus::Complete);
        assert_eq!(event.charge_ref.as_deref(), Some("1089250"));
        assert_eq!(event.job_id, Some(job_id));
        assert_eq!(event.user_id, Some(payer_id));
    }

    #[test]
    fn itn_fee_settlement_carries_the_user() {
        let gw = gateway("sandbox", None);
        let user_id = Uuid::new_v4();

        let mut fields = BTreeMap::new();
        fields.insert("payment_status".to_string(), "COMPLETE".to_string());
        fields.insert(
            "m_payment_id".to_string(),
            format!("FEE_{}_000000000001", user_id.simple()),
        );
        fields.insert("custom_str1".to_string(), user_id.to_string());
        fields.insert("custom_str2".to_string(), "platform_fee".to_string());
        let signature = generate_signature(&fields, None);
        fields.insert("signature".to_string(), signature);

        let event = gw
            .verify_inbound_event(&InboundNotification::Form(fields))
            .unwrap()
            .unwrap();

        assert_eq!(event.purpose, PayablePurpose::FeeSettlement);
        assert_eq!(event.user_id, Some(user_id));
        assert_eq!(event.job_id, None);
    }

    #[test]
    fn itn_with_bad_signature_is_rejected() {
        let gw = gateway("sandbox", None);

        let mut fields = BTreeMap::new();
        fields.insert("payment_status".to_string(), "COMPLETE".to_string());
        fields.insert("m_payment_id".to_string(), "JOB_x_1".to_string());
        fields.insert("signature".to_string(), "deadbeef".repeat(4));

        let result = gw.verify_inbound_event(&InboundNotification::Form(fields));
        assert!(matches!(result, Err(GatewayError::SignatureInvalid)));
    }

    #[test]
    fn form_encoded_itn_body_round_trips_through_verification() {
        let gw = gateway("sandbox", None);
        let job_id = Uuid::new_v4();

        let mut fields = BTreeMap::new();
        fields.insert("payment_status".to_string(), "FAILED".to_string());
        fields.insert(
            "m_payment_id".to_string(),
            format!("JOB_{}_000000000001", job_id.simple()),
        );
        fields.insert("item_name".to_string(), "Job: Garden cleanup".to_string());
        let signature = generate_signature(&fields, None);
        fields.insert("signature".to_string(), signature);

        // Serialize and re-parse the way the ITN body actually arrives.
        let body = serde_urlencoded::to_string(&fields).unwrap();
        let parsed: BTreeMap<String, String> = serde_urlencoded::from_str(&body).unwrap();

        let event = gw
            .verify_inbound_event(&InboundNotification::Form(parsed))
            .unwrap()
            .unwrap();
        assert_eq!(event.status, EventStatus::Failed);
    }

    #[test]
    fn itn_pending_status_is_a_verified_noop() {
        let gw = gateway("sandbox", None);

        let mut fields = BTreeMap::new();
        fields.insert("payment_status".to_string(), "PENDING".to_string());
        fields.insert("m_payment_id".to_string(), "JOB_x_1".to_string());
        let signature = generate_signature(&fields, None);
        fields.insert("signature".to_string(), signature);

        let event = gw
            .verify_inbound_event(&InboundNotification::Form(fields))
            .unwrap();
        assert!(event.is_none());
    }
}
