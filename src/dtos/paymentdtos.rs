use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::jobmodel::PaymentMethod;
use crate::service::gateway::PayableInit;
use crate::service::payment_service::{CaptureOutcome, FeeInitiation, PaymentInitiation};
use crate::utils::currency::cents_to_rand;

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentDto {
    pub job_id: Uuid,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPaymentDto {
    pub job_id: Uuid,

    #[validate(length(min = 6, max = 6, message = "Confirmation code must be 6 digits"))]
    pub confirmation_code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateCodeDto {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PayoutDetailsDto {
    #[validate(length(min = 2, max = 100, message = "Bank name is required"))]
    pub bank_name: String,

    #[validate(length(min = 6, max = 11, message = "Account number must be 6-11 digits"))]
    pub account_number: String,

    #[validate(length(min = 2, max = 30, message = "Account type is required"))]
    pub account_type: String,

    #[validate(length(min = 6, max = 6, message = "Branch code must be 6 digits"))]
    pub branch_code: String,
}

#[derive(Debug, Serialize)]
pub struct RedirectFormDto {
    pub payment_url: String,
    pub fields: BTreeMap<String, String>,
}

/// Everything a caller needs to complete a card payment: either a signed
/// redirect form or a client-side confirmation secret, never both.
#[derive(Debug, Serialize)]
pub struct PaymentInitializationDto {
    pub reference: String,
    pub amount: f64,
    pub fee: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectFormDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl PaymentInitializationDto {
    fn from_init(reference: String, amount_cents: i64, fee_cents: i64, init: PayableInit) -> Self {
        let (redirect, client_secret) = match init {
            PayableInit::Redirect { url, fields } => (
                Some(RedirectFormDto {
                    payment_url: url,
                    fields,
                }),
                None,
            ),
            PayableInit::ClientConfirm { client_secret, .. } => (None, Some(client_secret)),
        };

        PaymentInitializationDto {
            reference,
            amount: cents_to_rand(amount_cents),
            fee: cents_to_rand(fee_cents),
            redirect,
            client_secret,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CashInitiationDto {
    pub payment_method: String,
    pub transaction_id: Uuid,
    pub fee_amount: f64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InitiationResponseDto {
    Cash(CashInitiationDto),
    Card(PaymentInitializationDto),
}

impl From<PaymentInitiation> for InitiationResponseDto {
    fn from(initiation: PaymentInitiation) -> Self {
        match initiation {
            PaymentInitiation::Cash {
                transaction_id,
                fee_cents,
            } => InitiationResponseDto::Cash(CashInitiationDto {
                payment_method: "cash".to_string(),
                transaction_id,
                fee_amount: cents_to_rand(fee_cents),
            }),
            PaymentInitiation::Card {
                reference,
                amount_cents,
                fee_cents,
                init,
            } => InitiationResponseDto::Card(PaymentInitializationDto::from_init(
                reference,
                amount_cents,
                fee_cents,
                init,
            )),
        }
    }
}

impl From<FeeInitiation> for PaymentInitializationDto {
    fn from(initiation: FeeInitiation) -> Self {
        PaymentInitializationDto::from_init(
            initiation.reference,
            initiation.amount_cents,
            0,
            initiation.init,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponseDto {
    pub job_id: Uuid,
    pub transaction_id: Uuid,
    pub status: String,
    pub fee_due: f64,
}

impl From<CaptureOutcome> for ConfirmResponseDto {
    fn from(outcome: CaptureOutcome) -> Self {
        ConfirmResponseDto {
            job_id: outcome.job_id,
            transaction_id: outcome.transaction_id,
            status: "completed".to_string(),
            fee_due: cents_to_rand(outcome.fee_due_cents),
        }
    }
}

// Response wrapper
#[derive(Debug, Serialize)]
pub struct PaymentApiResponse<T> {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> PaymentApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        PaymentApiResponse {
            status: "success".to_string(),
            message: message.to_string(),
            data: Some(data),
        }
    }

    pub fn message_only(message: &str) -> PaymentApiResponse<()> {
        PaymentApiResponse {
            status: "success".to_string(),
            message: message.to_string(),
            data: None,
        }
    }
}
