use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::Form,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use validator::Validate;

use crate::{
    dtos::paymentdtos::*,
    error::HttpError,
    middleware::JWTAuthMiddleware,
    service::error::PaymentError,
    service::gateway::InboundNotification,
    service::payment_service::PaymentInitiation,
    AppState,
};

pub async fn initiate_payment(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<InitiatePaymentDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let initiation = app_state
        .payment_service
        .initiate_payment(body.job_id, &auth.user, body.payment_method)
        .await?;

    let message = match &initiation {
        PaymentInitiation::Cash { .. } => "Cash payment selected. Fee will be due after job completion.",
        PaymentInitiation::Card { .. } => "Payment initialized successfully",
    };

    let response: InitiationResponseDto = initiation.into();
    Ok(Json(PaymentApiResponse::success(message, response)))
}

pub async fn confirm_payment(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<ConfirmPaymentDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let outcome = app_state
        .payment_service
        .confirm_and_capture(body.job_id, &auth.user, &body.confirmation_code)
        .await?;

    let response: ConfirmResponseDto = outcome.into();
    Ok(Json(PaymentApiResponse::success(
        "Payment confirmed and job completed",
        response,
    )))
}

pub async fn pay_outstanding_fee(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let initiation = app_state
        .payment_service
        .pay_outstanding_fee(&auth.user)
        .await?;

    let response: PaymentInitializationDto = initiation.into();
    Ok(Json(PaymentApiResponse::success(
        "Fee payment initialized successfully",
        response,
    )))
}

pub async fn generate_confirmation_code(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<GenerateCodeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    app_state
        .payment_service
        .issue_confirmation_code(body.job_id, &auth.user)
        .await?;

    // The code itself travels to the poster by email only.
    Ok(Json(PaymentApiResponse::<()>::message_only(
        "Confirmation code generated and sent to the job poster",
    )))
}

pub async fn create_connect_account(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let onboarding = app_state
        .payment_service
        .create_payout_account(&auth.user)
        .await?;

    Ok(Json(PaymentApiResponse::success(
        "Payout onboarding started",
        onboarding,
    )))
}

pub async fn setup_payout_details(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Json(body): Json<PayoutDetailsDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let details = json!({
        "bank_name": body.bank_name,
        "account_number": body.account_number,
        "account_type": body.account_type,
        "branch_code": body.branch_code,
        "verified": false,
    });

    app_state
        .payment_service
        .save_payout_details(&auth.user, details)
        .await?;

    Ok(Json(PaymentApiResponse::<()>::message_only(
        "Payout details saved. Verification pending.",
    )))
}

/// PayFast ITN endpoint: form-encoded fields authenticated by their
/// `signature` field. Always answers 200 with a plain body once the
/// notification verified, even when it applies to nothing; the gateway
/// retries on anything else.
pub async fn payfast_itn(
    Extension(app_state): Extension<Arc<AppState>>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, HttpError> {
    let result = app_state
        .payment_service
        .handle_gateway_event(InboundNotification::Form(fields))
        .await;

    match result {
        Ok(()) => Ok((StatusCode::OK, "OK")),
        Err(e) => {
            if matches!(e, PaymentError::SignatureInvalid) {
                tracing::warn!("ITN rejected: signature verification failed");
            }
            Err(e.into())
        }
    }
}

/// Stripe webhook endpoint: raw JSON payload plus a detached signature
/// header.
pub async fn stripe_webhook(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, HttpError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| HttpError::bad_request("Missing Stripe signature header"))?
        .to_string();

    let result = app_state
        .payment_service
        .handle_gateway_event(InboundNotification::Signed {
            payload: body,
            signature,
        })
        .await;

    match result {
        Ok(()) => Ok(Json(json!({ "status": "success" }))),
        Err(e) => {
            if matches!(e, PaymentError::SignatureInvalid) {
                tracing::warn!("Webhook rejected: signature verification failed");
            }
            Err(e.into())
        }
    }
}
