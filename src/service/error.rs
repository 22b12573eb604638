use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::error::HttpError;
use crate::service::gateway::GatewayError;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("No transaction found for {0}")]
    TransactionNotFound(String),

    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("User {0} is not authorized to perform this action on job {1}")]
    Forbidden(Uuid, Uuid),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Outstanding platform fees of {due_cents} cents must be settled before starting a new payment")]
    FeesOutstanding { due_cents: i64 },

    #[error("Notification signature verification failed")]
    SignatureInvalid,

    #[error("Malformed gateway notification: {0}")]
    MalformedNotification(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Invalid confirmation code")]
    InvalidCode,

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::JobNotFound(_)
            | PaymentError::TransactionNotFound(_)
            | PaymentError::UserNotFound(_) => StatusCode::NOT_FOUND,

            PaymentError::Forbidden(_, _) => StatusCode::FORBIDDEN,

            PaymentError::InvalidState(_)
            | PaymentError::MalformedNotification(_)
            | PaymentError::SignatureInvalid
            | PaymentError::InvalidCode => StatusCode::BAD_REQUEST,

            PaymentError::FeesOutstanding { .. } | PaymentError::GatewayRejected(_) => {
                StatusCode::PAYMENT_REQUIRED
            }

            PaymentError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,

            PaymentError::Notification(_)
            | PaymentError::Internal(_)
            | PaymentError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Raw provider failures are translated at the orchestrator boundary; the
// reqwest error itself never crosses into handler code.
impl From<GatewayError> for PaymentError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Http(e) => PaymentError::GatewayUnavailable(e.to_string()),
            GatewayError::Rejected(message) => PaymentError::GatewayRejected(message),
            GatewayError::SignatureInvalid => PaymentError::SignatureInvalid,
            GatewayError::MalformedEvent(message) => PaymentError::MalformedNotification(message),
        }
    }
}

impl From<PaymentError> for HttpError {
    fn from(error: PaymentError) -> Self {
        match error {
            PaymentError::JobNotFound(_)
            | PaymentError::TransactionNotFound(_)
            | PaymentError::UserNotFound(_) => HttpError::not_found(error.to_string()),

            PaymentError::Forbidden(_, _) => HttpError::forbidden(error.to_string()),

            PaymentError::InvalidState(_)
            | PaymentError::MalformedNotification(_)
            | PaymentError::SignatureInvalid
            | PaymentError::InvalidCode => HttpError::bad_request(error.to_string()),

            PaymentError::FeesOutstanding { .. } | PaymentError::GatewayRejected(_) => {
                HttpError::payment_required(error.to_string())
            }

            PaymentError::GatewayUnavailable(_) => HttpError::bad_gateway(error.to_string()),

            _ => HttpError::server_error(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fees_outstanding_maps_to_payment_required() {
        let error = PaymentError::FeesOutstanding { due_cents: 2000 };
        assert_eq!(error.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert!(error.to_string().contains("2000"));
    }

    #[test]
    fn signature_failure_is_a_client_error() {
        assert_eq!(
            PaymentError::SignatureInvalid.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn gateway_transport_errors_map_to_bad_gateway() {
        let error = PaymentError::GatewayUnavailable("connection timed out".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }
}
