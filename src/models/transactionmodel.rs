use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jobmodel::PaymentMethod;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Authorized,
    Captured,
    Refunded,
    Failed,
}

impl TransactionStatus {
    pub fn to_str(&self) -> &str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Authorized => "authorized",
            TransactionStatus::Captured => "captured",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Captured | TransactionStatus::Refunded | TransactionStatus::Failed
        )
    }

    /// The ledger state machine. The same matrix is enforced again in SQL
    /// with guarded updates, so a race cannot bypass it.
    pub fn can_transition(&self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, to) {
            (Pending, Authorized) => true,
            (Pending, Captured) => true,
            (Pending, Failed) => true,
            (Authorized, Captured) => true,
            (Authorized, Failed) => true,
            _ => false,
        }
    }
}

/// One money-movement attempt, tied to a job or to a platform-fee
/// settlement (`job_id = None`). Owned exclusively by the payment service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub from_user: Uuid,
    pub to_user: Option<Uuid>,
    pub amount: i64,     // cents
    pub fee_amount: i64, // cents
    pub payment_method: PaymentMethod,
    /// Gateway-assigned intent/payment reference (m_payment_id or pi_...)
    pub gateway_payment_id: Option<String>,
    /// Post-settlement charge/transaction reference
    pub gateway_charge_id: Option<String>,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_fee_settlement(&self) -> bool {
        self.job_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::TransactionStatus::*;

    #[test]
    fn pending_can_authorize_capture_or_fail() {
        assert!(Pending.can_transition(Authorized));
        assert!(Pending.can_transition(Captured));
        assert!(Pending.can_transition(Failed));
        assert!(!Pending.can_transition(Refunded));
        assert!(!Pending.can_transition(Pending));
    }

    #[test]
    fn authorized_can_capture_or_fail() {
        assert!(Authorized.can_transition(Captured));
        assert!(Authorized.can_transition(Failed));
        assert!(!Authorized.can_transition(Pending));
        assert!(!Authorized.can_transition(Refunded));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for terminal in [Captured, Refunded, Failed] {
            assert!(terminal.is_terminal());
            for target in [Pending, Authorized, Captured, Refunded, Failed] {
                assert!(
                    !terminal.can_transition(target),
                    "{:?} must not transition to {:?}",
                    terminal,
                    target
                );
            }
        }
    }
}
