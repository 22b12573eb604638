use chrono::prelude::*;
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: uuid::Uuid,
    pub name: String,
    pub email: String,

    // Platform fee bookkeeping, in cents
    pub fee_due: i64,
    pub account_locked: bool,
    pub free_trial_ends_at: Option<DateTime<Utc>>,

    // Gateway-specific account references
    pub stripe_customer_id: Option<String>,
    pub stripe_account_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_details: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// When the free trial ends for this account: an explicit override if
    /// set, otherwise 30 days after signup.
    pub fn free_trial_end(&self) -> DateTime<Utc> {
        self.free_trial_ends_at
            .unwrap_or_else(|| self.created_at + Duration::days(30))
    }

    pub fn has_outstanding_fees(&self) -> bool {
        self.fee_due > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(created_at: DateTime<Utc>, trial_override: Option<DateTime<Utc>>) -> User {
        User {
            id: uuid::Uuid::new_v4(),
            name: "Thandi Nkosi".to_string(),
            email: "thandi@example.com".to_string(),
            fee_due: 0,
            account_locked: false,
            free_trial_ends_at: trial_override,
            stripe_customer_id: None,
            stripe_account_id: None,
            payout_details: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn trial_defaults_to_thirty_days_after_signup() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let user = test_user(created, None);
        assert_eq!(user.free_trial_end(), created + Duration::days(30));
    }

    #[test]
    fn trial_override_wins() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let user = test_user(created, Some(cutoff));
        assert_eq!(user.free_trial_end(), cutoff);
    }
}
