use chrono::{DateTime, Utc};

/// Platform commission charged once the free trial has lapsed.
pub const PLATFORM_FEE_RATE: f64 = 0.10;

/// Compute the platform fee for an amount in cents.
///
/// Free-trial accounts pay nothing; afterwards the fee is 10% of the
/// amount, rounded half-up. Pure and idempotent.
pub fn platform_fee(amount_cents: i64, free_trial_ends_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    if now < free_trial_ends_at {
        return 0;
    }

    (amount_cents as f64 * PLATFORM_FEE_RATE).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_fee_during_free_trial() {
        let trial_end = at(2024, 2, 1);
        let now = at(2024, 1, 15);

        for amount in [0, 1, 999, 20000, 1_000_000] {
            assert_eq!(platform_fee(amount, trial_end, now), 0);
        }
    }

    #[test]
    fn ten_percent_after_trial() {
        let trial_end = at(2024, 2, 1);
        let now = at(2024, 3, 1);

        // R200.00 job in cents -> R20.00 fee
        assert_eq!(platform_fee(20000, trial_end, now), 2000);
        assert_eq!(platform_fee(100, trial_end, now), 10);
        assert_eq!(platform_fee(0, trial_end, now), 0);
    }

    #[test]
    fn fee_rounds_half_up() {
        let trial_end = at(2024, 2, 1);
        let now = at(2024, 3, 1);

        assert_eq!(platform_fee(15, trial_end, now), 2); // 1.5 -> 2
        assert_eq!(platform_fee(25, trial_end, now), 3); // 2.5 -> 3
        assert_eq!(platform_fee(14, trial_end, now), 1); // 1.4 -> 1
        assert_eq!(platform_fee(149, trial_end, now), 15); // 14.9 -> 15
    }

    #[test]
    fn fee_applies_exactly_at_trial_end() {
        let trial_end = at(2024, 2, 1);

        assert_eq!(platform_fee(1000, trial_end, trial_end), 100);
        assert_eq!(
            platform_fee(1000, trial_end, trial_end - Duration::seconds(1)),
            0
        );
    }
}
