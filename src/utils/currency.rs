/// Currency utility functions for handling Rand conversions
///
/// All monetary values in the ledger are stored in cents (1 Rand = 100 cents)
/// to avoid floating-point precision issues.

/// Convert Rand to cents (multiply by 100)
pub fn rand_to_cents(rand: f64) -> i64 {
    (rand * 100.0).round() as i64
}

/// Convert cents to Rand (divide by 100)
pub fn cents_to_rand(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Format cents as a Rand string with 2 decimal places
pub fn format_cents_as_rand(cents: i64) -> String {
    format!("R{:.2}", cents_to_rand(cents))
}

/// Format cents as the major-unit amount string a gateway form expects
pub fn cents_as_amount_string(cents: i64) -> String {
    format!("{:.2}", cents_to_rand(cents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_to_cents() {
        assert_eq!(rand_to_cents(200.0), 20000);
        assert_eq!(rand_to_cents(0.50), 50);
        assert_eq!(rand_to_cents(123.45), 12345);
    }

    #[test]
    fn test_cents_to_rand() {
        assert_eq!(cents_to_rand(20000), 200.0);
        assert_eq!(cents_to_rand(50), 0.50);
        assert_eq!(cents_to_rand(12345), 123.45);
    }

    #[test]
    fn test_format_cents_as_rand() {
        assert_eq!(format_cents_as_rand(20000), "R200.00");
        assert_eq!(format_cents_as_rand(50), "R0.50");
    }

    #[test]
    fn test_cents_as_amount_string() {
        assert_eq!(cents_as_amount_string(20000), "200.00");
        assert_eq!(cents_as_amount_string(2050), "20.50");
    }
}
