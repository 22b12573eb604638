use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;

/// Generate a 6-digit completion code, uniform over 100000..=999999.
/// ThreadRng is a CSPRNG, so codes are not predictable from earlier ones.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    rng.random_range(100_000..=999_999).to_string()
}

/// One-way hash for storage on the job. The plaintext is shared with the
/// poster out of band and never persisted or logged.
pub fn hash_code(code: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(code.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Constant result for malformed hashes: verification simply fails.
pub fn verify_code(code: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(code.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[test]
    fn code_round_trip_verifies() {
        let code = generate_code();
        let hash = hash_code(&code).unwrap();

        assert!(verify_code(&code, &hash));
    }

    #[test]
    fn wrong_code_fails_verification() {
        let hash = hash_code("123456").unwrap();

        assert!(!verify_code("654321", &hash));
        assert!(!verify_code("", &hash));
    }

    #[test]
    fn malformed_hash_fails_closed() {
        assert!(!verify_code("123456", "not-a-password-hash"));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_code("123456").unwrap();
        let second = hash_code("123456").unwrap();

        assert_ne!(first, second);
        assert!(verify_code("123456", &first));
        assert!(verify_code("123456", &second));
    }
}
