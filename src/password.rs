use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};

use crate::repo::{RepoError, RepoResult};

/// One-way hash with a fresh random salt (Argon2id).
pub fn hash(raw_password: &str) -> RepoResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(raw_password.as_bytes(), &salt)
        .map_err(|e| RepoError::Internal(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check a raw password against a stored hash. An unparseable hash counts as
/// a failed verification, never an error.
pub fn verify(raw_password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(raw_password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_and_verifies() {
        let a = hash("hunter2").unwrap();
        let b = hash("hunter2").unwrap();
        assert_ne!(a, "hunter2");
        assert_ne!(a, b);
        assert!(verify("hunter2", &a));
        assert!(!verify("wrong", &a));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify("anything", "not-a-phc-string"));
    }
}
