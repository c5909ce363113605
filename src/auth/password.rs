// Password hashing, isolated from `jwt.rs` so call sites never import
// `bcrypt` directly.

use anyhow::{Context, Result};

const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;

pub fn hash_password(plain: &str) -> Result<String> {
    bcrypt::hash(plain, BCRYPT_COST).context("failed to hash password")
}

pub fn verify_password(plain: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(plain, hash).context("failed to verify password")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_succeeds() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
    }

    #[test]
    fn wrong_password_fails_verify() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn hash_is_salted_per_call() {
        let a = hash_password("same-input").unwrap();
        let b = hash_password("same-input").unwrap();
        assert_ne!(a, b);
    }
}
