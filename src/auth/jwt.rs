// JWT issuance and validation.
//
// Grounded on the bettersys auth layer's `JwtHandler`, generalized from a
// single `UserRole` to this crate's `Role` and carrying `owner_id` as the
// subject claim that every db accessor filters on.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::models::User;
use crate::types::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String, expiration_hours: i64) -> Self {
        Self {
            secret,
            expiration_hours,
        }
    }

    pub fn generate_token(&self, user: &User) -> Result<(String, usize)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("invalid expiration timestamp")?
            .timestamp() as usize;
        let expires_in = (self.expiration_hours * 3600) as usize;

        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            exp: expiration,
        };

        debug!(user_id = %user.id, "issuing jwt");

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("failed to encode jwt")?;

        Ok((token, expires_in))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired token")?;
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".into(),
            username: "alice".into(),
            password_hash: "hash".into(),
            role: Role::User,
            active: true,
            encryption_salt: "salt".into(),
            recovery_code_hash: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn generates_and_validates() {
        let handler = JwtHandler::new("test-secret".into(), 24);
        let (token, expires_in) = handler.generate_token(&user()).unwrap();
        assert_eq!(expires_in, 24 * 3600);
        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn rejects_wrong_secret() {
        let issuer = JwtHandler::new("secret-a".into(), 24);
        let verifier = JwtHandler::new("secret-b".into(), 24);
        let (token, _) = issuer.generate_token(&user()).unwrap();
        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn rejects_garbage_token() {
        let handler = JwtHandler::new("test-secret".into(), 24);
        assert!(handler.validate_token("not.a.jwt").is_err());
    }
}
