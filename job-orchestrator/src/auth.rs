//! AuthN/AuthZ (C6): HMAC-signed bearer tokens carrying user id + scopes, and
//! Argon2id password hashing for any credential-issued token.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use job_common::auth::{AuthError, TokenData, TokenVerifier};
use job_common::SafeDisplay;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    scopes: Vec<String>,
    exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("failed to hash password")]
    HashFailed,
    #[error("stored password hash is malformed")]
    MalformedHash,
}

impl SafeDisplay for PasswordError {
    fn to_safe_string(&self) -> String {
        // Never reveal which step of hashing/verification failed.
        "invalid credentials".to_string()
    }
}

pub struct AuthService {
    jwt_secret: String,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(jwt_secret: String, token_ttl_minutes: i64) -> Self {
        Self {
            jwt_secret,
            token_ttl: Duration::minutes(token_ttl_minutes),
        }
    }

    pub fn issue_token(&self, user_id: &str, scopes: &[String]) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            scopes: scopes.to_vec(),
            exp: (Utc::now() + self.token_ttl).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|_| AuthError::Invalid)
    }

    pub fn hash_password(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| PasswordError::HashFailed)
    }

    pub fn verify_password(&self, password: &str, stored_hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(stored_hash).map_err(|_| PasswordError::MalformedHash)?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

#[async_trait]
impl TokenVerifier for AuthService {
    async fn verify(&self, token: &str) -> Result<TokenData, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AuthError::Invalid)?;

        Ok(TokenData {
            user_id: data.claims.sub,
            scopes: data.claims.scopes.into_iter().collect::<HashSet<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn service() -> AuthService {
        AuthService::new("test-secret".to_string(), 60)
    }

    #[tokio::test]
    async fn round_trips_a_token() {
        let svc = service();
        let token = svc
            .issue_token("user-1", &["jobs:read".to_string(), "jobs:write".to_string()])
            .unwrap();
        let data = svc.verify(&token).await.unwrap();
        assert_eq!(data.user_id, "user-1");
        assert!(data.has_scope("jobs:read"));
        assert!(data.has_scope("jobs:write"));
        assert!(!data.has_scope("resources:write"));
    }

    #[tokio::test]
    async fn rejects_tampered_token() {
        let svc = service();
        let token = svc.issue_token("user-1", &[]).unwrap();
        let tampered = format!("{}x", token);
        assert!(svc.verify(&tampered).await.is_err());
    }

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let svc = service();
        let hash1 = svc.hash_password("correct horse").unwrap();
        let hash2 = svc.hash_password("correct horse").unwrap();
        assert_ne!(hash1, hash2, "Argon2id must use a per-password salt");
        assert!(svc.verify_password("correct horse", &hash1).unwrap());
        assert!(!svc.verify_password("wrong", &hash1).unwrap());
    }
}
