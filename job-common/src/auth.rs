use crate::SafeDisplay;
use async_trait::async_trait;
use poem::Request;
use poem_openapi::auth::Bearer;
use poem_openapi::SecurityScheme;
use std::collections::HashSet;
use std::sync::Arc;

/// The decoded identity and capability set carried by a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenData {
    pub user_id: String,
    pub scopes: HashSet<String>,
}

impl TokenData {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed bearer token")]
    Missing,
    #[error("invalid or expired token")]
    Invalid,
}

impl SafeDisplay for AuthError {
    fn to_safe_string(&self) -> String {
        self.to_string()
    }
}

/// Verifies an opaque bearer token string into [`TokenData`]. The concrete
/// signing scheme (HMAC-signed JWT, in this implementation) lives with the
/// service that owns the signing key, not here.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<TokenData, AuthError>;
}

/// poem-openapi security scheme wrapping a plain `Authorization: Bearer <token>`
/// header. The actual verification is delegated to whatever `Arc<dyn TokenVerifier>`
/// is mounted as request data by the binary wiring up the API.
#[derive(SecurityScheme)]
#[oai(
    ty = "bearer",
    checker = "bearer_checker",
    rename = "BearerAuth"
)]
pub struct JobBearerAuth(pub TokenData);

async fn bearer_checker(req: &Request, bearer: Bearer) -> Option<TokenData> {
    let verifier = req.data::<Arc<dyn TokenVerifier>>()?;
    verifier.verify(&bearer.token).await.ok()
}

/// Route-level scope requirement check. Returns the missing scope name on failure
/// so the caller can build a precise 403 body, per the "missing scope: X" contract.
pub fn require_scope<'a>(token: &'a TokenData, scope: &'a str) -> Result<(), &'a str> {
    if token.has_scope(scope) {
        Ok(())
    } else {
        Err(scope)
    }
}

pub mod scopes {
    pub const JOBS_READ: &str = "jobs:read";
    pub const JOBS_WRITE: &str = "jobs:write";
    pub const RESOURCES_READ: &str = "resources:read";
    pub const RESOURCES_WRITE: &str = "resources:write";
    pub const SUPERVISOR_READ: &str = "supervisor:read";
    pub const SUPERVISOR_WRITE: &str = "supervisor:write";
}
