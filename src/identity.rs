use std::collections::HashMap;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Member,
    Admin,
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Option<Role>,
}

impl Identity {
    pub fn member(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Some(Role::Member),
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Some(Role::Admin),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidToken;

impl std::fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid token")
    }
}

impl std::error::Error for InvalidToken {}

/// Token → identity. The engine never inspects tokens itself.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, InvalidToken>;
}

/// Strip an optional `Bearer ` prefix from an authorization header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Fixed token table, for local deployments and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, InvalidToken> {
        let token = bearer_token(token).ok_or(InvalidToken)?;
        self.tokens.get(token).cloned().ok_or(InvalidToken)
    }
}
