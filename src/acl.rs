//! Agent capability checks.
//!
//! An [`Authorizer`] turns a request's `AuthToken` into an [`Acl`]. `None`
//! means ACL enforcement is disabled and every request is allowed.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{AgentwireError, Result};

/// Resolved capabilities of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Acl {
    management: bool,
    agent_read: bool,
    agent_write: bool,
}

impl Acl {
    /// Full access.
    pub fn management() -> Self {
        Self {
            management: true,
            agent_read: true,
            agent_write: true,
        }
    }

    /// Agent read (monitor) only.
    pub fn agent_read() -> Self {
        Self {
            agent_read: true,
            ..Self::default()
        }
    }

    /// Agent read and write (monitor and profile).
    pub fn agent_write() -> Self {
        Self {
            agent_read: true,
            agent_write: true,
            ..Self::default()
        }
    }

    /// No capabilities.
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn allow_agent_read(&self) -> bool {
        self.management || self.agent_read
    }

    pub fn allow_agent_write(&self) -> bool {
        self.management || self.agent_write
    }
}

/// Resolves auth tokens.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `Ok(None)` when ACLs are disabled.
    ///
    /// # Errors
    ///
    /// `Token` when the token cannot be resolved.
    async fn resolve_token(&self, token: &str) -> Result<Option<Acl>>;
}

/// ACLs disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn resolve_token(&self, _token: &str) -> Result<Option<Acl>> {
        Ok(None)
    }
}

/// Fixed token table. Unknown tokens fail resolution.
#[derive(Debug, Default)]
pub struct StaticTokens {
    tokens: DashMap<String, Acl>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(self, secret: impl Into<String>, acl: Acl) -> Self {
        self.tokens.insert(secret.into(), acl);
        self
    }

    pub fn insert(&self, secret: impl Into<String>, acl: Acl) {
        self.tokens.insert(secret.into(), acl);
    }

    pub fn revoke(&self, secret: &str) {
        self.tokens.remove(secret);
    }
}

#[async_trait]
impl Authorizer for StaticTokens {
    async fn resolve_token(&self, token: &str) -> Result<Option<Acl>> {
        self.tokens
            .get(token)
            .map(|acl| Some(*acl))
            .ok_or_else(|| AgentwireError::Token("ACL token not found".to_string()))
    }
}

/// Capability an agent endpoint requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    AgentRead,
    AgentWrite,
}

/// Resolve `token` and check it grants `capability`.
///
/// # Errors
///
/// The authorizer's error when resolution fails, `PermissionDenied` when the
/// capability is missing.
pub async fn authorize(
    authorizer: &Arc<dyn Authorizer>,
    token: &str,
    capability: Capability,
) -> Result<()> {
    let Some(acl) = authorizer.resolve_token(token).await? else {
        return Ok(());
    };
    let allowed = match capability {
        Capability::AgentRead => acl.allow_agent_read(),
        Capability::AgentWrite => acl.allow_agent_write(),
    };
    if allowed {
        Ok(())
    } else {
        Err(AgentwireError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Arc<dyn Authorizer> {
        Arc::new(
            StaticTokens::new()
                .token("mgmt", Acl::management())
                .token("reader", Acl::agent_read())
                .token("writer", Acl::agent_write())
                .token("nobody", Acl::deny_all()),
        )
    }

    #[tokio::test]
    async fn test_disabled_acls_allow_everything() {
        let authz: Arc<dyn Authorizer> = Arc::new(AllowAll);
        authorize(&authz, "", Capability::AgentWrite).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_capability() {
        let authz = tokens();
        authorize(&authz, "reader", Capability::AgentRead).await.unwrap();
        authorize(&authz, "mgmt", Capability::AgentRead).await.unwrap();

        let err = authorize(&authz, "nobody", Capability::AgentRead)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentwireError::PermissionDenied));
        assert_eq!(err.code(), Some(403));
    }

    #[tokio::test]
    async fn test_write_capability() {
        let authz = tokens();
        authorize(&authz, "writer", Capability::AgentWrite).await.unwrap();
        assert!(matches!(
            authorize(&authz, "reader", Capability::AgentWrite).await,
            Err(AgentwireError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_unknown_token_fails_resolution() {
        let authz = tokens();
        let err = authorize(&authz, "stolen", Capability::AgentRead)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentwireError::Token(_)));
    }

    #[tokio::test]
    async fn test_revoked_token() {
        let table = StaticTokens::new().token("t", Acl::agent_read());
        table.revoke("t");
        assert!(table.resolve_token("t").await.is_err());
    }
}
