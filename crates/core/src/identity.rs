//! Caller identity.
//!
//! Every chat request carries a bearer token. The gateway resolves it to an
//! [`Owner`] before anything is written to the response; an unresolvable
//! token is an authentication failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The sales rep on whose behalf an exchange runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    /// Role name; selects the system prompt flavour (e.g., "sales_rep").
    pub role: String,
}

/// Resolves a bearer token to an owner.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<Owner>;
}

/// A fixed token → owner table, typically built from configuration.
#[derive(Clone, Default)]
pub struct UserDirectory {
    by_token: HashMap<String, Owner>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: impl Into<String>, owner: Owner) -> Self {
        self.by_token.insert(token.into(), owner);
        self
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

impl std::fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDirectory")
            .field("users", &self.by_token.len())
            .finish()
    }
}

#[async_trait]
impl IdentityResolver for UserDirectory {
    async fn resolve(&self, token: &str) -> Option<Owner> {
        if token.is_empty() {
            return None;
        }
        self.by_token.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep() -> Owner {
        Owner {
            id: 7,
            name: "Dana Reyes".into(),
            role: "sales_rep".into(),
        }
    }

    #[tokio::test]
    async fn resolves_known_token() {
        let directory = UserDirectory::new().with_user("tok-7", rep());
        assert_eq!(directory.resolve("tok-7").await, Some(rep()));
    }

    #[tokio::test]
    async fn rejects_unknown_and_empty_tokens() {
        let directory = UserDirectory::new().with_user("tok-7", rep());
        assert_eq!(directory.resolve("tok-8").await, None);
        assert_eq!(directory.resolve("").await, None);
    }

    #[test]
    fn debug_hides_tokens() {
        let directory = UserDirectory::new().with_user("secret-token", rep());
        let dbg = format!("{directory:?}");
        assert!(!dbg.contains("secret-token"));
        assert!(dbg.contains("users: 1"));
    }
}
