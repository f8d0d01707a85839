//! Bearer token providers.
//!
//! Token refresh lives outside the sync engine. A provider answers one
//! question: is there a usable token right now.

use std::sync::{Arc, PoisonError, RwLock};

/// Source of the current bearer token.
pub trait AuthProvider: Send + Sync {
    /// The current token, or `None` when the user is signed out.
    fn token(&self) -> Option<String>;
}

impl<F> AuthProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// A provider that is always signed out.
    #[must_use]
    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl AuthProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// A token that can be replaced or cleared at runtime. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new(token: impl Into<String>) -> Self {
        let shared = Self::default();
        shared.set(token);
        shared
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl AuthProvider for SharedToken {
    fn token(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
