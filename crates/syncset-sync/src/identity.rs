//! Identity resolution.

use std::sync::{PoisonError, RwLock};

/// Supplies the identity id datasets are scoped by. Called once per
/// synchronization pass.
pub trait IdentityProvider: Send + Sync {
    fn identity_id(&self) -> String;
}

/// An identity held in memory and switched explicitly.
#[derive(Debug)]
pub struct StaticIdentity {
    id: RwLock<String>,
}

impl StaticIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: RwLock::new(id.into()),
        }
    }

    /// Replace the identity id, returning the previous one.
    pub fn set(&self, id: impl Into<String>) -> String {
        let mut guard = self.id.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, id.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn identity_id(&self) -> String {
        self.id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_returns_previous() {
        let identity = StaticIdentity::new("unauth");
        assert_eq!(identity.set("auth"), "unauth");
        assert_eq!(identity.identity_id(), "auth");
    }
}
