//! Key naming for the coordination store.

use crate::ledger::Scope;

const ACCOUNT_SLOT_PREFIX: &str = "concurrency:account:";
const USER_SLOT_PREFIX: &str = "concurrency:user:";
const WAIT_TOTAL: &str = "concurrency:wait:total";
const WAIT_UPDATED: &str = "concurrency:wait:updated";
const WAIT_COUNTS: &str = "concurrency:wait:counts";

/// The three cooperating wait-queue keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitQueueKeys {
    /// Integer total across all users.
    pub total: String,
    /// Sorted set of user → last activity (store seconds).
    pub updated: String,
    /// Hash of user → current wait count.
    pub counts: String,
}

/// Key builder with an optional deployment namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// An empty prefix yields the bare key names; otherwise keys become
    /// `{prefix}:concurrency:...`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    /// Membership set key for a scope.
    pub fn slot_key(&self, scope: Scope) -> String {
        match scope {
            Scope::Account(id) => self.namespaced(&format!("{ACCOUNT_SLOT_PREFIX}{id}")),
            Scope::User(id) => self.namespaced(&format!("{USER_SLOT_PREFIX}{id}")),
        }
    }

    pub fn wait_queue(&self) -> WaitQueueKeys {
        WaitQueueKeys {
            total: self.namespaced(WAIT_TOTAL),
            updated: self.namespaced(WAIT_UPDATED),
            counts: self.namespaced(WAIT_COUNTS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_keys() {
        let keys = KeySpace::default();
        assert_eq!(keys.slot_key(Scope::Account(42)), "concurrency:account:42");
        assert_eq!(keys.slot_key(Scope::User(7)), "concurrency:user:7");
        assert_eq!(keys.wait_queue().counts, "concurrency:wait:counts");
    }

    #[test]
    fn test_prefixed_keys() {
        let keys = KeySpace::new("eu1");
        assert_eq!(keys.slot_key(Scope::Account(1)), "eu1:concurrency:account:1");
        assert_eq!(keys.wait_queue().total, "eu1:concurrency:wait:total");
    }
}
