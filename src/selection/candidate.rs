//! Account candidates supplied by the account-selection policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One account eligible to serve a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCandidate {
    pub id: u64,
    /// Lower is preferred.
    pub priority: i32,
    pub max_concurrency: u32,
}

impl AccountCandidate {
    pub fn new(id: u64, priority: i32, max_concurrency: u32) -> Self {
        Self {
            id,
            priority,
            max_concurrency,
        }
    }
}

impl fmt::Display for AccountCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.id, self.priority, self.max_concurrency)
    }
}

/// Rejected `ID:PRIORITY:MAX` triple.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid candidate '{input}': {reason}")]
pub struct ParseCandidateError {
    input: String,
    reason: &'static str,
}

impl FromStr for AccountCandidate {
    type Err = ParseCandidateError;

    /// Parses `ID:PRIORITY:MAX`, e.g. `12:0:8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ParseCandidateError {
            input: s.to_string(),
            reason,
        };

        let mut parts = s.trim().split(':');
        let (Some(id), Some(priority), Some(max), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(fail("expected ID:PRIORITY:MAX"));
        };

        let id: u64 = id.parse().map_err(|_| fail("id is not an unsigned integer"))?;
        if id == 0 {
            return Err(fail("id must be non-zero"));
        }
        let priority = priority
            .parse()
            .map_err(|_| fail("priority is not an integer"))?;
        let max_concurrency = max
            .parse()
            .map_err(|_| fail("max is not an unsigned integer"))?;

        Ok(Self::new(id, priority, max_concurrency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidate() {
        let c: AccountCandidate = "12:-1:8".parse().unwrap();
        assert_eq!(c, AccountCandidate::new(12, -1, 8));
        assert_eq!(c.to_string(), "12:-1:8");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", "1:2", "1:2:3:4", "x:0:1", "0:0:1", "1:0:-3"] {
            assert!(input.parse::<AccountCandidate>().is_err(), "{input}");
        }
        let err = "1:2".parse::<AccountCandidate>().unwrap_err();
        assert_eq!(err.to_string(), "invalid candidate '1:2': expected ID:PRIORITY:MAX");
    }
}
