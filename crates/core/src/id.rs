//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers are opaque strings: authors minted here use UUIDv7 text, but ids
//! coming from the posts service (or from older records) are accepted verbatim.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an author (owned by this service).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(String);

/// Identifier of a post (owned by the posts service).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }
        }
    };
}

impl_string_newtype!(AuthorId, "AuthorId");
impl_string_newtype!(PostId, "PostId");

impl AuthorId {
    /// Mint a fresh author identifier (UUIDv7, time-ordered).
    ///
    /// Prefer passing ids explicitly in tests for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for AuthorId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_ids_are_rejected() {
        assert!(matches!("   ".parse::<AuthorId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("".parse::<PostId>(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn foreign_ids_are_kept_verbatim() {
        let id: AuthorId = "65f1c0ffee".parse().unwrap();
        assert_eq!(id.as_str(), "65f1c0ffee");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"65f1c0ffee\"");
    }

    #[test]
    fn minted_ids_are_unique() {
        assert_ne!(AuthorId::new(), AuthorId::new());
    }
}
