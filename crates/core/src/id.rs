//! Strongly-typed identifiers used across the pipeline.
//!
//! All identifiers are store-assigned positive integers. Wrapping them keeps a
//! task id from being passed where a subject id is expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a subject (the ad/listing being moderated).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(i64);

/// Identifier of a principal (the seller owning a subject).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(i64);

/// Identifier of an asynchronous moderation task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

macro_rules! impl_int_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }

            /// Validate an externally supplied identifier (must be `> 0`).
            pub fn parse_positive(value: i64) -> Result<Self, DomainError> {
                if value <= 0 {
                    return Err(DomainError::validation(format!(
                        "{} must be positive, got {}",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_int_newtype!(SubjectId, "SubjectId");
impl_int_newtype!(PrincipalId, "PrincipalId");
impl_int_newtype!(TaskId, "TaskId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_str() {
        let id: TaskId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert!("abc".parse::<SubjectId>().is_err());
    }

    #[test]
    fn rejects_non_positive_external_ids() {
        assert!(SubjectId::parse_positive(0).is_err());
        assert!(SubjectId::parse_positive(-3).is_err());
        assert_eq!(SubjectId::parse_positive(7).unwrap(), SubjectId::new(7));
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&SubjectId::new(9999)).unwrap();
        assert_eq!(json, "9999");
    }
}
