//! Shared types for the ATM card service.
//!
//! Holds the caller [`Role`] used by card query routing and login sessions.
//! No database or HTTP dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Caller category.
///
/// A customer reaches cards through the bank accounts they own; personnel
/// reach cards through the card-processing records that name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A bank customer identified by a customer id.
    Customer,
    /// A staff member identified by an employee id.
    Personnel,
}

impl Role {
    /// Returns the wire label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Personnel => "personnel",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role label does not name a known [`Role`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct RoleError(pub String);

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "personnel" => Ok(Self::Personnel),
            other => Err(RoleError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_labels() {
        assert_eq!("customer".parse::<Role>(), Ok(Role::Customer));
        assert_eq!("personnel".parse::<Role>(), Ok(Role::Personnel));
    }

    #[test]
    fn rejects_unknown_and_differently_cased_labels() {
        assert_eq!(
            "admin".parse::<Role>(),
            Err(RoleError("admin".to_string()))
        );
        assert!("Customer".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn label_round_trips_through_serde() {
        let json = serde_json::to_string(&Role::Personnel).unwrap();
        assert_eq!(json, "\"personnel\"");
        assert_eq!(Role::Customer.to_string(), "customer");
    }
}
