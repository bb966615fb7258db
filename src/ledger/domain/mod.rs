use std::fmt;

use thiserror::Error;
use uuid::Uuid;

pub mod accounts;
pub mod categories;
pub mod currency;
pub mod period;
pub mod reports;
pub mod transactions;

/// A stored or provided string did not match any variant of an enum.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// A reference to a ledger record that may not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Account(Uuid),
    Category(Uuid),
    Transaction(Uuid),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(id) => write!(f, "account {}", id),
            Self::Category(id) => write!(f, "category {}", id),
            Self::Transaction(id) => write!(f, "transaction {}", id),
        }
    }
}
