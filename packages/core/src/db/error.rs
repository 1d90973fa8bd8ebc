//! Persistence Error Types
//!
//! Errors surfaced by a [`PersistenceService`](super::PersistenceService)
//! implementation. `Rejected` and `Timeout` are I/O failures the next sync
//! cycle may get past; `Serialization` is a data error and is not retried.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend refused the call (constraint violation, permission, bad payload)
    #[error("Persistence call rejected on {table}: {message}")]
    Rejected { table: String, message: String },

    /// The backend did not answer in time
    #[error("Persistence call timed out on {table}")]
    Timeout { table: String },

    /// A row could not be converted to or from its typed form
    #[error("Row serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn rejected(table: impl ToString, message: impl Into<String>) -> Self {
        Self::Rejected {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(table: impl ToString) -> Self {
        Self::Timeout {
            table: table.to_string(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
