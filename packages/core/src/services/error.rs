//! Service Layer Error Types
//!
//! Errors returned by the block, sync, history, workspace and migration
//! services. Persistence and validation failures chain through unchanged.

use crate::db::StoreError;
use crate::models::ValidationError;
use thiserror::Error;

/// Service operation errors
#[derive(Error, Debug)]
pub enum KeyThoughtsError {
    /// Block not found by ID
    #[error("Block not found: {id}")]
    BlockNotFound { id: String },

    /// Page not found by ID
    #[error("Page not found: {id}")]
    PageNotFound { id: String },

    /// Project not found by ID
    #[error("Project not found: {id}")]
    ProjectNotFound { id: String },

    /// Block validation failed
    #[error("Block validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    /// Persistence call failed
    #[error("Persistence call failed: {0}")]
    Store(#[from] StoreError),

    /// One upsert batch of a multi-batch write failed. Earlier batches stay applied.
    #[error("Batch {} of {total_batches} failed after {applied_batches} applied: {source}", .applied_batches + 1)]
    BatchFailed {
        applied_batches: usize,
        total_batches: usize,
        #[source]
        source: StoreError,
    },

    /// No signed-in user for the operation
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Rollback requested but no legacy archive exists
    #[error("No legacy backup found for user {user_id}")]
    BackupMissing { user_id: String },

    /// The last page or project of its container cannot be deleted
    #[error("Cannot delete the last {kind}")]
    LastItemProtected { kind: &'static str },

    /// A snapshot entry did not hold a serialized tree
    #[error("Invalid snapshot in history entry {id}: {reason}")]
    InvalidSnapshot { id: String, reason: String },

    /// Sync could not start because another one holds the scope
    #[error("Sync already in flight for scope {scope}")]
    SyncInFlight { scope: String },

    /// Stored or legacy JSON that does not decode; retrying cannot help
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// Rejected input (empty name, unknown id in a reorder)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl KeyThoughtsError {
    /// Create a block not found error
    pub fn block_not_found(id: impl Into<String>) -> Self {
        Self::BlockNotFound { id: id.into() }
    }

    /// Create a page not found error
    pub fn page_not_found(id: impl Into<String>) -> Self {
        Self::PageNotFound { id: id.into() }
    }

    /// Create a project not found error
    pub fn project_not_found(id: impl Into<String>) -> Self {
        Self::ProjectNotFound { id: id.into() }
    }

    pub fn batch_failed(applied_batches: usize, total_batches: usize, source: StoreError) -> Self {
        Self::BatchFailed {
            applied_batches,
            total_batches,
            source,
        }
    }

    pub fn backup_missing(user_id: impl Into<String>) -> Self {
        Self::BackupMissing {
            user_id: user_id.into(),
        }
    }

    pub fn last_page() -> Self {
        Self::LastItemProtected { kind: "page" }
    }

    pub fn last_project() -> Self {
        Self::LastItemProtected { kind: "project" }
    }

    pub fn invalid_snapshot(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSnapshot {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn sync_in_flight(scope: impl ToString) -> Self {
        Self::SyncInFlight {
            scope: scope.to_string(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn malformed_document(reason: impl ToString) -> Self {
        Self::MalformedDocument(reason.to_string())
    }

    /// Whether the failure came from persistence I/O and may succeed on retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(StoreError::Serialization(_)) => false,
            Self::Store(_) => true,
            Self::BatchFailed { source, .. } => !matches!(source, StoreError::Serialization(_)),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for KeyThoughtsError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed_document(err)
    }
}

pub type Result<T, E = KeyThoughtsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_failures_are_transient() {
        assert!(KeyThoughtsError::from(StoreError::timeout("blocks")).is_transient());
        assert!(KeyThoughtsError::batch_failed(1, 3, StoreError::rejected("blocks", "offline")).is_transient());
    }

    #[test]
    fn data_errors_are_not_transient() {
        let parse = serde_json::from_str::<Vec<u8>>("{oops").unwrap_err();
        let err = KeyThoughtsError::from(parse);
        assert!(matches!(err, KeyThoughtsError::MalformedDocument(_)));
        assert!(!err.is_transient());

        assert!(!KeyThoughtsError::from(StoreError::serialization("bad row")).is_transient());
        assert!(!KeyThoughtsError::block_not_found("x").is_transient());
    }
}
