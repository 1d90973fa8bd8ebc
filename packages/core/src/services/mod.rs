//! Business Services
//!
//! This module contains the services the editor talks to:
//!
//! - `SyncService` - whole-forest reconciliation against the `blocks` table
//! - `SyncCoordinator` - debounced, single-flight saves per page
//! - `BlockService` - row-level block CRUD, references and moves
//! - `HistoryService` - content history, manual snapshots and restore
//! - `WorkspaceService` - projects and pages
//! - `MigrationService` - legacy JSON document to block rows, with validate and rollback
//!
//! Every service takes the persistence capability as an
//! `Arc<dyn PersistenceService>` so tests can run against the in-memory store.

pub mod block_service;
pub mod error;
pub mod history_service;
pub mod migration_service;
pub mod sync_coordinator;
pub mod sync_service;
pub mod workspace_service;

pub use block_service::{BlockPatch, BlockService, NewBlock};
pub use error::{KeyThoughtsError, Result};
pub use history_service::{HistoryService, RestoreOutcome};
pub use migration_service::{
    MigrationOutcome, MigrationService, ValidationFailure, ValidationReport, BACKUP_KEY,
    LEGACY_BLOCKS_KEY, MIGRATION_COMPLETED_KEY,
};
pub use sync_coordinator::{SharedForest, SyncCoordinator, SyncOutcome};
pub use sync_service::{SyncReport, SyncService};
pub use workspace_service::{WorkspaceService, UNTITLED_PAGE_NAME, UNTITLED_PROJECT_NAME};
