//! Data Models
//!
//! This module contains the data structures shared by every layer:
//!
//! - `BlockRecord` / `TreeBlock` - flat and nested shapes of an outline block
//! - `Project` / `Page` - the containers a block forest lives in
//! - `HistoryEntry` - append-only content changes and manual snapshots

mod block;
mod history;
mod workspace;

pub use block::{
    forest_len, BlockBody, BlockRecord, BlockScope, EnrichedBlock, LegacyBlock, TreeBlock,
    ValidationError, DEFAULT_BLOCK_TYPE,
};
pub use history::{HistoryAction, HistoryEntry};
pub use workspace::{Page, Project, DEFAULT_PAGE_NAME, DEFAULT_PROJECT_NAME};
