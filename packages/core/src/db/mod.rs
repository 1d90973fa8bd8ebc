//! Persistence Layer
//!
//! The core never talks to the hosted backend directly. It consumes a
//! [`PersistenceService`] capability (select / insert / update / delete /
//! upsert over logical tables) that is passed in by the application:
//!
//! - [`PersistenceService`] - the capability trait and its query vocabulary
//! - [`InMemoryStore`] - a complete in-process implementation for tests and tooling
//! - [`StoreError`] - transient failures reported by any implementation

mod error;
mod memory_store;
pub mod persistence;

pub use error::StoreError;
pub use memory_store::{InMemoryStore, StoreCall, StoreOperation};
pub use persistence::{from_rows, to_row, Filter, OrderBy, PersistenceService, Query, Row, Table};
