//! KeyThoughts Core
//!
//! Block tree reconciliation, persistence sync and data migration for the
//! KeyThoughts outliner.
//!
//! # Architecture
//!
//! - **Flat rows, nested editor**: blocks are stored one row per block with a
//!   parent link and sibling position, and edited as a nested forest
//! - **Reconcile, don't diff**: a save flattens the whole forest, mints durable
//!   ids for client-local ones, upserts in batches and deletes stale rows
//! - **Pluggable storage**: every service consumes a [`db::PersistenceService`];
//!   [`db::InMemoryStore`] implements it in-process
//!
//! # Modules
//!
//! - [`models`] - Block, page, project and history data structures
//! - [`tree`] - Tree building, flattening, reference enrichment and the editable [`tree::Forest`]
//! - [`services`] - Sync, block CRUD, history, workspace and migration services
//! - [`db`] - The persistence capability and its in-memory implementation
//! - [`config`] - Tunables, from defaults or the environment
//! - [`logging`] - tracing subscriber setup for binaries and tools

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod services;
pub mod tree;
pub mod utils;

// Re-export commonly used types
pub use config::KeyThoughtsConfig;
pub use models::*;
pub use services::*;
