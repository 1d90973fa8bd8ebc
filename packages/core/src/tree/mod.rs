//! Tree ⇄ row reconciliation
//!
//! - [`enricher`] - resolve reference blocks against the loaded record set
//! - [`builder`] - flat rows → nested forest, tolerant of malformed data
//! - [`flattener`] - nested forest → rows with durable ids, positions and depths
//! - [`forest`] - arena forest the editor mutates in place
//!
//! Walks over nested [`TreeBlock`](crate::models::TreeBlock)s recurse once per
//! level. Trees built from rows are capped at [`MAX_TREE_DEPTH`]; legacy JSON
//! is bounded by serde_json's nesting limit before it reaches the flattener.

pub mod builder;
pub mod enricher;
pub mod flattener;
pub mod forest;

pub use builder::{build_tree, MAX_TREE_DEPTH};
pub use enricher::{enrich, enrich_with_placeholder, ORIGINAL_NOT_FOUND};
pub use flattener::{
    count_legacy, flatten, flatten_forest, flatten_legacy, recompute_depths, IdRemap,
};
pub use forest::Forest;
