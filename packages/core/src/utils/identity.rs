//! Block identity
//!
//! Durable ids are random (v4) UUIDs in canonical hyphenated form. Anything
//! else is an ephemeral id: a client-side placeholder (the legacy editor used
//! millisecond timestamps) that must be replaced before a block is persisted.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

// Exact 8-4-4-4-12 grouping of hex digits, either case
const DURABLE_ID_PATTERN: &str =
    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";

/// Mint a new durable block id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Whether `id` is already in durable form
///
/// # Examples
///
/// ```
/// # use keythoughts_core::utils::identity::is_durable;
/// assert!(is_durable("550e8400-e29b-41d4-a716-446655440000"));
/// assert!(!is_durable("1700000000000"));
/// assert!(!is_durable("{550e8400-e29b-41d4-a716-446655440000}"));
/// ```
pub fn is_durable(id: &str) -> bool {
    static DURABLE_ID_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = DURABLE_ID_REGEX.get_or_init(|| Regex::new(DURABLE_ID_PATTERN).unwrap());
    regex.is_match(id)
}
