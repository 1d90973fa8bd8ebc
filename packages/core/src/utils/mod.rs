//! Utility functions for KeyThoughts Core
//!
//! This module provides common utility functions used across the codebase.

pub mod identity;

pub use identity::{is_durable, new_id};
