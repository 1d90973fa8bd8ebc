//! Runtime configuration for the block services
use crate::tree::ORIGINAL_NOT_FOUND;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on rows per upsert call accepted by the hosted backend
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 1000;

/// Tunables shared by sync, history and migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyThoughtsConfig {
    /// Rows per upsert/insert call
    pub upsert_batch_size: usize,

    /// Quiet period after the last edit before a sync starts
    pub debounce_ms: u64,

    /// History entries older than this are removed by cleanup
    pub history_retention_days: i64,

    /// Maximum history entries returned by a listing
    pub history_fetch_limit: usize,

    /// Text shown for a reference whose original is not loaded
    pub reference_not_found_placeholder: String,
}

impl Default for KeyThoughtsConfig {
    fn default() -> Self {
        Self {
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            debounce_ms: 1000,
            history_retention_days: 30,
            history_fetch_limit: 100,
            reference_not_found_placeholder: ORIGINAL_NOT_FOUND.to_string(),
        }
    }
}

impl KeyThoughtsConfig {
    /// Defaults overlaid with `KEYTHOUGHTS_*` environment variables.
    ///
    /// Recognized: `KEYTHOUGHTS_UPSERT_BATCH_SIZE`, `KEYTHOUGHTS_DEBOUNCE_MS`,
    /// `KEYTHOUGHTS_HISTORY_RETENTION_DAYS`, `KEYTHOUGHTS_HISTORY_FETCH_LIMIT`,
    /// `KEYTHOUGHTS_REFERENCE_PLACEHOLDER`. Unparseable values keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut config = Self {
            upsert_batch_size: parse_or(&lookup, "KEYTHOUGHTS_UPSERT_BATCH_SIZE", defaults.upsert_batch_size),
            debounce_ms: parse_or(&lookup, "KEYTHOUGHTS_DEBOUNCE_MS", defaults.debounce_ms),
            history_retention_days: parse_or(
                &lookup,
                "KEYTHOUGHTS_HISTORY_RETENTION_DAYS",
                defaults.history_retention_days,
            ),
            history_fetch_limit: parse_or(&lookup, "KEYTHOUGHTS_HISTORY_FETCH_LIMIT", defaults.history_fetch_limit),
            reference_not_found_placeholder: lookup("KEYTHOUGHTS_REFERENCE_PLACEHOLDER")
                .unwrap_or(defaults.reference_not_found_placeholder),
        };

        if config.upsert_batch_size == 0 {
            tracing::warn!("KEYTHOUGHTS_UPSERT_BATCH_SIZE must be positive; using {}", DEFAULT_UPSERT_BATCH_SIZE);
            config.upsert_batch_size = DEFAULT_UPSERT_BATCH_SIZE;
        } else if config.upsert_batch_size > DEFAULT_UPSERT_BATCH_SIZE {
            tracing::warn!(
                "KEYTHOUGHTS_UPSERT_BATCH_SIZE {} exceeds the backend limit; using {}",
                config.upsert_batch_size,
                DEFAULT_UPSERT_BATCH_SIZE
            );
            config.upsert_batch_size = DEFAULT_UPSERT_BATCH_SIZE;
        }
        config
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Batch size actually used; between 1 and the backend limit
    pub fn batch_size(&self) -> usize {
        self.upsert_batch_size.clamp(1, DEFAULT_UPSERT_BATCH_SIZE)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Invalid value '{}' for {}; using {}", raw, key, default);
                default
            }
        },
    }
}
