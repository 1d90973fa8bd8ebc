//! Block history entries (`block_history` table)
//!
//! Entries are append-only. A content change names its block; a manual
//! snapshot has no block and stores the whole serialized tree in
//! `content_after`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Update,
    ManualSnapshot,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::ManualSnapshot => "manual_snapshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(default)]
    pub block_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub page_id: Option<String>,
    #[serde(default)]
    pub content_before: Option<String>,
    #[serde(default)]
    pub content_after: Option<String>,
    pub action: HistoryAction,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn is_snapshot(&self) -> bool {
        self.block_id.is_none() && self.action == HistoryAction::ManualSnapshot
    }
}
