//! Projects and pages
//!
//! A project owns an ordered list of pages; a page owns one block forest.
//! Both are ordered among their siblings by a zero-based `position`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name given to the project created for a user with none
pub const DEFAULT_PROJECT_NAME: &str = "My Project";

/// Name given to the page created for a project with none
pub const DEFAULT_PAGE_NAME: &str = "Main";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub position: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, position: i64) -> Self {
        let now = Utc::now();
        Self {
            id: crate::utils::identity::new_id(),
            user_id: user_id.into(),
            name: name.into(),
            position,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub name: String,
    pub position: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn new(
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        name: impl Into<String>,
        position: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::utils::identity::new_id(),
            user_id: user_id.into(),
            project_id: project_id.into(),
            name: name.into(),
            position,
            created_at: now,
            updated_at: now,
        }
    }
}
