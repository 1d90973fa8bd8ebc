//! Block Data Structures
//!
//! A block is one outline node on a page. It exists in three shapes:
//!
//! - [`BlockRecord`] - the flat, persisted row (`blocks` table), carrying `parent_id`
//! - [`EnrichedBlock`] - a record paired with its resolved [`BlockBody`] (reference
//!   blocks project the content of their original)
//! - [`TreeBlock`] - the in-memory nested node, owning its `children`
//!
//! The row shape uses snake_case column names. The tree shape serializes with
//! camelCase keys because it is what manual snapshots store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Block type used when none is given. Only toggles exist today.
pub const DEFAULT_BLOCK_TYPE: &str = "toggle";

fn default_block_type() -> String {
    DEFAULT_BLOCK_TYPE.to_string()
}

fn default_true() -> bool {
    true
}

/// Validation errors for block operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid block ID format: {0}")]
    InvalidId(String),

    #[error("Block '{0}' cannot reference itself")]
    SelfReference(String),

    #[error("Block '{target_id}' is itself a reference and cannot be referenced")]
    ChainedReference { target_id: String },

    #[error("Moving block '{block_id}' under '{parent_id}' would create a cycle")]
    Cycle { block_id: String, parent_id: String },

    #[error("Reference blocks cannot be written to directly: {0}")]
    ReferenceWrite(String),
}

/// Persistence scope for blocks: one user's page.
///
/// `page_id = None` addresses every block the user owns, which is the scope
/// the legacy migration operates in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockScope {
    pub user_id: String,
    pub page_id: Option<String>,
}

impl BlockScope {
    pub fn page(user_id: impl Into<String>, page_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            page_id: Some(page_id.into()),
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            page_id: None,
        }
    }
}

impl std::fmt::Display for BlockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.page_id {
            Some(page_id) => write!(f, "{}/{}", self.user_id, page_id),
            None => write!(f, "{}", self.user_id),
        }
    }
}

/// Flat block row as stored in the `blocks` table.
///
/// `depth` is carried for consumers that want it without building a tree, but
/// it is never trusted on load; the tree builder derives it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: String,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub page_id: Option<String>,

    #[serde(default)]
    pub content: String,

    #[serde(rename = "type", default = "default_block_type")]
    pub block_type: String,

    #[serde(default)]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub position: i64,

    #[serde(default)]
    pub depth: u32,

    #[serde(default = "default_true")]
    pub is_open: bool,

    #[serde(default)]
    pub is_reference: bool,

    #[serde(default)]
    pub original_block_id: Option<String>,
}

impl BlockRecord {
    /// Create a plain content row with defaults for everything but identity and placement
    pub fn new(id: impl Into<String>, parent_id: Option<String>, position: i64) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            page_id: None,
            content: String::new(),
            block_type: default_block_type(),
            parent_id,
            position,
            depth: 0,
            is_open: true,
            is_reference: false,
            original_block_id: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn in_scope(mut self, scope: &BlockScope) -> Self {
        self.user_id = Some(scope.user_id.clone());
        self.page_id = scope.page_id.clone();
        self
    }

    /// Target of this row when it is a usable reference
    pub fn reference_target(&self) -> Option<&str> {
        if self.is_reference {
            self.original_block_id.as_deref()
        } else {
            None
        }
    }
}

/// What a block displays.
///
/// A `Reference` never owns its text: `content` is a projection of the
/// original block, filled in by the reference enricher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BlockBody {
    Content {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Reference {
        original_id: String,
        content: String,
    },
}

impl BlockBody {
    pub fn content(content: impl Into<String>) -> Self {
        Self::Content {
            content: content.into(),
        }
    }

    /// Text to render, whether owned or projected
    pub fn display(&self) -> &str {
        match self {
            Self::Content { content } | Self::Reference { content, .. } => content,
        }
    }

    pub fn original_id(&self) -> Option<&str> {
        match self {
            Self::Content { .. } => None,
            Self::Reference { original_id, .. } => Some(original_id),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference { .. })
    }
}

impl Default for BlockBody {
    fn default() -> Self {
        Self::content("")
    }
}

/// A flat record paired with its resolved body.
///
/// The record is kept verbatim; only `body` reflects reference resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedBlock {
    pub record: BlockRecord,
    pub body: BlockBody,
}

impl From<BlockRecord> for EnrichedBlock {
    fn from(record: BlockRecord) -> Self {
        let body = BlockBody::content(record.content.clone());
        Self { record, body }
    }
}

/// In-memory tree node. Each node exclusively owns its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeBlock {
    pub id: String,

    #[serde(rename = "type", default = "default_block_type")]
    pub block_type: String,

    #[serde(default = "default_true")]
    pub is_open: bool,

    #[serde(default)]
    pub depth: u32,

    #[serde(flatten)]
    pub body: BlockBody,

    #[serde(default)]
    pub children: Vec<TreeBlock>,
}

impl TreeBlock {
    /// New open toggle with the given id and content and no children
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type: default_block_type(),
            is_open: true,
            depth: 0,
            body: BlockBody::content(content),
            children: Vec::new(),
        }
    }

    /// New reference node projecting `original_id`
    pub fn reference(id: impl Into<String>, original_id: impl Into<String>) -> Self {
        Self {
            body: BlockBody::Reference {
                original_id: original_id.into(),
                content: String::new(),
            },
            ..Self::new(id, "")
        }
    }

    /// Fresh empty root block with a durable id; the bootstrap tree for an empty page
    pub fn empty_root() -> Self {
        Self::new(crate::utils::identity::new_id(), "")
    }

    pub fn with_children(mut self, children: Vec<TreeBlock>) -> Self {
        self.children = children;
        self
    }

    pub fn content(&self) -> &str {
        self.body.display()
    }

    /// Number of nodes in this subtree, including self
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(TreeBlock::subtree_len).sum::<usize>()
    }
}

/// Total node count of a forest
pub fn forest_len(forest: &[TreeBlock]) -> usize {
    forest.iter().map(TreeBlock::subtree_len).sum()
}

/// Node of the legacy single-document JSON storage (`key_thoughts_blocks` setting).
///
/// Every field is optional because the legacy editor wrote whatever it had.
/// Legacy ids are ignored: migration mints fresh durable ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyBlock {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(rename = "type", default)]
    pub block_type: Option<String>,

    #[serde(default)]
    pub is_open: Option<bool>,

    #[serde(default)]
    pub children: Option<Vec<LegacyBlock>>,
}
