//! Block Service - single-block operations
//!
//! Targeted writes used by the editor between whole-forest saves: create,
//! edit, delete, move, and reference creation. Each operation loads the
//! scope's rows once, validates against that snapshot, then issues the
//! smallest set of writes.
//!
//! # Business Rules
//!
//! - Sibling positions stay zero-based and gap-free in every list an
//!   operation touches
//! - Depth is derived from the parent chain, never taken from the caller
//! - A reference row never receives content; edits go to its original
//! - A reference may only point at a plain block (no chains)

use crate::config::KeyThoughtsConfig;
use crate::db::{from_rows, to_row, Filter, PersistenceService, Query, Row, Table};
use crate::models::{BlockRecord, BlockScope, TreeBlock, ValidationError, DEFAULT_BLOCK_TYPE};
use crate::services::error::{KeyThoughtsError, Result};
use crate::services::sync_service::{scope_filters, upsert_in_batches, SyncService};
use crate::tree::{build_tree, enrich_with_placeholder};
use crate::utils::identity::new_id;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Fields for a new block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBlock {
    pub content: String,
    pub parent_id: Option<String>,
    /// Index among the new siblings; `None` appends
    pub position: Option<usize>,
    pub block_type: Option<String>,
}

impl NewBlock {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Partial update of a block. `None` leaves the column alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockPatch {
    pub content: Option<String>,
    pub is_open: Option<bool>,
    pub block_type: Option<String>,
}

impl BlockPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.is_open.is_none() && self.block_type.is_none()
    }
}

/// Rows of one scope, indexed for validation
struct ScopeRows {
    by_id: HashMap<String, BlockRecord>,
}

impl ScopeRows {
    fn new(records: Vec<BlockRecord>) -> Self {
        Self {
            by_id: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    fn get(&self, id: &str) -> Result<&BlockRecord> {
        self.by_id
            .get(id)
            .ok_or_else(|| KeyThoughtsError::block_not_found(id))
    }

    /// Children of `parent` (`None` = roots) in position order
    fn children(&self, parent: Option<&str>) -> Vec<&BlockRecord> {
        let mut children: Vec<&BlockRecord> = self
            .by_id
            .values()
            .filter(|r| r.parent_id.as_deref() == parent)
            .collect();
        children.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        children
    }

    /// Depth of a block placed under `parent`
    fn depth_under(&self, parent: Option<&str>) -> u32 {
        let mut depth = 0;
        let mut current = parent;
        while let Some(id) = current {
            depth += 1;
            current = self.by_id.get(id).and_then(|r| r.parent_id.as_deref());
            if depth as usize > self.by_id.len() {
                break;
            }
        }
        depth
    }

    fn is_ancestor_or_self(&self, ancestor: &str, of: Option<&str>) -> bool {
        let mut current = of;
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.by_id.len() {
                break;
            }
            current = self.by_id.get(id).and_then(|r| r.parent_id.as_deref());
        }
        false
    }

    /// Every row below `id`. Rows in a parent cycle are visited once.
    fn descendants(&self, id: &str) -> Vec<&BlockRecord> {
        let mut out = Vec::new();
        let mut visited: HashSet<&str> = HashSet::from([id]);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for child in self.children(Some(current)) {
                if visited.insert(child.id.as_str()) {
                    out.push(child);
                    stack.push(child.id.as_str());
                }
            }
        }
        out
    }
}

/// Renumber `order` to `0..n` under `parent` with `depth`; collect changed rows
fn renumber(
    order: Vec<BlockRecord>,
    parent: Option<&str>,
    depth: u32,
    changed: &mut Vec<BlockRecord>,
) {
    for (index, mut record) in order.into_iter().enumerate() {
        let position = index as i64;
        let parent = parent.map(str::to_string);
        if record.position != position || record.parent_id != parent || record.depth != depth {
            record.position = position;
            record.parent_id = parent;
            record.depth = depth;
            changed.push(record);
        }
    }
}

pub struct BlockService {
    store: Arc<dyn PersistenceService>,
    config: KeyThoughtsConfig,
    sync: SyncService,
}

impl BlockService {
    pub fn new(store: Arc<dyn PersistenceService>, config: KeyThoughtsConfig) -> Self {
        let sync = SyncService::new(store.clone(), config.clone());
        Self { store, config, sync }
    }

    async fn load(&self, scope: &BlockScope) -> Result<ScopeRows> {
        Ok(ScopeRows::new(self.sync.load_records(scope).await?))
    }

    async fn write_rows(&self, records: &[BlockRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let rows = records.iter().map(to_row).collect::<std::result::Result<Vec<Row>, _>>()?;
        upsert_in_batches(self.store.as_ref(), Table::Blocks, rows, self.config.batch_size()).await?;
        Ok(())
    }

    /// Load the scope's forest. An empty scope gets one stored empty root block.
    pub async fn fetch_tree(&self, scope: &BlockScope) -> Result<Vec<TreeBlock>> {
        let records = self.sync.load_records(scope).await?;
        if !records.is_empty() {
            let enriched = enrich_with_placeholder(records, &self.config.reference_not_found_placeholder);
            return Ok(build_tree(enriched));
        }

        tracing::info!("No blocks for {}; creating an empty root block", scope);
        let root = BlockRecord::new(new_id(), None, 0).in_scope(scope);
        self.store.insert(Table::Blocks, vec![to_row(&root)?]).await?;
        Ok(vec![TreeBlock::new(root.id, "")])
    }

    /// Create a plain block. Later siblings shift right to make room.
    pub async fn create_block(&self, scope: &BlockScope, block: NewBlock) -> Result<BlockRecord> {
        let rows = self.load(scope).await?;
        let parent = block.parent_id.as_deref();
        if let Some(parent_id) = parent {
            rows.get(parent_id)?;
        }

        let mut record = BlockRecord::new(new_id(), block.parent_id.clone(), 0)
            .with_content(block.content)
            .in_scope(scope);
        if let Some(block_type) = block.block_type.filter(|t| !t.is_empty()) {
            record.block_type = block_type;
        }
        self.place(scope, &rows, record, parent, block.position).await
    }

    /// Create a reference to `original_id` (which must be a plain block the user owns)
    pub async fn create_reference_block(
        &self,
        scope: &BlockScope,
        original_id: &str,
        parent_id: Option<&str>,
        position: Option<usize>,
    ) -> Result<BlockRecord> {
        let original = self.find_owned(scope, original_id).await?;
        if original.is_reference {
            return Err(ValidationError::ChainedReference {
                target_id: original_id.to_string(),
            }
            .into());
        }

        let rows = self.load(scope).await?;
        if let Some(parent_id) = parent_id {
            rows.get(parent_id)?;
        }

        let mut record = BlockRecord::new(new_id(), parent_id.map(str::to_string), 0).in_scope(scope);
        record.is_reference = true;
        record.original_block_id = Some(original_id.to_string());
        self.place(scope, &rows, record, parent_id, position).await
    }

    async fn place(
        &self,
        scope: &BlockScope,
        rows: &ScopeRows,
        mut record: BlockRecord,
        parent: Option<&str>,
        position: Option<usize>,
    ) -> Result<BlockRecord> {
        let siblings: Vec<BlockRecord> = rows.children(parent).into_iter().cloned().collect();
        let index = position.unwrap_or(siblings.len()).min(siblings.len());
        let depth = rows.depth_under(parent);

        record.position = index as i64;
        record.depth = depth;

        let mut shifted = Vec::new();
        let mut order = siblings;
        order.insert(index, record.clone());
        renumber(order, parent, depth, &mut shifted);
        shifted.retain(|r| r.id != record.id);

        self.store.insert(Table::Blocks, vec![to_row(&record)?]).await?;
        self.write_rows(&shifted).await?;
        tracing::debug!("Created block {} in {} at {}", record.id, scope, index);
        Ok(record)
    }

    /// Block `id` owned by the scope's user, on any page
    async fn find_owned(&self, scope: &BlockScope, id: &str) -> Result<BlockRecord> {
        let rows = self
            .store
            .select(
                Table::Blocks,
                &Query::new().eq("id", id).eq("user_id", scope.user_id.as_str()).limit(1),
            )
            .await?;
        from_rows::<BlockRecord>(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| KeyThoughtsError::block_not_found(id))
    }

    /// Apply `patch` to block `id`.
    ///
    /// Content written to a reference goes to its original instead; the
    /// reference's own row only takes `is_open` and `block_type`. Returns the
    /// id of the row whose content changed, if any.
    pub async fn update_block(&self, scope: &BlockScope, id: &str, patch: BlockPatch) -> Result<Option<String>> {
        let record = self.find_owned(scope, id).await?;
        let now = Value::String(Utc::now().to_rfc3339());

        let mut own = serde_json::Map::new();
        if let Some(is_open) = patch.is_open {
            own.insert("is_open".into(), Value::Bool(is_open));
        }
        if let Some(block_type) = patch.block_type {
            let block_type = if block_type.is_empty() {
                DEFAULT_BLOCK_TYPE.to_string()
            } else {
                block_type
            };
            own.insert("type".into(), Value::String(block_type));
        }

        let mut content_target = None;
        if let Some(content) = patch.content {
            match record.reference_target() {
                Some(original_id) => {
                    tracing::debug!("Redirecting write on reference {} to original {}", id, original_id);
                    let original = self.find_owned(scope, original_id).await?;
                    self.store
                        .update(
                            Table::Blocks,
                            row_of(json!({ "content": content, "updated_at": now.clone() })),
                            &[Filter::eq("id", original.id.as_str())],
                        )
                        .await?;
                    content_target = Some(original.id);
                }
                None => {
                    own.insert("content".into(), Value::String(content));
                    content_target = Some(record.id.clone());
                }
            }
        }

        if !own.is_empty() {
            own.insert("updated_at".into(), now);
            self.store
                .update(Table::Blocks, own, &[Filter::eq("id", id)])
                .await?;
        }
        Ok(content_target)
    }

    /// Delete block `id` and its descendants; returns how many rows went away
    pub async fn delete_block(&self, scope: &BlockScope, id: &str) -> Result<usize> {
        let rows = self.load(scope).await?;
        let record = rows.get(id)?;

        let mut doomed: Vec<String> = vec![record.id.clone()];
        doomed.extend(rows.descendants(id).into_iter().map(|r| r.id.clone()));
        let removed = doomed.len();

        let mut filters = scope_filters(scope);
        filters.push(Filter::any_of("id", doomed));
        self.store.delete(Table::Blocks, &filters).await?;

        let parent = record.parent_id.as_deref();
        let remaining: Vec<BlockRecord> = rows
            .children(parent)
            .into_iter()
            .filter(|r| r.id != id)
            .cloned()
            .collect();
        let mut changed = Vec::new();
        renumber(remaining, parent, rows.depth_under(parent), &mut changed);
        self.write_rows(&changed).await?;

        tracing::debug!("Deleted block {} and {} descendants", id, removed - 1);
        Ok(removed)
    }

    /// Move block `id` under `new_parent` at index `new_position`.
    ///
    /// Rejects moves into the block's own subtree. Depth of the moved subtree
    /// follows the new parent; both sibling lists are renumbered.
    pub async fn move_block(
        &self,
        scope: &BlockScope,
        id: &str,
        new_parent: Option<&str>,
        new_position: usize,
    ) -> Result<BlockRecord> {
        let rows = self.load(scope).await?;
        let moving = rows.get(id)?.clone();
        if let Some(parent_id) = new_parent {
            rows.get(parent_id)?;
            if rows.is_ancestor_or_self(id, Some(parent_id)) {
                return Err(ValidationError::Cycle {
                    block_id: id.to_string(),
                    parent_id: parent_id.to_string(),
                }
                .into());
            }
        }

        let old_parent = moving.parent_id.clone();
        let mut changed = Vec::new();

        if old_parent.as_deref() != new_parent {
            let remaining: Vec<BlockRecord> = rows
                .children(old_parent.as_deref())
                .into_iter()
                .filter(|r| r.id != id)
                .cloned()
                .collect();
            renumber(remaining, old_parent.as_deref(), rows.depth_under(old_parent.as_deref()), &mut changed);
        }

        let mut order: Vec<BlockRecord> = rows
            .children(new_parent)
            .into_iter()
            .filter(|r| r.id != id)
            .cloned()
            .collect();
        let index = new_position.min(order.len());
        order.insert(index, moving.clone());
        let depth = rows.depth_under(new_parent);
        renumber(order, new_parent, depth, &mut changed);

        let first_child_depth = rows.depth_under(Some(id));
        for descendant in rows.descendants(id) {
            let below = rows
                .depth_under(descendant.parent_id.as_deref())
                .saturating_sub(first_child_depth);
            let new_depth = depth + 1 + below;
            if descendant.depth != new_depth {
                let mut descendant = descendant.clone();
                descendant.depth = new_depth;
                changed.push(descendant);
            }
        }

        self.write_rows(&changed).await?;

        let moved = changed
            .into_iter()
            .find(|r| r.id == id)
            .unwrap_or(moving);
        tracing::debug!(
            "Moved block {} under {:?} at {}",
            id,
            new_parent,
            moved.position
        );
        Ok(moved)
    }
}

fn row_of(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
