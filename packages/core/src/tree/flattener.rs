//! Tree flattening: nested forest → flat rows
//!
//! Flattening runs in three passes over the forest, always depth-first with a
//! parent before its children:
//!
//! 1. [`recompute_depths`] - depth is `parent + 1`, roots are 0
//! 2. [`IdRemap::build`] - every node gets its durable id; ephemeral ids (and
//!    repeats of an id already seen) are replaced by freshly minted ones
//! 3. [`flatten`] - one row per node, `position` taken from a per-parent
//!    counter so each sibling list becomes `0..n`
//!
//! The remap table is complete before pass 3 starts because reference
//! targets may point at nodes visited later. After a successful save the same
//! table is written back into the tree with [`IdRemap::apply`], so the next
//! save sees durable ids only.
//!
//! [`flatten_legacy`] is the same walk over the legacy single-document JSON,
//! minting a new id for every node.

use crate::models::{BlockBody, BlockRecord, BlockScope, LegacyBlock, TreeBlock, DEFAULT_BLOCK_TYPE};
use crate::utils::identity::{is_durable, new_id};
use std::collections::{HashMap, HashSet};

/// Assign depth top-down, overriding whatever the nodes carried
pub fn recompute_depths(forest: &mut [TreeBlock]) {
    fn walk(nodes: &mut [TreeBlock], depth: u32) {
        for node in nodes {
            node.depth = depth;
            walk(&mut node.children, depth + 1);
        }
    }
    walk(forest, 0);
}

/// Durable id for every node of one forest, in depth-first preorder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRemap {
    assigned: Vec<String>,
    by_old: HashMap<String, String>,
    minted: usize,
}

impl IdRemap {
    pub fn build(forest: &[TreeBlock]) -> Self {
        let mut remap = Self::default();
        let mut taken: HashSet<String> = HashSet::new();
        remap.collect(forest, &mut taken);
        remap
    }

    fn collect(&mut self, nodes: &[TreeBlock], taken: &mut HashSet<String>) {
        for node in nodes {
            let id = if is_durable(&node.id) && !taken.contains(&node.id) {
                node.id.clone()
            } else {
                self.minted += 1;
                new_id()
            };
            taken.insert(id.clone());
            self.by_old.entry(node.id.clone()).or_insert_with(|| id.clone());
            self.assigned.push(id);
            self.collect(&node.children, taken);
        }
    }

    /// Durable id for an id as it appeared in the forest (first occurrence wins)
    pub fn resolve(&self, old_id: &str) -> Option<&str> {
        self.by_old.get(old_id).map(String::as_str)
    }

    /// Number of nodes that received a newly minted id
    pub fn minted(&self) -> usize {
        self.minted
    }

    /// `(old, durable)` pairs for ids that changed
    pub fn renamed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_old
            .iter()
            .filter(|(old, new)| old != new)
            .map(|(old, new)| (old.as_str(), new.as_str()))
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    /// Rewrite the ids of the forest this table was built from
    pub fn apply(&self, forest: &mut [TreeBlock]) {
        let mut ids = self.assigned.iter();
        self.apply_to(forest, &mut ids);
    }

    fn apply_to<'a>(&'a self, nodes: &mut [TreeBlock], ids: &mut impl Iterator<Item = &'a String>) {
        for node in nodes {
            let Some(id) = ids.next() else {
                tracing::warn!("Id remap is shorter than the forest it is applied to");
                return;
            };
            node.id = id.clone();
            if let BlockBody::Reference { original_id, .. } = &mut node.body {
                if let Some(durable) = self.by_old.get(original_id.as_str()) {
                    *original_id = durable.clone();
                }
            }
            self.apply_to(&mut node.children, ids);
        }
    }
}

/// Next free sibling position per parent. Roots share the `None` key, which
/// can never collide with a block id.
#[derive(Debug, Default)]
struct PositionCounter(HashMap<Option<String>, i64>);

impl PositionCounter {
    fn next(&mut self, parent_id: Option<&str>) -> i64 {
        let counter = self.0.entry(parent_id.map(str::to_string)).or_insert(0);
        let position = *counter;
        *counter += 1;
        position
    }
}

/// Emit one row per node using the ids from `remap`.
///
/// Reference rows are written with empty content: their text lives on the
/// original. Depth is taken from the nodes, so run [`recompute_depths`] first.
pub fn flatten(forest: &[TreeBlock], remap: &IdRemap, scope: &BlockScope) -> Vec<BlockRecord> {
    let mut records = Vec::with_capacity(remap.len());
    let mut positions = PositionCounter::default();
    let mut ids = remap.assigned.iter();
    flatten_into(forest, None, remap, &mut ids, &mut positions, scope, &mut records);
    records
}

fn flatten_into<'a>(
    nodes: &[TreeBlock],
    parent_id: Option<&str>,
    remap: &'a IdRemap,
    ids: &mut impl Iterator<Item = &'a String>,
    positions: &mut PositionCounter,
    scope: &BlockScope,
    out: &mut Vec<BlockRecord>,
) {
    for node in nodes {
        let Some(id) = ids.next() else {
            tracing::warn!("Id remap is shorter than the forest being flattened");
            return;
        };

        let (content, is_reference, original_block_id) = match &node.body {
            BlockBody::Content { content } => (content.clone(), false, None),
            BlockBody::Reference { original_id, .. } => {
                let original = remap.resolve(original_id).unwrap_or(original_id);
                (String::new(), true, Some(original.to_string()))
            }
        };

        let block_type = if node.block_type.is_empty() {
            DEFAULT_BLOCK_TYPE.to_string()
        } else {
            node.block_type.clone()
        };

        out.push(BlockRecord {
            id: id.clone(),
            user_id: Some(scope.user_id.clone()),
            page_id: scope.page_id.clone(),
            content,
            block_type,
            parent_id: parent_id.map(str::to_string),
            position: positions.next(parent_id),
            depth: node.depth,
            is_open: node.is_open,
            is_reference,
            original_block_id,
        });

        flatten_into(&node.children, Some(id.as_str()), remap, ids, positions, scope, out);
    }
}

/// Recompute depths, remap ids and flatten in one go
pub fn flatten_forest(forest: &mut [TreeBlock], scope: &BlockScope) -> (Vec<BlockRecord>, IdRemap) {
    recompute_depths(forest);
    let remap = IdRemap::build(forest);
    let records = flatten(forest, &remap, scope);
    (records, remap)
}

/// Flatten a legacy document into fresh rows. Legacy data has no references.
pub fn flatten_legacy(document: &[LegacyBlock], scope: &BlockScope) -> Vec<BlockRecord> {
    fn walk(
        nodes: &[LegacyBlock],
        parent_id: Option<&str>,
        depth: u32,
        positions: &mut PositionCounter,
        scope: &BlockScope,
        out: &mut Vec<BlockRecord>,
    ) {
        for node in nodes {
            let id = new_id();
            out.push(BlockRecord {
                id: id.clone(),
                user_id: Some(scope.user_id.clone()),
                page_id: scope.page_id.clone(),
                content: node.content.clone().unwrap_or_default(),
                block_type: node
                    .block_type
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_BLOCK_TYPE.to_string()),
                parent_id: parent_id.map(str::to_string),
                position: positions.next(parent_id),
                depth,
                is_open: node.is_open.unwrap_or(true),
                is_reference: false,
                original_block_id: None,
            });
            if let Some(children) = &node.children {
                walk(children, Some(&id), depth + 1, positions, scope, out);
            }
        }
    }

    let mut records = Vec::new();
    let mut positions = PositionCounter::default();
    walk(document, None, 0, &mut positions, scope, &mut records);
    records
}

/// Total node count of a legacy document, nested children included
pub fn count_legacy(document: &[LegacyBlock]) -> usize {
    document
        .iter()
        .map(|node| 1 + node.children.as_deref().map(count_legacy).unwrap_or(0))
        .sum()
}
