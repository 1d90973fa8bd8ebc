//! Editable block forest
//!
//! Flat arena storage for the tree a page editor works on: an id → node map
//! with explicit parent links and ordered child lists. Edits happen in place;
//! the nested [`TreeBlock`] shape is produced only when a consumer needs a
//! snapshot (sync, manual history snapshot).

use crate::models::{BlockBody, TreeBlock, ValidationError};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ForestNode {
    block_type: String,
    is_open: bool,
    body: BlockBody,
    parent: Option<String>,
    children: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    nodes: HashMap<String, ForestNode>,
    roots: Vec<String>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a nested tree. Repeated ids keep their first occurrence.
    pub fn from_tree(tree: Vec<TreeBlock>) -> Self {
        let mut forest = Self::new();
        for node in tree {
            forest.adopt(node, None);
        }
        forest
    }

    fn adopt(&mut self, node: TreeBlock, parent: Option<&str>) {
        let TreeBlock {
            id,
            block_type,
            is_open,
            body,
            children,
            ..
        } = node;

        if self.nodes.contains_key(&id) {
            tracing::warn!("Ignoring repeated block id '{}' in forest", id);
            return;
        }

        match parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(parent_id) {
                    parent_node.children.push(id.clone());
                }
            }
            None => self.roots.push(id.clone()),
        }
        self.nodes.insert(
            id.clone(),
            ForestNode {
                block_type,
                is_open,
                body,
                parent: parent.map(str::to_string),
                children: Vec::new(),
            },
        );
        for child in children {
            self.adopt(child, Some(&id));
        }
    }

    /// Nested snapshot, depth filled in from the arena shape
    pub fn to_tree(&self) -> Vec<TreeBlock> {
        self.roots
            .iter()
            .filter_map(|id| self.snapshot(id, 0))
            .collect()
    }

    fn snapshot(&self, id: &str, depth: u32) -> Option<TreeBlock> {
        let node = self.nodes.get(id)?;
        Some(TreeBlock {
            id: id.to_string(),
            block_type: node.block_type.clone(),
            is_open: node.is_open,
            depth,
            body: node.body.clone(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.snapshot(child, depth + 1))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn children(&self, id: &str) -> Option<&[String]> {
        self.nodes.get(id).map(|n| n.children.as_slice())
    }

    pub fn parent(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).and_then(|n| n.parent.as_deref())
    }

    pub fn body(&self, id: &str) -> Option<&BlockBody> {
        self.nodes.get(id).map(|n| &n.body)
    }

    /// Number of ancestors above `id`
    pub fn depth_of(&self, id: &str) -> Option<u32> {
        let mut node = self.nodes.get(id)?;
        let mut depth = 0;
        while let Some(parent) = node.parent.as_deref() {
            node = self.nodes.get(parent)?;
            depth += 1;
        }
        Some(depth)
    }

    fn is_descendant_or_self(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.parent(candidate);
        }
        false
    }

    fn siblings_mut(&mut self, parent: Option<&str>) -> Option<&mut Vec<String>> {
        match parent {
            None => Some(&mut self.roots),
            Some(parent_id) => self.nodes.get_mut(parent_id).map(|n| &mut n.children),
        }
    }

    /// Insert `block` (with its subtree) under `parent` at `index`, clamped to the sibling count
    pub fn insert_child(
        &mut self,
        parent: Option<&str>,
        index: usize,
        block: TreeBlock,
    ) -> Result<(), ValidationError> {
        if let Some(parent_id) = parent {
            if !self.contains(parent_id) {
                return Err(ValidationError::InvalidId(parent_id.to_string()));
            }
        }
        if self.contains(&block.id) {
            return Err(ValidationError::InvalidId(block.id));
        }

        let id = block.id.clone();
        let mut staged = Forest::new();
        staged.adopt(block, None);
        if staged.nodes.keys().any(|k| self.contains(k)) {
            return Err(ValidationError::InvalidId(id));
        }

        for (key, mut node) in staged.nodes {
            if key == id {
                node.parent = parent.map(str::to_string);
            }
            self.nodes.insert(key, node);
        }
        if let Some(siblings) = self.siblings_mut(parent) {
            let index = index.min(siblings.len());
            siblings.insert(index, id);
        }
        Ok(())
    }

    /// Move `id` under `new_parent` at `index`. Moving a block into its own subtree is rejected.
    pub fn move_node(
        &mut self,
        id: &str,
        new_parent: Option<&str>,
        index: usize,
    ) -> Result<(), ValidationError> {
        if !self.contains(id) {
            return Err(ValidationError::InvalidId(id.to_string()));
        }
        if let Some(parent_id) = new_parent {
            if !self.contains(parent_id) {
                return Err(ValidationError::InvalidId(parent_id.to_string()));
            }
            if self.is_descendant_or_self(parent_id, id) {
                return Err(ValidationError::Cycle {
                    block_id: id.to_string(),
                    parent_id: parent_id.to_string(),
                });
            }
        }

        let old_parent = self.parent(id).map(str::to_string);
        if let Some(siblings) = self.siblings_mut(old_parent.as_deref()) {
            siblings.retain(|sibling| sibling != id);
        }
        if let Some(siblings) = self.siblings_mut(new_parent) {
            let index = index.min(siblings.len());
            siblings.insert(index, id.to_string());
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = new_parent.map(str::to_string);
        }
        Ok(())
    }

    /// Remove `id` and its descendants; returns the removed ids, `id` first
    pub fn remove_subtree(&mut self, id: &str) -> Vec<String> {
        if !self.contains(id) {
            return Vec::new();
        }
        let parent = self.parent(id).map(str::to_string);
        if let Some(siblings) = self.siblings_mut(parent.as_deref()) {
            siblings.retain(|sibling| sibling != id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children.into_iter().rev());
                removed.push(current);
            }
        }
        removed
    }

    /// Set the text of `id`.
    ///
    /// Writing through a reference edits its original when the original is in
    /// this forest; every reference to that original then shows the new text.
    /// A reference whose original lives elsewhere cannot be written to here.
    pub fn set_content(&mut self, id: &str, content: impl Into<String>) -> Result<(), ValidationError> {
        let content = content.into();
        let target = match self.body(id) {
            None => return Err(ValidationError::InvalidId(id.to_string())),
            Some(BlockBody::Content { .. }) => id.to_string(),
            Some(BlockBody::Reference { original_id, .. }) => {
                if !self.contains(original_id) {
                    return Err(ValidationError::ReferenceWrite(id.to_string()));
                }
                original_id.clone()
            }
        };

        if let Some(node) = self.nodes.get_mut(&target) {
            match &mut node.body {
                BlockBody::Content { content: current } => *current = content.clone(),
                BlockBody::Reference { .. } => {
                    return Err(ValidationError::ChainedReference { target_id: target });
                }
            }
        }
        for node in self.nodes.values_mut() {
            if let BlockBody::Reference {
                original_id,
                content: projected,
            } = &mut node.body
            {
                if *original_id == target {
                    *projected = content.clone();
                }
            }
        }
        Ok(())
    }

    /// Rename nodes after a save assigned durable ids. References to a renamed
    /// node follow it. Ids not present in the forest are skipped.
    pub fn rename_ids<'a, I>(&mut self, renames: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let renames: HashMap<&str, &str> = renames
            .into_iter()
            .filter(|(old, new)| old != new && self.contains(old) && !self.contains(new))
            .collect();
        if renames.is_empty() {
            return;
        }
        let rename = |id: &mut String| {
            if let Some(new) = renames.get(id.as_str()) {
                *id = (*new).to_string();
            }
        };

        self.nodes = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(|(mut id, mut node)| {
                rename(&mut id);
                if let Some(parent) = node.parent.as_mut() {
                    rename(parent);
                }
                node.children.iter_mut().for_each(rename);
                if let BlockBody::Reference { original_id, .. } = &mut node.body {
                    rename(original_id);
                }
                (id, node)
            })
            .collect();
        self.roots.iter_mut().for_each(rename);
    }

    /// Flip the expand state; returns the new state
    pub fn toggle_open(&mut self, id: &str) -> Option<bool> {
        let node = self.nodes.get_mut(id)?;
        node.is_open = !node.is_open;
        Some(node.is_open)
    }
}
