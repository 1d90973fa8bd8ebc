//! Tree building: flat records → nested forest
//!
//! Records are linked to their parents through an index-based adjacency list,
//! then materialized into owned [`TreeBlock`]s. Malformed input never fails:
//!
//! - a record whose parent is missing is promoted to the root scope
//! - records caught in a parent cycle are promoted at the first cycle member seen
//! - a repeated id keeps its first occurrence
//! - a record nested deeper than [`MAX_TREE_DEPTH`] starts a new root
//!
//! Depth is derived from the final shape; stored depth is ignored.

use crate::models::{EnrichedBlock, TreeBlock};
use std::collections::HashMap;

/// Deepest level a built tree may have. Nested walks over [`TreeBlock`]
/// recurse once per level, and a tree this deep still parses back from a
/// JSON snapshot under serde_json's nesting limit.
pub const MAX_TREE_DEPTH: u32 = 60;

/// Build a forest from enriched records.
///
/// Siblings are ordered by `position`, ties keeping input order. An empty
/// input yields a single fresh empty root block.
pub fn build_tree(blocks: Vec<EnrichedBlock>) -> Vec<TreeBlock> {
    if blocks.is_empty() {
        return vec![TreeBlock::empty_root()];
    }

    let mut index: HashMap<String, usize> = HashMap::with_capacity(blocks.len());
    let mut slots: Vec<Option<EnrichedBlock>> = Vec::with_capacity(blocks.len());
    for block in blocks {
        if index.contains_key(&block.record.id) {
            tracing::warn!("Dropping duplicate block id '{}'", block.record.id);
            continue;
        }
        index.insert(block.record.id.clone(), slots.len());
        slots.push(Some(block));
    }

    let count = slots.len();
    let mut parent_of: Vec<Option<usize>> = vec![None; count];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut roots: Vec<usize> = Vec::new();

    for (i, slot) in slots.iter().enumerate() {
        let record = match slot {
            Some(block) => &block.record,
            None => continue,
        };
        match record.parent_id.as_deref() {
            None => roots.push(i),
            Some(parent_id) => match index.get(parent_id) {
                Some(&parent) => {
                    parent_of[i] = Some(parent);
                    children[parent].push(i);
                }
                None => {
                    tracing::debug!(
                        "Block '{}' has missing parent '{}'; promoting to root",
                        record.id,
                        parent_id
                    );
                    roots.push(i);
                }
            },
        }
    }

    promote_unreachable(&mut roots, &mut children, &parent_of, count);
    promote_too_deep(&mut roots, &mut children);

    let position = |i: &usize| {
        slots[*i]
            .as_ref()
            .map(|b| b.record.position)
            .unwrap_or_default()
    };
    roots.sort_by_key(position);
    for siblings in children.iter_mut() {
        siblings.sort_by_key(position);
    }

    roots
        .into_iter()
        .filter_map(|root| materialize(root, 0, &mut slots, &children))
        .collect()
}

/// Nodes inside a parent cycle are never reached from a root. Walk from the
/// roots, then cut each cycle at its first unreached member and make it a root.
fn promote_unreachable(
    roots: &mut Vec<usize>,
    children: &mut [Vec<usize>],
    parent_of: &[Option<usize>],
    count: usize,
) {
    let mut reached = vec![false; count];
    let mut stack: Vec<usize> = roots.clone();
    mark_reached(&mut stack, children, &mut reached);

    for i in 0..count {
        if reached[i] {
            continue;
        }
        tracing::warn!("Block at input index {} is part of a parent cycle; promoting to root", i);
        if let Some(parent) = parent_of[i] {
            children[parent].retain(|&child| child != i);
        }
        roots.push(i);
        stack.push(i);
        mark_reached(&mut stack, children, &mut reached);
    }
}

/// Cut every edge that would put a child below [`MAX_TREE_DEPTH`]; the child
/// becomes a root and its subtree continues from depth 0.
fn promote_too_deep(roots: &mut Vec<usize>, children: &mut [Vec<usize>]) {
    let mut stack: Vec<(usize, u32)> = roots.iter().map(|&root| (root, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        if depth == MAX_TREE_DEPTH {
            for child in std::mem::take(&mut children[node]) {
                tracing::warn!("Block at input index {} exceeds depth {}; promoting to root", child, MAX_TREE_DEPTH);
                roots.push(child);
                stack.push((child, 0));
            }
        } else {
            stack.extend(children[node].iter().map(|&child| (child, depth + 1)));
        }
    }
}

fn mark_reached(stack: &mut Vec<usize>, children: &[Vec<usize>], reached: &mut [bool]) {
    while let Some(node) = stack.pop() {
        if reached[node] {
            continue;
        }
        reached[node] = true;
        stack.extend(children[node].iter().copied());
    }
}

fn materialize(
    i: usize,
    depth: u32,
    slots: &mut [Option<EnrichedBlock>],
    children: &[Vec<usize>],
) -> Option<TreeBlock> {
    let EnrichedBlock { record, body } = slots[i].take()?;
    let kids = children[i]
        .iter()
        .filter_map(|&child| materialize(child, depth + 1, slots, children))
        .collect();

    Some(TreeBlock {
        id: record.id,
        block_type: record.block_type,
        is_open: record.is_open,
        depth,
        body,
        children: kids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockRecord;
    use crate::utils::identity::is_durable;

    fn block(id: &str, parent: Option<&str>, position: i64) -> EnrichedBlock {
        BlockRecord::new(id, parent.map(str::to_string), position)
            .with_content(id)
            .into()
    }

    fn ids(forest: &[TreeBlock]) -> Vec<&str> {
        forest.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn empty_input_bootstraps_one_root() {
        let forest = build_tree(Vec::new());
        assert_eq!(forest.len(), 1);
        assert!(is_durable(&forest[0].id));
        assert_eq!(forest[0].content(), "");
        assert!(forest[0].children.is_empty());
        assert!(forest[0].is_open);
    }

    #[test]
    fn links_and_sorts_by_position() {
        let forest = build_tree(vec![
            block("c", None, 1),
            block("a2", Some("a"), 1),
            block("a", None, 0),
            block("a1", Some("a"), 0),
        ]);

        assert_eq!(ids(&forest), vec!["a", "c"]);
        assert_eq!(ids(&forest[0].children), vec!["a1", "a2"]);
        assert_eq!(forest[0].children[1].depth, 1);
    }

    #[test]
    fn ties_keep_input_order() {
        let forest = build_tree(vec![block("x", None, 0), block("y", None, 0), block("z", None, 0)]);
        assert_eq!(ids(&forest), vec!["x", "y", "z"]);
    }

    #[test]
    fn orphan_is_promoted_with_depth_zero() {
        let mut orphan = block("x", Some("missing"), 0);
        orphan.record.depth = 4;
        let forest = build_tree(vec![block("a", None, 1), orphan]);

        assert_eq!(ids(&forest), vec!["x", "a"]);
        assert_eq!(forest[0].depth, 0);
    }

    #[test]
    fn stored_depth_is_ignored() {
        let mut child = block("b", Some("a"), 0);
        child.record.depth = 9;
        let forest = build_tree(vec![block("a", None, 0), child]);
        assert_eq!(forest[0].children[0].depth, 1);
    }

    #[test]
    fn parent_cycle_is_broken_not_lost() {
        let forest = build_tree(vec![
            block("a", None, 0),
            block("b", Some("c"), 0),
            block("c", Some("b"), 0),
        ]);

        assert_eq!(crate::models::forest_len(&forest), 3);
        let b = forest.iter().find(|n| n.id == "b").unwrap();
        assert_eq!(b.depth, 0);
        assert_eq!(ids(&b.children), vec!["c"]);
    }

    #[test]
    fn self_parent_is_promoted() {
        let forest = build_tree(vec![block("a", Some("a"), 0)]);
        assert_eq!(ids(&forest), vec!["a"]);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let mut second = block("a", None, 1);
        second.body = crate::models::BlockBody::content("second");
        let forest = build_tree(vec![block("a", None, 0), second]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].content(), "a");
    }

    #[test]
    fn deep_nesting_depths() {
        let forest = build_tree(vec![
            block("d", Some("c"), 0),
            block("c", Some("b"), 0),
            block("b", Some("a"), 0),
            block("a", None, 0),
        ]);
        let d = &forest[0].children[0].children[0].children[0];
        assert_eq!(d.id, "d");
        assert_eq!(d.depth, 3);
    }

    #[test]
    fn very_deep_chain_is_split_into_bounded_roots() {
        let total: usize = 5000;
        let blocks = (0..total)
            .map(|i| {
                let parent = (i > 0).then(|| format!("n{}", i - 1));
                block(&format!("n{i}"), parent.as_deref(), 0)
            })
            .collect();

        let forest = build_tree(blocks);

        let segment = MAX_TREE_DEPTH as usize + 1;
        assert_eq!(forest.len(), total.div_ceil(segment));
        assert_eq!(crate::models::forest_len(&forest), total);
        assert_eq!(forest[1].id, format!("n{segment}"));

        let mut deepest = 0;
        let mut stack: Vec<&TreeBlock> = forest.iter().collect();
        while let Some(node) = stack.pop() {
            deepest = deepest.max(node.depth);
            stack.extend(node.children.iter());
        }
        assert_eq!(deepest, MAX_TREE_DEPTH);
    }
}
