//! Reference enrichment
//!
//! Reference blocks borrow their text from an original block. Before a tree is
//! built, every reference record is paired with a [`BlockBody::Reference`]
//! carrying the original's current content. The records themselves are left
//! untouched. Resolution is one hop: the original's own `content` column is
//! used as-is, even if the original is itself flagged as a reference.

use crate::models::{BlockBody, BlockRecord, EnrichedBlock};
use std::collections::HashMap;

/// Shown in place of a reference whose original is not in the same record set
pub const ORIGINAL_NOT_FOUND: &str = "[original block not found]";

/// Resolve references against `records`, using [`ORIGINAL_NOT_FOUND`] for misses
pub fn enrich(records: Vec<BlockRecord>) -> Vec<EnrichedBlock> {
    enrich_with_placeholder(records, ORIGINAL_NOT_FOUND)
}

/// Resolve references against `records` with a custom placeholder for missing originals
pub fn enrich_with_placeholder(records: Vec<BlockRecord>, placeholder: &str) -> Vec<EnrichedBlock> {
    let contents: HashMap<&str, &str> = records
        .iter()
        .map(|r| (r.id.as_str(), r.content.as_str()))
        .collect();

    let bodies: Vec<BlockBody> = records
        .iter()
        .map(|record| match record.reference_target() {
            Some(original_id) => {
                let content = match contents.get(original_id) {
                    Some(content) => (*content).to_string(),
                    None => {
                        tracing::debug!(
                            "Reference block '{}' points at missing original '{}'",
                            record.id,
                            original_id
                        );
                        placeholder.to_string()
                    }
                };
                BlockBody::Reference {
                    original_id: original_id.to_string(),
                    content,
                }
            }
            None => BlockBody::content(record.content.clone()),
        })
        .collect();

    records
        .into_iter()
        .zip(bodies)
        .map(|(record, body)| EnrichedBlock { record, body })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(id: &str, original: &str) -> BlockRecord {
        let mut record = BlockRecord::new(id, None, 1);
        record.is_reference = true;
        record.original_block_id = Some(original.to_string());
        record
    }

    #[test]
    fn reference_projects_original_content() {
        let a = BlockRecord::new("a", None, 0).with_content("hello");
        let b = reference("b", "a");

        let enriched = enrich(vec![a, b.clone()]);

        assert_eq!(enriched[1].body.display(), "hello");
        assert_eq!(enriched[1].body.original_id(), Some("a"));
        assert_eq!(enriched[1].record, b, "stored row must stay untouched");
    }

    #[test]
    fn missing_original_uses_placeholder() {
        let enriched = enrich(vec![reference("b", "gone")]);
        assert_eq!(enriched[0].body.display(), ORIGINAL_NOT_FOUND);
        assert!(enriched[0].body.is_reference());
    }

    #[test]
    fn empty_original_content_is_projected_not_replaced() {
        let a = BlockRecord::new("a", None, 0);
        let enriched = enrich(vec![a, reference("b", "a")]);
        assert_eq!(enriched[1].body.display(), "");
    }

    #[test]
    fn custom_placeholder() {
        let enriched = enrich_with_placeholder(vec![reference("b", "gone")], "??");
        assert_eq!(enriched[0].body.display(), "??");
    }

    #[test]
    fn flag_without_target_is_plain_content() {
        let mut record = BlockRecord::new("b", None, 0).with_content("own");
        record.is_reference = true;
        let enriched = enrich(vec![record]);
        assert_eq!(enriched[0].body, BlockBody::content("own"));
    }

    #[test]
    fn chained_reference_resolves_one_hop() {
        let a = BlockRecord::new("a", None, 0).with_content("root text");
        let mut b = reference("b", "a");
        b.content = "stale".to_string();
        let c = reference("c", "b");

        let enriched = enrich(vec![a, b, c]);
        assert_eq!(enriched[2].body.display(), "stale");
    }
}
