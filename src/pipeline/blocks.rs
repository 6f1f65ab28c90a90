//! Block extraction: group a page's words into same-origin text blocks.
//!
//! The rendering collaborator tags every word with a `block_id`; this stage
//! folds the flat word list into the block model downstream stages consume.
//! The whitespace policy is deliberately exact — each word is appended with
//! one trailing space and the final text is trimmed — because the SSML the
//! enrichment stage builds around `text` must match byte-for-byte what the
//! fallback path and the tests produce.

use crate::model::{Block, BlockMap, Word};

/// Group words into blocks keyed by block id.
///
/// Words land in their block in extraction order: `words` and
/// `bounding_boxes` stay parallel and untouched (no sorting, no
/// deduplication). An empty word list yields an empty map.
pub fn extract_blocks(words: &[Word]) -> BlockMap {
    let mut blocks = BlockMap::new();

    for word in words {
        let block = blocks.entry(word.block_id).or_insert_with(Block::default);
        block.text.push_str(&word.text);
        block.text.push(' ');
        block.words.push(word.text.clone());
        block.bounding_boxes.push(word.bounding_box());
    }

    for block in blocks.values_mut() {
        block.text = block.text.trim().to_string();
    }

    blocks
}
