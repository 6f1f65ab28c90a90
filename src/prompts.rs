//! Prompt construction for the enrichment model.
//!
//! Centralising the prompt here serves two purposes:
//!
//! 1. **Single source of truth** — tightening an instruction (e.g. the
//!    no-markdown rule) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the built prompt directly
//!    without a live model call, so instruction regressions are caught
//!    by string assertions.
//!
//! The response-side expectations (single JSON object, verbatim text,
//! exactly three added fields) are enforced again by the validator in
//! [`crate::pipeline::enrich`]; the prompt is the first line of defence,
//! not the only one.

use crate::model::PersonType;

/// The prosody template wrapped around every retained block's text.
///
/// Shared by the prompt, the deterministic fallback, and tests so the three
/// can never drift apart.
pub fn prosody_wrap(text: &str) -> String {
    format!("<speak><prosody rate='slow'>{text}</prosody></speak>")
}

/// Build the full enrichment instruction for one chunk of blocks.
///
/// `blocks_json` is the serialized chunk, an object keyed by block id with
/// `text`, `words`, and `bounding_boxes` per block. The page image travels
/// alongside this prompt in the same request.
pub fn enrichment_prompt(blocks_json: &str) -> String {
    let categories = PersonType::ALL
        .iter()
        .map(|p| format!("\"{}\"", p.label()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are given a JSON object describing text blocks of one PDF page, and an image of that page.
Each block has "text", "words", and "bounding_boxes". Process the JSON as follows:

STEP 1: Understand the page's story/learning flow from the image and the block text.
STEP 2: REMOVE blocks that are not part of the core story or learning content (publication names, page numbers, headers/footers, publisher metadata). Keep only blocks essential to the narrative or educational purpose.
STEP 3: For each RETAINED block, keep "text", "words", and "bounding_boxes" exactly as given, then ADD exactly three fields: "ssml", "dialog", "person_type".
STEP 4: "dialog" is the string "true" if the block is part of a conversation or direct speech, the string "false" otherwise.
STEP 5: When "dialog" is "true", pick "person_type" from the image near the block: one of {categories}. When "dialog" is "false", set "person_type" to the string "null".
STEP 6: Never alter the original "text" of a retained block.
STEP 7: "ssml" wraps the original text as: <speak><prosody rate='slow'>ORIGINAL TEXT</prosody></speak>. Keep it compatible with AWS Polly; no <audio> tags.

OUTPUT RULES:
- Respond with a single, complete, valid JSON object and nothing else: no prose, no explanations, no markdown fences.
- Use only double quotes for keys and string values.
- The only difference between input and output blocks is the three added fields; removed blocks are simply absent.
- Do NOT truncate: the final character of your response must be the closing brace of the object.
- Your response must start with {{ and end with }}.

Input blocks:
{blocks_json}"#
    )
}
