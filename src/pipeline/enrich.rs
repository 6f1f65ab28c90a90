//! Narration enrichment: vision-model calls, response repair, retry, fallback.
//!
//! This is the only stage with genuinely adversarial input: the model is
//! asked for "one JSON object, nothing else", and in practice returns fenced
//! JSON, JSON wrapped in prose, truncated JSON, or nothing at all. The stage
//! therefore splits into small, separately testable steps:
//!
//! 1. chunk the block map (default one block per call),
//! 2. build the request (page image + instruction prompt),
//! 3. extract a JSON candidate from the raw response text,
//! 4. parse and validate the candidate against the input chunk,
//! 5. retry retryable failures under a bounded [`RetryPolicy`],
//! 6. merge chunk outputs, all-or-nothing per page.
//!
//! When no provider is configured at all, [`fallback_enrich`] produces a
//! deterministic enrichment so the rest of the pipeline still runs.
//!
//! ## Response repair
//!
//! The candidate extraction is heuristic by design: strip a leading
//! markdown JSON fence, then slice from the first `{` to the last `}`.
//! This degrades gracefully when the model adds explanatory prose around
//! the object, and its failure (`NoJsonObject`) is kept distinct from a
//! cleanly extracted candidate that fails to parse (`InvalidJson`).

use crate::error::{EnrichError, MalformedKind};
use crate::model::{BlockMap, EnrichedBlock, EnrichedBlockMap};
use crate::prompts::enrichment_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// The enrichment provider seam.
///
/// Production wraps an [`LLMProvider`] in [`VisionModel`]; tests substitute
/// fakes that count attempts or replay canned responses.
#[async_trait]
pub trait EnrichmentModel: Send + Sync {
    /// Submit one page image + instruction prompt, returning the raw
    /// response text.
    async fn generate(&self, image: &ImageData, prompt: &str) -> Result<String, EnrichError>;
}

/// [`EnrichmentModel`] backed by an edgequake-llm vision provider.
pub struct VisionModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl VisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl EnrichmentModel for VisionModel {
    async fn generate(&self, image: &ImageData, prompt: &str) -> Result<String, EnrichError> {
        let messages = vec![ChatMessage::user_with_images(prompt, vec![image.clone()])];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| EnrichError::RateLimitedOrBlocked {
                detail: format!("{e}"),
            })?;

        debug!(
            "Enrichment response: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        Ok(response.content)
    }
}

/// Bounded retry: fixed inter-attempt delay, fixed attempt budget.
///
/// The delay is data, not a hard-coded sleep, so tests run the full retry
/// loop with `Duration::ZERO` and assert on attempt counts without waiting.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

static RE_LEADING_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\n(.*?)\n?```\s*$").unwrap());

/// Isolate a JSON object candidate from raw model output.
///
/// Strips a leading markdown JSON fence, then slices from the first `{` to
/// the last `}` inclusive. Returns [`MalformedKind::NoJsonObject`] when no
/// such region exists; whether the candidate actually parses is the next
/// step's problem.
pub fn extract_json_candidate(raw: &str) -> Result<&str, EnrichError> {
    let mut text = raw.trim();
    if let Some(caps) = RE_LEADING_JSON_FENCE.captures(text) {
        text = caps.get(1).map(|m| m.as_str()).unwrap_or(text).trim();
    }

    let first = text.find('{');
    let last = text.rfind('}');
    match (first, last) {
        (Some(f), Some(l)) if l > f => Ok(&text[f..=l]),
        _ => Err(EnrichError::MalformedResponse {
            kind: MalformedKind::NoJsonObject,
            detail: format!("no {{...}} region in response: {}", snippet(raw)),
        }),
    }
}

/// Parse and validate one chunk response against its input chunk.
///
/// Geometry (`text`, `words`, `bounding_boxes`) is taken from the *input*
/// block, not from the model's echo, which guarantees the "only difference
/// is the three added fields" invariant no matter what the model echoed.
/// Keys absent from the input chunk are dropped with a warning; a retained
/// block missing any of the three fields is a malformed response.
pub fn parse_enriched_chunk(
    candidate: &str,
    input: &BlockMap,
) -> Result<EnrichedBlockMap, EnrichError> {
    let parsed: std::collections::BTreeMap<u32, serde_json::Value> =
        serde_json::from_str(candidate).map_err(|e| EnrichError::MalformedResponse {
            kind: MalformedKind::InvalidJson,
            detail: format!("{e}: {}", snippet(candidate)),
        })?;

    let mut out = EnrichedBlockMap::new();
    for (block_id, value) in parsed {
        let Some(block) = input.get(&block_id) else {
            warn!("Model invented block {block_id}; dropping it");
            continue;
        };

        let field = |name: &str| -> Result<String, EnrichError> {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| EnrichError::MalformedResponse {
                    kind: MalformedKind::IncompleteBlock,
                    detail: format!("block {block_id} missing \"{name}\""),
                })
        };

        let ssml = field("ssml")?;
        let dialog = field("dialog")?;
        let person_type = field("person_type")?;
        if dialog != "true" && dialog != "false" {
            return Err(EnrichError::MalformedResponse {
                kind: MalformedKind::IncompleteBlock,
                detail: format!("block {block_id} has non-boolean dialog {dialog:?}"),
            });
        }

        out.insert(
            block_id,
            EnrichedBlock {
                text: block.text.clone(),
                words: block.words.clone(),
                bounding_boxes: block.bounding_boxes.clone(),
                ssml,
                dialog,
                person_type,
                timing: None,
            },
        );
    }

    Ok(out)
}

/// Enrich a page's blocks through the model, chunk by chunk.
///
/// Chunks are formed from consecutive keys in key order and submitted
/// sequentially. The contract is all-or-nothing: if any chunk exhausts the
/// retry budget, the whole page fails and no partial enrichment is
/// returned. Blocks the model judged non-essential are absent from the
/// result.
pub async fn enrich_blocks(
    model: &dyn EnrichmentModel,
    page_image: &ImageData,
    blocks: &BlockMap,
    chunk_size: usize,
    policy: &RetryPolicy,
) -> Result<EnrichedBlockMap, EnrichError> {
    let keys: Vec<u32> = blocks.keys().copied().collect();
    let mut enriched = EnrichedBlockMap::new();

    for chunk_keys in keys.chunks(chunk_size.max(1)) {
        let chunk: BlockMap = chunk_keys
            .iter()
            .map(|k| (*k, blocks[k].clone()))
            .collect();
        let result = enrich_chunk(model, page_image, &chunk, policy).await?;
        enriched.extend(result);
    }

    info!(
        "Enriched page: {} of {} blocks retained",
        enriched.len(),
        blocks.len()
    );
    Ok(enriched)
}

/// Run one chunk through the model under the retry policy.
async fn enrich_chunk(
    model: &dyn EnrichmentModel,
    page_image: &ImageData,
    chunk: &BlockMap,
    policy: &RetryPolicy,
) -> Result<EnrichedBlockMap, EnrichError> {
    let first_block = chunk.keys().next().copied().unwrap_or(0);
    let chunk_json = serde_json::to_string(chunk).map_err(|e| EnrichError::MalformedResponse {
        kind: MalformedKind::InvalidJson,
        detail: format!("failed to serialize input chunk: {e}"),
    })?;
    let prompt = enrichment_prompt(&chunk_json);

    let mut last_err: Option<EnrichError> = None;
    let mut attempts_made = 0;

    for attempt in 1..=policy.max_attempts {
        attempts_made = attempt;
        if attempt > 1 {
            let delay = policy.delay_for(attempt - 1);
            warn!(
                "Chunk at block {first_block}: retry {attempt}/{} after {:?}",
                policy.max_attempts, delay
            );
            sleep(delay).await;
        }

        let outcome = match model.generate(page_image, &prompt).await {
            Ok(raw) if raw.trim().is_empty() => Err(EnrichError::MalformedResponse {
                kind: MalformedKind::Empty,
                detail: "provider returned an empty response".into(),
            }),
            Ok(raw) => extract_json_candidate(&raw)
                .and_then(|candidate| parse_enriched_chunk(candidate, chunk)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(enriched) => return Ok(enriched),
            Err(e) => {
                warn!(
                    "Chunk at block {first_block}: attempt {attempt} failed — {e}"
                );
                let retryable = e.is_retryable();
                last_err = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    let detail = last_err
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".into());
    Err(EnrichError::ChunkFailed {
        first_block,
        attempts: attempts_made,
        detail,
    })
}

/// Deterministic enrichment used when no vision provider is configured.
///
/// A pure function of the block map: every block is retained, `ssml` is the
/// prosody wrap of the block text, `dialog` is "false", `person_type` is
/// "null". Repeated application gives identical output.
pub fn fallback_enrich(blocks: &BlockMap) -> EnrichedBlockMap {
    blocks
        .iter()
        .map(|(&id, block)| {
            (
                id,
                EnrichedBlock {
                    text: block.text.clone(),
                    words: block.words.clone(),
                    bounding_boxes: block.bounding_boxes.clone(),
                    ssml: crate::prompts::prosody_wrap(&block.text),
                    dialog: "false".to_string(),
                    person_type: "null".to_string(),
                    timing: None,
                },
            )
        })
        .collect()
}

/// First 200 chars of a response, for error messages.
fn snippet(s: &str) -> String {
    let mut out: String = s.chars().take(200).collect();
    if out.len() < s.len() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Block, BoundingBox};
    use std::sync::Mutex;

    fn sample_blocks() -> BlockMap {
        let mut map = BlockMap::new();
        map.insert(
            0,
            Block {
                text: "Hi".into(),
                words: vec!["Hi".into()],
                bounding_boxes: vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0)],
            },
        );
        map.insert(
            1,
            Block {
                text: "Page 7".into(),
                words: vec!["Page".into(), "7".into()],
                bounding_boxes: vec![
                    BoundingBox::new(0.0, 90.0, 20.0, 99.0),
                    BoundingBox::new(22.0, 90.0, 28.0, 99.0),
                ],
            },
        );
        map
    }

    fn page_image() -> ImageData {
        ImageData::new("aGVsbG8=", "image/png")
    }

    fn zero_delay() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    /// Replays a fixed script of responses and counts attempts.
    struct ScriptedModel {
        script: Mutex<Vec<Result<String, EnrichError>>>,
        attempts: Mutex<u32>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<String, EnrichError>>) -> Self {
            Self {
                script: Mutex::new(script),
                attempts: Mutex::new(0),
            }
        }

        fn attempts(&self) -> u32 {
            *self.attempts.lock().unwrap()
        }
    }

    #[async_trait]
    impl EnrichmentModel for ScriptedModel {
        async fn generate(&self, _image: &ImageData, _prompt: &str) -> Result<String, EnrichError> {
            *self.attempts.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(EnrichError::RateLimitedOrBlocked {
                    detail: "script exhausted".into(),
                });
            }
            script.remove(0)
        }
    }

    fn good_response_for_block_0() -> String {
        r#"{"0": {"text": "Hi", "words": ["Hi"], "bounding_boxes": [[[0.0,0.0],[10.0,10.0]]],
             "ssml": "<speak><prosody rate='slow'>Hi</prosody></speak>",
             "dialog": "true", "person_type": "young boy"}}"#
            .to_string()
    }

    // ── JSON candidate extraction ────────────────────────────────────────

    #[test]
    fn extracts_from_markdown_fence() {
        let raw = "```json\n{\"a\":1}\n```";
        let candidate = extract_json_candidate(raw).unwrap();
        let v: serde_json::Value = serde_json::from_str(candidate).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extracts_object_wrapped_in_prose() {
        let raw = "Sure! Here is the JSON you asked for:\n{\"a\": {\"b\": 2}}\nHope that helps.";
        let candidate = extract_json_candidate(raw).unwrap();
        assert_eq!(candidate, "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn no_object_is_its_own_failure_kind() {
        let err = extract_json_candidate("I could not process this page.").unwrap_err();
        assert!(matches!(
            err,
            EnrichError::MalformedResponse {
                kind: MalformedKind::NoJsonObject,
                ..
            }
        ));
    }

    #[test]
    fn extracted_but_invalid_json_is_distinct() {
        // Extraction succeeds (there is a braced region), parsing must not.
        let candidate = extract_json_candidate("{\"a\": }").unwrap();
        let err = parse_enriched_chunk(candidate, &sample_blocks()).unwrap_err();
        assert!(matches!(
            err,
            EnrichError::MalformedResponse {
                kind: MalformedKind::InvalidJson,
                ..
            }
        ));
    }

    // ── Chunk validation ─────────────────────────────────────────────────

    #[test]
    fn parse_restores_input_geometry_and_drops_invented_blocks() {
        let blocks = sample_blocks();
        let raw = r#"{
            "0": {"text": "ALTERED", "words": [], "bounding_boxes": [],
                  "ssml": "<speak><prosody rate='slow'>Hi</prosody></speak>",
                  "dialog": "false", "person_type": "null"},
            "9": {"ssml": "x", "dialog": "false", "person_type": "null"}
        }"#;
        let out = parse_enriched_chunk(raw, &blocks).unwrap();
        assert_eq!(out.len(), 1);
        // Geometry and text come from the input block, not the echo.
        assert_eq!(out[&0].text, "Hi");
        assert_eq!(out[&0].words, vec!["Hi"]);
        assert_eq!(out[&0].bounding_boxes.len(), 1);
    }

    #[test]
    fn missing_enrichment_field_is_incomplete_block() {
        let raw = r#"{"0": {"ssml": "<speak/>", "dialog": "false"}}"#;
        let err = parse_enriched_chunk(raw, &sample_blocks()).unwrap_err();
        assert!(matches!(
            err,
            EnrichError::MalformedResponse {
                kind: MalformedKind::IncompleteBlock,
                ..
            }
        ));
    }

    #[test]
    fn dropped_blocks_are_simply_absent() {
        // The model removed block 1 (a page number): result holds only block 0.
        let out = parse_enriched_chunk(&good_response_for_block_0(), &sample_blocks()).unwrap();
        assert!(out.contains_key(&0));
        assert!(!out.contains_key(&1));
    }

    // ── Retry behaviour ──────────────────────────────────────────────────

    #[tokio::test]
    async fn third_attempt_success_records_three_calls() {
        let blocks: BlockMap = sample_blocks().into_iter().take(1).collect();
        let model = ScriptedModel::new(vec![
            Err(EnrichError::RateLimitedOrBlocked {
                detail: "429".into(),
            }),
            Ok("not json at all".into()),
            Ok(good_response_for_block_0()),
        ]);

        let out = enrich_blocks(&model, &page_image(), &blocks, 1, &zero_delay())
            .await
            .unwrap();
        assert_eq!(model.attempts(), 3);
        assert_eq!(out[&0].dialog, "true");
        assert_eq!(out[&0].person_type, "young boy");
    }

    #[tokio::test]
    async fn exhausted_budget_fails_the_chunk_with_no_partial_result() {
        let blocks: BlockMap = sample_blocks().into_iter().take(1).collect();
        let model = ScriptedModel::new(vec![
            Err(EnrichError::RateLimitedOrBlocked { detail: "1".into() }),
            Err(EnrichError::RateLimitedOrBlocked { detail: "2".into() }),
            Err(EnrichError::RateLimitedOrBlocked { detail: "3".into() }),
        ]);

        let err = enrich_blocks(&model, &page_image(), &blocks, 1, &zero_delay())
            .await
            .unwrap_err();
        assert_eq!(model.attempts(), 3);
        assert!(matches!(
            err,
            EnrichError::ChunkFailed {
                first_block: 0,
                attempts: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn non_retryable_failure_stops_after_one_attempt() {
        let blocks: BlockMap = sample_blocks().into_iter().take(1).collect();
        let model = ScriptedModel::new(vec![Err(EnrichError::ProviderUnavailable {
            detail: "endpoint gone".into(),
        })]);

        let err = enrich_blocks(&model, &page_image(), &blocks, 1, &zero_delay())
            .await
            .unwrap_err();
        assert_eq!(model.attempts(), 1);
        // The failure reports the one attempt actually made, not the budget.
        assert!(matches!(err, EnrichError::ChunkFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn second_chunk_failure_discards_first_chunk_output() {
        // chunk_size 1 over two blocks: first call succeeds, the next three
        // fail. The page must fail as a whole.
        let blocks = sample_blocks();
        let model = ScriptedModel::new(vec![Ok(good_response_for_block_0())]);

        let err = enrich_blocks(&model, &page_image(), &blocks, 1, &zero_delay())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::ChunkFailed { first_block: 1, .. }));
    }

    #[tokio::test]
    async fn empty_response_is_retried() {
        let blocks: BlockMap = sample_blocks().into_iter().take(1).collect();
        let model = ScriptedModel::new(vec![
            Ok("   ".into()),
            Ok(good_response_for_block_0()),
        ]);

        let out = enrich_blocks(&model, &page_image(), &blocks, 1, &zero_delay())
            .await
            .unwrap();
        assert_eq!(model.attempts(), 2);
        assert_eq!(out.len(), 1);
    }

    // ── Fallback mode ────────────────────────────────────────────────────

    #[test]
    fn fallback_is_pure_and_drops_nothing() {
        let mut blocks = BlockMap::new();
        blocks.insert(
            0,
            Block {
                text: "Hi".into(),
                words: vec!["Hi".into()],
                bounding_boxes: vec![BoundingBox::new(0.0, 0.0, 1.0, 1.0)],
            },
        );

        let out = fallback_enrich(&blocks);
        assert_eq!(out.len(), 1);
        let b = &out[&0];
        assert_eq!(b.ssml, "<speak><prosody rate='slow'>Hi</prosody></speak>");
        assert_eq!(b.dialog, "false");
        assert_eq!(b.person_type, "null");
        assert!(b.timing.is_none());

        // Idempotent under repeated application.
        assert_eq!(fallback_enrich(&blocks), out);
    }
}
