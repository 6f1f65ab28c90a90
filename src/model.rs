//! The block data model shared by every pipeline stage.
//!
//! A page decomposes into **blocks**: spatially grouped runs of words that
//! share one origin id and form the atomic narration unit. The model flows
//! strictly forward through the pipeline:
//!
//! ```text
//! Word ──▶ Block ──▶ EnrichedBlock ──▶ EnrichedBlock + timing
//!  (render)  (extract)   (enrich)           (synthesize)
//! ```
//!
//! Ownership is one-directional too: block extraction is the only place a
//! [`Block`] is created, enrichment is the only place one is dropped, and
//! synthesis is the only place `timing` is attached.
//!
//! All maps are keyed by [`BlockId`]; `serde_json` round-trips the integer
//! keys as JSON-object string keys, so the persisted artifacts keep the
//! `{"0": {...}, "1": {...}}` shape read-aloud clients expect.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable within-page block identifier assigned by the rendering collaborator.
pub type BlockId = u32;

/// A map of blocks keyed by block id, in ascending id order.
pub type BlockMap = BTreeMap<BlockId, Block>;

/// A map of enriched blocks keyed by block id.
pub type EnrichedBlockMap = BTreeMap<BlockId, EnrichedBlock>;

/// One word on a rendered page, with its geometry in image pixels.
///
/// Produced by the rendering collaborator and never mutated. `block_id`
/// groups words into blocks; `line_id` / `word_id` give intra-block order
/// and decide label placement (first word of first line).
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub text: String,
    pub block_id: BlockId,
    pub line_id: u32,
    pub word_id: u32,
}

impl Word {
    /// The word's rectangle as stored in the block model.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(self.x0, self.y0, self.x1, self.y1)
    }
}

/// An axis-aligned rectangle, serialized as `[[x0, y0], [x1, y1]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub [f32; 2], pub [f32; 2]);

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self([x0, y0], [x1, y1])
    }

    pub fn x0(&self) -> f32 {
        self.0[0]
    }

    pub fn y0(&self) -> f32 {
        self.0[1]
    }

    pub fn x1(&self) -> f32 {
        self.1[0]
    }

    pub fn y1(&self) -> f32 {
        self.1[1]
    }
}

/// A text block as extracted from the page, before enrichment.
///
/// Invariant: `words.len() == bounding_boxes.len()`, same order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Words joined by single spaces, trimmed.
    pub text: String,
    /// Word texts in extraction order.
    pub words: Vec<String>,
    /// One rectangle per word, same order as `words`.
    pub bounding_boxes: Vec<BoundingBox>,
}

/// A block the enrichment stage retained, plus narration metadata.
///
/// `dialog` and `person_type` are strings ("true"/"false", "null") rather
/// than native types: that is the wire shape the model is prompted for and
/// the shape persisted artifacts keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedBlock {
    pub text: String,
    pub words: Vec<String>,
    pub bounding_boxes: Vec<BoundingBox>,
    /// Prosody markup wrapping the original text.
    pub ssml: String,
    /// "true" when the block is direct speech, "false" otherwise.
    pub dialog: String,
    /// One of the six speaker categories, or "null" when `dialog` is "false".
    pub person_type: String,
    /// Per-word timing marks, attached by the synthesis stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Vec<TimingMark>>,
}

impl EnrichedBlock {
    pub fn is_dialog(&self) -> bool {
        self.dialog.eq_ignore_ascii_case("true")
    }
}

/// The six speaker categories the enrichment model may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonType {
    YoungBoy,
    OldMan,
    YoungGirl,
    OldWoman,
    MiddleAgedMan,
    MiddleAgedWoman,
}

impl PersonType {
    pub const ALL: [PersonType; 6] = [
        PersonType::YoungBoy,
        PersonType::OldMan,
        PersonType::YoungGirl,
        PersonType::OldWoman,
        PersonType::MiddleAgedMan,
        PersonType::MiddleAgedWoman,
    ];

    /// The wire label used in prompts and persisted JSON.
    pub fn label(&self) -> &'static str {
        match self {
            PersonType::YoungBoy => "young boy",
            PersonType::OldMan => "old man",
            PersonType::YoungGirl => "young girl",
            PersonType::OldWoman => "old woman",
            PersonType::MiddleAgedMan => "middle aged man",
            PersonType::MiddleAgedWoman => "middle aged woman",
        }
    }

    /// Case-insensitive parse of the wire label.
    pub fn parse(s: &str) -> Option<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|p| p.label() == lowered)
    }
}

/// A point event correlating a position in synthesized audio with a
/// position in the source markup, as emitted by the speech engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingMark {
    /// Mark kind: "word", "sentence", "ssml", or "viseme".
    #[serde(rename = "type")]
    pub mark_type: String,
    /// Offset from the start of the audio stream, in milliseconds.
    pub time: u64,
    /// The text this mark points at.
    pub value: String,
    /// Byte offset of the mark's start in the input markup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    /// Byte offset of the mark's end in the input markup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

/// Per-block audio artifact locations, collected into the page metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAudio {
    pub audio_path: String,
    pub speech_marks_path: String,
}

/// Manifest of where one page's artifacts were persisted. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageArtifacts {
    pub page_number: usize,
    pub annotated_image_path: String,
    pub json_path: String,
    pub vertex_trimmed_path: String,
    pub metadata_path: String,
}

/// The top-level outcome of processing one document.
///
/// Always well-formed: a failed request carries `status: "error"`, a
/// human-readable `message`, and an `errors` map keyed by the failing
/// stage — never a raw error propagated past the request boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub status: String,
    pub message: String,
    pub results: Vec<PageArtifacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
}

impl RequestOutcome {
    pub fn success(results: Vec<PageArtifacts>) -> Self {
        Self {
            message: format!("Processed {} page(s).", results.len()),
            status: "success".to_string(),
            results,
            errors: None,
        }
    }

    pub fn error(stage: &str, message: String) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(stage.to_string(), message.clone());
        Self {
            status: "error".to_string(),
            message,
            results: Vec::new(),
            errors: Some(errors),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_serializes_as_point_pairs() {
        let b = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[[1.0,2.0],[3.0,4.0]]");
        let back: BoundingBox = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn block_map_keys_round_trip_as_strings() {
        let mut map = BlockMap::new();
        map.insert(
            0,
            Block {
                text: "Hi".into(),
                words: vec!["Hi".into()],
                bounding_boxes: vec![BoundingBox::new(0.0, 0.0, 1.0, 1.0)],
            },
        );
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.starts_with("{\"0\":"), "got: {json}");
        let back: BlockMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn timing_absent_until_attached() {
        let block = EnrichedBlock {
            text: "Hi".into(),
            words: vec!["Hi".into()],
            bounding_boxes: vec![BoundingBox::new(0.0, 0.0, 1.0, 1.0)],
            ssml: "<speak><prosody rate='slow'>Hi</prosody></speak>".into(),
            dialog: "false".into(),
            person_type: "null".into(),
            timing: None,
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(!json.contains("timing"));
    }

    #[test]
    fn person_type_parse_is_case_insensitive() {
        assert_eq!(PersonType::parse("Young Boy"), Some(PersonType::YoungBoy));
        assert_eq!(
            PersonType::parse("MIDDLE AGED WOMAN"),
            Some(PersonType::MiddleAgedWoman)
        );
        assert_eq!(PersonType::parse("narrator"), None);
        assert_eq!(PersonType::parse("null"), None);
    }

    #[test]
    fn outcome_error_shape() {
        let o = RequestOutcome::error("process_request", "boom".into());
        assert!(!o.is_success());
        assert_eq!(o.results.len(), 0);
        assert_eq!(
            o.errors.as_ref().unwrap().get("process_request").unwrap(),
            "boom"
        );
    }
}
