//! # readalong
//!
//! Turn PDF story pages into narrated, word-synchronized audio.
//!
//! ## Why this crate?
//!
//! A read-along experience needs more than text-to-speech: the player has
//! to know *which word on the page* is being spoken at every millisecond,
//! and dialog should sound like the character speaking it. This crate
//! rasterises each page, extracts word-level geometry, asks a vision
//! language model to split the text into narration/dialog with speaker
//! attributes, then synthesizes per-block audio together with word timing
//! marks that line up with the on-page word boxes.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render    rasterise pages + word geometry via pdfium (spawn_blocking)
//!  ├─ 2. Blocks    group words into text blocks with parallel box lists
//!  ├─ 3. Annotate  colored outlines + "Block N" labels on a copy of the page
//!  ├─ 4. Encode    PNG → base64 ImageData for the vision model
//!  ├─ 5. Enrich    SSML, dialog flag, speaker category per block (retried)
//!  ├─ 6. Synth     per-block MP3 + word-level speech marks via Polly
//!  └─ 7. Persist   deterministic artifact files + a RequestOutcome manifest
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use readalong::{process_pdf, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY;
//!     // without one the pipeline still runs in deterministic fallback mode.
//!     let config = PipelineConfig::default();
//!     let outcome = process_pdf("storybook.pdf", &config).await;
//!     println!("{}", serde_json::to_string_pretty(&outcome).unwrap());
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `readalong` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! readalong = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifacts;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{EnrichError, MalformedKind, ReadAlongError};
pub use model::{
    Block, BlockAudio, BlockId, BlockMap, BoundingBox, EnrichedBlock, EnrichedBlockMap,
    PageArtifacts, PersonType, RequestOutcome, TimingMark, Word,
};
pub use pipeline::enrich::EnrichmentModel;
pub use pipeline::render::{DocumentSource, PdfiumSource, RenderedPage};
pub use pipeline::synth::{NarrationVoice, PollyEngine, SpeechEngine};
pub use process::{process_document, process_pdf, process_pdf_bytes};
