//! Error types for the readalong library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReadAlongError`] — **Fatal**: the request cannot produce its required
//!   artifacts (bad input file, corrupt PDF, enrichment exhausted its retry
//!   budget, artifact persistence failed). Any `ReadAlongError` aborts the
//!   whole request; the public entry point converts it into a structured
//!   [`crate::model::RequestOutcome`] with `status: "error"` rather than
//!   letting it escape the request boundary.
//!
//! * [`EnrichError`] — **Local**: a single enrichment call misbehaved.
//!   `MalformedResponse` / `RateLimitedOrBlocked` are retried within the
//!   budget, `ProviderUnavailable` is terminal for the chunk immediately,
//!   and only [`EnrichError::ChunkFailed`] escalates into
//!   [`ReadAlongError::EnrichmentFailed`].
//!
//! The separation keeps recoverable provider noise out of the fatal path:
//! callers of [`crate::pipeline::enrich`] see exactly one terminal variant,
//! while tests can assert on each intermediate condition separately.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the readalong library.
///
/// Enrichment-call failures use [`EnrichError`] and are absorbed or retried
/// inside the pipeline rather than propagated here.
#[derive(Debug, Error)]
pub enum ReadAlongError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium returned an error while rendering or reading a page.
    #[error("Failed to render page {page}: {detail}")]
    RenderFailed { page: usize, detail: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Enrichment exhausted its retry budget for a chunk of this page.
    ///
    /// The chunked path is all-or-nothing: no partially enriched page is
    /// ever returned, so one failed chunk fails the page and the request.
    #[error("Enrichment failed for page {page}: {detail}")]
    EnrichmentFailed { page: usize, detail: String },

    /// The speech engine returned an error for a block.
    ///
    /// Only raised when an engine is configured; a missing engine degrades
    /// to empty audio instead.
    #[error("Speech synthesis failed for block {block_id} on page {page}: {detail}")]
    SynthesisFailed {
        page: usize,
        block_id: u32,
        detail: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a persisted artifact. Not retried.
    #[error("Failed to write artifact '{path}': {source}")]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// What exactly was wrong with a model response that failed to parse.
///
/// The JSON-candidate extraction is heuristic (fence strip, then brace
/// slice); tests need to distinguish "no JSON object found at all" from
/// "an object was isolated but does not parse" from "it parses but a block
/// is missing required fields", so each gets its own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    /// The provider returned an empty or blocked response.
    Empty,
    /// No `{...}` region could be located in the response text.
    NoJsonObject,
    /// A candidate was extracted but `serde_json` rejected it
    /// (includes truncated output, which never closes the outer brace).
    InvalidJson,
    /// Valid JSON, but a retained block lacks the required enrichment
    /// fields.
    IncompleteBlock,
}

impl std::fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MalformedKind::Empty => "empty response",
            MalformedKind::NoJsonObject => "no JSON object in response",
            MalformedKind::InvalidJson => "invalid JSON",
            MalformedKind::IncompleteBlock => "incomplete block in response",
        };
        f.write_str(s)
    }
}

/// A failure of a single enrichment call or chunk.
///
/// Retryable variants ([`EnrichError::is_retryable`]) are consumed by the
/// retry loop in [`crate::pipeline::enrich`]; [`EnrichError::ChunkFailed`]
/// is terminal for the page.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// The provider disappeared mid-run (credentials revoked, endpoint
    /// gone). Not worth a retry; the chunk fails on the spot.
    #[error("Enrichment provider unavailable: {detail}")]
    ProviderUnavailable { detail: String },

    /// The response text could not be turned into a valid enriched chunk.
    #[error("Malformed response ({kind}): {detail}")]
    MalformedResponse { kind: MalformedKind, detail: String },

    /// The provider throttled, blocked, or otherwise rejected the request.
    /// Transport-level failures land here too; all are worth a retry.
    #[error("Provider rejected or blocked the request: {detail}")]
    RateLimitedOrBlocked { detail: String },

    /// Retry budget exhausted for one chunk. Terminal for the page.
    #[error("Chunk starting at block {first_block} failed after {attempts} attempts: {detail}")]
    ChunkFailed {
        first_block: u32,
        attempts: u32,
        detail: String,
    },
}

impl EnrichError {
    /// Whether the retry loop should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EnrichError::MalformedResponse { .. } | EnrichError::RateLimitedOrBlocked { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrichment_failed_display() {
        let e = ReadAlongError::EnrichmentFailed {
            page: 3,
            detail: "chunk 0 gave up".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 3"), "got: {msg}");
    }

    #[test]
    fn malformed_kinds_are_distinguishable() {
        let no_obj = EnrichError::MalformedResponse {
            kind: MalformedKind::NoJsonObject,
            detail: "…".into(),
        };
        let bad_json = EnrichError::MalformedResponse {
            kind: MalformedKind::InvalidJson,
            detail: "…".into(),
        };
        assert!(no_obj.to_string().contains("no JSON object"));
        assert!(bad_json.to_string().contains("invalid JSON"));
    }

    #[test]
    fn retryable_classification() {
        assert!(EnrichError::RateLimitedOrBlocked {
            detail: "429".into()
        }
        .is_retryable());
        assert!(EnrichError::MalformedResponse {
            kind: MalformedKind::Empty,
            detail: String::new(),
        }
        .is_retryable());
        assert!(!EnrichError::ProviderUnavailable {
            detail: "no key".into()
        }
        .is_retryable());
        assert!(!EnrichError::ChunkFailed {
            first_block: 0,
            attempts: 3,
            detail: String::new(),
        }
        .is_retryable());
    }

    #[test]
    fn chunk_failed_display_names_block_and_attempts() {
        let e = EnrichError::ChunkFailed {
            first_block: 7,
            attempts: 3,
            detail: "invalid JSON".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("block 7"));
        assert!(msg.contains("3 attempts"));
    }
}
