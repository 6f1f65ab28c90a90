//! Configuration for the page narration pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across the whole request, log it, and diff two
//! runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::ReadAlongError;
use crate::pipeline::enrich::EnrichmentModel;
use crate::pipeline::synth::SpeechEngine;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for processing one document into narration assets.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use readalong::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .chunk_size(2)
///     .output_root("out")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum rendered page dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap independent of the page's physical size: pdfium never
    /// allocates more than roughly `max_rendered_pixels²` bytes of pixels,
    /// and the resulting PNG stays inside vision-API upload limits.
    pub max_rendered_pixels: u32,

    /// Number of blocks submitted per enrichment call. Default: 1.
    ///
    /// One call per block keeps each response small and easy to validate.
    /// Larger chunks amortize per-call overhead at the cost of coupling
    /// unrelated blocks into one response: a single bad block then fails
    /// the whole chunk.
    pub chunk_size: usize,

    /// Maximum attempts per enrichment chunk. Default: 3.
    ///
    /// Covers transient throttling and the occasional malformed response.
    /// A chunk that still fails after the budget fails the page.
    pub max_retries: u32,

    /// Fixed delay between enrichment attempts, in milliseconds. Default: 2000.
    pub retry_delay_ms: u64,

    /// Sampling temperature for the enrichment completion. Default: 0.1.
    ///
    /// Near-zero keeps the model faithful to the text it was given, which
    /// matters because retained block text must survive verbatim.
    pub temperature: f32,

    /// Maximum tokens the model may generate per chunk. Default: 8192.
    ///
    /// Each response echoes the full block JSON plus three added fields;
    /// too small a budget truncates the object mid-brace and burns a retry.
    pub max_tokens: usize,

    /// Vision model identifier, e.g. "gpt-4.1-nano". If None, provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "gemini"). If None along with
    /// `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed vision provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed enrichment model, bypassing provider resolution
    /// entirely. Used by tests to substitute fakes.
    pub enrichment: Option<Arc<dyn EnrichmentModel>>,

    /// Speech engine for audio + timing synthesis. When None, synthesis
    /// degrades to zero-length audio and empty timing sequences.
    pub speech_engine: Option<Arc<dyn SpeechEngine>>,

    /// Root directory for persisted artifacts. Default: "output".
    ///
    /// Each document gets `output_root/<document stem>/`; filenames inside
    /// are deterministic functions of the document name and page/block
    /// indices, so re-runs overwrite rather than accumulate.
    pub output_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            chunk_size: 1,
            max_retries: 3,
            retry_delay_ms: 2000,
            temperature: 0.1,
            max_tokens: 8192,
            model: None,
            provider_name: None,
            provider: None,
            enrichment: None,
            speech_engine: None,
            output_root: PathBuf::from("output"),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("chunk_size", &self.chunk_size)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "enrichment",
                &self.enrichment.as_ref().map(|_| "<dyn EnrichmentModel>"),
            )
            .field(
                "speech_engine",
                &self.speech_engine.as_ref().map(|_| "<dyn SpeechEngine>"),
            )
            .field("output_root", &self.output_root)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn enrichment(mut self, model: Arc<dyn EnrichmentModel>) -> Self {
        self.config.enrichment = Some(model);
        self
    }

    pub fn speech_engine(mut self, engine: Arc<dyn SpeechEngine>) -> Self {
        self.config.speech_engine = Some(engine);
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ReadAlongError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(ReadAlongError::InvalidConfig(
                "Chunk size must be ≥ 1".into(),
            ));
        }
        if c.max_retries == 0 {
            return Err(ReadAlongError::InvalidConfig(
                "Retry budget must be ≥ 1".into(),
            ));
        }
        if c.output_root.as_os_str().is_empty() {
            return Err(ReadAlongError::InvalidConfig(
                "Output root must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
