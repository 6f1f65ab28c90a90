//! CLI binary for readalong.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs the pipeline, and prints the request outcome as
//! JSON on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use readalong::{process_pdf, PipelineConfig, PollyEngine, SpeechEngine};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "readalong",
    version,
    about = "Turn PDF story pages into narrated, word-synchronized audio",
    long_about = "Process a PDF into per-block narration assets: annotated page images, \
SSML-enriched block JSON, MP3 audio, and word-level speech marks. Enrichment uses a vision \
LLM (OpenAI, Anthropic, Google Gemini, or any OpenAI-compatible endpoint); synthesis uses \
AWS Polly. Both are optional — without credentials the pipeline degrades to deterministic \
narration with empty audio.",
    arg_required_else_help = true
)]
struct Cli {
    /// Local PDF file path.
    input: PathBuf,

    /// Root directory for persisted artifacts.
    #[arg(short, long, env = "READALONG_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Vision LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    ///
    /// Auto-detected from API key env vars if not set.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Maximum rendered page dimension in pixels.
    #[arg(long, env = "READALONG_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Blocks per enrichment call.
    #[arg(long, env = "READALONG_CHUNK_SIZE", default_value_t = 1)]
    chunk_size: usize,

    /// Attempts per enrichment chunk before the page fails.
    #[arg(long, env = "READALONG_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Sampling temperature for enrichment.
    #[arg(long, env = "READALONG_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max tokens the model may generate per chunk.
    #[arg(long, env = "READALONG_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// AWS region for speech synthesis.
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Skip audio synthesis entirely (empty audio payloads, no AWS calls).
    #[arg(long, env = "READALONG_NO_SPEECH")]
    no_speech: bool,

    /// Enable debug-level logging.
    #[arg(short, long, env = "READALONG_VERBOSE")]
    verbose: bool,

    /// Log errors only.
    #[arg(short, long, env = "READALONG_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mut builder = PipelineConfig::builder()
        .max_rendered_pixels(cli.max_pixels)
        .chunk_size(cli.chunk_size)
        .max_retries(cli.max_retries)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .output_root(cli.output);
    if let Some(model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if !cli.no_speech {
        let engine: Arc<dyn SpeechEngine> = Arc::new(PollyEngine::connect(cli.region).await);
        builder = builder.speech_engine(engine);
    }
    let config = builder.build().context("Invalid pipeline configuration")?;

    let outcome = process_pdf(&cli.input, &config).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
