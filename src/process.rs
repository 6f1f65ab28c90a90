//! Request processing: per-page sequencing and outcome assembly.
//!
//! This is the only module that sees the whole pipeline. Per page, strictly
//! in index order: render → extract blocks → palette + annotate → persist
//! raw artifacts → enrich → synthesize per retained block → persist
//! enriched artifacts → emit the page manifest. Pages, blocks, and chunks
//! are all processed sequentially; the only blocking operations are the
//! provider calls, and the provider handles are shared read-only across the
//! request.
//!
//! Failure policy: anything that prevents producing a page's required
//! artifacts aborts the whole request — no partial multi-page results. The
//! public entry points never return an error; they fold every failure into
//! a well-formed [`RequestOutcome`] with `status: "error"` and an `errors`
//! map keyed by the failing stage.

use crate::artifacts;
use crate::config::PipelineConfig;
use crate::error::ReadAlongError;
use crate::model::{BlockAudio, BlockId, PageArtifacts, RequestOutcome};
use crate::pipeline::annotate::{annotate_page, generate_palette};
use crate::pipeline::blocks::extract_blocks;
use crate::pipeline::encode::encode_page;
use crate::pipeline::enrich::{
    enrich_blocks, fallback_enrich, EnrichmentModel, RetryPolicy, VisionModel,
};
use crate::pipeline::render::{DocumentSource, PdfiumSource};
use crate::pipeline::synth::synthesize_block;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Process a PDF file into narration assets.
///
/// The primary entry point. Validates the input, opens it through the
/// pdfium-backed [`DocumentSource`], and processes every page. Always
/// returns a well-formed outcome; inspect `status` for success.
pub async fn process_pdf(path: impl AsRef<Path>, config: &PipelineConfig) -> RequestOutcome {
    let path = path.as_ref();

    let doc_name = match validate_pdf_input(path).await {
        Ok(name) => name,
        Err(e) => return outcome_for(e),
    };

    let source = match PdfiumSource::open(path, config.max_rendered_pixels).await {
        Ok(source) => source,
        Err(e) => return outcome_for(e),
    };

    process_document(&source, &doc_name, config).await
}

/// Process in-memory PDF bytes into narration assets.
///
/// The bytes get the same magic-byte validation as file inputs, then are
/// written to a request-scoped temporary file under `output_root`. The
/// copy is removed on every exit path; a failed removal is logged and
/// swallowed so cleanup trouble never masks the primary outcome.
pub async fn process_pdf_bytes(
    bytes: &[u8],
    doc_name: &str,
    config: &PipelineConfig,
) -> RequestOutcome {
    if !bytes.starts_with(b"%PDF") {
        let mut magic = [0u8; 4];
        let len = bytes.len().min(4);
        magic[..len].copy_from_slice(&bytes[..len]);
        return outcome_for(ReadAlongError::NotAPdf {
            path: PathBuf::from(format!("{doc_name}.pdf")),
            magic,
        });
    }

    if let Err(e) = tokio::fs::create_dir_all(&config.output_root).await {
        return outcome_for(ReadAlongError::PersistFailed {
            path: config.output_root.clone(),
            source: e,
        });
    }
    let mut tmp = match tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile_in(&config.output_root)
    {
        Ok(tmp) => tmp,
        Err(e) => {
            return outcome_for(ReadAlongError::Internal(format!(
                "Failed to create temporary PDF copy: {e}"
            )))
        }
    };
    if let Err(e) = tmp.write_all(bytes) {
        cleanup_temp(tmp);
        return outcome_for(ReadAlongError::Internal(format!(
            "Failed to write temporary PDF copy: {e}"
        )));
    }
    info!("Saved temporary PDF copy: {}", tmp.path().display());

    let outcome = {
        let source = match PdfiumSource::open(tmp.path(), config.max_rendered_pixels).await {
            Ok(source) => source,
            Err(e) => {
                cleanup_temp(tmp);
                return outcome_for(e);
            }
        };
        process_document(&source, doc_name, config).await
    };

    cleanup_temp(tmp);
    outcome
}

/// Process an already-opened document through the full pipeline.
///
/// Exposed so callers (and tests) can supply a non-pdfium
/// [`DocumentSource`].
pub async fn process_document(
    source: &dyn DocumentSource,
    doc_name: &str,
    config: &PipelineConfig,
) -> RequestOutcome {
    let enrichment = resolve_enrichment(config);
    if enrichment.is_none() {
        warn!("No enrichment provider available; using deterministic fallback enrichment");
    }
    if config.speech_engine.is_none() {
        warn!("No speech engine configured; audio generation will produce empty payloads");
    }

    match run_pages(source, doc_name, config, enrichment.as_deref()).await {
        Ok(results) => {
            info!("Processed {} page(s) of '{doc_name}'", results.len());
            RequestOutcome::success(results)
        }
        Err(e) => outcome_for(e),
    }
}

/// Sequential per-page pipeline. Any error aborts the remaining pages.
async fn run_pages(
    source: &dyn DocumentSource,
    doc_name: &str,
    config: &PipelineConfig,
    enrichment: Option<&dyn EnrichmentModel>,
) -> Result<Vec<PageArtifacts>, ReadAlongError> {
    let dir = artifacts::output_dir(&config.output_root, doc_name);
    artifacts::ensure_output_dir(&dir).await?;
    info!("Created output directory: {}", dir.display());

    let policy = RetryPolicy::new(
        config.max_retries,
        Duration::from_millis(config.retry_delay_ms),
    );
    let mut results = Vec::with_capacity(source.page_count());

    for page_number in 0..source.page_count() {
        let rendered = source.load_page(page_number).await?;

        // Blocks + annotation overlay.
        let blocks = extract_blocks(&rendered.words);
        let block_ids: BTreeSet<BlockId> = rendered.words.iter().map(|w| w.block_id).collect();
        let palette = generate_palette(&block_ids);
        let mut annotated = rendered.image.clone();
        annotate_page(&mut annotated, &rendered.words, &palette);

        // Raw artifacts: page PNG, annotated PNG, block JSON.
        let encoded = encode_page(&rendered.image).map_err(|e| ReadAlongError::RenderFailed {
            page: page_number,
            detail: format!("Image encoding failed: {e}"),
        })?;
        artifacts::write_bytes(
            &artifacts::page_image_path(&dir, doc_name, page_number),
            &encoded.png,
        )
        .await?;
        let annotated_image_path = artifacts::annotated_image_path(&dir, doc_name, page_number);
        artifacts::write_png(&annotated_image_path, &annotated).await?;
        let json_path = artifacts::blocks_json_path(&dir, doc_name, page_number);
        artifacts::write_json(&json_path, &blocks).await?;
        info!("Saved annotated image and block details for page {page_number}");

        // Enrichment: model-driven, or deterministic fallback.
        let mut enriched = match enrichment {
            Some(model) => enrich_blocks(
                model,
                &encoded.image_data,
                &blocks,
                config.chunk_size,
                &policy,
            )
            .await
            .map_err(|e| ReadAlongError::EnrichmentFailed {
                page: page_number,
                detail: e.to_string(),
            })?,
            None => fallback_enrich(&blocks),
        };

        // Synthesis: audio + timing per retained block.
        let mut audio_metadata: BTreeMap<BlockId, BlockAudio> = BTreeMap::new();
        for (&block_id, block) in enriched.iter_mut() {
            if block.ssml.is_empty() {
                warn!("No SSML for block {block_id} on page {page_number}; skipping synthesis");
                continue;
            }

            let person_type = (block.person_type != "null").then_some(block.person_type.as_str());
            let (audio, marks) = synthesize_block(
                config.speech_engine.as_deref(),
                &block.ssml,
                person_type,
            )
            .await
            .map_err(|detail| ReadAlongError::SynthesisFailed {
                page: page_number,
                block_id,
                detail,
            })?;

            let audio_path = artifacts::block_audio_path(&dir, page_number, block_id);
            artifacts::write_bytes(&audio_path, &audio).await?;
            let marks_path = artifacts::block_marks_path(&dir, page_number, block_id);
            artifacts::write_json(&marks_path, &marks).await?;

            block.timing = Some(marks);
            audio_metadata.insert(
                block_id,
                BlockAudio {
                    audio_path: audio_path.display().to_string(),
                    speech_marks_path: marks_path.display().to_string(),
                },
            );
        }

        // Enriched artifacts: trimmed block JSON + audio metadata.
        let vertex_trimmed_path = artifacts::trimmed_blocks_path(&dir, doc_name, page_number);
        artifacts::write_json(&vertex_trimmed_path, &enriched).await?;
        let metadata_path = artifacts::audio_metadata_path(&dir, page_number);
        artifacts::write_json(&metadata_path, &audio_metadata).await?;
        info!("Saved audio metadata for page {page_number}");

        results.push(PageArtifacts {
            page_number,
            annotated_image_path: annotated_image_path.display().to_string(),
            json_path: json_path.display().to_string(),
            vertex_trimmed_path: vertex_trimmed_path.display().to_string(),
            metadata_path: metadata_path.display().to_string(),
        });
    }

    Ok(results)
}

/// Check the input file exists and carries the PDF magic; return its stem.
///
/// Only the four magic bytes are read, never the whole file.
async fn validate_pdf_input(path: &Path) -> Result<String, ReadAlongError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ReadAlongError::FileNotFound {
            path: path.to_path_buf(),
        })?;

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            // Shorter than a magic header: cannot be a PDF.
            return Err(ReadAlongError::NotAPdf {
                path: path.to_path_buf(),
                magic: [0u8; 4],
            });
        }
        Err(e) => {
            return Err(ReadAlongError::Internal(format!(
                "Failed to read '{}': {e}",
                path.display()
            )))
        }
    }
    if &magic != b"%PDF" {
        return Err(ReadAlongError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }

    Ok(path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string()))
}

/// Resolve the enrichment model, from most-specific to least-specific.
///
/// 1. **Pre-built model** (`config.enrichment`) — used as-is; the seam
///    tests inject fakes through.
/// 2. **Pre-built provider** (`config.provider`) — wrapped in
///    [`VisionModel`] with the configured sampling options.
/// 3. **Named provider + model** (`config.provider_name`) — created via
///    [`ProviderFactory`], which reads the matching API key from the
///    environment.
/// 4. **Full auto-detection** — the factory scans known API key variables
///    and picks the first available provider.
///
/// `None` means fallback mode: no model calls are made for this request.
fn resolve_enrichment(config: &PipelineConfig) -> Option<Arc<dyn EnrichmentModel>> {
    if let Some(ref model) = config.enrichment {
        return Some(Arc::clone(model));
    }

    let vision = |provider: Arc<dyn LLMProvider>| -> Arc<dyn EnrichmentModel> {
        Arc::new(VisionModel::new(
            provider,
            config.temperature,
            config.max_tokens,
        ))
    };

    if let Some(ref provider) = config.provider {
        return Some(vision(Arc::clone(provider)));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return match ProviderFactory::create_llm_provider(name, model) {
            Ok(provider) => Some(vision(provider)),
            Err(e) => {
                warn!("Provider '{name}' is not configured: {e}");
                None
            }
        };
    }

    match ProviderFactory::from_env() {
        Ok((provider, _embedding)) => Some(vision(provider)),
        Err(e) => {
            warn!("No enrichment provider auto-detected: {e}");
            None
        }
    }
}

/// Fold a fatal error into the well-formed error outcome.
fn outcome_for(e: ReadAlongError) -> RequestOutcome {
    let stage = stage_for(&e);
    warn!("Request failed at stage '{stage}': {e}");
    RequestOutcome::error(stage, e.to_string())
}

/// The `errors` map key for a fatal error.
fn stage_for(e: &ReadAlongError) -> &'static str {
    match e {
        ReadAlongError::FileNotFound { .. } | ReadAlongError::NotAPdf { .. } => "input",
        ReadAlongError::CorruptPdf { .. }
        | ReadAlongError::RenderFailed { .. }
        | ReadAlongError::PdfiumBindingFailed(_) => "render",
        ReadAlongError::EnrichmentFailed { .. } => "enrich",
        ReadAlongError::SynthesisFailed { .. } => "synthesize",
        ReadAlongError::PersistFailed { .. } => "persist",
        ReadAlongError::InvalidConfig(_) => "config",
        ReadAlongError::Internal(_) => "process_request",
    }
}

/// Delete the temp copy, logging (not escalating) failures.
fn cleanup_temp(tmp: tempfile::NamedTempFile) {
    let path = tmp.path().to_path_buf();
    match tmp.close() {
        Ok(()) => info!("Deleted temporary PDF copy: {}", path.display()),
        Err(e) => warn!("Failed to delete temporary PDF copy {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_keys_cover_the_taxonomy() {
        assert_eq!(
            stage_for(&ReadAlongError::EnrichmentFailed {
                page: 0,
                detail: String::new()
            }),
            "enrich"
        );
        assert_eq!(
            stage_for(&ReadAlongError::PersistFailed {
                path: "x".into(),
                source: std::io::Error::other("boom"),
            }),
            "persist"
        );
        assert_eq!(
            stage_for(&ReadAlongError::NotAPdf {
                path: "x".into(),
                magic: *b"PK\x03\x04",
            }),
            "input"
        );
    }

    #[tokio::test]
    async fn non_pdf_input_is_rejected_with_magic_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fake.pdf");
        tokio::fs::write(&path, b"PK\x03\x04not a pdf").await.unwrap();

        let err = validate_pdf_input(&path).await.unwrap_err();
        assert!(matches!(err, ReadAlongError::NotAPdf { magic, .. } if &magic == b"PK\x03\x04"));
    }

    #[tokio::test]
    async fn missing_input_is_file_not_found() {
        let err = validate_pdf_input(Path::new("/no/such/file.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReadAlongError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn file_shorter_than_magic_is_not_a_pdf() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stub.pdf");
        tokio::fs::write(&path, b"%P").await.unwrap();

        let err = validate_pdf_input(&path).await.unwrap_err();
        assert!(matches!(err, ReadAlongError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn valid_magic_yields_document_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("storybook.pdf");
        tokio::fs::write(&path, b"%PDF-1.7\n").await.unwrap();
        assert_eq!(validate_pdf_input(&path).await.unwrap(), "storybook");
    }
}
