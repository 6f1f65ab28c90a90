//! Page rendering: raster images plus word-level geometry via pdfium.
//!
//! The pipeline consumes pages through the [`DocumentSource`] trait so tests
//! can substitute an in-memory fake; [`PdfiumSource`] is the production
//! implementation.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto a dedicated
//! blocking-pool thread so Tokio workers never stall during CPU-heavy
//! rendering.
//!
//! ## Word geometry
//!
//! pdfium exposes text as visual segments (roughly one per line). Each
//! segment is split into whitespace-delimited words whose boxes are carved
//! out of the segment bounds proportionally to character count, and
//! consecutive segments are grouped into blocks when their vertical gap is
//! small relative to the line height. Coordinates are converted from PDF
//! points (origin bottom-left) to rendered-image pixels (origin top-left).

use crate::error::ReadAlongError;
use crate::model::Word;
use async_trait::async_trait;
use image::RgbImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A line's vertical gap above which the next line starts a new block,
/// as a multiple of the current line height.
const BLOCK_GAP_FACTOR: f32 = 1.5;

/// One rendered page: the raster and its word list.
pub struct RenderedPage {
    pub image: RgbImage,
    pub words: Vec<Word>,
}

/// The rendering collaborator: raster image + word geometry per page.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Render one page and extract its words, 0-indexed.
    async fn load_page(&self, index: usize) -> Result<RenderedPage, ReadAlongError>;
}

/// pdfium-backed [`DocumentSource`].
pub struct PdfiumSource {
    path: PathBuf,
    max_pixels: u32,
    page_count: usize,
}

impl PdfiumSource {
    /// Open a PDF and read its page count.
    ///
    /// The document is re-opened inside `spawn_blocking` for every page
    /// load; only the path and page count are held across calls.
    pub async fn open(path: &Path, max_pixels: u32) -> Result<Self, ReadAlongError> {
        let path_buf = path.to_path_buf();
        let count = tokio::task::spawn_blocking(move || -> Result<usize, ReadAlongError> {
            let pdfium = bind_pdfium()?;
            let document = pdfium.load_pdf_from_file(&path_buf, None).map_err(|e| {
                ReadAlongError::CorruptPdf {
                    path: path_buf.clone(),
                    detail: format!("{e:?}"),
                }
            })?;
            Ok(document.pages().len() as usize)
        })
        .await
        .map_err(|e| ReadAlongError::Internal(format!("Page-count task panicked: {e}")))??;

        Ok(Self {
            path: path.to_path_buf(),
            max_pixels,
            page_count: count,
        })
    }
}

#[async_trait]
impl DocumentSource for PdfiumSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn load_page(&self, index: usize) -> Result<RenderedPage, ReadAlongError> {
        let path = self.path.clone();
        let max_pixels = self.max_pixels;

        tokio::task::spawn_blocking(move || load_page_blocking(&path, index, max_pixels))
            .await
            .map_err(|e| ReadAlongError::Internal(format!("Render task panicked: {e}")))?
    }
}

/// Bind to a pdfium library: a `PDFIUM_LIB_PATH` directory first, then the
/// system library search path. A failed binding is reported, not unwrapped.
fn bind_pdfium() -> Result<Pdfium, ReadAlongError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
            .or_else(|_| Pdfium::bind_to_system_library()),
        Err(_) => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ReadAlongError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering + word extraction.
fn load_page_blocking(
    path: &Path,
    index: usize,
    max_pixels: u32,
) -> Result<RenderedPage, ReadAlongError> {
    let pdfium = bind_pdfium()?;
    let document =
        pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| ReadAlongError::CorruptPdf {
                path: path.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

    let page = document
        .pages()
        .get(index as u16)
        .map_err(|e| ReadAlongError::RenderFailed {
            page: index,
            detail: format!("{e:?}"),
        })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap =
        page.render_with_config(&render_config)
            .map_err(|e| ReadAlongError::RenderFailed {
                page: index,
                detail: format!("{e:?}"),
            })?;
    let image = bitmap.as_image().to_rgb8();

    let words = extract_words(&page, &image).map_err(|e| ReadAlongError::RenderFailed {
        page: index,
        detail: format!("{e:?}"),
    })?;

    debug!(
        "Rendered page {} → {}x{} px, {} words",
        index,
        image.width(),
        image.height(),
        words.len()
    );

    Ok(RenderedPage { image, words })
}

/// Extract words from a page's text segments, in image-pixel coordinates.
fn extract_words(page: &PdfPage<'_>, image: &RgbImage) -> Result<Vec<Word>, PdfiumError> {
    let page_width = page.width().value;
    let page_height = page.height().value;
    let scale_x = image.width() as f32 / page_width;
    let scale_y = image.height() as f32 / page_height;

    let text = page.text()?;

    let mut words = Vec::new();
    let mut block_id: u32 = 0;
    let mut line_id: u32 = 0;
    let mut prev_line: Option<(f32, f32)> = None; // (top, bottom) in PDF points
    let mut started = false;

    for segment in text.segments().iter() {
        let bounds = segment.bounds();
        let seg_text = segment.text();
        if seg_text.trim().is_empty() {
            continue;
        }

        let top = bounds.top.value;
        let bottom = bounds.bottom.value;
        let line_height = (top - bottom).abs().max(1.0);

        // Segment grouping: a large vertical gap to the previous line
        // starts a new block, any vertical movement starts a new line.
        if let Some((_, prev_bottom)) = prev_line {
            let gap = prev_bottom - top; // PDF y grows upward
            if gap > BLOCK_GAP_FACTOR * line_height {
                block_id += 1;
                line_id = 0;
            } else {
                line_id += 1;
            }
        } else if started {
            line_id += 1;
        }
        started = true;
        prev_line = Some((top, bottom));

        words.extend(split_segment_words(
            &seg_text,
            bounds.left.value,
            bounds.right.value,
            top,
            bottom,
            page_height,
            scale_x,
            scale_y,
            block_id,
            line_id,
        ));
    }

    Ok(words)
}

/// Split one text segment into words with proportional boxes.
///
/// pdfium gives bounds per segment, not per word; each word's share of the
/// segment width is proportional to its character count (spaces included in
/// the denominator), which is close enough for annotation overlays and
/// label anchoring.
#[allow(clippy::too_many_arguments)]
fn split_segment_words(
    seg_text: &str,
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
    page_height: f32,
    scale_x: f32,
    scale_y: f32,
    block_id: u32,
    line_id: u32,
) -> Vec<Word> {
    let total_chars = seg_text.chars().count().max(1) as f32;
    let char_width = (right - left).max(0.0) / total_chars;

    // Image-space y: PDF origin is bottom-left, image origin top-left.
    let y0 = (page_height - top) * scale_y;
    let y1 = (page_height - bottom) * scale_y;

    let mut words = Vec::new();
    let mut cursor = 0usize; // char offset into the segment
    let mut word_id: u32 = 0;

    for piece in seg_text.split_whitespace() {
        let piece_chars = piece.chars().count();
        // Advance past any whitespace before this word.
        let offset = chars_until(seg_text, cursor, piece);
        let x0 = left + offset as f32 * char_width;
        let x1 = x0 + piece_chars as f32 * char_width;
        cursor = offset + piece_chars;

        words.push(Word {
            x0: x0 * scale_x,
            y0,
            x1: x1 * scale_x,
            y1,
            text: piece.to_string(),
            block_id,
            line_id,
            word_id,
        });
        word_id += 1;
    }

    words
}

/// Char offset of `piece`'s next occurrence at or after `from`.
fn chars_until(haystack: &str, from: usize, piece: &str) -> usize {
    let rest: String = haystack.chars().skip(from).collect();
    match rest.find(piece) {
        Some(byte_idx) => from + rest[..byte_idx].chars().count(),
        None => from,
    }
}
