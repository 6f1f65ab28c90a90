//! Palette generation and page annotation overlays.
//!
//! Every block gets a pseudo-random color; every word gets a 2 px outlined
//! rectangle in its block's color, and the first word of each block's first
//! line gets a "Block {id}" label above it. The annotated raster is a human
//! inspection aid persisted next to the block JSON, so exact colors do not
//! matter — only that words of one block visibly share one.

use crate::model::{BlockId, Word};
use ab_glyph::FontVec;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Color assigned to one block for the annotation overlay.
pub type BlockColor = Rgb<u8>;

/// Mapping from block id to its overlay color.
pub type Palette = BTreeMap<BlockId, BlockColor>;

/// Vertical offset of the block label above its anchor word, in pixels.
const LABEL_OFFSET_Y: i32 = 15;

/// Label text height in pixels.
const LABEL_SCALE: f32 = 14.0;

/// Draw three independent uniform u8 values per block id.
///
/// Unseeded on purpose: colors are a per-call inspection aid, and collisions
/// between blocks are permitted. Callers must not assert exact colors.
pub fn generate_palette(block_ids: &BTreeSet<BlockId>) -> Palette {
    let mut rng = rand::rng();
    block_ids
        .iter()
        .map(|&id| {
            (
                id,
                Rgb([
                    rng.random_range(0..=255u8),
                    rng.random_range(0..=255u8),
                    rng.random_range(0..=255u8),
                ]),
            )
        })
        .collect()
}

/// Draw word rectangles and block labels onto the page raster, in place.
///
/// Rectangles that stick out past the image edge are clipped (skipped for
/// the out-of-bounds thickness pass), never an error. Labels are skipped
/// when no system font could be loaded or when the label would sit above
/// the top edge.
///
/// # Panics
/// Precondition: `palette` holds an entry for every block id present in
/// `words` (generate it from the same word list). A missing entry is a
/// programmer error and panics.
pub fn annotate_page(image: &mut RgbImage, words: &[Word], palette: &Palette) {
    let font = load_label_font();
    if font.is_none() {
        debug!("No system font found; block labels will be omitted");
    }
    let bounds = (image.width() as i32, image.height() as i32);

    for word in words {
        let color = palette[&word.block_id];

        // 2 px outline: two nested hollow rectangles.
        let w = (word.x1 - word.x0).max(1.0) as u32;
        let h = (word.y1 - word.y0).max(1.0) as u32;
        for t in 0..2i32 {
            let rect = Rect::at(word.x0 as i32 - t, word.y0 as i32 - t)
                .of_size(w + (2 * t) as u32, h + (2 * t) as u32);
            if rect_in_bounds(&rect, bounds) {
                draw_hollow_rect_mut(image, rect, color);
            }
        }

        if word.line_id == 0 && word.word_id == 0 {
            if let Some(ref font) = font {
                let label = format!("Block {}", word.block_id);
                let x = word.x0 as i32;
                let y = word.y0 as i32 - LABEL_OFFSET_Y;
                if x >= 0 && y >= 0 && x < bounds.0 && y < bounds.1 {
                    draw_text_mut(image, color, x, y, LABEL_SCALE, font, &label);
                }
            }
        }
    }
}

fn rect_in_bounds(rect: &Rect, (w, h): (i32, i32)) -> bool {
    rect.left() >= 0
        && rect.top() >= 0
        && rect.left() + rect.width() as i32 <= w
        && rect.top() + rect.height() as i32 <= h
}

/// Best-effort load of a label font from common system locations.
fn load_label_font() -> Option<FontVec> {
    let font_paths = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];

    for path in &font_paths {
        if let Ok(data) = std::fs::read(path) {
            if let Ok(font) = FontVec::try_from_vec(data) {
                return Some(font);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_has_one_entry_per_block_id() {
        let ids: BTreeSet<BlockId> = [0, 3, 7].into_iter().collect();
        let palette = generate_palette(&ids);
        assert_eq!(palette.len(), 3);
        for id in &ids {
            // Exact colors are non-deterministic; presence is the contract.
            assert!(palette.contains_key(id));
        }
    }

    #[test]
    fn empty_id_set_yields_empty_palette() {
        assert!(generate_palette(&BTreeSet::new()).is_empty());
    }

    #[test]
    fn annotation_mutates_pixels_inside_word_rect() {
        let mut image = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let words = vec![Word {
            x0: 20.0,
            y0: 30.0,
            x1: 60.0,
            y1: 45.0,
            text: "hello".into(),
            block_id: 0,
            line_id: 0,
            word_id: 0,
        }];
        let ids: BTreeSet<BlockId> = [0].into_iter().collect();
        let palette = generate_palette(&ids);

        annotate_page(&mut image, &words, &palette);

        let color = palette[&0];
        // A palette draw can land on pure white; the outline corner pixel
        // must equal the block color either way.
        assert_eq!(*image.get_pixel(20, 30), color);
    }

    #[test]
    fn out_of_bounds_word_is_clipped_not_fatal() {
        let mut image = RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]));
        let words = vec![Word {
            x0: 40.0,
            y0: 40.0,
            x1: 80.0, // extends past the right edge
            y1: 70.0,
            text: "edge".into(),
            block_id: 1,
            line_id: 0,
            word_id: 0,
        }];
        let ids: BTreeSet<BlockId> = [1].into_iter().collect();
        let palette = generate_palette(&ids);
        annotate_page(&mut image, &words, &palette); // must not panic
    }
}
