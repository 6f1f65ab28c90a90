//! Image encoding: page raster → PNG bytes + base64 `ImageData`.
//!
//! The same PNG serves two consumers: it is persisted as the page-image
//! artifact, and its base64 form rides along with every enrichment request
//! for that page. Encoding once keeps the two byte-identical. PNG over JPEG
//! because lossless text crispness matters more than file size when a
//! vision model must read small print.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::RgbImage;
use std::io::Cursor;
use tracing::debug;

/// A page raster encoded for both persistence and the vision API.
pub struct EncodedPage {
    /// Raw PNG bytes, persisted as the page-image artifact.
    pub png: Vec<u8>,
    /// The same PNG, base64-wrapped for the multimodal request body.
    pub image_data: ImageData,
}

/// Encode a rendered page once for both artifact persistence and enrichment.
pub fn encode_page(image: &RgbImage) -> Result<EncodedPage, image::ImageError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&png);
    debug!("Encoded page image → {} bytes base64", b64.len());

    Ok(EncodedPage {
        image_data: ImageData::new(b64, "image/png").with_detail("high"),
        png,
    })
}
