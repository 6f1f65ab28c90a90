//! Pipeline stages, one module per stage.
//!
//! A page flows through the stages in order:
//!
//! ```text
//! render ──► blocks ──► annotate ──► encode ──► enrich ──► synth
//!  (raster    (group     (colored     (PNG +     (SSML,     (audio +
//!   + word     words)     overlay)     base64)    speaker)   timing)
//!   geometry)
//! ```
//!
//! Each stage is a pure-ish function over the previous stage's output;
//! orchestration, persistence, and failure policy live in
//! [`crate::process`].

pub mod annotate;
pub mod blocks;
pub mod encode;
pub mod enrich;
pub mod render;
pub mod synth;
