//! Decoder/encoder capability.
//!
//! The pipeline is written against the [`ImageBackend`] and [`DecodedImage`]
//! traits; real codecs (including pyramid-aware TIFF/JP2 readers) plug in
//! behind them. [`raster::RasterBackend`] is the built-in implementation on
//! top of the `image` crate.

pub mod raster;
pub mod sniff;

use std::fmt;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::iiif::{Format, ResolvedRegion, ResolvedSize};

/// One resolution level of a source image pyramid. `reduce` is the integer
/// downsampling divisor of the level (1 = full resolution); tile dimensions
/// are zero for untiled levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct SubImageInfo {
    pub reduce: u32,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

/// Result of probing an original for its dimensions and pyramid layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub resolutions: Vec<SubImageInfo>,
}

/// Scaling filter quality, selected in the server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingQuality {
    Low,
    Medium,
    #[default]
    High,
}

/// Encoder parameters passed through to `DecodedImage::write`.
#[derive(Debug, Clone, Copy)]
pub struct EncodeParams {
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

/// Options forwarded to [`ImageBackend::read`].
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Page inside a multipage container.
    pub page: u32,
    /// Hint that the output will be JPEG, enabling decoder fast paths.
    pub jpeg_fastpath: bool,
    pub scaling_quality: ScalingQuality,
}

/// Decoder/encoder capability the dispatch pipeline renders through.
///
/// `read` performs crop and scale; the remaining transformations happen on
/// the returned [`DecodedImage`]. Implementations are called from blocking
/// tasks and may do synchronous I/O.
pub trait ImageBackend: Send + Sync {
    /// Probe an original for `{width, height, resolutions}`.
    fn get_dim(&self, path: &Path, page: u32) -> Result<ImageInfo>;

    /// Decode `path`, crop to `region` and scale to `size`.
    fn read(
        &self,
        path: &Path,
        region: &ResolvedRegion,
        size: &ResolvedSize,
        opts: &ReadOptions,
    ) -> Result<Box<dyn DecodedImage>>;

    /// Whether this backend can encode `format`.
    fn can_encode(&self, format: Format) -> bool;

    /// Whether encoding `format` needs seekable output. Formats that do are
    /// encoded into the cache file first instead of being streamed chunked.
    fn needs_seekable_output(&self, format: Format) -> bool;
}

/// A decoded raster held by the backend, mutated in place by the pipeline
/// before encoding.
pub trait DecodedImage: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Rotate by `angle` degrees clockwise, mirroring first when requested.
    fn rotate(&mut self, angle: f32, mirror: bool) -> Result<()>;

    /// Force sRGB with 8 bits per sample.
    fn to_srgb8(&mut self) -> Result<()>;

    /// Force grayscale with 8 bits per sample.
    fn to_gray8(&mut self) -> Result<()>;

    /// Threshold to a bitonal image.
    fn to_bitonal(&mut self) -> Result<()>;

    /// Blend the watermark image at `path` over the full canvas.
    fn apply_watermark(&mut self, path: &Path) -> Result<()>;

    /// Encode into `out`.
    fn write(&self, format: Format, out: &mut dyn Write, params: &EncodeParams) -> Result<()>;
}

impl fmt::Debug for dyn DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
