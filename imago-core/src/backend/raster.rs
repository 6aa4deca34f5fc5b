//! Built-in decoder/encoder on top of the `image` crate.
//!
//! Handles the baseline raster formats (JPEG, PNG, TIFF, GIF, WebP input;
//! JPEG, PNG, TIFF output). It has no pyramid or ICC support: probes report
//! a single full-resolution level and color conversions assume sRGB input.
//! Multipage containers and JP2/PDF need an external codec backend.

use std::io::{Cursor, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbaImage};
use tracing::debug;

use crate::backend::{
    DecodedImage, EncodeParams, ImageBackend, ImageInfo, ReadOptions, ScalingQuality,
    SubImageInfo,
};
use crate::error::{IiifError, Result};
use crate::iiif::{Format, ResolvedRegion, ResolvedSize};

#[derive(Debug, Clone, Copy, Default)]
pub struct RasterBackend;

impl RasterBackend {
    pub fn new() -> Self {
        Self
    }
}

fn decode_error(e: image::ImageError) -> IiifError {
    match e {
        image::ImageError::IoError(io) => IiifError::Io(io),
        other => IiifError::Decoder(other.to_string()),
    }
}

fn encode_error(e: image::ImageError) -> IiifError {
    match e {
        // Keep I/O errors intact so a peer hangup (BrokenPipe) stays
        // distinguishable from a real encoder failure.
        image::ImageError::IoError(io) => IiifError::Io(io),
        other => IiifError::Encoder(other.to_string()),
    }
}

fn filter_for(quality: ScalingQuality) -> FilterType {
    match quality {
        ScalingQuality::Low => FilterType::Triangle,
        ScalingQuality::Medium => FilterType::CatmullRom,
        ScalingQuality::High => FilterType::Lanczos3,
    }
}

impl ImageBackend for RasterBackend {
    fn get_dim(&self, path: &Path, _page: u32) -> Result<ImageInfo> {
        let (width, height) = image::image_dimensions(path).map_err(decode_error)?;
        Ok(ImageInfo {
            width,
            height,
            resolutions: vec![SubImageInfo {
                reduce: 1,
                width,
                height,
                tile_width: 0,
                tile_height: 0,
            }],
        })
    }

    fn read(
        &self,
        path: &Path,
        region: &ResolvedRegion,
        size: &ResolvedSize,
        opts: &ReadOptions,
    ) -> Result<Box<dyn DecodedImage>> {
        let mut img = image::open(path).map_err(decode_error)?;

        // `size` is resolved against the full image; extracted regions keep
        // the same scale factor.
        let (full_w, full_h) = (img.width(), img.height());
        let (target_w, target_h) = if region.is_full() {
            (size.w, size.h)
        } else {
            img = img.crop_imm(region.x, region.y, region.w, region.h);
            let fx = f64::from(size.w) / f64::from(full_w.max(1));
            let fy = f64::from(size.h) / f64::from(full_h.max(1));
            (
                ((f64::from(region.w) * fx).round() as u32).max(1),
                ((f64::from(region.h) * fy).round() as u32).max(1),
            )
        };

        if (img.width(), img.height()) != (target_w, target_h) {
            debug!(
                "scaling {}x{} -> {}x{}",
                img.width(),
                img.height(),
                target_w,
                target_h
            );
            img = img.resize_exact(target_w, target_h, filter_for(opts.scaling_quality));
        }

        Ok(Box::new(RasterImage { img }))
    }

    fn can_encode(&self, format: Format) -> bool {
        matches!(format, Format::Jpg | Format::Png | Format::Tif)
    }

    fn needs_seekable_output(&self, format: Format) -> bool {
        matches!(format, Format::Tif)
    }
}

struct RasterImage {
    img: DynamicImage,
}

impl DecodedImage for RasterImage {
    fn width(&self) -> u32 {
        self.img.width()
    }

    fn height(&self) -> u32 {
        self.img.height()
    }

    fn rotate(&mut self, angle: f32, mirror: bool) -> Result<()> {
        if mirror {
            self.img = self.img.fliph();
        }

        let angle = angle.rem_euclid(360.0);
        const EPS: f32 = 1.0e-4;

        self.img = if angle.abs() < EPS {
            return Ok(());
        } else if (angle - 90.0).abs() < EPS {
            self.img.rotate90()
        } else if (angle - 180.0).abs() < EPS {
            self.img.rotate180()
        } else if (angle - 270.0).abs() < EPS {
            self.img.rotate270()
        } else {
            rotate_arbitrary(&self.img, angle)
        };
        Ok(())
    }

    fn to_srgb8(&mut self) -> Result<()> {
        self.img = DynamicImage::ImageRgb8(self.img.to_rgb8());
        Ok(())
    }

    fn to_gray8(&mut self) -> Result<()> {
        self.img = DynamicImage::ImageLuma8(self.img.to_luma8());
        Ok(())
    }

    fn to_bitonal(&mut self) -> Result<()> {
        let mut gray = self.img.to_luma8();
        for pixel in gray.pixels_mut() {
            pixel.0[0] = if pixel.0[0] >= 128 { 255 } else { 0 };
        }
        self.img = DynamicImage::ImageLuma8(gray);
        Ok(())
    }

    fn apply_watermark(&mut self, path: &Path) -> Result<()> {
        let watermark = image::open(path)
            .map_err(decode_error)?
            .resize_exact(self.img.width(), self.img.height(), FilterType::Triangle)
            .to_rgba8();

        let mut base = self.img.to_rgba8();
        for (dst, src) in base.pixels_mut().zip(watermark.pixels()) {
            // Half-strength blend weighted by the watermark's own alpha.
            let a = f32::from(src.0[3]) / 255.0 * 0.5;
            for c in 0..3 {
                let blended = f32::from(dst.0[c]) * (1.0 - a) + f32::from(src.0[c]) * a;
                dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
        self.img = DynamicImage::ImageRgba8(base);
        Ok(())
    }

    fn write(&self, format: Format, out: &mut dyn Write, params: &EncodeParams) -> Result<()> {
        match format {
            Format::Jpg => {
                // JPEG carries no alpha; flatten anything else to RGB8.
                let encoder = JpegEncoder::new_with_quality(out, params.jpeg_quality);
                match &self.img {
                    DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => {
                        self.img.write_with_encoder(encoder).map_err(encode_error)
                    }
                    other => DynamicImage::ImageRgb8(other.to_rgb8())
                        .write_with_encoder(encoder)
                        .map_err(encode_error),
                }
            }
            Format::Png => self
                .img
                .write_with_encoder(PngEncoder::new(out))
                .map_err(encode_error),
            Format::Tif => {
                // The TIFF encoder needs a seekable sink.
                let mut buf = Cursor::new(Vec::new());
                self.img
                    .write_with_encoder(TiffEncoder::new(&mut buf))
                    .map_err(encode_error)?;
                out.write_all(buf.get_ref())?;
                Ok(())
            }
            other => Err(IiifError::NotImplemented(format!(
                "cannot encode {} with the built-in raster backend",
                other.mime_type()
            ))),
        }
    }
}

/// Nearest-neighbor rotation onto an enlarged canvas; pixels outside the
/// source stay transparent and are flattened by the encoder if needed.
fn rotate_arbitrary(img: &DynamicImage, angle_deg: f32) -> DynamicImage {
    let rad = angle_deg.to_radians();
    let (sin, cos) = rad.sin_cos();
    let (w, h) = (img.width() as f32, img.height() as f32);

    let nw = (w * cos.abs() + h * sin.abs()).ceil() as u32;
    let nh = (w * sin.abs() + h * cos.abs()).ceil() as u32;

    let src = img.to_rgba8();
    let mut dst = RgbaImage::new(nw.max(1), nh.max(1));

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ncx, ncy) = (nw as f32 / 2.0, nh as f32 / 2.0);

    for y in 0..dst.height() {
        for x in 0..dst.width() {
            let dx = x as f32 + 0.5 - ncx;
            let dy = y as f32 + 0.5 - ncy;
            let sx = dx * cos + dy * sin + cx;
            let sy = -dx * sin + dy * cos + cy;
            if sx >= 0.0 && sy >= 0.0 && sx < w && sy < h {
                dst.put_pixel(x, y, *src.get_pixel(sx as u32, sy as u32));
            }
        }
    }

    DynamicImage::ImageRgba8(dst)
}
