use crate::error::{IiifError, Result};

/// IIIF v3 quality parameter. An unknown quality is a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Default,
    Color,
    Gray,
    Bitonal,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Default => "default",
            Quality::Color => "color",
            Quality::Gray => "gray",
            Quality::Bitonal => "bitonal",
        }
    }
}

/// IIIF v3 format parameter. An unknown format parses as `Unsupported` and
/// is rejected later in the pipeline, so the error can name the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Jpg,
    Tif,
    Png,
    Gif,
    Jp2,
    Pdf,
    Webp,
    Unsupported,
}

impl Format {
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "jpg" | "jpeg" => Format::Jpg,
            "tif" | "tiff" => Format::Tif,
            "png" => Format::Png,
            "gif" => Format::Gif,
            "jp2" | "jpx" => Format::Jp2,
            "pdf" => Format::Pdf,
            "webp" => Format::Webp,
            _ => Format::Unsupported,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Jpg => "image/jpeg",
            Format::Tif => "image/tiff",
            Format::Png => "image/png",
            Format::Gif => "image/gif",
            Format::Jp2 => "image/jp2",
            Format::Pdf => "application/pdf",
            Format::Webp => "image/webp",
            Format::Unsupported => "application/octet-stream",
        }
    }

    /// Extension used in canonical URLs. Only jpg/jp2/tif/png have a
    /// canonical form; everything else is rejected by the canonicalizer.
    pub fn canonical_extension(&self) -> Option<&'static str> {
        match self {
            Format::Jpg => Some("jpg"),
            Format::Jp2 => Some("jp2"),
            Format::Tif => Some("tif"),
            Format::Png => Some("png"),
            _ => None,
        }
    }
}

/// Combined `{quality}.{format}` suffix of the IIIF URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityFormat {
    pub quality: Quality,
    pub format: Format,
}

impl QualityFormat {
    pub fn parse(quality: &str, format: &str) -> Result<Self> {
        if quality.is_empty() || format.is_empty() {
            return Ok(Self::default());
        }

        let quality = match quality {
            "default" => Quality::Default,
            "color" => Quality::Color,
            "gray" => Quality::Gray,
            "bitonal" => Quality::Bitonal,
            other => {
                return Err(IiifError::BadQualityFormat(format!(
                    "unknown quality \"{other}\""
                )));
            }
        };

        Ok(Self {
            quality,
            format: Format::from_extension(format),
        })
    }

    /// Parse the trailing `{quality}.{format}` URL segment.
    pub fn parse_segment(segment: &str) -> Result<Self> {
        let Some((quality, format)) = segment.rsplit_once('.') else {
            return Err(IiifError::BadQualityFormat(format!(
                "missing format extension in \"{segment}\""
            )));
        };
        Self::parse(quality, format)
    }
}
