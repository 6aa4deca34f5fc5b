use thiserror::Error;

/// Errors produced by the IIIF grammar, the render cache, and the image
/// capability. The server maps these onto HTTP status codes.
#[derive(Error, Debug)]
pub enum IiifError {
    #[error("invalid region parameter: {0}")]
    BadRegion(String),

    #[error("invalid size parameter: {0}")]
    BadSize(String),

    #[error("invalid rotation parameter: {0}")]
    BadRotation(String),

    #[error("invalid quality/format parameter: {0}")]
    BadQualityFormat(String),

    #[error("invalid identifier: {0}")]
    BadIdentifier(String),

    #[error("upscaling not allowed")]
    UpscalingForbidden,

    #[error("size exceeds configured limits: {0}")]
    SizeTooLarge(String),

    #[error("unauthorized access")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IiifError>;
