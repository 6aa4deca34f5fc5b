//! # imago-core
//!
//! Core of the imago IIIF Image API v3 server:
//!
//! - the IIIF parameter grammar (region, size, rotation, quality/format,
//!   identifier) with canonical-form computation and the pyramid `reduce`
//!   divisor that drives tile fast paths,
//! - the persistent on-disk LRU cache mapping canonical fingerprints to
//!   rendered artifacts, with reference-counted pinning and age-ordered
//!   eviction,
//! - the decoder/encoder capability traits plus a built-in raster backend,
//! - the authorization pre-flight contract.
//!
//! The HTTP layer lives in `imago-server`.

pub mod backend;
pub mod cache;
pub mod error;
pub mod iiif;
pub mod preflight;

pub use backend::{
    DecodedImage, EncodeParams, ImageBackend, ImageInfo, ReadOptions, ScalingQuality,
    SubImageInfo,
};
pub use cache::{CacheRecord, CacheStats, IiifCache, PinnedFile, SortMethod};
pub use error::{IiifError, Result};
pub use iiif::{
    CanonicalContext, Format, Identifier, Quality, QualityFormat, Region, RegionKind,
    ResolvedRegion, ResolvedSize, Rotation, Size, SizeLimits, SizeSpec, canonical_url,
};
pub use preflight::{
    AccessVerdict, FilePreflight, IiifPreflight, PreflightOutcome, SpecialFn,
};
