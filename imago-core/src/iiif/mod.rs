//! IIIF Image API v3 parameter grammar and canonical-form computation.
//!
//! Each URL component parses into a typed value; resolving a value against
//! concrete image dimensions yields a `Resolved*` form that carries the
//! canonical string and, for sizes, the pyramid `reduce` divisor used by
//! tile fast paths.

pub mod canonical;
pub mod identifier;
pub mod quality_format;
pub mod region;
pub mod rotation;
pub mod size;

pub use canonical::{CanonicalContext, canonical_url};
pub use identifier::Identifier;
pub use quality_format::{Format, Quality, QualityFormat};
pub use region::{Region, RegionKind, ResolvedRegion};
pub use rotation::Rotation;
pub use size::{ResolvedSize, Size, SizeLimits, SizeSpec};
