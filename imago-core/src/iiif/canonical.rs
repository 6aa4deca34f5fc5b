use crate::error::{IiifError, Result};
use crate::iiif::quality_format::QualityFormat;
use crate::iiif::region::ResolvedRegion;
use crate::iiif::rotation::Rotation;
use crate::iiif::size::ResolvedSize;

/// Request context needed to compose a canonical URL: scheme, authority and
/// the mount-point/prefix segments in front of the identifier.
#[derive(Debug, Clone)]
pub struct CanonicalContext<'a> {
    pub secure: bool,
    pub host: &'a str,
    pub route: &'a str,
    pub prefix: &'a str,
    pub identifier: &'a str,
}

/// Compose the canonical fingerprint and the matching `Link` header value.
///
/// Region and size must already be resolved against the image dimensions;
/// the fingerprint is the cache key, so every component is in canonical
/// form (quality always spelled out, extension normalized). Formats without
/// a canonical extension are rejected here.
pub fn canonical_url(
    ctx: &CanonicalContext<'_>,
    region: &ResolvedRegion,
    size: &ResolvedSize,
    rotation: &Rotation,
    quality_format: &QualityFormat,
) -> Result<(String, String)> {
    let ext = quality_format.format.canonical_extension().ok_or_else(|| {
        IiifError::UnsupportedFormat(
            "supported canonical formats are .jpg, .jp2, .tif, .png".to_string(),
        )
    })?;

    let mut canonical = String::from(ctx.host);
    if !ctx.route.is_empty() {
        canonical.push('/');
        canonical.push_str(ctx.route);
    }
    if !ctx.prefix.is_empty() {
        canonical.push('/');
        canonical.push_str(ctx.prefix);
    }
    canonical.push('/');
    canonical.push_str(ctx.identifier);
    canonical.push('/');
    canonical.push_str(&region.canonical());
    canonical.push('/');
    canonical.push_str(&size.canonical());
    canonical.push('/');
    canonical.push_str(&rotation.canonical());
    canonical.push('/');
    canonical.push_str(quality_format.quality.as_str());
    canonical.push('.');
    canonical.push_str(ext);

    let scheme = if ctx.secure { "https" } else { "http" };
    let link = format!("<{scheme}://{canonical}>");

    Ok((link, canonical))
}

#[cfg(test)]
mod tests {
    use super::{CanonicalContext, canonical_url};
    use crate::iiif::quality_format::QualityFormat;
    use crate::iiif::region::Region;
    use crate::iiif::rotation::Rotation;
    use crate::iiif::size::{SizeLimits, SizeSpec};

    fn ctx<'a>(secure: bool, route: &'a str, prefix: &'a str) -> CanonicalContext<'a> {
        CanonicalContext {
            secure,
            host: "example.org",
            route,
            prefix,
            identifier: "id",
        }
    }

    #[test]
    fn full_request_canonicalizes_to_max() {
        let region = Region::parse("full").unwrap().crop(1000, 800).unwrap();
        let size = SizeSpec::parse("max", SizeLimits::default())
            .unwrap()
            .resolve(1000, 800, 0)
            .unwrap();
        let rotation = Rotation::parse("0").unwrap();
        let qf = QualityFormat::parse("default", "jpg").unwrap();

        let (link, canonical) =
            canonical_url(&ctx(true, "", "p"), &region, &size, &rotation, &qf).unwrap();
        assert_eq!(canonical, "example.org/p/id/full/max/0/default.jpg");
        assert_eq!(link, "<https://example.org/p/id/full/max/0/default.jpg>");
    }

    #[test]
    fn insecure_scheme_and_route_segment() {
        let region = Region::parse("pct:10,10,50,50").unwrap().crop(1000, 800).unwrap();
        let size = SizeSpec::parse("250,", SizeLimits::default())
            .unwrap()
            .resolve(500, 400, 0)
            .unwrap();
        let rotation = Rotation::parse("!90").unwrap();
        let qf = QualityFormat::parse("gray", "png").unwrap();

        let (link, canonical) =
            canonical_url(&ctx(false, "iiif", "p"), &region, &size, &rotation, &qf).unwrap();
        assert_eq!(
            canonical,
            "example.org/iiif/p/id/100,80,500,400/250,200/!90/gray.png"
        );
        assert!(link.starts_with("<http://example.org/iiif/"));
    }

    #[test]
    fn formats_without_canonical_extension_are_rejected() {
        let region = Region::parse("full").unwrap().crop(100, 100).unwrap();
        let size = SizeSpec::parse("max", SizeLimits::default())
            .unwrap()
            .resolve(100, 100, 0)
            .unwrap();
        let rotation = Rotation::default();
        let qf = QualityFormat::parse("default", "webp").unwrap();

        assert!(canonical_url(&ctx(true, "", ""), &region, &size, &rotation, &qf).is_err());
    }
}
