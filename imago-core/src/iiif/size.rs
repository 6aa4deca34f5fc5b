use crate::error::{IiifError, Result};

/// IIIF v3 size parameter grammar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Size {
    /// `max`
    Full,
    /// `w,`
    PixelsX(u32),
    /// `,h`
    PixelsY(u32),
    /// `w,h`
    PixelsXY(u32, u32),
    /// `!w,h` - fit within the box, preserving aspect ratio
    MaxDim(u32, u32),
    /// `pct:p`
    Percents(f32),
    /// `red:k` - internal form selecting a pyramid level divisor
    Reduce(u32),
}

/// Hard caps applied when resolving a size.
///
/// `limitdim` bounds parsed pixel values; `max_w`/`max_h`/`max_area` bound
/// the resolved output (0 = unlimited). For `^max` the caps flip role and
/// become the upscaling target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub limitdim: u32,
    pub max_w: u32,
    pub max_h: u32,
    pub max_area: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            limitdim: 32000,
            max_w: 0,
            max_h: 0,
            max_area: 0,
        }
    }
}

impl SizeLimits {
    pub fn with_dims(max_w: u32, max_h: u32) -> Self {
        Self {
            max_w,
            max_h,
            ..Self::default()
        }
    }

    pub fn with_area(max_area: u64) -> Self {
        Self {
            max_area,
            ..Self::default()
        }
    }

    fn bounded(&self) -> bool {
        self.max_w > 0 || self.max_h > 0 || self.max_area > 0
    }
}

/// A parsed size parameter: the grammar variant plus the `^` upscaling flag
/// and the caps it will be resolved under.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeSpec {
    kind: Size,
    upscaling: bool,
    limits: SizeLimits,
}

/// Output of [`SizeSpec::resolve`]: final pixel dimensions plus the pyramid
/// divisor. `reduce` is the integer divisor `k >= 1` such that a source
/// downsampled by `k` (ceiling division) matches the resolved size;
/// `redonly` is true when that divisor reproduces the request exactly, so
/// a decoder can serve the request from a pyramid level without rescaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSize {
    pub w: u32,
    pub h: u32,
    pub reduce: u32,
    pub redonly: bool,
    upscaling: bool,
    full: bool,
}

fn parse_dim(s: &str, raw: &str) -> Result<u32> {
    s.parse::<u32>()
        .map_err(|_| IiifError::BadSize(raw.to_string()))
}

impl SizeSpec {
    pub fn parse(raw: &str, limits: SizeLimits) -> Result<Self> {
        let mut rest = raw;

        let upscaling = rest.starts_with('^');
        if upscaling {
            rest = &rest[1..];
        }

        let exclamation = rest.starts_with('!');
        if exclamation {
            rest = &rest[1..];
        }

        let reject_exclamation = || {
            Err(IiifError::BadSize(format!(
                "\"!\" not allowed in size parameter \"{raw}\""
            )))
        };

        let kind = if rest.is_empty() || rest == "max" {
            if exclamation {
                return reject_exclamation();
            }
            Size::Full
        } else if let Some(pct) = rest.strip_prefix("pct:") {
            if exclamation {
                return reject_exclamation();
            }
            let percent = pct
                .parse::<f32>()
                .map_err(|_| IiifError::BadSize(raw.to_string()))?;
            if percent <= 0.0 {
                return Err(IiifError::BadSize(raw.to_string()));
            }
            Size::Percents(percent)
        } else if let Some(red) = rest.strip_prefix("red:") {
            if exclamation {
                return reject_exclamation();
            }
            Size::Reduce(parse_dim(red, raw)?)
        } else {
            let Some((width_str, height_str)) = rest.split_once(',') else {
                return Err(IiifError::BadSize(raw.to_string()));
            };

            match (width_str.is_empty(), height_str.is_empty()) {
                (true, true) => return Err(IiifError::BadSize(raw.to_string())),
                (true, false) => {
                    if exclamation {
                        return reject_exclamation();
                    }
                    let ny = parse_dim(height_str, raw)?;
                    if ny == 0 {
                        return Err(IiifError::BadSize("height cannot be zero".to_string()));
                    }
                    Size::PixelsY(ny)
                }
                (false, true) => {
                    if exclamation {
                        return reject_exclamation();
                    }
                    let nx = parse_dim(width_str, raw)?;
                    if nx == 0 {
                        return Err(IiifError::BadSize("width cannot be zero".to_string()));
                    }
                    Size::PixelsX(nx)
                }
                (false, false) => {
                    let nx = parse_dim(width_str, raw)?;
                    let ny = parse_dim(height_str, raw)?;
                    if nx == 0 || ny == 0 {
                        return Err(IiifError::BadSize(format!(
                            "size would result in a width or height of zero: {raw}"
                        )));
                    }
                    if exclamation {
                        Size::MaxDim(nx, ny)
                    } else {
                        Size::PixelsXY(nx, ny)
                    }
                }
            }
        };

        if let Size::PixelsX(nx) | Size::PixelsXY(nx, _) | Size::MaxDim(nx, _) = kind
            && nx > limits.limitdim
        {
            return Err(IiifError::BadSize(format!(
                "width {nx} exceeds the dimension limit {}",
                limits.limitdim
            )));
        }
        if let Size::PixelsY(ny) | Size::PixelsXY(_, ny) | Size::MaxDim(_, ny) = kind
            && ny > limits.limitdim
        {
            return Err(IiifError::BadSize(format!(
                "height {ny} exceeds the dimension limit {}",
                limits.limitdim
            )));
        }

        Ok(Self {
            kind,
            upscaling,
            limits,
        })
    }

    pub fn max() -> Self {
        Self {
            kind: Size::Full,
            upscaling: false,
            limits: SizeLimits::default(),
        }
    }

    pub fn kind(&self) -> Size {
        self.kind
    }

    pub fn is_full(&self) -> bool {
        matches!(self.kind, Size::Full)
    }

    pub fn upscaling(&self) -> bool {
        self.upscaling
    }

    /// Resolve the size against a source of `img_w` x `img_h` pixels.
    ///
    /// `max_reduce` caps the divisor the decoder can be asked for (0 =
    /// unlimited); a capped request comes back with `redonly = false` so the
    /// caller knows rescaling is still required.
    pub fn resolve(&self, img_w: u32, img_h: u32, max_reduce: u32) -> Result<ResolvedSize> {
        let (w, h, reduce, redonly) = match self.kind {
            Size::Full => self.resolve_full(img_w, img_h)?,

            Size::PixelsX(nx) => {
                if !self.upscaling && nx > img_w {
                    return Err(IiifError::UpscalingForbidden);
                }
                let (sf, exact) = fit_divisor(img_w, nx, max_reduce);
                let h = if exact {
                    img_h.div_ceil(sf)
                } else {
                    scale_other_axis(img_h, nx, img_w)
                };
                if !self.upscaling && h > img_h {
                    return Err(IiifError::UpscalingForbidden);
                }
                (nx, h, sf, exact)
            }

            Size::PixelsY(ny) => {
                if !self.upscaling && ny > img_h {
                    return Err(IiifError::UpscalingForbidden);
                }
                let (sf, exact) = fit_divisor(img_h, ny, max_reduce);
                let w = if exact {
                    img_w.div_ceil(sf)
                } else {
                    scale_other_axis(img_w, ny, img_h)
                };
                if !self.upscaling && w > img_w {
                    return Err(IiifError::UpscalingForbidden);
                }
                (w, ny, sf, exact)
            }

            Size::PixelsXY(nx, ny) => {
                if !self.upscaling && (nx > img_w || ny > img_h) {
                    return Err(IiifError::UpscalingForbidden);
                }
                let (sf_w, exact_w) = fit_divisor(img_w, nx, max_reduce);
                let (sf_h, exact_h) = fit_divisor(img_h, ny, max_reduce);
                if exact_w && exact_h && sf_w == sf_h {
                    (nx, ny, sf_w, true)
                } else {
                    (nx, ny, sf_w.min(sf_h), false)
                }
            }

            Size::MaxDim(nx, ny) => {
                let fx = f64::from(nx) / f64::from(img_w);
                let fy = f64::from(ny) / f64::from(img_h);

                let (w, h, ratio) = if fx < fy {
                    let h = (f64::from(img_h) * fx).ceil() as u32;
                    (nx, h, f64::from(img_w) / f64::from(nx))
                } else {
                    let w = (f64::from(img_w) * fy).ceil() as u32;
                    (w, ny, f64::from(img_h) / f64::from(ny))
                };
                if !self.upscaling && (w > img_w || h > img_h) {
                    return Err(IiifError::UpscalingForbidden);
                }
                let (sf, redonly) = ratio_divisor(ratio, max_reduce);
                (w, h, sf, redonly)
            }

            Size::Percents(percent) => {
                let p = f64::from(percent);
                let w = (f64::from(img_w) * p / 100.0).ceil() as u32;
                let h = (f64::from(img_h) * p / 100.0).ceil() as u32;
                if !self.upscaling && (w > img_w || h > img_h) {
                    return Err(IiifError::UpscalingForbidden);
                }
                let (sf, redonly) = ratio_divisor(100.0 / p, max_reduce);
                (w, h, sf, redonly)
            }

            Size::Reduce(k) => {
                let k = k.max(1);
                let w = img_w.div_ceil(k);
                let h = img_h.div_ceil(k);
                if max_reduce != 0 && k > max_reduce {
                    (w, h, max_reduce, false)
                } else {
                    (w, h, k, true)
                }
            }
        };

        // `^max` already targets the caps; everything else is bounded by them.
        if !(matches!(self.kind, Size::Full) && self.upscaling) {
            self.check_caps(w, h)?;
        }

        Ok(ResolvedSize {
            w,
            h,
            reduce,
            redonly,
            upscaling: self.upscaling,
            full: matches!(self.kind, Size::Full),
        })
    }

    fn resolve_full(&self, img_w: u32, img_h: u32) -> Result<(u32, u32, u32, bool)> {
        if self.upscaling && self.limits.bounded() {
            let (mut w, mut h) = if self.limits.max_w > 0 && self.limits.max_h > 0 {
                let fx = f64::from(self.limits.max_w) / f64::from(img_w);
                let fy = f64::from(self.limits.max_h) / f64::from(img_h);
                let f = fx.min(fy);
                (
                    (f64::from(img_w) * f).round() as u32,
                    (f64::from(img_h) * f).round() as u32,
                )
            } else {
                (img_w, img_h)
            };

            if self.limits.max_area > 0 {
                let area = u64::from(w) * u64::from(h);
                if area > self.limits.max_area {
                    let f = (self.limits.max_area as f64 / area as f64).sqrt();
                    w = (f64::from(w) * f).round() as u32;
                    h = (f64::from(h) * f).round() as u32;
                }
            }

            return Ok((w, h, 1, false));
        }

        Ok((img_w, img_h, 1, true))
    }

    fn check_caps(&self, w: u32, h: u32) -> Result<()> {
        if self.limits.max_w > 0 && w > self.limits.max_w {
            return Err(IiifError::SizeTooLarge(format!(
                "width {w} > {}",
                self.limits.max_w
            )));
        }
        if self.limits.max_h > 0 && h > self.limits.max_h {
            return Err(IiifError::SizeTooLarge(format!(
                "height {h} > {}",
                self.limits.max_h
            )));
        }
        if self.limits.max_area > 0 && u64::from(w) * u64::from(h) > self.limits.max_area {
            return Err(IiifError::SizeTooLarge(format!(
                "area {} > {}",
                u64::from(w) * u64::from(h),
                self.limits.max_area
            )));
        }
        Ok(())
    }
}

impl ResolvedSize {
    /// Canonical size segment: `max` for full size, otherwise `w,h`; both
    /// prefixed with `^` when upscaling was requested.
    pub fn canonical(&self) -> String {
        match (self.full, self.upscaling) {
            (true, true) => "^max".to_string(),
            (true, false) => "max".to_string(),
            (false, true) => format!("^{},{}", self.w, self.h),
            (false, false) => format!("{},{}", self.w, self.h),
        }
    }

    /// True when this size is strictly larger than `other` on either axis.
    /// Used to clamp a request against an authorization-imposed restriction.
    pub fn exceeds(&self, other: &ResolvedSize) -> bool {
        self.w > other.w || self.h > other.h
    }

    /// True when this size fits inside `other` on both axes.
    pub fn fits_within(&self, other: &ResolvedSize) -> bool {
        self.w <= other.w && self.h <= other.h
    }
}

/// Smallest divisor `sf >= 1` with `ceil(src / sf) <= target`, bounded by
/// `max_reduce` when nonzero. Exact means the divisor lands on `target`;
/// an overshoot steps back one level so the decoder under-reduces and the
/// scaler finishes the job.
fn fit_divisor(src: u32, target: u32, max_reduce: u32) -> (u32, bool) {
    let mut sf = 1u32;
    let mut v = src;
    while v > target && (max_reduce == 0 || sf < max_reduce) {
        sf += 1;
        v = src.div_ceil(sf);
    }
    if v == target {
        (sf, true)
    } else if v < target {
        (sf.max(2) - 1, false)
    } else {
        (sf, false)
    }
}

/// Largest integer divisor not exceeding `ratio`, and whether the ratio is
/// (within epsilon) that integer.
fn ratio_divisor(ratio: f64, max_reduce: u32) -> (u32, bool) {
    let mut sf = 1u32;
    while f64::from(sf + 1) <= ratio && (max_reduce == 0 || sf < max_reduce) {
        sf += 1;
    }
    (sf, (ratio - f64::from(sf)).abs() < 1.0e-5)
}

/// `ceil(src * target / base)` without intermediate overflow.
fn scale_other_axis(src: u32, target: u32, base: u32) -> u32 {
    let num = u64::from(src) * u64::from(target);
    num.div_ceil(u64::from(base)) as u32
}

#[cfg(test)]
mod tests {
    use super::{SizeLimits, SizeSpec};
    use crate::error::IiifError;

    fn parse(raw: &str) -> SizeSpec {
        SizeSpec::parse(raw, SizeLimits::default()).unwrap()
    }

    fn parse_dims(raw: &str, max_w: u32, max_h: u32) -> SizeSpec {
        SizeSpec::parse(raw, SizeLimits::with_dims(max_w, max_h)).unwrap()
    }

    #[test]
    fn max_keeps_source_dimensions() {
        let r = parse_dims("max", 3000, 4000).resolve(1200, 1800, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1200, 1800, 1, true));
        assert_eq!(r.canonical(), "max");
    }

    #[test]
    fn max_rejects_source_beyond_caps() {
        let err = parse_dims("max", 120, 180).resolve(484, 800, 0).unwrap_err();
        assert!(matches!(err, IiifError::SizeTooLarge(_)));
    }

    #[test]
    fn upscaled_max_targets_the_caps() {
        let r = parse_dims("^max", 3000, 4000).resolve(600, 800, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (3000, 4000, 1, false));
        assert_eq!(r.canonical(), "^max");

        let r = parse_dims("^max", 3000, 4000).resolve(300, 300, 0).unwrap();
        assert_eq!((r.w, r.h), (3000, 3000));

        let r = parse_dims("^max", 4000, 3000).resolve(300, 300, 0).unwrap();
        assert_eq!((r.w, r.h), (3000, 3000));
    }

    #[test]
    fn upscaled_max_targets_the_area_cap() {
        let spec = SizeSpec::parse("^max", SizeLimits::with_area(1_000_000)).unwrap();
        let r = spec.resolve(250, 500, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (707, 1414, 1, false));
    }

    #[test]
    fn width_with_exact_divisor_is_reduce_only() {
        let r = parse("1000,").resolve(3000, 6000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1000, 2000, 3, true));
        assert_eq!(r.canonical(), "1000,2000");
    }

    #[test]
    fn width_upscale_is_rejected_without_caret() {
        let err = parse("1000,").resolve(500, 1000, 0).unwrap_err();
        assert!(matches!(err, IiifError::UpscalingForbidden));
    }

    #[test]
    fn width_upscale_with_caret_scales_both_axes() {
        let r = parse("^1000,").resolve(500, 1000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1000, 2000, 1, false));

        let r = parse("^1000,").resolve(500, 800, 0).unwrap();
        assert_eq!((r.w, r.h, r.redonly), (1000, 1600, false));
    }

    #[test]
    fn height_with_exact_divisor_is_reduce_only() {
        let r = parse(",1000").resolve(6000, 4000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1500, 1000, 4, true));

        let err = parse(",1000").resolve(1000, 500, 0).unwrap_err();
        assert!(matches!(err, IiifError::UpscalingForbidden));
    }

    #[test]
    fn height_upscale_with_caret_scales_both_axes() {
        let r = parse("^,1000").resolve(600, 500, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1200, 1000, 1, false));
    }

    #[test]
    fn exact_pixels_on_both_axes_is_reduce_only() {
        let r = parse("125,125").resolve(1000, 1000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (125, 125, 8, true));
    }

    #[test]
    fn mismatched_axis_divisors_disable_reduce_only() {
        let r = parse("125,125").resolve(1000, 2000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (125, 125, 8, false));
    }

    #[test]
    fn pixels_upscale_with_caret() {
        let r = parse("^1000,1000").resolve(500, 400, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1000, 1000, 1, false));
        assert_eq!(r.canonical(), "^1000,1000");
    }

    #[test]
    fn confined_size_picks_the_tighter_axis() {
        let r = parse("!500,250").resolve(1200, 1000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (300, 250, 4, true));

        let r = parse("!250,500").resolve(1000, 1200, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (250, 300, 4, true));

        let r = parse("!500,250").resolve(1000, 1200, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (209, 250, 4, false));
    }

    #[test]
    fn confined_upscale_with_caret() {
        let r = parse("^!2000,3000").resolve(1000, 1200, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (2000, 2400, 1, false));

        let r = parse("^!3000,2000").resolve(1000, 1200, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1667, 2000, 1, false));
    }

    #[test]
    fn confined_size_is_bounded_by_caps() {
        let err = parse_dims("!1200,1200", 1000, 1000)
            .resolve(1000, 1200, 0)
            .unwrap_err();
        assert!(matches!(err, IiifError::SizeTooLarge(_)));
    }

    #[test]
    fn percent_with_integer_ratio_is_reduce_only() {
        let r = parse("pct:50").resolve(3000, 4000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1500, 2000, 2, true));

        let r = parse("pct:33.33333").resolve(3000, 4000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (1000, 1334, 3, true));
    }

    #[test]
    fn percent_above_hundred_requires_caret() {
        let err = parse("pct:101").resolve(3000, 4000, 0).unwrap_err();
        assert!(matches!(err, IiifError::UpscalingForbidden));

        let r = parse("^pct:200").resolve(1000, 2000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (2000, 4000, 1, false));
    }

    #[test]
    fn reduce_divides_both_axes() {
        let r = parse("red:4").resolve(1200, 2000, 0).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (300, 500, 4, true));
    }

    #[test]
    fn reduce_is_capped_by_max_reduce() {
        let r = parse("red:8").resolve(1600, 1600, 4).unwrap();
        assert_eq!((r.w, r.h, r.reduce, r.redonly), (200, 200, 4, false));
    }

    #[test]
    fn resolved_sizes_never_exceed_source_without_caret() {
        for raw in ["max", "900,", ",700", "640,480", "!640,480", "pct:61.8"] {
            let spec = parse(raw);
            if let Ok(r) = spec.resolve(1234, 987, 0) {
                assert!(r.w <= 1234, "{raw}: w={}", r.w);
                assert!(r.h <= 987, "{raw}: h={}", r.h);
            }
        }
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(SizeSpec::parse("0,", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse(",0", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("0,100", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("!0,0", SizeLimits::default()).is_err());
    }

    #[test]
    fn exclamation_is_only_legal_with_both_dimensions() {
        assert!(SizeSpec::parse("!max", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("!pct:50", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("!100,", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("!,100", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("^!100,100", SizeLimits::default()).is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(SizeSpec::parse("banana", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("pct:abc", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("12x34", SizeLimits::default()).is_err());
    }

    #[test]
    fn dimension_limit_rejects_oversized_requests() {
        assert!(SizeSpec::parse("33000,", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse(",33000", SizeLimits::default()).is_err());
        assert!(SizeSpec::parse("100,33000", SizeLimits::default()).is_err());
    }

    #[test]
    fn caps_reject_oversized_reduce_output() {
        let spec = SizeSpec::parse("red:4", SizeLimits::with_dims(100, 200)).unwrap();
        assert!(matches!(
            spec.resolve(1200, 2000, 0).unwrap_err(),
            IiifError::SizeTooLarge(_)
        ));

        let spec = SizeSpec::parse("red:4", SizeLimits::with_area(120 * 200)).unwrap();
        assert!(matches!(
            spec.resolve(484, 800, 0).unwrap_err(),
            IiifError::SizeTooLarge(_)
        ));
    }

    #[test]
    fn restriction_comparison_uses_resolved_dimensions() {
        let requested = parse("1000,").resolve(3000, 6000, 0).unwrap();
        let restricted = parse("500,").resolve(3000, 6000, 0).unwrap();
        assert!(requested.exceeds(&restricted));
        assert!(restricted.fits_within(&requested));
    }
}
