use crate::error::{IiifError, Result};

/// IIIF v3 region parameter.
///
/// `Coords` carries absolute pixel values, `Percents` values in 0..100.
/// The `reduce` divisor rescales absolute coordinates when a request is
/// served from a pyramid level instead of the full image.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionKind {
    Full,
    Square,
    Coords { rx: f32, ry: f32, rw: f32, rh: f32 },
    Percents { rx: f32, ry: f32, rw: f32, rh: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    kind: RegionKind,
    reduce: f32,
}

/// Crop rectangle clipped against the image bounds, produced by
/// [`Region::crop`]. Canonical form is only available once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRegion {
    full: bool,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

fn parse_quad(s: &str, raw: &str) -> Result<(f32, f32, f32, f32)> {
    let fields: Vec<&str> = s.split(',').collect();
    if fields.len() != 4 {
        return Err(IiifError::BadRegion(raw.to_string()));
    }
    let mut vals = [0f32; 4];
    for (i, field) in fields.iter().enumerate() {
        vals[i] = field
            .trim()
            .parse::<f32>()
            .map_err(|_| IiifError::BadRegion(raw.to_string()))?;
    }
    Ok((vals[0], vals[1], vals[2], vals[3]))
}

impl Region {
    pub fn parse(raw: &str) -> Result<Self> {
        let kind = if raw.is_empty() || raw == "full" {
            RegionKind::Full
        } else if raw == "square" {
            RegionKind::Square
        } else if let Some(rest) = raw.strip_prefix("pct:") {
            let (rx, ry, rw, rh) = parse_quad(rest, raw)?;
            RegionKind::Percents { rx, ry, rw, rh }
        } else {
            let (rx, ry, rw, rh) = parse_quad(raw, raw)?;
            RegionKind::Coords { rx, ry, rw, rh }
        };

        Ok(Self { kind, reduce: 1.0 })
    }

    pub fn full() -> Self {
        Self {
            kind: RegionKind::Full,
            reduce: 1.0,
        }
    }

    pub fn kind(&self) -> &RegionKind {
        &self.kind
    }

    pub fn is_full(&self) -> bool {
        matches!(self.kind, RegionKind::Full)
    }

    /// Divide absolute coordinates by `reduce` when cropping against a
    /// downsampled pyramid level.
    pub fn with_reduce(mut self, reduce: f32) -> Self {
        self.reduce = reduce;
        self
    }

    /// Resolve the region against an image of `nx` x `ny` pixels.
    ///
    /// The result is clipped so that `x + w <= nx` and `y + h <= ny`; an
    /// origin outside the image fails with `BadRegion`.
    pub fn crop(&self, nx: u32, ny: u32) -> Result<ResolvedRegion> {
        let (mut x, mut y, mut w, mut h): (i64, i64, i64, i64) = match self.kind {
            RegionKind::Full => {
                return Ok(ResolvedRegion {
                    full: true,
                    x: 0,
                    y: 0,
                    w: nx,
                    h: ny,
                });
            }
            RegionKind::Square => {
                if nx > ny {
                    (i64::from((nx - ny) / 2), 0, i64::from(ny), i64::from(ny))
                } else {
                    (0, i64::from((ny - nx) / 2), i64::from(nx), i64::from(nx))
                }
            }
            RegionKind::Coords { rx, ry, rw, rh } => (
                (rx / self.reduce).round() as i64,
                (ry / self.reduce).round() as i64,
                (rw / self.reduce).round() as i64,
                (rh / self.reduce).round() as i64,
            ),
            RegionKind::Percents { rx, ry, rw, rh } => (
                (rx * nx as f32 / 100.0).round() as i64,
                (ry * ny as f32 / 100.0).round() as i64,
                (rw * nx as f32 / 100.0).round() as i64,
                (rh * ny as f32 / 100.0).round() as i64,
            ),
        };

        let nx = i64::from(nx);
        let ny = i64::from(ny);

        if x < 0 {
            w += x;
            x = 0;
        } else if x >= nx {
            return Err(IiifError::BadRegion(format!(
                "cropping region outside of image (x={x} nx={nx})"
            )));
        }

        if y < 0 {
            h += y;
            y = 0;
        } else if y >= ny {
            return Err(IiifError::BadRegion(format!(
                "cropping region outside of image (y={y} ny={ny})"
            )));
        }

        if w == 0 {
            w = nx - x;
        } else if x + w > nx {
            w = nx - x;
        }

        if h == 0 {
            h = ny - y;
        } else if y + h > ny {
            h = ny - y;
        }

        if w < 0 || h < 0 {
            return Err(IiifError::BadRegion(format!(
                "cropping region has negative extent (w={w} h={h})"
            )));
        }

        Ok(ResolvedRegion {
            full: false,
            x: x as u32,
            y: y as u32,
            w: w as u32,
            h: h as u32,
        })
    }
}

impl ResolvedRegion {
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Canonical region segment: `full`, or `x,y,w,h` in absolute pixels.
    pub fn canonical(&self) -> String {
        if self.full {
            "full".to_string()
        } else {
            format!("{},{},{},{}", self.x, self.y, self.w, self.h)
        }
    }
}
