use crate::error::{IiifError, Result};

/// IIIF v3 rotation parameter: optional `!` mirror flag plus an angle in
/// `[0, 360)` degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    pub mirror: bool,
    pub angle: f32,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            mirror: false,
            angle: 0.0,
        }
    }
}

impl Rotation {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Self::default());
        }

        let (mirror, rest) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let angle = rest
            .parse::<f32>()
            .map_err(|_| IiifError::BadRotation(raw.to_string()))?;

        if !(0.0..360.0).contains(&angle) {
            return Err(IiifError::BadRotation(format!(
                "angle {angle} not allowed - must be in [0,360)"
            )));
        }

        Ok(Self { mirror, angle })
    }

    pub fn is_identity(&self) -> bool {
        !self.mirror && self.angle == 0.0
    }

    /// Canonical rotation segment: `0` for the identity, integer angles
    /// without decimals, one decimal otherwise, `!` prefix when mirrored.
    pub fn canonical(&self) -> String {
        if self.is_identity() {
            return "0".to_string();
        }

        let angle = if (self.angle - self.angle.floor()) < 1.0e-6 {
            format!("{}", self.angle.round() as i64)
        } else {
            format!("{:.1}", self.angle)
        };

        if self.mirror {
            format!("!{angle}")
        } else {
            angle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Rotation;

    #[test]
    fn empty_rotation_is_identity() {
        let rot = Rotation::parse("").unwrap();
        assert!(rot.is_identity());
        assert_eq!(rot.canonical(), "0");
    }

    #[test]
    fn mirror_prefix_is_parsed() {
        let rot = Rotation::parse("!45.0").unwrap();
        assert!(rot.mirror);
        assert_eq!(rot.angle, 45.0);
        assert_eq!(rot.canonical(), "!45");
    }

    #[test]
    fn plain_angle_is_parsed() {
        let rot = Rotation::parse("90").unwrap();
        assert!(!rot.mirror);
        assert_eq!(rot.angle, 90.0);
        assert_eq!(rot.canonical(), "90");
    }

    #[test]
    fn fractional_angle_keeps_one_decimal() {
        let rot = Rotation::parse("22.51").unwrap();
        assert_eq!(rot.canonical(), "22.5");
    }

    #[test]
    fn out_of_range_angles_fail() {
        assert!(Rotation::parse("-1").is_err());
        assert!(Rotation::parse("360").is_err());
        assert!(Rotation::parse("360.1").is_err());
        assert!(Rotation::parse("!gaga").is_err());
    }

    #[test]
    fn zero_with_mirror_is_not_identity() {
        let rot = Rotation::parse("!0").unwrap();
        assert!(!rot.is_identity());
        assert_eq!(rot.canonical(), "!0");
    }
}
