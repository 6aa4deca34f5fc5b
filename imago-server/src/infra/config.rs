use anyhow::{Context, anyhow};
use imago_core::ScalingQuality;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_imgroot() -> PathBuf {
    PathBuf::from("./imgroot")
}

fn default_hysteresis() -> f32 {
    0.5
}

fn default_jpeg_quality() -> u8 {
    80
}

/// Server configuration, loaded from a TOML file (`$IMAGO_CONFIG_PATH`) or
/// from environment variables, with CLI flags applied on top.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Image repository
    pub imgroot: PathBuf,
    /// Treat the URL prefix as a sub-directory under `imgroot`.
    pub prefix_as_path: bool,
    /// Mount point of the IIIF routes ("" = server root); appears in
    /// canonical URLs when non-empty.
    pub route: String,

    // Render cache settings (cachedir = None disables the cache)
    pub cachedir: Option<PathBuf>,
    /// Maximum cache size in bytes, 0 = unlimited. The `MAX_CACHESIZE`
    /// environment variable accepts K/M/G suffixes.
    pub max_cachesize: u64,
    /// Maximum number of cached files, 0 = unlimited.
    pub max_nfiles: u32,
    /// Fraction of the maximum the purge drives the cache down to.
    pub cache_hysteresis: f32,

    // IIIF limits
    pub iiif_max_image_width: u32,
    pub iiif_max_image_height: u32,

    // Encoder settings
    pub jpeg_quality: u8,
    pub scaling_quality: ScalingQuality,

    // Static file handler (disabled when unset)
    pub docroot: Option<PathBuf>,

    // TLS (both set = HTTPS, canonical links use https)
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: default_host(),
            server_port: default_port(),
            imgroot: default_imgroot(),
            prefix_as_path: true,
            route: String::new(),
            cachedir: None,
            max_cachesize: 0,
            max_nfiles: 0,
            cache_hysteresis: default_hysteresis(),
            iiif_max_image_width: 0,
            iiif_max_image_height: 0,
            jpeg_quality: default_jpeg_quality(),
            scaling_quality: ScalingQuality::default(),
            docroot: None,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl Config {
    /// Load configuration: `$IMAGO_CONFIG_PATH` (TOML) when set, otherwise
    /// plain environment variables (a `.env` file is honored).
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        if let Ok(path) = env::var("IMAGO_CONFIG_PATH") {
            return Self::from_file(Path::new(&path));
        }

        Self::from_env()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err))
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),

            imgroot: env::var("IMG_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.imgroot),
            prefix_as_path: env::var("PREFIX_AS_PATH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.prefix_as_path),
            route: env::var("IIIF_ROUTE").unwrap_or(defaults.route),

            cachedir: env::var("CACHE_DIR").ok().map(PathBuf::from),
            max_cachesize: env::var("MAX_CACHESIZE")
                .ok()
                .map(|v| parse_size(&v))
                .transpose()?
                .unwrap_or(defaults.max_cachesize),
            max_nfiles: env::var("MAX_NFILES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_nfiles),
            cache_hysteresis: env::var("CACHE_HYSTERESIS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_hysteresis),

            iiif_max_image_width: env::var("IIIF_MAX_IMAGE_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.iiif_max_image_width),
            iiif_max_image_height: env::var("IIIF_MAX_IMAGE_HEIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.iiif_max_image_height),

            jpeg_quality: env::var("JPEG_QUALITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|q: u8| q.clamp(1, 100))
                .unwrap_or(defaults.jpeg_quality),
            scaling_quality: env::var("SCALING_QUALITY")
                .ok()
                .and_then(|v| match v.to_ascii_lowercase().as_str() {
                    "low" => Some(ScalingQuality::Low),
                    "medium" => Some(ScalingQuality::Medium),
                    "high" => Some(ScalingQuality::High),
                    _ => None,
                })
                .unwrap_or(defaults.scaling_quality),

            docroot: env::var("DOC_ROOT").ok().map(PathBuf::from),

            tls_cert_path: env::var("TLS_CERT_PATH").ok().map(PathBuf::from),
            tls_key_path: env::var("TLS_KEY_PATH").ok().map(PathBuf::from),
        })
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }

    /// Create the cache directory if configured and missing.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(cachedir) = &self.cachedir {
            fs::create_dir_all(cachedir)
                .with_context(|| format!("failed to create cache dir {}", cachedir.display()))?;
        }
        Ok(())
    }

    /// Canonicalize directories so handlers work with absolute paths; called
    /// once during startup right after `ensure_directories`.
    pub fn normalize_paths(&mut self) -> anyhow::Result<()> {
        if self.imgroot.exists() {
            self.imgroot = fs::canonicalize(&self.imgroot)?;
        }
        if let Some(cachedir) = &self.cachedir {
            self.cachedir = Some(fs::canonicalize(cachedir)?);
        }
        Ok(())
    }
}

/// Parse a byte size with an optional K/M/G suffix ("200M", "1G", "512").
pub fn parse_size(raw: &str) -> anyhow::Result<u64> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last() {
        Some('k') | Some('K') => (&raw[..raw.len() - 1], 1024u64),
        Some('m') | Some('M') => (&raw[..raw.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw, 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid size value: {raw}"))?;
    Ok(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::parse_size;

    #[test]
    fn sizes_accept_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("200M").unwrap(), 200 * 1024 * 1024);
        assert_eq!(parse_size("2k").unwrap(), 2048);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
    }
}
