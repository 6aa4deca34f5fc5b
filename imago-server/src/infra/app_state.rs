use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use imago_core::backend::raster::RasterBackend;
use imago_core::{FilePreflight, IiifCache, IiifPreflight, ImageBackend, SpecialFn};

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Render cache; `None` when no cache directory is configured.
    pub cache: Option<Arc<IiifCache>>,
    pub backend: Arc<dyn ImageBackend>,
    pub iiif_preflight: Option<Arc<dyn IiifPreflight>>,
    pub file_preflight: Option<Arc<dyn FilePreflight>>,
    /// Named callbacks behind `/{prefix}/{identifier}/{name}`.
    pub specials: Arc<HashMap<String, Arc<dyn SpecialFn>>>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Assemble the state from a loaded configuration: open the cache (if
    /// configured) and wire the default raster backend. Pre-flight hooks
    /// start empty; embedders attach them with the builder methods.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let cache = match &config.cachedir {
            Some(cachedir) => Some(IiifCache::open(
                cachedir,
                config.max_cachesize,
                config.max_nfiles,
                config.cache_hysteresis,
            )?),
            None => None,
        };

        Ok(Self {
            config: Arc::new(config),
            cache,
            backend: Arc::new(RasterBackend::new()),
            iiif_preflight: None,
            file_preflight: None,
            specials: Arc::new(HashMap::new()),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_iiif_preflight(mut self, preflight: Arc<dyn IiifPreflight>) -> Self {
        self.iiif_preflight = Some(preflight);
        self
    }

    pub fn with_file_preflight(mut self, preflight: Arc<dyn FilePreflight>) -> Self {
        self.file_preflight = Some(preflight);
        self
    }

    pub fn with_special(mut self, name: impl Into<String>, function: Arc<dyn SpecialFn>) -> Self {
        Arc::make_mut(&mut self.specials).insert(name.into(), function);
        self
    }

    /// Resolve the default input file for `prefix`/`identifier` under the
    /// image root.
    pub fn default_infile(&self, prefix: &str, identifier: &str) -> PathBuf {
        if self.config.prefix_as_path && !prefix.is_empty() {
            self.config.imgroot.join(prefix).join(identifier)
        } else {
            self.config.imgroot.join(identifier)
        }
    }
}
