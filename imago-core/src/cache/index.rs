use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use tracing::{debug, info, warn};

use crate::backend::SubImageInfo;
use crate::cache::records::{CacheRecord, PersistedIndex, PersistedRecord, SizeRecord};
use crate::error::{IiifError, Result};

/// Name of the persisted index inside the cache directory. Dotfiles are
/// exempt from the orphan sweep.
const INDEX_FILE: &str = ".iiifcache";

const INDEX_MAGIC: [u8; 4] = *b"IMGO";
const INDEX_VERSION: u32 = 1;

/// Iteration order for [`IiifCache::loop_entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMethod {
    AtimeAsc,
    AtimeDesc,
    FsizeAsc,
    FsizeDesc,
}

/// Counters snapshot, for logs and the admin listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub cachesize: u64,
    pub nfiles: u32,
    pub max_cachesize: u64,
    pub max_nfiles: u32,
}

#[derive(Debug, Default)]
struct CacheState {
    records: HashMap<String, CacheRecord>,
    sizes: HashMap<String, SizeRecord>,
    pins: HashMap<String, u32>,
    cachesize: u64,
    nfiles: u32,
}

/// Persistent, bounded LRU over rendered artifacts stored as discrete files
/// in a single directory.
///
/// All shared state sits behind one mutex; the lock covers complete
/// mutations (lookup, unlink, counter updates, purge) but never encoding or
/// socket I/O. Streaming consumers pin entries via [`IiifCache::check_pinned`]
/// so eviction cannot unlink a file mid-transfer.
#[derive(Debug)]
pub struct IiifCache {
    cachedir: PathBuf,
    max_cachesize: u64,
    max_nfiles: u32,
    hysteresis: f32,
    state: Mutex<CacheState>,
}

/// RAII pin over a cached file: the file is guaranteed to exist until this
/// guard drops.
#[derive(Debug)]
pub struct PinnedFile {
    cache: Arc<IiifCache>,
    cachepath: String,
    path: PathBuf,
}

impl PinnedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PinnedFile {
    fn drop(&mut self) {
        self.cache.deblock(&self.cachepath);
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Strictly increasing access stamps keep LRU ordering stable even when
/// several requests land within one clock tick.
fn access_stamp() -> i64 {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let now = now_micros();
    let prev = LAST
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
            Some(last.max(now - 1) + 1)
        })
        .unwrap_or(now);
    prev.max(now - 1) + 1
}

fn file_mtime_micros(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

impl IiifCache {
    /// Open the cache directory, load the persisted index, sweep orphans.
    ///
    /// The directory must already exist. Missing cache files referenced by
    /// the index are skipped; files in the directory not referenced by any
    /// record (except dotfiles) are deleted.
    pub fn open(
        cachedir: impl AsRef<Path>,
        max_cachesize: u64,
        max_nfiles: u32,
        hysteresis: f32,
    ) -> Result<Arc<Self>> {
        let cachedir = cachedir.as_ref().to_path_buf();
        if !cachedir.is_dir() {
            return Err(IiifError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cache directory not available: {}", cachedir.display()),
            )));
        }

        info!(
            "Cache at \"{}\" (max_cachesize={} max_nfiles={} hysteresis={})",
            cachedir.display(),
            max_cachesize,
            max_nfiles,
            hysteresis
        );

        let mut state = CacheState::default();

        for persisted in load_index(&cachedir.join(INDEX_FILE)) {
            let (canonical, record) = persisted.into_record();
            let accesspath = cachedir.join(&record.cachepath);
            if !accesspath.is_file() {
                debug!(
                    "cache file \"{}\" missing on disk, skipping index entry",
                    record.cachepath
                );
                continue;
            }
            state.cachesize += record.fsize;
            state.nfiles += 1;
            state.records.insert(canonical, record);
        }

        sweep_orphans(&cachedir, &state.records);

        for record in state.records.values() {
            state
                .sizes
                .entry(record.origpath.clone())
                .or_insert_with(|| SizeRecord {
                    img_w: record.img_w,
                    img_h: record.img_h,
                    resolutions: record.resolutions.clone(),
                    mtime: record.mtime,
                });
        }

        info!(
            "Cache loaded: {} entries, {} bytes",
            state.nfiles, state.cachesize
        );

        Ok(Arc::new(Self {
            cachedir,
            max_cachesize,
            max_nfiles,
            hysteresis: hysteresis.clamp(0.0, 0.99),
            state: Mutex::new(state),
        }))
    }

    pub fn cachedir(&self) -> &Path {
        &self.cachedir
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            cachesize: state.cachesize,
            nfiles: state.nfiles,
            max_cachesize: self.max_cachesize,
            max_nfiles: self.max_nfiles,
        }
    }

    /// Look up `canonical`, refreshing its access time. Returns the path of
    /// the cached artifact, or `None` on a miss or when the original is
    /// newer than the cached rendering (the stale record is kept; the next
    /// `add` replaces it).
    pub fn check(&self, origpath: &Path, canonical: &str) -> Result<Option<PathBuf>> {
        let mtime = file_mtime_micros(&fs::metadata(origpath)?);

        let mut state = self.state.lock();
        let Some(record) = state.records.get_mut(canonical) else {
            return Ok(None);
        };
        record.access_time = access_stamp();

        if mtime > record.mtime {
            return Ok(None);
        }
        Ok(Some(self.cachedir.join(&record.cachepath)))
    }

    /// Like [`check`](Self::check), but additionally pins the entry so it
    /// survives eviction until the returned guard drops.
    pub fn check_pinned(
        self: &Arc<Self>,
        origpath: &Path,
        canonical: &str,
    ) -> Result<Option<PinnedFile>> {
        let mtime = file_mtime_micros(&fs::metadata(origpath)?);

        let mut state = self.state.lock();
        let Some(record) = state.records.get_mut(canonical) else {
            return Ok(None);
        };
        record.access_time = access_stamp();

        if mtime > record.mtime {
            return Ok(None);
        }

        let cachepath = record.cachepath.clone();
        let path = self.cachedir.join(&cachepath);
        *state.pins.entry(cachepath.clone()).or_insert(0) += 1;

        Ok(Some(PinnedFile {
            cache: Arc::clone(self),
            cachepath,
            path,
        }))
    }

    fn deblock(&self, cachepath: &str) {
        let mut state = self.state.lock();
        if let Some(count) = state.pins.get_mut(cachepath) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(cachepath);
            }
        }
    }

    /// Create a fresh, uniquely named file inside the cache directory for a
    /// render in progress. Ownership transfers to the index via [`add`](Self::add)
    /// or back to the caller for unlinking on the error path.
    pub fn new_cache_file(&self) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix("cache_")
            .rand_bytes(10)
            .tempfile_in(&self.cachedir)?;
        let (_, path) = file.keep().map_err(|e| IiifError::Io(e.error))?;
        Ok(path)
    }

    /// Move a finished render into the index under `canonical`.
    ///
    /// An existing record for the same canonical is replaced and its file
    /// unlinked (unless pinned, in which case the next orphan sweep reaps
    /// it). Crossing a size threshold triggers a purge under the same lock.
    pub fn add(
        &self,
        origpath: &Path,
        canonical: &str,
        cachepath: &Path,
        img_w: u32,
        img_h: u32,
        resolutions: &[SubImageInfo],
    ) -> Result<()> {
        let basename = cachepath
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                IiifError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid cache file name: {}", cachepath.display()),
                ))
            })?
            .to_string();

        let meta = fs::metadata(cachepath)?;
        let record = CacheRecord {
            img_w,
            img_h,
            resolutions: resolutions.to_vec(),
            origpath: origpath.to_string_lossy().into_owned(),
            cachepath: basename,
            mtime: file_mtime_micros(&meta),
            access_time: access_stamp(),
            fsize: meta.len(),
        };

        let mut state = self.state.lock();

        if let Some(old) = state.records.remove(canonical) {
            state.cachesize -= old.fsize;
            state.nfiles -= 1;
            if state.pins.contains_key(&old.cachepath) {
                debug!(
                    "replaced cache file \"{}\" is pinned, leaving it for the orphan sweep",
                    old.cachepath
                );
            } else {
                let path = self.cachedir.join(&old.cachepath);
                if let Err(e) = fs::remove_file(&path) {
                    warn!("couldn't unlink replaced cache file {}: {}", path.display(), e);
                }
            }
        }

        state.cachesize += record.fsize;
        state.nfiles += 1;

        state
            .sizes
            .entry(record.origpath.clone())
            .or_insert_with(|| SizeRecord {
                img_w,
                img_h,
                resolutions: resolutions.to_vec(),
                mtime: record.mtime,
            });

        state.records.insert(canonical.to_string(), record);

        self.purge_locked(&mut state);
        Ok(())
    }

    /// Remove one entry and unlink its file. Pinned entries are kept; the
    /// call logs and reports failure.
    pub fn remove(&self, canonical: &str) -> bool {
        let mut state = self.state.lock();

        let Some(record) = state.records.get(canonical) else {
            return false;
        };

        if let Some(count) = state.pins.get(&record.cachepath) {
            warn!(
                "couldn't remove cache entry for \"{}\": file in use ({})",
                canonical, count
            );
            return false;
        }

        debug!("deleting \"{}\" from cache", record.cachepath);
        let path = self.cachedir.join(&record.cachepath);
        if let Err(e) = fs::remove_file(&path) {
            warn!("couldn't unlink cache file {}: {}", path.display(), e);
        }

        let record = state.records.remove(canonical).expect("record just read");
        state.cachesize -= record.fsize;
        state.nfiles -= 1;
        true
    }

    /// Evict least-recently-accessed entries until every enabled threshold
    /// sits below `max * hysteresis`. No-op while no threshold is crossed.
    pub fn purge(&self) -> usize {
        self.purge_locked(&mut self.state.lock())
    }

    fn purge_locked(&self, state: &mut CacheState) -> usize {
        if self.max_cachesize == 0 && self.max_nfiles == 0 {
            return 0;
        }

        let size_crossed = self.max_cachesize > 0 && state.cachesize >= self.max_cachesize;
        let nfiles_crossed = self.max_nfiles > 0 && state.nfiles >= self.max_nfiles;
        if !size_crossed && !nfiles_crossed {
            return 0;
        }

        let cachesize_goal = (self.max_cachesize as f64 * f64::from(self.hysteresis)) as u64;
        let nfiles_goal = (f64::from(self.max_nfiles) * f64::from(self.hysteresis)) as u32;

        let mut by_age: Vec<(String, i64)> = state
            .records
            .iter()
            .map(|(canonical, r)| (canonical.clone(), r.access_time))
            .collect();
        by_age.sort_by_key(|(_, atime)| *atime);

        let mut purged = 0;
        for (canonical, _) in by_age {
            let size_done = self.max_cachesize == 0 || state.cachesize < cachesize_goal;
            let nfiles_done = self.max_nfiles == 0 || state.nfiles < nfiles_goal;
            if size_done && nfiles_done {
                break;
            }

            let record = &state.records[&canonical];
            if let Some(count) = state.pins.get(&record.cachepath) {
                warn!(
                    "couldn't purge cache file for \"{}\": file in use ({})",
                    canonical, count
                );
                continue;
            }

            debug!("purging \"{}\" from cache", record.cachepath);
            let path = self.cachedir.join(&record.cachepath);
            if let Err(e) = fs::remove_file(&path) {
                warn!("couldn't unlink cache file {}: {}", path.display(), e);
            }

            let record = state.records.remove(&canonical).expect("record just read");
            state.cachesize -= record.fsize;
            state.nfiles -= 1;
            purged += 1;
        }

        if purged > 0 {
            info!(
                "purged {} cache entries ({} bytes, {} files remain)",
                purged, state.cachesize, state.nfiles
            );
        }
        purged
    }

    /// Visit every record in the given order. The visitor runs under the
    /// cache lock; keep it short.
    pub fn loop_entries<F>(&self, sort: SortMethod, mut visitor: F)
    where
        F: FnMut(usize, &str, &CacheRecord),
    {
        let state = self.state.lock();

        let mut keys: Vec<&String> = state.records.keys().collect();
        match sort {
            SortMethod::AtimeAsc => keys.sort_by_key(|k| state.records[*k].access_time),
            SortMethod::AtimeDesc => {
                keys.sort_by_key(|k| std::cmp::Reverse(state.records[*k].access_time))
            }
            SortMethod::FsizeAsc => keys.sort_by_key(|k| state.records[*k].fsize),
            SortMethod::FsizeDesc => {
                keys.sort_by_key(|k| std::cmp::Reverse(state.records[*k].fsize))
            }
        }

        for (i, key) in keys.into_iter().enumerate() {
            visitor(i + 1, key, &state.records[key]);
        }
    }

    /// Cached dimensions of an original, if the probe is still fresh. A
    /// stale entry (original modified since) is dropped and reported as a
    /// miss so the caller re-probes.
    pub fn probe_size(&self, origpath: &Path) -> Result<Option<(u32, u32, Vec<SubImageInfo>)>> {
        let mtime = file_mtime_micros(&fs::metadata(origpath)?);
        let key = origpath.to_string_lossy();

        let mut state = self.state.lock();
        let Some(record) = state.sizes.get(key.as_ref()) else {
            return Ok(None);
        };

        if mtime > record.mtime {
            state.sizes.remove(key.as_ref());
            return Ok(None);
        }

        Ok(Some((
            record.img_w,
            record.img_h,
            record.resolutions.clone(),
        )))
    }

    /// Store the result of a fresh decoder probe.
    pub fn record_size(
        &self,
        origpath: &Path,
        img_w: u32,
        img_h: u32,
        resolutions: &[SubImageInfo],
    ) -> Result<()> {
        let mtime = file_mtime_micros(&fs::metadata(origpath)?);
        let mut state = self.state.lock();
        state.sizes.insert(
            origpath.to_string_lossy().into_owned(),
            SizeRecord {
                img_w,
                img_h,
                resolutions: resolutions.to_vec(),
                mtime,
            },
        );
        Ok(())
    }

    /// Serialize the index to `{cachedir}/.iiifcache`. Called at graceful
    /// shutdown; the format is a regenerable volatile index, so failures
    /// are reported but not fatal.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();

        let index = PersistedIndex {
            records: state
                .records
                .iter()
                .map(|(canonical, record)| PersistedRecord::from_record(canonical, record))
                .collect(),
        };

        let bytes = rkyv::to_bytes::<RkyvError>(&index).map_err(|e| {
            IiifError::Io(std::io::Error::other(format!(
                "couldn't serialize cache index: {e}"
            )))
        })?;

        let mut payload = Vec::with_capacity(8 + bytes.len());
        payload.extend_from_slice(&INDEX_MAGIC);
        payload.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        payload.extend_from_slice(&bytes);

        let tmp = self.cachedir.join(".iiifcache.tmp");
        fs::write(&tmp, &payload)?;
        fs::rename(&tmp, self.cachedir.join(INDEX_FILE))?;

        debug!("cache index flushed ({} entries)", index.records.len());
        Ok(())
    }
}

impl Drop for IiifCache {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("couldn't flush cache index on shutdown: {}", e);
        }
    }
}

fn load_index(path: &Path) -> Vec<PersistedRecord> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("couldn't read cache index {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    if raw.len() < 8 || raw[0..4] != INDEX_MAGIC {
        warn!("cache index {} has no valid header, ignoring", path.display());
        return Vec::new();
    }
    let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if version != INDEX_VERSION {
        warn!(
            "cache index {} has unsupported version {}, ignoring",
            path.display(),
            version
        );
        return Vec::new();
    }

    // rkyv wants aligned bytes; a plain Vec<u8> read from disk is not
    // guaranteed to be.
    let mut aligned: AlignedVec = AlignedVec::with_capacity(raw.len() - 8);
    aligned.extend_from_slice(&raw[8..]);

    match rkyv::from_bytes::<PersistedIndex, RkyvError>(&aligned) {
        Ok(index) => index.records,
        Err(e) => {
            warn!("cache index {} failed validation: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn sweep_orphans(cachedir: &Path, records: &HashMap<String, CacheRecord>) {
    let entries = match fs::read_dir(cachedir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("couldn't scan cache directory {}: {}", cachedir.display(), e);
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("couldn't read cache directory entry: {}", e);
                continue;
            }
        };

        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }

        let referenced = records.values().any(|r| r.cachepath == name);
        if !referenced {
            info!("file \"{}\" not in cache index, deleting", name);
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!("couldn't delete orphan {}: {}", name, e);
            }
        }
    }
}
