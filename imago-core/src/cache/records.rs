use crate::backend::SubImageInfo;

/// In-memory record for one cached artifact. The record exclusively owns
/// the file `{cachedir}/{cachepath}`; removing the record implies unlinking
/// the file unless a pin is held.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub img_w: u32,
    pub img_h: u32,
    pub resolutions: Vec<SubImageInfo>,
    /// Path of the original master file.
    pub origpath: String,
    /// Basename of the cached artifact inside the cache directory.
    pub cachepath: String,
    /// mtime of the cached artifact, unix microseconds.
    pub mtime: i64,
    /// Last access, unix microseconds.
    pub access_time: i64,
    pub fsize: u64,
}

/// Cached decoder probe for an original: dimensions and pyramid layout,
/// invalidated when the original's mtime moves forward.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeRecord {
    pub img_w: u32,
    pub img_h: u32,
    pub resolutions: Vec<SubImageInfo>,
    pub mtime: i64,
}

/// On-disk form of the index: a versioned little-endian rkyv archive. The
/// file is a volatile index (regenerable from the directory), so any load
/// failure degrades to an empty index.
#[derive(Debug, Clone)]
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub(crate) struct PersistedIndex {
    pub records: Vec<PersistedRecord>,
}

#[derive(Debug, Clone)]
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub(crate) struct PersistedRecord {
    pub canonical: String,
    pub img_w: u32,
    pub img_h: u32,
    pub resolutions: Vec<SubImageInfo>,
    pub origpath: String,
    pub cachepath: String,
    pub mtime: i64,
    pub access_time: i64,
    pub fsize: u64,
}

impl PersistedRecord {
    pub(crate) fn from_record(canonical: &str, record: &CacheRecord) -> Self {
        Self {
            canonical: canonical.to_string(),
            img_w: record.img_w,
            img_h: record.img_h,
            resolutions: record.resolutions.clone(),
            origpath: record.origpath.clone(),
            cachepath: record.cachepath.clone(),
            mtime: record.mtime,
            access_time: record.access_time,
            fsize: record.fsize,
        }
    }

    pub(crate) fn into_record(self) -> (String, CacheRecord) {
        (
            self.canonical,
            CacheRecord {
                img_w: self.img_w,
                img_h: self.img_h,
                resolutions: self.resolutions,
                origpath: self.origpath,
                cachepath: self.cachepath,
                mtime: self.mtime,
                access_time: self.access_time,
                fsize: self.fsize,
            },
        )
    }
}
