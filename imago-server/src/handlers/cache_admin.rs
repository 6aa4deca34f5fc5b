use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use imago_core::{CacheStats, SortMethod};

use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    sort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheEntry {
    canonical: String,
    cachepath: String,
    origpath: String,
    img_w: u32,
    img_h: u32,
    fsize: u64,
    /// Last access, unix microseconds.
    access_time: i64,
}

#[derive(Debug, Serialize)]
pub struct CacheListing {
    stats: CacheStats,
    entries: Vec<CacheEntry>,
}

fn parse_sort(raw: Option<&str>) -> Result<SortMethod, AppError> {
    match raw.unwrap_or("atime_asc") {
        "atime_asc" => Ok(SortMethod::AtimeAsc),
        "atime_desc" => Ok(SortMethod::AtimeDesc),
        "fsize_asc" => Ok(SortMethod::FsizeAsc),
        "fsize_desc" => Ok(SortMethod::FsizeDesc),
        other => Err(AppError::bad_request(format!("unknown sort order: {other}"))),
    }
}

/// GET /api/cache - list cached renderings, oldest-accessed first by
/// default (`?sort=atime_asc|atime_desc|fsize_asc|fsize_desc`).
pub async fn list_cache_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<CacheListing>> {
    let Some(cache) = &state.cache else {
        return Err(AppError::service_unavailable("cache is disabled"));
    };
    let sort = parse_sort(query.sort.as_deref())?;

    let mut entries = Vec::new();
    cache.loop_entries(sort, |_, canonical, record| {
        entries.push(CacheEntry {
            canonical: canonical.to_string(),
            cachepath: record.cachepath.clone(),
            origpath: record.origpath.clone(),
            img_w: record.img_w,
            img_h: record.img_h,
            fsize: record.fsize,
            access_time: record.access_time,
        });
    });

    Ok(Json(CacheListing {
        stats: cache.stats(),
        entries,
    }))
}

/// DELETE /api/cache/{canonical} - drop one entry (the canonical
/// fingerprint contains slashes, so the route captures the remaining
/// path). 404 for unknown keys, 409 when the entry is pinned by an
/// in-flight response.
pub async fn remove_cache_entry_handler(
    State(state): State<AppState>,
    Path(canonical): Path<String>,
) -> AppResult<StatusCode> {
    let Some(cache) = &state.cache else {
        return Err(AppError::service_unavailable("cache is disabled"));
    };

    let known = {
        let mut found = false;
        cache.loop_entries(SortMethod::AtimeAsc, |_, key, _| {
            if key == canonical {
                found = true;
            }
        });
        found
    };
    if !known {
        return Err(AppError::not_found(canonical));
    }

    if cache.remove(&canonical) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::new(StatusCode::CONFLICT, "cache entry is in use"))
    }
}

#[derive(Debug, Serialize)]
pub struct PurgeResult {
    purged: usize,
}

/// POST /api/cache/purge - force an eviction pass.
pub async fn purge_cache_handler(
    State(state): State<AppState>,
) -> AppResult<Json<PurgeResult>> {
    let Some(cache) = &state.cache else {
        return Err(AppError::service_unavailable("cache is disabled"));
    };
    Ok(Json(PurgeResult {
        purged: cache.purge(),
    }))
}
