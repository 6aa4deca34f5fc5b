use std::io::SeekFrom;
use std::time::SystemTime;

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use httpdate::fmt_http_date;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use imago_core::backend::sniff::blob_mime_type;
use imago_core::{AccessVerdict, Identifier};

use crate::handlers::cookie_of;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::infra::range::parse_range;

const BLOB_CACHE_CONTROL: &str = "public, must-revalidate, max-age=0";

/// GET /{prefix}/{identifier} and /{prefix}/{identifier}/file
///
/// Stream the original as-is, with byte-range support. The file pre-flight
/// (when configured) can rewrite the input path or deny access.
pub async fn send_blob(
    state: AppState,
    prefix: String,
    identifier: String,
    headers: HeaderMap,
) -> AppResult<Response> {
    let sid = Identifier::parse(&identifier);
    let mut infile = state.default_infile(&prefix, sid.name());

    if let Some(preflight) = &state.file_preflight {
        let outcome = preflight
            .preflight(&infile, cookie_of(&headers).as_deref())
            .map_err(|e| AppError::internal(format!("pre-flight failed: {e}")))?;
        match outcome.verdict {
            AccessVerdict::Allow | AccessVerdict::Restrict => {
                if let Some(path) = outcome.infile {
                    infile = path;
                }
            }
            _ => return Err(AppError::unauthorized("unauthorized access")),
        }
    }

    let meta = match tokio::fs::metadata(&infile).await {
        Ok(meta) if meta.is_file() => meta,
        _ => {
            warn!("file '{}' not accessible", infile.display());
            return Err(AppError::not_found(format!(
                "file '{}' not accessible",
                infile.display()
            )));
        }
    };

    let fsize = meta.len();
    let mimetype = blob_mime_type(&infile);
    let last_modified = fmt_http_date(meta.modified().unwrap_or_else(|_| SystemTime::now()));

    let mut file = tokio::fs::File::open(&infile)
        .await
        .map_err(|e| AppError::internal(format!("couldn't open {}: {e}", infile.display())))?;

    let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        debug!("streaming '{}' ({} bytes)", infile.display(), fsize);
        let stream = ReaderStream::new(file);
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mimetype)
            .header(header::CONTENT_LENGTH, fsize.to_string())
            .header(header::CACHE_CONTROL, BLOB_CACHE_CONTROL)
            .header(header::PRAGMA, "no-cache")
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::LAST_MODIFIED, last_modified)
            .header("Content-Transfer-Encoding", "binary")
            .body(Body::from_stream(stream))
            .expect("failed to build OK response"));
    };

    let range = parse_range(range_header, fsize)?;
    file.seek(SeekFrom::Start(range.start))
        .await
        .map_err(|e| AppError::internal(format!("couldn't seek: {e}")))?;

    debug!(
        "streaming '{}' range {}-{}/{}",
        infile.display(),
        range.start,
        range.end,
        fsize
    );

    let stream = ReaderStream::new(file.take(range.len()));
    Ok(Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, mimetype)
        .header(header::CONTENT_LENGTH, range.len().to_string())
        .header(header::CONTENT_RANGE, range.content_range(fsize))
        .header(header::CACHE_CONTROL, BLOB_CACHE_CONTROL)
        .header(header::PRAGMA, "no-cache")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename={}", sid.name()),
        )
        .header("Content-Transfer-Encoding", "binary")
        .header(header::LAST_MODIFIED, last_modified)
        .body(Body::from_stream(stream))
        .expect("failed to build PARTIAL_CONTENT response"))
}
