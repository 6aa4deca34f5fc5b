pub mod blob;
pub mod cache_admin;
pub mod image;
pub mod info;
pub mod special;

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Path as UrlPath, State},
    http::{HeaderMap, header},
    response::Response,
};
use tracing::warn;

use imago_core::{PreflightOutcome, SubImageInfo};

use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

/// `/{prefix}/{identifier}/{command}` multiplexes the info endpoint, the
/// explicit blob route and the named special endpoints.
pub async fn command_handler(
    State(state): State<AppState>,
    UrlPath((prefix, identifier, command)): UrlPath<(String, String, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    match command.as_str() {
        "info.json" => info::send_info(state, prefix, identifier, headers).await,
        "file" => blob::send_blob(state, prefix, identifier, headers).await,
        _ => special::send_special(state, prefix, identifier, command, headers).await,
    }
}

pub(crate) fn cookie_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Request host for canonical URLs and info ids; falls back to the
/// configured bind address when the client sent no Host header.
pub(crate) fn host_of(headers: &HeaderMap, state: &AppState) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            format!(
                "{}:{}",
                state.config.server_host, state.config.server_port
            )
        })
}

pub(crate) fn join_error(err: tokio::task::JoinError) -> AppError {
    AppError::internal(format!("worker task failed: {err}"))
}

/// Dimensions (and pyramid layout) of an original: served from the cache's
/// size table when fresh, otherwise probed through the decoder capability
/// and written back.
pub(crate) async fn image_dimensions(
    state: &AppState,
    infile: &Path,
    page: u32,
) -> AppResult<(u32, u32, Vec<SubImageInfo>)> {
    if let Some(cache) = &state.cache {
        let cache = Arc::clone(cache);
        let path = infile.to_path_buf();
        let cached = tokio::task::spawn_blocking(move || cache.probe_size(&path))
            .await
            .map_err(join_error)??;
        if let Some(hit) = cached {
            return Ok(hit);
        }
    }

    let backend = Arc::clone(&state.backend);
    let path = infile.to_path_buf();
    let info = tokio::task::spawn_blocking(move || backend.get_dim(&path, page))
        .await
        .map_err(join_error)??;

    if let Some(cache) = &state.cache
        && let Err(e) = cache.record_size(infile, info.width, info.height, &info.resolutions)
    {
        warn!("couldn't record probe for {}: {}", infile.display(), e);
    }

    Ok((info.width, info.height, info.resolutions))
}

/// IIIF Authentication API v1 `service` descriptor for login-class
/// verdicts. The cookie service is mandatory, the token service nested
/// inside it; free-form pre-flight keys pass through.
pub(crate) fn auth_service_object(
    outcome: &PreflightOutcome,
) -> Result<serde_json::Value, AppError> {
    let cookie_url = outcome.cookie_url.clone().ok_or_else(|| {
        AppError::internal("pre-flight returned a login type but no cookieUrl")
    })?;
    let token_url = outcome.token_url.clone().ok_or_else(|| {
        AppError::internal("pre-flight returned a login type but no tokenUrl")
    })?;

    let mut service = serde_json::json!({
        "@context": "http://iiif.io/api/auth/1/context.json",
        "@id": cookie_url,
        "profile": outcome.verdict.auth_profile().unwrap_or(""),
    });
    for (key, value) in &outcome.extra {
        service[key] = serde_json::Value::String(value.clone());
    }

    let mut nested = vec![serde_json::json!({
        "@id": token_url,
        "profile": "http://iiif.io/api/auth/1/token",
    })];
    if let Some(logout_url) = &outcome.logout_url {
        nested.push(serde_json::json!({
            "@id": logout_url,
            "profile": "http://iiif.io/api/auth/1/logout",
        }));
    }
    service["service"] = serde_json::Value::Array(nested);

    Ok(service)
}
