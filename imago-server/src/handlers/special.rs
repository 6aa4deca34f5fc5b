use axum::{
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use imago_core::Identifier;

use crate::handlers::cookie_of;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

/// GET /{prefix}/{identifier}/{name}
///
/// Invoke the named callback with `(prefix, identifier, cookie)` and wrap
/// its single return value as `{"status":"OK","result":…}`; callback errors
/// become `{"status":"ERROR","errormsg":…}` with status 200.
pub async fn send_special(
    state: AppState,
    prefix: String,
    identifier: String,
    name: String,
    headers: HeaderMap,
) -> AppResult<Response> {
    let Some(function) = state.specials.get(&name) else {
        return Err(AppError::not_found(format!("no such endpoint: {name}")));
    };

    let sid = Identifier::parse(&identifier);
    let cookie = cookie_of(&headers);

    let body = match function.call(&prefix, sid.name(), cookie.as_deref()) {
        Ok(result) => json!({"status": "OK", "result": result}),
        Err(e) => {
            warn!("special endpoint '{}' failed: {}", name, e);
            json!({"status": "ERROR", "errormsg": e.to_string()})
        }
    };

    Ok((
        StatusCode::OK,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        axum::Json(body),
    )
        .into_response())
}
