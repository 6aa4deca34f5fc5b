use axum::{
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde_json::json;
use tracing::info;

use imago_core::backend::sniff::{blob_mime_type, sniff_file};
use imago_core::{AccessVerdict, Format, Identifier, SubImageInfo};

use crate::handlers::{auth_service_object, cookie_of, host_of, image_dimensions};
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

const IIIF_IMAGE_CONTEXT: &str = "http://iiif.io/api/image/3/context.json";
const FILE_CONTEXT: &str = "http://omas.io/api/file/3/context.json";

/// GET /{prefix}/{identifier}/info.json
///
/// IIIF ImageService3 descriptor for image files, a plain file descriptor
/// otherwise. Login-class pre-flight verdicts turn the response into a 401
/// that still carries the descriptor plus the auth `service` object.
pub async fn send_info(
    state: AppState,
    prefix: String,
    identifier: String,
    headers: HeaderMap,
) -> AppResult<Response> {
    let sid = Identifier::parse(&identifier);
    let cookie = cookie_of(&headers);

    let mut infile = state.default_infile(&prefix, sid.name());
    let mut outcome = None;

    if let Some(preflight) = &state.iiif_preflight {
        let result = preflight
            .preflight(&prefix, sid.name(), cookie.as_deref())
            .map_err(|e| AppError::internal(format!("pre-flight failed: {e}")))?;
        if let Some(path) = &result.infile {
            infile = path.clone();
        }
        if result.verdict == AccessVerdict::Deny {
            return Err(AppError::unauthorized("unauthorized access"));
        }
        outcome = Some(result);
    }

    let meta = tokio::fs::metadata(&infile).await.map_err(|_| {
        info!("file '{}' not found", infile.display());
        AppError::not_found(format!("file '{}' not found", infile.display()))
    })?;

    let source_format = sniff_file(&infile);
    let is_image = matches!(
        source_format,
        Format::Jpg | Format::Tif | Format::Png | Format::Jp2
    );

    let context = if is_image {
        IIIF_IMAGE_CONTEXT
    } else {
        FILE_CONTEXT
    };
    let mut root = json!({ "@context": context });

    // Fully qualified id, scheme-aware.
    let scheme = if state.config.tls_enabled() { "https" } else { "http" };
    let mut id = format!("{}://{}/", scheme, host_of(&headers, &state));
    if !state.config.route.is_empty() {
        id.push_str(&state.config.route);
        id.push('/');
    }
    if !prefix.is_empty() {
        id.push_str(&prefix);
        id.push('/');
    }
    id.push_str(&identifier);
    root["id"] = json!(id);

    if is_image {
        root["type"] = json!("ImageService3");
        root["protocol"] = json!("http://iiif.io/api/image");
        root["profile"] = json!("level2");
    } else {
        root["internalMimeType"] = json!(blob_mime_type(&infile));
        root["fileSize"] = json!(meta.len());
    }

    let mut status = StatusCode::OK;
    if let Some(outcome) = &outcome
        && outcome.verdict.wants_auth_service()
    {
        root["service"] = auth_service_object(outcome)?;
        status = StatusCode::UNAUTHORIZED;
    }

    if is_image {
        let (width, height, resolutions) = image_dimensions(&state, &infile, sid.page()).await?;
        root["width"] = json!(width);
        root["height"] = json!(height);

        let sizes = sizes_array(width, height, &resolutions);
        if !sizes.is_empty() {
            root["sizes"] = json!(sizes);
        }
        let tiles = tiles_array(&resolutions);
        if !tiles.is_empty() {
            root["tiles"] = json!(tiles);
        }

        root["extraFormats"] = json!(["tif", "jp2"]);
        root["extraQualities"] = json!(["color", "gray", "bitonal"]);
        root["preferredFormats"] = json!(["jpg", "tif", "jp2", "png"]);
        root["extraFeatures"] = json!([
            "baseUriRedirect",
            "canonicalLinkHeader",
            "cors",
            "jsonldMediaType",
            "mirroring",
            "profileLinkHeader",
            "regionByPct",
            "regionByPx",
            "regionSquare",
            "rotationArbitrary",
            "rotationBy90s",
            "sizeByConfinedWh",
            "sizeByH",
            "sizeByPct",
            "sizeByW",
            "sizeByWh",
            "sizeUpscaling"
        ]);
    }

    // Content negotiation: JSON-LD on request, plain JSON with a context
    // link otherwise.
    let wants_ld = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/ld+json"));

    let body = serde_json::to_string_pretty(&root)
        .map_err(|e| AppError::internal(format!("couldn't serialize info.json: {e}")))?;

    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");

    builder = if wants_ld {
        builder.header(
            header::CONTENT_TYPE,
            format!("application/ld+json;profile=\"{context}\""),
        )
    } else {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .header(
                header::LINK,
                format!(
                    "<{context}>; rel=\"http://www.w3.org/ns/json-ld#context\"; type=\"application/ld+json\""
                ),
            )
    };

    Ok(builder
        .body(axum::body::Body::from(body))
        .expect("failed to build info response"))
}

/// One entry per distinct sub-image resolution that is not the full size.
fn sizes_array(width: u32, height: u32, resolutions: &[SubImageInfo]) -> Vec<serde_json::Value> {
    resolutions
        .iter()
        .filter(|r| !(r.width == width && r.height == height))
        .map(|r| json!({"width": r.width, "height": r.height}))
        .collect()
}

/// Group tiled levels by tile geometry, collecting their scale factors.
fn tiles_array(resolutions: &[SubImageInfo]) -> Vec<serde_json::Value> {
    let mut groups: Vec<(u32, u32, Vec<u32>)> = Vec::new();

    for r in resolutions {
        if r.tile_width == 0 || r.tile_height == 0 {
            continue;
        }
        match groups
            .iter_mut()
            .find(|(tw, th, _)| *tw == r.tile_width && *th == r.tile_height)
        {
            Some((_, _, factors)) => factors.push(r.reduce),
            None => groups.push((r.tile_width, r.tile_height, vec![r.reduce])),
        }
    }

    groups
        .into_iter()
        .map(|(tw, th, factors)| json!({"width": tw, "height": th, "scaleFactors": factors}))
        .collect()
}
