mod support;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::Value;
use tempfile::TempDir;

use imago_core::{AccessVerdict, PreflightOutcome};

use support::{add_png, base_config, spawn_with};

fn preflight_app(
    verdict: impl Fn() -> PreflightOutcome + Send + Sync + 'static,
) -> support::TestApp {
    let dir = TempDir::new().unwrap();
    let config = base_config(&dir, false);
    spawn_with(dir, config, move |state| {
        state.with_iiif_preflight(Arc::new(
            move |_prefix: &str,
                  _identifier: &str,
                  _cookie: Option<&str>|
                  -> imago_core::Result<PreflightOutcome> { Ok(verdict()) },
        ))
    })
}

#[tokio::test]
async fn deny_verdict_yields_plain_401() {
    let app = preflight_app(PreflightOutcome::deny);
    add_png(&app, "p", "test.png", 64, 64);

    let res = app.server.get("/p/test.png/full/max/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    assert!(res.text().starts_with("Unauthorized"));
}

#[tokio::test]
async fn login_verdict_carries_an_auth_service() {
    let app = preflight_app(|| {
        let mut outcome = PreflightOutcome::with_verdict(AccessVerdict::Login);
        outcome.cookie_url = Some("https://auth.example.org/cookie".to_string());
        outcome.token_url = Some("https://auth.example.org/token".to_string());
        outcome
            .extra
            .insert("label".to_string(), "Sign in".to_string());
        outcome
    });
    add_png(&app, "p", "test.png", 64, 64);

    // The image endpoint answers 401 with the service descriptor.
    let res = app.server.get("/p/test.png/full/max/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json();
    assert_eq!(body["service"]["@id"], "https://auth.example.org/cookie");
    assert_eq!(body["service"]["profile"], "http://iiif.io/api/auth/1/login");
    assert_eq!(body["service"]["label"], "Sign in");
    assert_eq!(
        body["service"]["service"][0]["@id"],
        "https://auth.example.org/token"
    );

    // info.json stays a full descriptor, but with 401 and the service.
    let res = app.server.get("/p/test.png/info.json").await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json();
    assert_eq!(body["type"], "ImageService3");
    assert_eq!(body["width"], 64);
    assert_eq!(body["service"]["@id"], "https://auth.example.org/cookie");
}

#[tokio::test]
async fn login_verdict_without_token_url_is_500() {
    let app = preflight_app(|| {
        let mut outcome = PreflightOutcome::with_verdict(AccessVerdict::Login);
        outcome.cookie_url = Some("https://auth.example.org/cookie".to_string());
        outcome
    });
    add_png(&app, "p", "test.png", 64, 64);

    let res = app.server.get("/p/test.png/info.json").await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn restrict_verdict_clamps_the_requested_size() {
    let app = preflight_app(|| {
        let mut outcome = PreflightOutcome::with_verdict(AccessVerdict::Restrict);
        outcome.size = Some("!100,100".to_string());
        outcome
    });
    add_png(&app, "p", "test.png", 400, 300);

    let res = app.server.get("/p/test.png/full/max/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let img = image::load_from_memory(res.as_bytes().as_ref()).unwrap();
    assert!(img.width() <= 100, "width {}", img.width());
    assert!(img.height() <= 100, "height {}", img.height());

    // A request already below the restriction is untouched.
    let res = app.server.get("/p/test.png/full/50,/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let img = image::load_from_memory(res.as_bytes().as_ref()).unwrap();
    assert_eq!(img.width(), 50);
}

#[tokio::test]
async fn restrict_verdict_without_directives_is_401() {
    let app = preflight_app(|| PreflightOutcome::with_verdict(AccessVerdict::Restrict));
    add_png(&app, "p", "test.png", 64, 64);

    let res = app.server.get("/p/test.png/full/max/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn file_preflight_gates_the_blob_endpoint() {
    let dir = TempDir::new().unwrap();
    let config = base_config(&dir, false);
    let app = spawn_with(dir, config, |state| {
        state.with_file_preflight(Arc::new(
            |infile: &std::path::Path,
             _cookie: Option<&str>|
             -> imago_core::Result<PreflightOutcome> {
                if infile.to_string_lossy().contains("secret") {
                    Ok(PreflightOutcome::deny())
                } else {
                    Ok(PreflightOutcome::allow())
                }
            },
        ))
    });
    support::add_blob(&app, "p", "open.bin", b"public bytes");
    support::add_blob(&app, "p", "secret.bin", b"hidden bytes");

    let res = app.server.get("/p/open.bin").await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let res = app.server.get("/p/secret.bin").await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn special_endpoint_wraps_the_callback_result() {
    let dir = TempDir::new().unwrap();
    let config = base_config(&dir, false);
    let app = spawn_with(dir, config, |state| {
        state
            .with_special(
                "descriptor",
                Arc::new(
                    |prefix: &str,
                     identifier: &str,
                     _cookie: Option<&str>|
                     -> imago_core::Result<Value> {
                        Ok(serde_json::json!({"prefix": prefix, "identifier": identifier}))
                    },
                ),
            )
            .with_special(
                "broken",
                Arc::new(
                    |_: &str, _: &str, _: Option<&str>| -> imago_core::Result<Value> {
                        Err(imago_core::IiifError::Decoder("boom".to_string()))
                    },
                ),
            )
    });
    add_png(&app, "p", "test.png", 16, 16);

    let res = app.server.get("/p/test.png/descriptor").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let body: Value = res.json();
    assert_eq!(body["status"], "OK");
    assert_eq!(body["result"]["prefix"], "p");
    assert_eq!(body["result"]["identifier"], "test.png");

    let res = app.server.get("/p/test.png/broken").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let body: Value = res.json();
    assert_eq!(body["status"], "ERROR");
    assert!(body["errormsg"].as_str().unwrap().contains("boom"));

    let res = app.server.get("/p/test.png/unknown").await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}
