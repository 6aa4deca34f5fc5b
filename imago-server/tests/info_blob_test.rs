mod support;

use axum::http::{HeaderValue, StatusCode, header};
use serde_json::Value;

use support::{add_blob, add_png, spawn};

#[tokio::test]
async fn info_json_describes_an_image_service() {
    let app = spawn(false);
    add_png(&app, "p", "test.png", 400, 300);

    let res = app.server.get("/p/test.png/info.json").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let link = res.headers().get(header::LINK).unwrap().to_str().unwrap();
    assert!(link.contains("json-ld#context"), "{link}");

    let body: Value = res.json();
    assert_eq!(body["@context"], "http://iiif.io/api/image/3/context.json");
    assert_eq!(body["type"], "ImageService3");
    assert_eq!(body["protocol"], "http://iiif.io/api/image");
    assert_eq!(body["profile"], "level2");
    assert_eq!(body["width"], 400);
    assert_eq!(body["height"], 300);
    assert!(body["id"].as_str().unwrap().ends_with("/p/test.png"));
    assert!(body["extraFormats"].is_array());
}

#[tokio::test]
async fn info_json_negotiates_json_ld() {
    let app = spawn(false);
    add_png(&app, "p", "test.png", 64, 64);

    let res = app
        .server
        .get("/p/test.png/info.json")
        .add_header(
            header::ACCEPT,
            HeaderValue::from_static("application/ld+json"),
        )
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let content_type = res
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("application/ld+json;profile="), "{content_type}");
    assert!(res.headers().get(header::LINK).is_none());
}

#[tokio::test]
async fn info_json_for_plain_files_reports_size_and_mimetype() {
    let app = spawn(false);
    add_blob(&app, "p", "data.bin", &[7u8; 2048]);

    let res = app.server.get("/p/data.bin/info.json").await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let body: Value = res.json();
    assert_eq!(body["@context"], "http://omas.io/api/file/3/context.json");
    assert_eq!(body["fileSize"], 2048);
    assert!(body.get("type").is_none());
    assert!(body.get("width").is_none());
}

#[tokio::test]
async fn blob_endpoint_streams_with_ranges() {
    let app = spawn(false);
    let contents: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    add_blob(&app, "p", "data.bin", &contents);

    let res = app.server.get("/p/data.bin").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert!(res.headers().get(header::LAST_MODIFIED).is_some());
    assert_eq!(res.as_bytes().as_ref(), contents.as_slice());

    // The explicit /file route serves the same bytes.
    let res = app.server.get("/p/data.bin/file").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.as_bytes().as_ref(), contents.as_slice());

    let res = app
        .server
        .get("/p/data.bin")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=100-"))
        .await;
    assert_eq!(res.status_code(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        res.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 100-4095/4096"
    );
    assert_eq!(res.as_bytes().as_ref(), &contents[100..]);

    let res = app
        .server
        .get("/p/data.bin")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=-100"))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_blob_is_404() {
    let app = spawn(false);
    let res = app.server.get("/p/missing.bin").await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}
