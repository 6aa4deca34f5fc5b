mod support;

use axum::http::{HeaderValue, StatusCode, header};

use support::{add_png, read_file, spawn};

#[tokio::test]
async fn bad_parameters_are_rejected_with_400() {
    let app = spawn(false);
    add_png(&app, "p", "test.png", 400, 300);

    for path in [
        "/p/test.png/banana/max/0/default.jpg",
        "/p/test.png/10,20,30/max/0/default.jpg",
        "/p/test.png/full/0,/0/default.jpg",
        "/p/test.png/full/!max/0/default.jpg",
        "/p/test.png/full/max/-1/default.jpg",
        "/p/test.png/full/max/360/default.jpg",
        "/p/test.png/full/max/0/shiny.jpg",
        "/p/test.png/full/max/0/default.bmp3",
    ] {
        let res = app.server.get(path).await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST, "{path}");
    }
}

#[tokio::test]
async fn missing_original_is_404() {
    let app = spawn(false);
    let res = app.server.get("/p/nope.png/full/max/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upscaling_without_caret_is_400() {
    let app = spawn(false);
    add_png(&app, "p", "test.png", 400, 300);

    let res = app.server.get("/p/test.png/full/500,/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);

    let res = app.server.get("/p/test.png/full/^500,/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn identity_request_is_sent_directly() {
    let app = spawn(false);
    let original = add_png(&app, "p", "test.png", 400, 300);

    let res = app.server.get("/p/test.png/full/max/0/default.png").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(res.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(
        res.headers().get(header::CACHE_CONTROL).unwrap(),
        "must-revalidate, post-check=0, pre-check=0"
    );

    let link = res
        .headers()
        .get(header::LINK)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(link.starts_with("<http://"), "{link}");
    assert!(
        link.ends_with("/p/test.png/full/max/0/default.png>"),
        "{link}"
    );

    // Byte-for-byte the original.
    assert_eq!(res.as_bytes().as_ref(), read_file(&original).as_slice());
}

#[tokio::test]
async fn direct_send_honors_byte_ranges() {
    let app = spawn(false);
    let original = add_png(&app, "p", "test.png", 400, 300);
    let bytes = read_file(&original);

    let res = app
        .server
        .get("/p/test.png/full/max/0/default.png")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=10-109"))
        .await;
    assert_eq!(res.status_code(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        res.headers().get(header::CONTENT_RANGE).unwrap(),
        format!("bytes 10-109/{}", bytes.len()).as_str()
    );
    assert_eq!(res.as_bytes().as_ref(), &bytes[10..110]);

    let res = app
        .server
        .get("/p/test.png/full/max/0/default.png")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=five-"))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rendering_scales_and_converts() {
    let app = spawn(false);
    add_png(&app, "p", "test.png", 400, 300);

    let res = app.server.get("/p/test.png/full/200,/0/default.jpg").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    let link = res.headers().get(header::LINK).unwrap().to_str().unwrap();
    assert!(link.contains("/p/test.png/full/200,150/0/default.jpg"), "{link}");

    let img = image::load_from_memory(res.as_bytes().as_ref()).unwrap();
    assert_eq!((img.width(), img.height()), (200, 150));
}

#[tokio::test]
async fn region_and_rotation_compose() {
    let app = spawn(false);
    add_png(&app, "p", "test.png", 400, 300);

    // 200x100 crop, rotated 90 degrees.
    let res = app
        .server
        .get("/p/test.png/100,50,200,100/max/90/default.png")
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let img = image::load_from_memory(res.as_bytes().as_ref()).unwrap();
    assert_eq!((img.width(), img.height()), (100, 200));
}

#[tokio::test]
async fn gray_quality_renders_grayscale() {
    let app = spawn(false);
    add_png(&app, "p", "test.png", 64, 64);

    let res = app.server.get("/p/test.png/full/max/0/gray.png").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let img = image::load_from_memory(res.as_bytes().as_ref()).unwrap();
    assert_eq!(img.color(), image::ColorType::L8);
}

#[tokio::test]
async fn jp2_output_is_not_implemented_by_the_raster_backend() {
    let app = spawn(false);
    add_png(&app, "p", "test.png", 64, 64);

    let res = app.server.get("/p/test.png/full/max/0/default.jp2").await;
    assert_eq!(res.status_code(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn rendered_artifacts_land_in_the_cache() {
    let app = spawn(true);
    add_png(&app, "p", "test.png", 400, 300);

    let first = app.server.get("/p/test.png/full/200,/0/default.jpg").await;
    assert_eq!(first.status_code(), StatusCode::OK);

    let cache = app.state.cache.as_ref().unwrap();
    let stats = cache.stats();
    assert_eq!(stats.nfiles, 1);
    assert!(stats.cachesize > 0);

    // The second request is served from the cache and is byte-identical.
    let second = app.server.get("/p/test.png/full/200,/0/default.jpg").await;
    assert_eq!(second.status_code(), StatusCode::OK);
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(cache.stats().nfiles, 1);
}

#[tokio::test]
async fn equivalent_requests_share_one_cache_entry() {
    let app = spawn(true);
    add_png(&app, "p", "test.png", 400, 300);

    // "200," and "pct:50" canonicalize to the same 200x150 rendering.
    let first = app.server.get("/p/test.png/full/200,/0/default.jpg").await;
    assert_eq!(first.status_code(), StatusCode::OK);
    let second = app
        .server
        .get("/p/test.png/full/pct:50/0/default.jpg")
        .await;
    assert_eq!(second.status_code(), StatusCode::OK);

    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(app.state.cache.as_ref().unwrap().stats().nfiles, 1);
}

#[tokio::test]
async fn tiff_output_is_buffered_and_cached() {
    let app = spawn(true);
    add_png(&app, "p", "test.png", 64, 48);

    let res = app.server.get("/p/test.png/full/max/0/default.tif").await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/tiff"
    );
    assert!(res.headers().get(header::CONTENT_LENGTH).is_some());

    let img = image::load_from_memory(res.as_bytes().as_ref()).unwrap();
    assert_eq!((img.width(), img.height()), (64, 48));
    assert_eq!(app.state.cache.as_ref().unwrap().stats().nfiles, 1);
}
