use std::io::{SeekFrom, Write};
use std::path::{Path as FsPath, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use imago_core::backend::sniff::sniff_file;
use imago_core::{
    AccessVerdict, CanonicalContext, DecodedImage, EncodeParams, Format, Identifier, IiifCache,
    IiifError, PinnedFile, Quality, QualityFormat, ReadOptions, Region, Rotation, SizeLimits,
    SizeSpec, SubImageInfo, canonical_url,
};

use crate::handlers::{auth_service_object, cookie_of, host_of, image_dimensions, join_error};
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::infra::range::parse_range;

const RENDER_CACHE_CONTROL: &str = "must-revalidate, post-check=0, pre-check=0";

/// GET /{prefix}/{identifier}/{region}/{size}/{rotation}/{quality}.{format}
///
/// The image endpoint: parse, pre-flight, canonicalize, then the cheapest
/// applicable path - direct send of the original, cached artifact, or a
/// fresh render teed into the cache while it streams to the client.
pub async fn iiif_image_handler(
    State(state): State<AppState>,
    Path((prefix, identifier, region, size, rotation, quality_format)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let sid = Identifier::parse(&identifier);
    let region = Region::parse(&region)?;
    let limits = SizeLimits {
        max_w: state.config.iiif_max_image_width,
        max_h: state.config.iiif_max_image_height,
        ..SizeLimits::default()
    };
    let size = SizeSpec::parse(&size, limits)?;
    let rotation = Rotation::parse(&rotation)?;
    let quality_format = QualityFormat::parse_segment(&quality_format)?;

    let cookie = cookie_of(&headers);

    // Authorization pre-flight runs before any expensive work.
    let mut infile = state.default_infile(&prefix, sid.name());
    let mut watermark: Option<PathBuf> = None;
    let mut restriction: Option<SizeSpec> = None;

    if let Some(preflight) = &state.iiif_preflight {
        let outcome = preflight
            .preflight(&prefix, sid.name(), cookie.as_deref())
            .map_err(|e| AppError::internal(format!("pre-flight failed: {e}")))?;

        if let Some(path) = &outcome.infile {
            infile = path.clone();
        }

        match outcome.verdict {
            AccessVerdict::Allow => {}
            AccessVerdict::Restrict => {
                watermark = outcome.watermark.clone();
                restriction = outcome
                    .size
                    .as_deref()
                    .map(|raw| SizeSpec::parse(raw, limits))
                    .transpose()?;
                if watermark.is_none() && restriction.is_none() {
                    return Err(AppError::unauthorized("unauthorized access"));
                }
            }
            verdict if verdict.wants_auth_service() => {
                let service = auth_service_object(&outcome)?;
                return Ok((
                    StatusCode::UNAUTHORIZED,
                    [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
                    Json(serde_json::json!({ "service": service })),
                )
                    .into_response());
            }
            _ => return Err(AppError::unauthorized("unauthorized access")),
        }
    }

    let meta = tokio::fs::metadata(&infile).await.map_err(|_| {
        info!("file '{}' not found", infile.display());
        AppError::not_found(format!("file '{}' not found", infile.display()))
    })?;
    if !meta.is_file() {
        return Err(AppError::not_found(format!(
            "file '{}' not found",
            infile.display()
        )));
    }

    let (img_w, img_h, resolutions) = image_dimensions(&state, &infile, sid.page()).await?;

    // Size resolves against the full image; the decoder scales extracted
    // regions proportionally.
    let region_res = region.crop(img_w, img_h)?;
    let mut size_spec = size;
    let mut resolved = size_spec.resolve(img_w, img_h, 0)?;

    if let Some(restriction_spec) = restriction {
        let restricted = restriction_spec.resolve(img_w, img_h, 0)?;
        if resolved.exceeds(&restricted) {
            debug!(
                "clamping {}x{} to restriction {}x{}",
                resolved.w, resolved.h, restricted.w, restricted.h
            );
            size_spec = restriction_spec;
            resolved = restricted;
        }
    }

    let host = host_of(&headers, &state);
    let ctx = CanonicalContext {
        secure: state.config.tls_enabled(),
        host: &host,
        route: &state.config.route,
        prefix: &prefix,
        identifier: sid.name(),
    };
    let (link, canonical) = canonical_url(&ctx, &region_res, &resolved, &rotation, &quality_format)?;

    // Direct-send fast path: the original already is the answer.
    let source_format = sniff_file(&infile);
    if region_res.is_full()
        && size_spec.is_full()
        && resolved.w == img_w
        && resolved.h == img_h
        && rotation.is_identity()
        && watermark.is_none()
        && quality_format.quality == Quality::Default
        && quality_format.format == source_format
    {
        debug!("direct send of {}", infile.display());
        return send_file_direct(&infile, meta.len(), quality_format.format, &link, &headers).await;
    }

    // Cache lookup; a hit is pinned until the response body is done.
    if let Some(cache) = &state.cache {
        let pinned = {
            let cache = Arc::clone(cache);
            let origpath = infile.clone();
            let key = canonical.clone();
            tokio::task::spawn_blocking(move || cache.check_pinned(&origpath, &key))
                .await
                .map_err(join_error)??
        };
        if let Some(pin) = pinned {
            debug!("serving cached rendering for {}", canonical);
            return send_pinned(pin, quality_format.format, &link).await;
        }
    }

    if !state.backend.can_encode(quality_format.format) {
        return Err(AppError::not_implemented(format!(
            "cannot encode {}",
            quality_format.format.mime_type()
        )));
    }

    // Decode and transform before committing to a status code; encoding
    // streams afterwards.
    let image = {
        let backend = Arc::clone(&state.backend);
        let origpath = infile.clone();
        let quality = quality_format.quality;
        let watermark = watermark.clone();
        let opts = ReadOptions {
            page: sid.page(),
            jpeg_fastpath: quality_format.format == Format::Jpg,
            scaling_quality: state.config.scaling_quality,
        };

        tokio::task::spawn_blocking(move || -> Result<Box<dyn DecodedImage>, IiifError> {
            let mut img = backend.read(&origpath, &region_res, &resolved, &opts)?;
            if !rotation.is_identity() {
                img.rotate(rotation.angle, rotation.mirror)?;
            }
            match quality {
                Quality::Default => {}
                Quality::Color => img.to_srgb8()?,
                Quality::Gray => img.to_gray8()?,
                Quality::Bitonal => img.to_bitonal()?,
            }
            if let Some(wm) = &watermark {
                img.apply_watermark(wm)?;
                info!("watermark applied from {}", wm.display());
            }
            Ok(img)
        })
        .await
        .map_err(join_error)??
    };

    encode_and_send(
        state,
        image,
        quality_format.format,
        infile,
        canonical,
        link,
        img_w,
        img_h,
        resolutions,
    )
    .await
}

async fn send_file_direct(
    path: &FsPath,
    fsize: u64,
    format: Format,
    link: &str,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AppError::internal(format!("couldn't open {}: {e}", path.display())))?;

    if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        let range = parse_range(range_header, fsize)?;
        file.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|e| AppError::internal(format!("couldn't seek: {e}")))?;

        let stream = ReaderStream::new(file.take(range.len()));
        return Ok(Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, format.mime_type())
            .header(header::CONTENT_LENGTH, range.len().to_string())
            .header(header::CONTENT_RANGE, range.content_range(fsize))
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CACHE_CONTROL, RENDER_CACHE_CONTROL)
            .header(header::LINK, link)
            .body(Body::from_stream(stream))
            .expect("failed to build PARTIAL_CONTENT response"));
    }

    let stream = ReaderStream::new(file);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CONTENT_LENGTH, fsize.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, RENDER_CACHE_CONTROL)
        .header(header::LINK, link)
        .body(Body::from_stream(stream))
        .expect("failed to build OK response"))
}

/// Stream a cached artifact; the pin travels inside the body stream so the
/// file cannot be evicted mid-transfer, and is released when the body is
/// dropped - also on client disconnect.
async fn send_pinned(pin: PinnedFile, format: Format, link: &str) -> AppResult<Response> {
    let file = tokio::fs::File::open(pin.path())
        .await
        .map_err(|e| AppError::internal(format!("couldn't open cache file: {e}")))?;
    let len = file.metadata().await.ok().map(|m| m.len());

    let stream = PinnedStream {
        inner: ReaderStream::new(file),
        _pin: pin,
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CACHE_CONTROL, RENDER_CACHE_CONTROL)
        .header(header::LINK, link);
    if let Some(len) = len {
        builder = builder.header(header::CONTENT_LENGTH, len.to_string());
    }

    Ok(builder
        .body(Body::from_stream(stream))
        .expect("failed to build OK response"))
}

struct PinnedStream {
    inner: ReaderStream<tokio::fs::File>,
    _pin: PinnedFile,
}

impl Stream for PinnedStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

#[allow(clippy::too_many_arguments)]
async fn encode_and_send(
    state: AppState,
    image: Box<dyn DecodedImage>,
    format: Format,
    infile: PathBuf,
    canonical: String,
    link: String,
    img_w: u32,
    img_h: u32,
    resolutions: Vec<SubImageInfo>,
) -> AppResult<Response> {
    let params = EncodeParams {
        jpeg_quality: state.config.jpeg_quality,
    };
    let cache = state.cache.clone();

    if state.backend.needs_seekable_output(format) {
        return encode_buffered(
            cache,
            image,
            format,
            params,
            infile,
            canonical,
            link,
            img_w,
            img_h,
            resolutions,
        )
        .await;
    }

    // Chunked encode teed into the cache temp file and the response body.
    let temp = match &cache {
        Some(cache) => Some(cache.new_cache_file()?),
        None => None,
    };

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(8);

    tokio::task::spawn_blocking(move || {
        let mut cache_file = None;
        if let Some(path) = &temp {
            match std::fs::File::create(path) {
                Ok(file) => cache_file = Some(file),
                Err(e) => warn!("couldn't open cache temp file {}: {}", path.display(), e),
            }
        }
        let wrote_cache = cache_file.is_some();

        let mut tee = TeeWriter {
            file: cache_file,
            tx,
        };
        let result = image.write(format, &mut tee, &params);
        let tx = tee.into_sender();

        match result {
            Ok(()) => {
                if let (Some(cache), Some(path), true) = (&cache, &temp, wrote_cache) {
                    if let Err(e) =
                        cache.add(&infile, &canonical, path, img_w, img_h, &resolutions)
                    {
                        warn!("couldn't cache rendering for {}: {}", canonical, e);
                        let _ = std::fs::remove_file(path);
                    }
                } else if let Some(path) = &temp {
                    let _ = std::fs::remove_file(path);
                }
            }
            Err(IiifError::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                // Peer hangup is not a server error; clean up and move on.
                warn!("client unexpectedly closed connection");
                if let Some(path) = &temp {
                    let _ = std::fs::remove_file(path);
                }
            }
            Err(e) => {
                error!("encoding failed for {}: {}", canonical, e);
                let _ = tx.blocking_send(Err(std::io::Error::other(e.to_string())));
                if let Some(path) = &temp {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CACHE_CONTROL, RENDER_CACHE_CONTROL)
        .header(header::LINK, link)
        .body(body)
        .expect("failed to build OK response"))
}

/// Seekable encoders can't stream; materialize the artifact, insert it into
/// the cache, and answer with a known length.
#[allow(clippy::too_many_arguments)]
async fn encode_buffered(
    cache: Option<Arc<IiifCache>>,
    image: Box<dyn DecodedImage>,
    format: Format,
    params: EncodeParams,
    infile: PathBuf,
    canonical: String,
    link: String,
    img_w: u32,
    img_h: u32,
    resolutions: Vec<SubImageInfo>,
) -> AppResult<Response> {
    let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, IiifError> {
        let mut buf = Vec::new();
        image.write(format, &mut buf, &params)?;
        if let Some(cache) = &cache
            && let Err(e) =
                insert_rendering(cache, &infile, &canonical, &buf, img_w, img_h, &resolutions)
        {
            warn!("couldn't cache rendering for {}: {}", canonical, e);
        }
        Ok(buf)
    })
    .await
    .map_err(join_error)??;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CONTENT_LENGTH, bytes.len().to_string())
        .header(header::CACHE_CONTROL, RENDER_CACHE_CONTROL)
        .header(header::LINK, link)
        .body(Body::from(bytes))
        .expect("failed to build OK response"))
}

fn insert_rendering(
    cache: &Arc<IiifCache>,
    infile: &FsPath,
    canonical: &str,
    bytes: &[u8],
    img_w: u32,
    img_h: u32,
    resolutions: &[SubImageInfo],
) -> Result<(), IiifError> {
    let path = cache.new_cache_file()?;
    if let Err(e) = std::fs::write(&path, bytes) {
        let _ = std::fs::remove_file(&path);
        return Err(IiifError::Io(e));
    }
    if let Err(e) = cache.add(infile, canonical, &path, img_w, img_h, resolutions) {
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }
    Ok(())
}

/// Forwards encoder output to the HTTP body while appending it to the cache
/// temp file. A closed body channel (client hangup) surfaces as
/// `BrokenPipe` so the encoder aborts instead of rendering into the void.
struct TeeWriter {
    file: Option<std::fs::File>,
    tx: tokio::sync::mpsc::Sender<Result<Bytes, std::io::Error>>,
}

impl TeeWriter {
    fn into_sender(mut self) -> tokio::sync::mpsc::Sender<Result<Bytes, std::io::Error>> {
        if let Some(file) = self.file.take() {
            let _ = file.sync_all();
        }
        self.tx
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = &mut self.file {
            file.write_all(buf)?;
        }
        if self
            .tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .is_err()
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "client closed connection",
            ));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
