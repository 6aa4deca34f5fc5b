//! imago - IIIF Image API v3 server.
//!
//! Resolves IIIF URLs into an image transformation pipeline (crop, scale,
//! rotate/mirror, quality, watermark, encode) backed by a persistent
//! on-disk render cache, and serves info.json descriptors and raw blobs
//! with byte-range support.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imago_server::{AppState, Config, create_app};

#[derive(Parser, Debug)]
#[command(name = "imago-server", version, about = "IIIF Image API v3 server")]
struct Args {
    /// TOML configuration file (overrides environment variables)
    #[arg(long, env = "IMAGO_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Bind address override
    #[arg(long)]
    host: Option<String>,

    /// Port override
    #[arg(long)]
    port: Option<u16>,

    /// TLS certificate (PEM); enables HTTPS together with --key
    #[arg(long, env = "TLS_CERT_PATH")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, env = "TLS_KEY_PATH")]
    key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(host) = args.host {
        config.server_host = host;
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(cert) = args.cert {
        config.tls_cert_path = Some(cert);
    }
    if let Some(key) = args.key {
        config.tls_key_path = Some(key);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imago_server=debug,imago_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Server configuration loaded");
    info!("Image root: {}", config.imgroot.display());
    if !config.imgroot.is_dir() {
        warn!(
            "image root {} does not exist - all lookups will 404",
            config.imgroot.display()
        );
    }
    match &config.cachedir {
        Some(cachedir) => info!("Render cache: {}", cachedir.display()),
        None => warn!("No CACHE_DIR configured - every request renders from scratch"),
    }

    config.ensure_directories()?;
    config.normalize_paths()?;

    let state = AppState::from_config(config)?;
    let config = state.config.clone();
    let app = create_app(state.clone());

    let ip: IpAddr = config
        .server_host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::new(ip, config.server_port);

    if config.tls_enabled() {
        let cert = config.tls_cert_path.clone().expect("checked by tls_enabled");
        let key = config.tls_key_path.clone().expect("checked by tls_enabled");
        let rustls_config = RustlsConfig::from_pem_file(cert, key).await?;

        // axum-server has no with_graceful_shutdown; a Handle relays the
        // signal so the index flush below still runs.
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        info!("Starting imago (HTTPS) on {}", addr);
        axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Starting imago (HTTP) on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    if let Some(cache) = &state.cache {
        info!("Flushing cache index");
        if let Err(e) = cache.flush() {
            warn!("couldn't flush cache index: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
