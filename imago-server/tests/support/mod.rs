//! Shared fixtures for the endpoint tests: a temp image root + cache dir,
//! generated originals, and a TestServer wired through `create_app`.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use axum_test::TestServer;
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use imago_server::{AppState, Config, create_app};

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    // Keeps imgroot and cachedir alive for the duration of the test.
    #[allow(dead_code)]
    pub dir: TempDir,
}

pub fn base_config(dir: &TempDir, with_cache: bool) -> Config {
    Config {
        imgroot: dir.path().join("imgroot"),
        prefix_as_path: true,
        cachedir: with_cache.then(|| dir.path().join("cache")),
        ..Config::default()
    }
}

pub fn spawn_with(dir: TempDir, config: Config, customize: impl FnOnce(AppState) -> AppState) -> TestApp {
    fs::create_dir_all(&config.imgroot).unwrap();
    if let Some(cachedir) = &config.cachedir {
        fs::create_dir_all(cachedir).unwrap();
    }

    let state = customize(AppState::from_config(config).unwrap());
    let server = TestServer::new(create_app(state.clone())).unwrap();

    TestApp { server, state, dir }
}

pub fn spawn(with_cache: bool) -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = base_config(&dir, with_cache);
    spawn_with(dir, config, |state| state)
}

/// Write a gradient PNG original under `imgroot/{prefix}/{name}`.
pub fn add_png(app: &TestApp, prefix: &str, name: &str, w: u32, h: u32) -> PathBuf {
    let dir = app.state.config.imgroot.join(prefix);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);

    let mut img = RgbImage::new(w, h);
    for (x, y, p) in img.enumerate_pixels_mut() {
        *p = Rgb([(x % 256) as u8, (y % 256) as u8, 128]);
    }
    DynamicImage::ImageRgb8(img).save(&path).unwrap();
    path
}

/// Write an arbitrary blob under `imgroot/{prefix}/{name}`.
pub fn add_blob(app: &TestApp, prefix: &str, name: &str, contents: &[u8]) -> PathBuf {
    let dir = app.state.config.imgroot.join(prefix);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

pub fn read_file(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}
