#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mp4::test_support::{make_fragment, make_init};
use parking_lot::Mutex;
use vodmux_engine::{EngineConfig, Manifest, Orchestrator};

pub const VIDEO_TIMESCALE: u32 = 90_000;
pub const AUDIO_TIMESCALE: u32 = 48_000;

/// How the origin answers one path.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Always answer with this status.
    Status(StatusCode),
    /// Answer with this status for the first `n` requests, then serve.
    FailFirst(u32, StatusCode),
    /// Sleep before answering.
    Delay(Duration),
}

/// In-process origin server for manifest documents and segments.
pub struct Origin {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    behaviors: Mutex<HashMap<String, Behavior>>,
    hits: Mutex<HashMap<String, u32>>,
}

impl Origin {
    pub fn insert(&self, path: &str, body: Vec<u8>) {
        self.bodies.lock().insert(path.to_string(), body);
    }

    pub fn behave(&self, path: &str, behavior: Behavior) {
        self.behaviors.lock().insert(path.to_string(), behavior);
    }

    pub fn hits(&self, path: &str) -> u32 {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }
}

async fn serve_path(
    State(origin): State<Arc<Origin>>,
    UrlPath(path): UrlPath<String>,
) -> Response {
    let hit = {
        let mut hits = origin.hits.lock();
        let count = hits.entry(path.clone()).or_insert(0);
        *count += 1;
        *count
    };

    let behavior = origin.behaviors.lock().get(&path).cloned();
    match behavior {
        Some(Behavior::Status(status)) => return status.into_response(),
        Some(Behavior::FailFirst(n, status)) if hit <= n => return status.into_response(),
        Some(Behavior::Delay(delay)) => tokio::time::sleep(delay).await,
        _ => {}
    }

    match origin.bodies.lock().get(&path) {
        Some(body) => body.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn spawn_origin() -> (Arc<Origin>, SocketAddr) {
    let origin = Arc::new(Origin {
        bodies: Mutex::new(HashMap::new()),
        behaviors: Mutex::new(HashMap::new()),
        hits: Mutex::new(HashMap::new()),
    });
    let router = Router::new()
        .route("/{*path}", get(serve_path))
        .with_state(Arc::clone(&origin));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (origin, addr)
}

/// One-second video fragments (30 samples of 3000 ticks at 90 kHz).
pub fn video_segment(index: usize) -> Vec<u8> {
    make_fragment(
        index as u32 + 1,
        1,
        u64::from(VIDEO_TIMESCALE) * index as u64,
        &[3000; 30],
        &[b'v'; 240],
    )
}

/// Audio fragments of `ticks` each, made of 1000-tick samples at 48 kHz.
pub fn audio_segment(index: usize, ticks: u32) -> Vec<u8> {
    let samples = (ticks / 1000) as usize;
    make_fragment(
        index as u32 + 1,
        1,
        u64::from(ticks) * index as u64,
        &vec![1000; samples],
        &vec![b'a'; 8 * samples],
    )
}

/// Serve a source with one 720p video rendition of `video_segments` one
/// second fragments and one audio rendition covering the same time in
/// `audio_segments` fragments. Returns the resolved manifest.
pub fn publish_source(
    origin: &Origin,
    addr: SocketAddr,
    video_segments: usize,
    audio_segments: usize,
) -> Manifest {
    let audio_ticks = (AUDIO_TIMESCALE as usize * video_segments / audio_segments.max(1)) as u32;

    let video: Vec<_> = (0..video_segments)
        .map(|i| {
            let name = format!("s-{}.m4s", i + 1);
            let body = video_segment(i);
            let size = body.len();
            origin.insert(&format!("v/1/video/720/{name}"), body);
            serde_json::json!({ "url": name, "size": size, "start": i as f64, "end": i as f64 + 1.0 })
        })
        .collect();
    let audio: Vec<_> = (0..audio_segments)
        .map(|i| {
            let name = format!("a-{}.m4s", i + 1);
            let body = audio_segment(i, audio_ticks);
            let length = body.len();
            origin.insert(&format!("v/1/audio/hi/{name}"), body);
            serde_json::json!({ "url": name, "length": length })
        })
        .collect();

    let document = serde_json::json!({
        "clip_id": "clip-1",
        "base_url": "../",
        "video": [{
            "id": "v720",
            "base_url": "video/720/",
            "bitrate": 2_000_000,
            "width": 1280,
            "height": 720,
            "init_segment": STANDARD.encode(make_init(1, b"vide", VIDEO_TIMESCALE, 3000)),
            "segments": video,
        }],
        "audio": [
            {
                "id": "lo",
                "base_url": "audio/lo/",
                "bitrate": 64_000,
                "init_segment": STANDARD.encode(make_init(1, b"soun", AUDIO_TIMESCALE, 1000)),
                "segments": [],
            },
            {
                "id": "hi",
                "base_url": "audio/hi/",
                "bitrate": 128_000,
                "init_segment": STANDARD.encode(make_init(1, b"soun", AUDIO_TIMESCALE, 1000)),
                "segments": audio,
            }
        ]
    });
    let raw = serde_json::to_vec(&document).unwrap();
    origin.insert("v/1/sep/master.json", raw.clone());

    Manifest::resolve(&raw, &format!("http://{addr}/v/1/sep/master.json")).unwrap()
}

/// Engine config tuned for fast tests: short timeouts and tiny backoff.
pub fn test_config(work_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.fetcher.segment_timeout_ms = 2_000;
    config.fetcher.retry_base_delay_ms = 5;
    config.fetcher.retry_max_delay_ms = 20;
    config.fetcher.retry_jitter = false;
    config.output.work_dir = work_dir.to_path_buf();
    config
}

pub fn orchestrator(config: EngineConfig) -> Orchestrator {
    Orchestrator::new(config).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("vodmux_engine=debug")
        .try_init();
}
