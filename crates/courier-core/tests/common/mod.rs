#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::request::{Transport, TransportError, TransportRequest, TransportResponse};
use courier_core::{
    BlobRegistry, CacheRegistry, Headers, InjectError, MediaSource, MetadataFailure,
    PlaybackAttributes, Preload, ProgressView, RequestEngine, ResourceHost, ResourceTag,
    RetryPolicy, VideoElement, VideoMetadata, VideoWrapper,
};
use futures::{stream, StreamExt};
use tokio::sync::watch;

pub const VIDEO_URL: &str = "https://x/video.mp4";

#[derive(Debug, Clone)]
pub struct Route {
    status: u16,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
    content_length: Option<u64>,
    delay: Option<Duration>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status: 200,
            headers: Vec::new(),
            content_length: Some(body.len() as u64),
            chunks: vec![body],
            delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
            content_length: Some(0),
            delay: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Serve the body as the given chunks, announcing their total length.
    pub fn with_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.content_length = Some(chunks.iter().map(|c| c.len() as u64).sum());
        self.chunks = chunks;
        self
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = None;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn body(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

#[derive(Debug, Clone)]
pub struct Logged {
    pub url: String,
    pub range: Option<String>,
}

/// Serves canned routes by URL. Requests carrying a `Range` header are served
/// from the probe table, everything else from the full table. Unknown URLs get
/// a 404.
#[derive(Default)]
pub struct FakeTransport {
    full: Mutex<HashMap<String, Route>>,
    probes: Mutex<HashMap<String, Route>>,
    log: Mutex<Vec<Logged>>,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, route: Route) -> &Self {
        self.full.lock().unwrap().insert(url.to_string(), route);
        self
    }

    pub fn probe(&self, url: &str, route: Route) -> &Self {
        self.probes.lock().unwrap().insert(url.to_string(), route);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn full_fetches(&self, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.url == url && l.range.is_none())
            .count()
    }

    pub fn probes_of(&self, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.url == url && l.range.is_some())
            .count()
    }

    pub fn urls(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|l| l.url.clone()).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = request.url.as_str().to_string();
        let range = request.headers.get("range").map(str::to_string);
        self.log.lock().unwrap().push(Logged {
            url: url.clone(),
            range: range.clone(),
        });

        let table = if range.is_some() { &self.probes } else { &self.full };
        let route = table
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Route::status(404));

        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }

        let headers: Headers = route.headers.iter().map(|(k, v)| (k, v.clone())).collect();
        let chunks: Vec<Result<Bytes, TransportError>> =
            route.chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        Ok(TransportResponse {
            status: route.status,
            headers,
            content_length: route.content_length,
            body: stream::iter(chunks).boxed(),
        })
    }
}

pub fn engine(transport: &Arc<FakeTransport>) -> RequestEngine {
    RequestEngine::new(
        Arc::clone(transport) as Arc<dyn Transport>,
        RetryPolicy::new(3, Duration::from_millis(1)).without_jitter(),
    )
}

pub fn registry(transport: &Arc<FakeTransport>) -> CacheRegistry {
    CacheRegistry::in_memory(engine(transport))
}

#[derive(Default)]
pub struct RecordingView {
    pub progress: Mutex<Vec<String>>,
    pub status: Mutex<Vec<String>>,
}

impl RecordingView {
    pub fn progress(&self) -> Vec<String> {
        self.progress.lock().unwrap().clone()
    }

    pub fn status(&self) -> Vec<String> {
        self.status.lock().unwrap().clone()
    }
}

impl ProgressView for RecordingView {
    fn set_progress(&self, text: &str) {
        self.progress.lock().unwrap().push(text.to_string());
    }

    fn set_status(&self, text: &str) {
        self.status.lock().unwrap().push(text.to_string());
    }
}

pub struct FakeVideo {
    pub attrs: Mutex<Option<PlaybackAttributes>>,
    pub preload: Mutex<Option<Preload>>,
    pub sources: Mutex<Vec<MediaSource>>,
    pub pinned: Mutex<Option<f64>>,
    pub pinned_history: Mutex<Vec<f64>>,
    pub plays: AtomicUsize,
    pub pauses: AtomicUsize,
    metadata: Result<VideoMetadata, MetadataFailure>,
    width: f64,
    visible: watch::Sender<bool>,
}

impl FakeVideo {
    pub fn new(metadata: Result<VideoMetadata, MetadataFailure>) -> Self {
        let (visible, _) = watch::channel(false);
        Self {
            attrs: Mutex::new(None),
            preload: Mutex::new(None),
            sources: Mutex::new(Vec::new()),
            pinned: Mutex::new(None),
            pinned_history: Mutex::new(Vec::new()),
            plays: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            metadata,
            width: 640.0,
            visible,
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.send_replace(visible);
    }

    pub fn current_source(&self) -> Option<MediaSource> {
        self.sources.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VideoElement for FakeVideo {
    fn configure(&self, attrs: &PlaybackAttributes) {
        *self.attrs.lock().unwrap() = Some(attrs.clone());
        *self.preload.lock().unwrap() = Some(attrs.preload);
    }

    fn set_preload(&self, preload: Preload) {
        *self.preload.lock().unwrap() = Some(preload);
    }

    fn set_source(&self, source: MediaSource) {
        self.sources.lock().unwrap().push(source);
    }

    fn source(&self) -> Option<MediaSource> {
        self.current_source()
    }

    async fn loaded_metadata(&self) -> Result<VideoMetadata, MetadataFailure> {
        self.metadata.clone()
    }

    fn rendered_width(&self) -> f64 {
        self.width
    }

    fn pin_height(&self, px: f64) {
        *self.pinned.lock().unwrap() = Some(px);
        self.pinned_history.lock().unwrap().push(px);
    }

    fn clear_height(&self) {
        *self.pinned.lock().unwrap() = None;
    }

    fn play(&self) {
        self.plays.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn viewport(&self) -> watch::Receiver<bool> {
        self.visible.subscribe()
    }
}

pub struct FakeWrapper {
    id: String,
    src: Option<String>,
    class: Option<String>,
    metadata: Result<VideoMetadata, MetadataFailure>,
    pub videos: Mutex<Vec<Arc<FakeVideo>>>,
    pub attached: AtomicUsize,
    pub removed: AtomicUsize,
    pub placeholder_removed: AtomicUsize,
    pub view: Arc<RecordingView>,
}

impl FakeWrapper {
    pub fn new(src: Option<&str>) -> Arc<Self> {
        Self::with_metadata(src, Ok(VideoMetadata { width: 1920, height: 1080 }))
    }

    pub fn with_metadata(
        src: Option<&str>,
        metadata: Result<VideoMetadata, MetadataFailure>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: "video-love-story".to_string(),
            src: src.map(str::to_string),
            class: Some("w-100 rounded".to_string()),
            metadata,
            videos: Mutex::new(Vec::new()),
            attached: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            placeholder_removed: AtomicUsize::new(0),
            view: Arc::new(RecordingView::default()),
        })
    }

    pub fn video(&self) -> Arc<FakeVideo> {
        Arc::clone(self.videos.lock().unwrap().last().expect("no video created"))
    }

    pub fn videos_created(&self) -> usize {
        self.videos.lock().unwrap().len()
    }
}

impl VideoWrapper for FakeWrapper {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_attr(&self) -> Option<String> {
        self.src.clone()
    }

    fn video_class(&self) -> Option<String> {
        self.class.clone()
    }

    fn create_video(&self) -> Arc<dyn VideoElement> {
        let video = Arc::new(FakeVideo::new(self.metadata.clone()));
        self.videos.lock().unwrap().push(Arc::clone(&video));
        video
    }

    fn attach(&self, _video: &Arc<dyn VideoElement>) {
        self.attached.fetch_add(1, Ordering::SeqCst);
    }

    fn remove(&self) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_placeholder(&self) {
        self.placeholder_removed.fetch_add(1, Ordering::SeqCst);
    }

    fn progress_view(&self) -> Arc<dyn ProgressView> {
        Arc::clone(&self.view) as Arc<dyn ProgressView>
    }
}

/// Document stand-in. Injected hrefs are blob URLs, resolved through the shared
/// registry so tests can inspect what was injected. A script defines a global
/// when its body mentions it; a body containing `FAIL_LOAD` fires the error event.
pub struct FakeHost {
    blobs: BlobRegistry,
    pub injected: Mutex<Vec<(ResourceTag, String)>>,
    pub initialized: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new(blobs: BlobRegistry) -> Arc<Self> {
        Arc::new(Self {
            blobs,
            injected: Mutex::new(Vec::new()),
            initialized: Mutex::new(Vec::new()),
        })
    }

    pub fn injected(&self) -> Vec<(ResourceTag, String)> {
        self.injected.lock().unwrap().clone()
    }

    pub fn stylesheets(&self) -> Vec<String> {
        self.injected()
            .into_iter()
            .filter(|(tag, _)| *tag == ResourceTag::Stylesheet)
            .map(|(_, body)| body)
            .collect()
    }
}

#[async_trait]
impl ResourceHost for FakeHost {
    async fn inject(&self, tag: ResourceTag, href: &str) -> Result<(), InjectError> {
        let blob = self
            .blobs
            .resolve(href)
            .ok_or_else(|| InjectError(format!("unknown href {href}")))?;
        let body = String::from_utf8_lossy(&blob.bytes).into_owned();
        if body.contains("FAIL_LOAD") {
            return Err(InjectError("error event".to_string()));
        }
        self.injected.lock().unwrap().push((tag, body));
        Ok(())
    }

    fn has_global(&self, symbol: &str) -> bool {
        self.injected
            .lock()
            .unwrap()
            .iter()
            .any(|(tag, body)| *tag == ResourceTag::Script && body.contains(symbol))
    }

    fn init_global(&self, symbol: &str) {
        self.initialized.lock().unwrap().push(symbol.to_string());
    }
}

/// Let spawned tasks run on the current-thread runtime.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
