//! Terminal stand-ins for the document the core drives: video elements that
//! report configured dimensions, progress bars in place of overlays, and a
//! resource host that "injects" by resolving blob URLs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::{debug, info};

use courier_core::{
    BlobRegistry, InjectError, MediaSource, MetadataFailure, PlaybackAttributes, Preload,
    ProgressView, ResourceHost, ResourceTag, VideoElement, VideoMetadata, VideoWrapper,
};

use crate::config::VideoDef;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A video element with no decoder. Metadata resolves to the configured size
/// once a source is set, and it always counts as on screen.
pub struct HeadlessVideo {
    wrapper_id: String,
    metadata: VideoMetadata,
    source: Mutex<Option<MediaSource>>,
    visible: watch::Sender<bool>,
}

impl HeadlessVideo {
    fn new(wrapper_id: &str, metadata: VideoMetadata) -> Self {
        let (visible, _) = watch::channel(true);
        Self {
            wrapper_id: wrapper_id.to_string(),
            metadata,
            source: Mutex::new(None),
            visible,
        }
    }
}

#[async_trait]
impl VideoElement for HeadlessVideo {
    fn configure(&self, attrs: &PlaybackAttributes) {
        debug!(wrapper = %self.wrapper_id, preload = %attrs.preload, muted = attrs.muted, "Video configured");
    }

    fn set_preload(&self, preload: Preload) {
        debug!(wrapper = %self.wrapper_id, %preload, "Preload changed");
    }

    fn set_source(&self, source: MediaSource) {
        debug!(wrapper = %self.wrapper_id, src = source.url(), object = source.is_object(), "Source set");
        *lock(&self.source) = Some(source);
    }

    fn source(&self) -> Option<MediaSource> {
        lock(&self.source).clone()
    }

    async fn loaded_metadata(&self) -> Result<VideoMetadata, MetadataFailure> {
        if lock(&self.source).is_none() {
            return Err(MetadataFailure::Detached);
        }
        Ok(self.metadata)
    }

    fn rendered_width(&self) -> f64 {
        self.metadata.width as f64
    }

    fn pin_height(&self, px: f64) {
        debug!(wrapper = %self.wrapper_id, px, "Height pinned");
    }

    fn clear_height(&self) {}

    fn play(&self) {
        info!(wrapper = %self.wrapper_id, "Playing");
    }

    fn pause(&self) {
        info!(wrapper = %self.wrapper_id, "Paused");
    }

    fn viewport(&self) -> watch::Receiver<bool> {
        self.visible.subscribe()
    }
}

/// Progress overlay rendered as a terminal bar.
pub struct BarView {
    bar: ProgressBar,
}

impl ProgressView for BarView {
    fn set_progress(&self, text: &str) {
        match text.strip_suffix('%').and_then(|n| n.parse::<u64>().ok()) {
            Some(pct) => self.bar.set_position(pct),
            None => self.bar.set_message(text.to_string()),
        }
        if self.bar.position() >= 100 {
            self.bar.finish_with_message(style("done").green().to_string());
        }
    }

    fn set_status(&self, text: &str) {
        self.bar.abandon_with_message(style(text).red().to_string());
    }
}

pub struct HeadlessWrapper {
    def: VideoDef,
    view: Arc<BarView>,
}

impl HeadlessWrapper {
    pub fn new(def: VideoDef, multi: &MultiProgress) -> Self {
        let bar = multi.add(ProgressBar::new(100));
        bar.set_style(
            ProgressStyle::with_template("{prefix:>20} [{bar:30}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(def.id.clone());
        Self {
            def,
            view: Arc::new(BarView { bar }),
        }
    }

    /// Close the bar if the load never streamed a body.
    pub fn finish(&self) {
        if !self.view.bar.is_finished() {
            self.view.bar.finish_and_clear();
        }
    }
}

impl VideoWrapper for HeadlessWrapper {
    fn id(&self) -> &str {
        &self.def.id
    }

    fn source_attr(&self) -> Option<String> {
        self.def.src.clone()
    }

    fn video_class(&self) -> Option<String> {
        self.def.class.clone()
    }

    fn create_video(&self) -> Arc<dyn VideoElement> {
        Arc::new(HeadlessVideo::new(
            &self.def.id,
            VideoMetadata {
                width: self.def.width,
                height: self.def.height,
            },
        ))
    }

    fn attach(&self, _video: &Arc<dyn VideoElement>) {
        debug!(wrapper = %self.def.id, "Video attached");
    }

    fn remove(&self) {
        self.view.bar.finish_and_clear();
        info!(wrapper = %self.def.id, "Wrapper removed");
    }

    fn remove_placeholder(&self) {
        debug!(wrapper = %self.def.id, placeholder = %format!("{}-loading", self.def.id), "Placeholder removed");
    }

    fn progress_view(&self) -> Arc<dyn ProgressView> {
        Arc::clone(&self.view) as Arc<dyn ProgressView>
    }
}

/// Resource host that accepts any resolvable blob and remembers script bodies
/// so global checks can look for the symbol they define.
pub struct HeadlessHost {
    blobs: BlobRegistry,
    scripts: Mutex<Vec<String>>,
    injected: Mutex<Vec<(ResourceTag, usize)>>,
}

impl HeadlessHost {
    pub fn new(blobs: BlobRegistry) -> Self {
        Self {
            blobs,
            scripts: Mutex::new(Vec::new()),
            injected: Mutex::new(Vec::new()),
        }
    }

    /// `(tag, bytes)` for every resource injected so far.
    pub fn injected(&self) -> Vec<(ResourceTag, usize)> {
        lock(&self.injected).clone()
    }
}

#[async_trait]
impl ResourceHost for HeadlessHost {
    async fn inject(&self, tag: ResourceTag, href: &str) -> Result<(), InjectError> {
        let blob = self
            .blobs
            .resolve(href)
            .ok_or_else(|| InjectError(format!("{href} does not resolve to a blob")))?;

        if tag == ResourceTag::Script {
            lock(&self.scripts).push(String::from_utf8_lossy(&blob.bytes).into_owned());
        }
        lock(&self.injected).push((tag, blob.bytes.len()));
        debug!(%tag, href, bytes = blob.bytes.len(), "Resource injected");
        Ok(())
    }

    fn has_global(&self, symbol: &str) -> bool {
        lock(&self.scripts).iter().any(|s| s.contains(symbol))
    }

    fn init_global(&self, symbol: &str) {
        info!(symbol, "Library initialized");
    }
}
