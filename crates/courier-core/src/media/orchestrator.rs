use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::element::{MediaSource, PlaybackAttributes, Preload, VideoElement, VideoWrapper};
use super::state::SessionState;
use super::viewport;
use super::MediaError;
use crate::blob::BlobRegistry;
use crate::cache::{CacheRegistry, CacheStore};
use crate::config::CourierConfig;
use crate::page::PageContext;
use crate::progress::{format_progress, ProgressTracker};
use crate::request::{RequestEngine, ResponseHandle};

/// Status line shown when the full-body fetch fails.
pub const VIDEO_ERROR_STATUS: &str = "Error loading video";

/// Per-element cancellation gate for range probes. The first probe to settle
/// cancels every probe still pending on the same element.
#[derive(Debug, Default)]
struct PrefetchGate {
    current: Mutex<CancellationToken>,
}

impl PrefetchGate {
    fn enter(&self) -> CancellationToken {
        self.lock().clone()
    }

    /// Returns `true` for the winning probe.
    fn settle(&self, token: &CancellationToken) -> bool {
        let mut current = self.lock();
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        *current = CancellationToken::new();
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One video element driven through probe, fetch and playback.
pub struct VideoSession {
    id: Uuid,
    src: String,
    video: Arc<dyn VideoElement>,
    state: Mutex<SessionState>,
    gate: PrefetchGate,
    observer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for VideoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSession")
            .field("id", &self.id)
            .field("src", &self.src)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl VideoSession {
    fn new(src: String, video: Arc<dyn VideoElement>) -> Self {
        Self {
            id: Uuid::new_v4(),
            src,
            video,
            state: Mutex::new(SessionState::Idle),
            gate: PrefetchGate::default(),
            observer: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn video(&self) -> &Arc<dyn VideoElement> {
        &self.video
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_observing(&self) -> bool {
        self.observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Returns `false`, leaving the state alone, when `target` is not reachable.
    fn advance(&self, target: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.can_transition_to(target) {
            debug!(session = %self.id, from = %*state, to = %target, "Session state changed");
            *state = target;
            true
        } else {
            warn!(session = %self.id, from = %*state, to = %target, "Ignoring invalid session transition");
            false
        }
    }

    /// Leave `ProbePending` for `target`. Only one load may resolve a probe;
    /// any other finds the session already moved on.
    fn resolve_probe(&self, target: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != SessionState::ProbePending {
            debug!(session = %self.id, from = %*state, to = %target, "Probe already resolved by another load");
            return false;
        }
        debug!(session = %self.id, from = %*state, to = %target, "Session state changed");
        *state = target;
        true
    }

    fn superseded(&self) -> MediaError {
        MediaError::Cancelled {
            url: self.src.clone(),
        }
    }

    fn observe(&self) {
        let handle = viewport::observe(Arc::clone(&self.video));
        let previous = self
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for VideoSession {
    fn drop(&mut self) {
        if let Ok(slot) = self.observer.get_mut() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Drives video wrappers through range probe, cache lookup, progressive
/// full fetch and viewport-gated playback.
pub struct MediaOrchestrator {
    cache: CacheStore,
    engine: RequestEngine,
    blobs: BlobRegistry,
    tracker: Arc<dyn ProgressTracker>,
    page: PageContext,
    name: String,
    sessions: DashMap<String, Arc<VideoSession>>,
}

impl MediaOrchestrator {
    /// Registers one readiness unit with `tracker`.
    pub fn new(
        registry: &CacheRegistry,
        blobs: BlobRegistry,
        tracker: Arc<dyn ProgressTracker>,
        config: &CourierConfig,
    ) -> Self {
        tracker.add();
        Self {
            cache: registry.bucket(&config.video_bucket).with_force_cache(),
            engine: registry.engine().clone(),
            blobs,
            tracker,
            page: PageContext::new(config.page_origin.clone()),
            name: config.video_progress_name.clone(),
            sessions: DashMap::new(),
        }
    }

    pub fn session(&self, wrapper_id: &str) -> Option<Arc<VideoSession>> {
        self.sessions.get(wrapper_id).map(|s| Arc::clone(&s))
    }

    /// Forget the session for a wrapper that left the document.
    pub fn release(&self, wrapper_id: &str) -> bool {
        self.sessions.remove(wrapper_id).is_some()
    }

    pub async fn load(&self, wrapper: Arc<dyn VideoWrapper>) -> Result<SessionState, MediaError> {
        let Some(src) = wrapper.source_attr().filter(|s| !s.trim().is_empty()) else {
            info!(wrapper = wrapper.id(), "No video source, skipping");
            wrapper.remove();
            self.sessions.remove(wrapper.id());
            self.tracker.complete(&self.name, true);
            return Ok(SessionState::NoSource);
        };

        let session = self.session_for(wrapper.as_ref(), &src);
        if session.state() == SessionState::FullFetchPending {
            debug!(src = %src, "Full fetch already in flight");
            return Err(session.superseded());
        }

        if !self.page.is_secure_context() {
            debug!(origin = %self.page.origin(), "Insecure context, bypassing cache");
            self.load_uncached(wrapper.as_ref(), &session).await?;
            return Ok(session.state());
        }

        if let Err(e) = self.cache.open().await {
            warn!(bucket = self.cache.name(), error = %e, "Cache unavailable, bypassing");
            self.load_uncached(wrapper.as_ref(), &session).await?;
            return Ok(session.state());
        }

        match self.cache.lookup(&src).await {
            Ok(Some(res)) => {
                if !session.advance(SessionState::Cached) {
                    return Err(session.superseded());
                }
                info!(src = %src, bytes = res.len(), "Video served from cache");
                self.tracker.complete(&self.name, false);
                let video = session.video();
                wrapper.attach(video);
                self.res_to_video(wrapper.as_ref(), video, &res).await;
                session.observe();
            }
            Ok(None) => {
                if let Err(e) = self.cache.del(&src).await {
                    warn!(src = %src, error = %e, "Failed to drop stale entry");
                }
                if let Some(res) = self.load_uncached(wrapper.as_ref(), &session).await? {
                    match self.cache.set(&src, &res).await {
                        Ok(()) => debug!(src = %src, bytes = res.len(), "Video stored"),
                        Err(e) => warn!(src = %src, error = %e, "Failed to store video"),
                    }
                }
            }
            Err(e) => {
                warn!(src = %src, error = %e, "Cache lookup failed, bypassing");
                self.load_uncached(wrapper.as_ref(), &session).await?;
            }
        }

        Ok(session.state())
    }

    fn session_for(&self, wrapper: &dyn VideoWrapper, src: &str) -> Arc<VideoSession> {
        let create = || {
            let video = wrapper.create_video();
            video.configure(&PlaybackAttributes::default().with_class(wrapper.video_class()));
            Arc::new(VideoSession::new(src.to_string(), video))
        };

        let mut entry = self
            .sessions
            .entry(wrapper.id().to_string())
            .or_insert_with(create);
        if entry.src() != src {
            debug!(wrapper = wrapper.id(), src, "Source changed, replacing session");
            *entry = create();
        }
        Arc::clone(&entry)
    }

    /// Probe, then stream the full body into a blob when the origin serves ranges.
    /// Returns the fetched response when there is one worth caching.
    async fn load_uncached(
        &self,
        wrapper: &dyn VideoWrapper,
        session: &VideoSession,
    ) -> Result<Option<ResponseHandle>, MediaError> {
        let src = session.src();
        let video = session.video();
        if !session.advance(SessionState::ProbePending) {
            debug!(src = %src, state = %session.state(), "Full fetch already in flight");
            return Err(session.superseded());
        }

        let token = session.gate.enter();
        let outcome = match self.engine.probe(src, Some(token.clone())).await {
            Err(e) if e.is_cancelled() => {
                debug!(src = %src, "Probe superseded");
                return Err(e.into());
            }
            outcome => outcome,
        };
        if !session.gate.settle(&token) {
            debug!(src = %src, "Probe settled after being superseded");
            return Err(session.superseded());
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if !session.resolve_probe(SessionState::Errored) {
                    return Err(session.superseded());
                }
                error!(src = %src, error = %e, "Video probe failed");
                self.tracker.invalid(&self.name);
                return Err(e.into());
            }
        };

        if !outcome.supports_ranges() {
            if !session.resolve_probe(SessionState::DirectPlay) {
                return Err(session.superseded());
            }
            info!(src = %src, "Origin ignores ranges, playing directly");
            video.set_preload(Preload::None);
            video.set_source(MediaSource::Direct(src.to_string()));
            wrapper.attach(video);
            self.tracker.complete(&self.name, false);
            session.observe();
            return Ok(None);
        }

        if !session.resolve_probe(SessionState::FullFetchPending) {
            return Err(session.superseded());
        }
        video.set_source(MediaSource::Direct(src.to_string()));
        wrapper.attach(video);

        let metadata = match video.loaded_metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(src = %src, error = %e, "Video element failed to load metadata");
                self.tracker.invalid(&self.name);
                session.advance(SessionState::DirectPlay);
                session.observe();
                return Ok(None);
            }
        };

        self.tracker.complete(&self.name, false);
        if let Some(height) = metadata.height_for(video.rendered_width()) {
            video.pin_height(height);
        }

        let view = wrapper.progress_view();
        let sink = Arc::clone(&view);
        let fetched = self
            .engine
            .get(src)
            .with_progress_func(move |loaded, total| sink.set_progress(&format_progress(loaded, total)))
            .with_retry()
            .send()
            .await;

        let cached = match fetched {
            Ok(res) if res.is_success() => {
                info!(src = %src, bytes = res.len(), "Video fetched");
                self.res_to_video(wrapper, video, &res).await;
                session.advance(SessionState::Ready);
                Some(res)
            }
            Ok(res) => {
                view.set_status(VIDEO_ERROR_STATUS);
                error!(src = %src, status = res.status(), "Video fetch returned error status");
                session.advance(SessionState::DirectPlay);
                None
            }
            Err(e) => {
                view.set_status(VIDEO_ERROR_STATUS);
                error!(src = %src, error = %e, "Video fetch failed");
                session.advance(SessionState::DirectPlay);
                None
            }
        };

        session.observe();
        Ok(cached)
    }

    /// Point the element at an object URL over the response body. Once it has
    /// metadata the pinned height and the loading placeholder go away.
    async fn res_to_video(
        &self,
        wrapper: &dyn VideoWrapper,
        video: &Arc<dyn VideoElement>,
        res: &ResponseHandle,
    ) {
        if let Some(MediaSource::Object(previous)) = video.source() {
            self.blobs.revoke(&previous);
        }
        let url = self.blobs.create(res.body(), res.content_type());
        video.set_source(MediaSource::Object(url));

        match video.loaded_metadata().await {
            Ok(_) => {
                video.clear_height();
                wrapper.remove_placeholder();
            }
            Err(e) => warn!(wrapper = wrapper.id(), error = %e, "Blob source failed to load metadata"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_settled_probe_wins_the_gate() {
        let gate = PrefetchGate::default();
        let a = gate.enter();
        let b = gate.enter();

        assert!(gate.settle(&a));
        assert!(b.is_cancelled());
        assert!(!gate.settle(&b));

        let c = gate.enter();
        assert!(!c.is_cancelled());
        assert!(gate.settle(&c));
    }
}
