use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::progress::ProgressView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preload {
    None,
    Metadata,
    Auto,
}

impl std::fmt::Display for Preload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Metadata => write!(f, "metadata"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Fixed attributes every orchestrated video element is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackAttributes {
    pub class: Option<String>,
    pub looping: bool,
    pub muted: bool,
    pub controls: bool,
    pub autoplay: bool,
    pub plays_inline: bool,
    pub preload: Preload,
    pub disable_remote_playback: bool,
    pub disable_picture_in_picture: bool,
    pub controls_list: String,
}

impl Default for PlaybackAttributes {
    fn default() -> Self {
        Self {
            class: None,
            looping: true,
            muted: true,
            controls: true,
            autoplay: false,
            plays_inline: true,
            preload: Preload::Metadata,
            disable_remote_playback: true,
            disable_picture_in_picture: true,
            controls_list: "noremoteplayback nodownload noplaybackrate".to_string(),
        }
    }
}

impl PlaybackAttributes {
    pub fn with_class(mut self, class: Option<String>) -> Self {
        self.class = class;
        self
    }
}

/// What the element plays from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// The origin URL, streamed by the element itself.
    Direct(String),
    /// A `blob:` URL over bytes already held in memory.
    Object(String),
}

impl MediaSource {
    pub fn url(&self) -> &str {
        match self {
            Self::Direct(url) | Self::Object(url) => url,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
}

impl VideoMetadata {
    /// Display height for `rendered_width` that keeps the intrinsic aspect ratio.
    pub fn height_for(&self, rendered_width: f64) -> Option<f64> {
        if self.width == 0 {
            return None;
        }
        Some(rendered_width * (self.height as f64 / self.width as f64))
    }
}

/// The element raised an error instead of loading metadata.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataFailure {
    #[error("media element error: {0}")]
    Element(String),
    #[error("element detached before metadata loaded")]
    Detached,
}

/// Handle onto a video element owned by the host document.
#[async_trait]
pub trait VideoElement: Send + Sync {
    fn configure(&self, attrs: &PlaybackAttributes);

    fn set_preload(&self, preload: Preload);

    fn set_source(&self, source: MediaSource);

    fn source(&self) -> Option<MediaSource>;

    /// Resolves when metadata for the current source has loaded, or fails if the
    /// element reports an error first.
    async fn loaded_metadata(&self) -> Result<VideoMetadata, MetadataFailure>;

    /// Current laid-out width in CSS pixels.
    fn rendered_width(&self) -> f64;

    fn pin_height(&self, px: f64);

    fn clear_height(&self);

    fn play(&self);

    fn pause(&self);

    /// `true` while the element intersects the viewport.
    fn viewport(&self) -> watch::Receiver<bool>;
}

/// The container a video is delivered into.
pub trait VideoWrapper: Send + Sync {
    fn id(&self) -> &str;

    /// The media URL, if the container declares one.
    fn source_attr(&self) -> Option<String>;

    /// Styling hook copied onto the created element.
    fn video_class(&self) -> Option<String>;

    fn create_video(&self) -> Arc<dyn VideoElement>;

    /// Insert the element into the container. Re-attaching is a no-op.
    fn attach(&self, video: &Arc<dyn VideoElement>);

    /// Remove the container from the document.
    fn remove(&self);

    /// Remove the `<id>-loading` placeholder shown until the first frame.
    fn remove_placeholder(&self);

    fn progress_view(&self) -> Arc<dyn ProgressView>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_attributes_disable_remote_controls() {
        let attrs = PlaybackAttributes::default();
        assert!(attrs.muted && attrs.looping && attrs.plays_inline && attrs.controls);
        assert!(!attrs.autoplay);
        assert_eq!(attrs.preload, Preload::Metadata);
        assert_eq!(attrs.controls_list, "noremoteplayback nodownload noplaybackrate");
    }

    #[test]
    fn height_keeps_aspect_ratio() {
        let meta = VideoMetadata { width: 1920, height: 1080 };
        assert_eq!(meta.height_for(640.0), Some(360.0));
        assert_eq!(VideoMetadata { width: 0, height: 10 }.height_for(640.0), None);
    }
}
