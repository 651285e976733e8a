mod element;
mod orchestrator;
mod state;
mod viewport;

pub use element::{
    MediaSource, MetadataFailure, PlaybackAttributes, Preload, VideoElement, VideoMetadata,
    VideoWrapper,
};
pub use orchestrator::{MediaOrchestrator, VideoSession, VIDEO_ERROR_STATUS};
pub use state::SessionState;

use thiserror::Error;

use crate::request::RequestError;

/// Hard failures of a video load. Everything after a successful probe degrades
/// softly and never surfaces here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("Probe for {url} was superseded")]
    Cancelled { url: String },
    #[error("Probe for {url} returned {status}, expected 200 or 206")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("Probe failed: {0}")]
    Probe(RequestError),
}

impl MediaError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RequestError> for MediaError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Cancelled { url } => Self::Cancelled { url },
            RequestError::UnexpectedStatus { url, status } => Self::UnexpectedStatus { url, status },
            other => Self::Probe(other),
        }
    }
}
