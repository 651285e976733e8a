#![forbid(unsafe_code)]

pub mod blob;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod media;
pub mod page;
pub mod progress;
pub mod request;

pub use blob::{Blob, BlobRegistry};
pub use bundle::{
    BundleError, BundleLoader, BundleManifest, InjectError, LoaderBatch, ResourceHost, ResourceTag,
};
pub use cache::{CacheError, CacheRegistry, CacheStore};
pub use config::{CourierConfig, RetryPolicy};
pub use media::{
    MediaError, MediaOrchestrator, MediaSource, MetadataFailure, PlaybackAttributes, Preload,
    SessionState, VideoElement, VideoMetadata, VideoWrapper,
};
pub use page::PageContext;
pub use progress::{format_progress, ProgressTracker, ProgressView, ReadinessTracker, Report};
pub use request::{
    Headers, HttpTransport, ProbeOutcome, RequestEngine, RequestError, ResponseHandle,
    ResponseSource, Transport,
};
