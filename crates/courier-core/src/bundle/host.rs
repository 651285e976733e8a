use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTag {
    /// `<link rel="stylesheet">`
    Stylesheet,
    /// `<script>`
    Script,
}

impl std::fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stylesheet => write!(f, "stylesheet"),
            Self::Script => write!(f, "script"),
        }
    }
}

/// The injected element fired its error event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct InjectError(pub String);

/// Document the loader injects third-party resources into.
#[async_trait]
pub trait ResourceHost: Send + Sync {
    /// Append a tag pointing at `href`. Resolves on the element's load event and
    /// fails on its error event.
    async fn inject(&self, tag: ResourceTag, href: &str) -> Result<(), InjectError>;

    /// Whether a script defined the global `symbol`.
    fn has_global(&self, symbol: &str) -> bool;

    /// Run the library's one-time initializer, e.g. `AOS.init()`.
    fn init_global(&self, symbol: &str);
}
