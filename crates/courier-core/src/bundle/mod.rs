pub mod css;
mod host;
mod manifest;

pub use host::{InjectError, ResourceHost, ResourceTag};
pub use manifest::{BundleManifest, GlobalCheck, LibraryBundle, LoaderBatch};

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::blob::BlobRegistry;
use crate::cache::{CacheError, CacheRegistry, CacheStore};
use crate::config::CourierConfig;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: CacheError,
    },
    #[error("{tag} {url} failed to load: {source}")]
    Load {
        url: String,
        tag: ResourceTag,
        #[source]
        source: InjectError,
    },
    #[error("{bundle} loaded but global '{symbol}' is missing")]
    MissingGlobal { bundle: String, symbol: String },
    #[error("Invalid resource URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl BundleError {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Fetch { url, .. } | Self::Load { url, .. } | Self::InvalidUrl { url, .. } => {
                Some(url)
            }
            _ => None,
        }
    }
}

/// Fetches third-party bundles through the `libs` bucket and injects them into
/// a [`ResourceHost`] as object URLs.
pub struct BundleLoader {
    cache: CacheStore,
    blobs: BlobRegistry,
    host: Arc<dyn ResourceHost>,
    manifest: BundleManifest,
}

impl BundleLoader {
    pub fn new(
        registry: &CacheRegistry,
        blobs: BlobRegistry,
        host: Arc<dyn ResourceHost>,
        config: &CourierConfig,
    ) -> Self {
        Self {
            cache: registry.bucket(&config.libs_bucket),
            blobs,
            host,
            manifest: BundleManifest::default(),
        }
    }

    pub fn with_manifest(mut self, manifest: BundleManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    /// Load every enabled category in parallel. Fails with the first error.
    pub async fn load(&self, batch: LoaderBatch) -> Result<(), BundleError> {
        self.cache.open().await?;

        let mut jobs: Vec<BoxFuture<'_, Result<(), BundleError>>> = Vec::new();
        if batch.aos {
            jobs.push(self.load_library(&self.manifest.aos).boxed());
        }
        if batch.confetti {
            jobs.push(self.load_library(&self.manifest.confetti).boxed());
        }
        if batch.additional_font {
            jobs.push(self.load_fonts().boxed());
        }

        let count = jobs.len();
        try_join_all(jobs).await?;
        info!(bundles = count, "Bundles loaded");
        Ok(())
    }

    async fn load_library(&self, bundle: &LibraryBundle) -> Result<(), BundleError> {
        let mut parts: Vec<BoxFuture<'_, Result<(), BundleError>>> = Vec::new();
        for href in &bundle.stylesheets {
            parts.push(self.inject_cached(ResourceTag::Stylesheet, href).boxed());
        }
        for href in &bundle.scripts {
            parts.push(self.inject_cached(ResourceTag::Script, href).boxed());
        }
        try_join_all(parts).await?;

        if let Some(global) = &bundle.global {
            if !self.host.has_global(&global.symbol) {
                warn!(bundle = %bundle.name, symbol = %global.symbol, "Library global missing after load");
                return Err(BundleError::MissingGlobal {
                    bundle: bundle.name.clone(),
                    symbol: global.symbol.clone(),
                });
            }
            if global.init {
                self.host.init_global(&global.symbol);
            }
        }

        debug!(bundle = %bundle.name, "Library ready");
        Ok(())
    }

    async fn load_fonts(&self) -> Result<(), BundleError> {
        try_join_all(self.manifest.fonts.iter().map(|url| self.load_font(url))).await?;
        Ok(())
    }

    async fn inject_cached(&self, tag: ResourceTag, url: &str) -> Result<(), BundleError> {
        let object = self.fetch_object(url).await?;
        self.inject(tag, url, &object).await
    }

    async fn inject(&self, tag: ResourceTag, url: &str, href: &str) -> Result<(), BundleError> {
        self.host
            .inject(tag, href)
            .await
            .map_err(|source| BundleError::Load {
                url: url.to_string(),
                tag,
                source,
            })?;
        debug!(%tag, url, "Resource injected");
        Ok(())
    }

    /// Resolve `url` through the bucket and wrap the body in an object URL.
    async fn fetch_object(&self, url: &str) -> Result<String, BundleError> {
        let res = self
            .cache
            .get(url)
            .await
            .map_err(|source| BundleError::Fetch {
                url: url.to_string(),
                source,
            })?;
        Ok(self.blobs.create(res.body(), res.content_type()))
    }

    /// Font stylesheets reference the font files by URL; each one is cached and
    /// swapped for an object URL before the stylesheet itself is injected.
    async fn load_font(&self, url: &str) -> Result<(), BundleError> {
        let res = self
            .cache
            .get(url)
            .await
            .map_err(|source| BundleError::Fetch {
                url: url.to_string(),
                source,
            })?;
        let text = res.text();
        let base = Url::parse(url).map_err(|e| BundleError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut targets = Vec::new();
        for raw in css::extract_urls(&text) {
            if css::is_inline(&raw) {
                continue;
            }
            let absolute = base.join(raw.trim()).map_err(|e| BundleError::InvalidUrl {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
            targets.push((raw, absolute.to_string()));
        }

        let objects = try_join_all(targets.iter().map(|(raw, absolute)| async move {
            let object = self.fetch_object(absolute).await?;
            Ok::<_, BundleError>((raw.clone(), object))
        }))
        .await?;
        let replacements: HashMap<String, String> = objects.into_iter().collect();

        let rewritten = css::rewrite_urls(&text, |raw| replacements.get(raw).cloned());
        debug!(url, references = replacements.len(), "Font stylesheet rewritten");

        let object = self
            .blobs
            .create(Bytes::from(rewritten), Some("text/css"));
        self.inject(ResourceTag::Stylesheet, url, &object).await
    }
}
