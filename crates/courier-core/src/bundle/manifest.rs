use serde::{Deserialize, Serialize};

/// Global a library script must define once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCheck {
    pub symbol: String,
    /// Call the library's initializer after the check passes.
    #[serde(default)]
    pub init: bool,
}

/// A third-party library made of stylesheets and scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryBundle {
    pub name: String,
    #[serde(default)]
    pub stylesheets: Vec<String>,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub global: Option<GlobalCheck>,
}

impl LibraryBundle {
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.stylesheets
            .iter()
            .chain(self.scripts.iter())
            .map(String::as_str)
    }
}

/// Every bundle the page may load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleManifest {
    pub aos: LibraryBundle,
    pub confetti: LibraryBundle,
    /// Font stylesheets whose `url(...)` references are cached too.
    pub fonts: Vec<String>,
}

impl Default for BundleManifest {
    fn default() -> Self {
        Self {
            aos: LibraryBundle {
                name: "aos".to_string(),
                stylesheets: vec!["https://cdn.jsdelivr.net/npm/aos@2.3.4/dist/aos.css".to_string()],
                scripts: vec!["https://cdn.jsdelivr.net/npm/aos@2.3.4/dist/aos.js".to_string()],
                global: Some(GlobalCheck {
                    symbol: "AOS".to_string(),
                    init: true,
                }),
            },
            confetti: LibraryBundle {
                name: "confetti".to_string(),
                stylesheets: Vec::new(),
                scripts: vec![
                    "https://cdn.jsdelivr.net/npm/canvas-confetti@1.9.3/dist/confetti.browser.js"
                        .to_string(),
                ],
                global: Some(GlobalCheck {
                    symbol: "confetti".to_string(),
                    init: false,
                }),
            },
            fonts: vec![
                "https://fonts.googleapis.com/css2?family=Sacramento&display=swap".to_string(),
                "https://fonts.googleapis.com/css2?family=Noto+Naskh+Arabic&display=swap"
                    .to_string(),
            ],
        }
    }
}

impl BundleManifest {
    /// Top-level resources a batch fetches, in load order.
    pub fn resources(&self, batch: &LoaderBatch) -> Vec<&str> {
        let mut out = Vec::new();
        if batch.aos {
            out.extend(self.aos.resources());
        }
        if batch.confetti {
            out.extend(self.confetti.resources());
        }
        if batch.additional_font {
            out.extend(self.fonts.iter().map(String::as_str));
        }
        out
    }
}

/// Which bundle categories a page load asks for. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderBatch {
    pub aos: bool,
    pub confetti: bool,
    pub additional_font: bool,
}

impl Default for LoaderBatch {
    fn default() -> Self {
        Self {
            aos: true,
            confetti: true,
            additional_font: true,
        }
    }
}

impl LoaderBatch {
    pub fn none() -> Self {
        Self {
            aos: false,
            confetti: false,
            additional_font: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.aos || self.confetti || self.additional_font)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_batch_has_five_resources() {
        let manifest = BundleManifest::default();
        let resources = manifest.resources(&LoaderBatch::default());
        assert_eq!(resources.len(), 5);
        assert!(resources[0].ends_with("aos.css"));
        assert!(resources[2].ends_with("confetti.browser.js"));
    }

    #[test]
    fn disabled_categories_drop_out() {
        let manifest = BundleManifest::default();
        let batch = LoaderBatch {
            confetti: false,
            ..LoaderBatch::default()
        };
        let resources = manifest.resources(&batch);
        assert_eq!(resources.len(), 4);
        assert!(resources.iter().all(|r| !r.contains("confetti")));
        assert!(manifest.resources(&LoaderBatch::none()).is_empty());
    }

    #[test]
    fn partial_batch_defaults_missing_flags_to_true() {
        let batch: LoaderBatch = serde_json::from_str(r#"{"aos": false}"#).unwrap();
        assert!(!batch.aos);
        assert!(batch.confetti && batch.additional_font);
    }
}
