//! Phased frontend asset deployment
//!
//! Assets are split into three disjoint tiers. Critical assets (entry HTML,
//! primary script, primary stylesheet) go first, one at a time, so the site
//! becomes usable early. Small assets follow in a wide concurrent batch and
//! large assets in a narrower one. Any store failure fails the deployment.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use crate::errors::DeployError;
use crate::limiter::{collect_settled, BoundedLimiter};
use crate::models::bundle::{AssetBundle, AssetEntry};
use crate::services::{ExecutionHost, ProgressFn};
use crate::storage::settings::AssetConfig;

/// Entry-point document every frontend must serve
pub const INDEX_PATH: &str = "/index.html";

/// Alternate entry document name, served as-is when present
pub const INDEX_ALT_PATH: &str = "/index.htm";

/// Asset-server security configuration, stored before any asset
pub const SECURITY_CONFIG_PATH: &str = "/.ic-assets.json5";

const SCRIPT_STEMS: &[&str] = &["index", "main", "app", "bundle"];
const STYLE_STEMS: &[&str] = &["index", "main", "app", "bundle", "style", "styles"];

/// Asset tier settings
#[derive(Debug, Clone)]
pub struct AssetSettings {
    /// Non-critical assets up to this size are small
    pub small_asset_max_bytes: usize,
    pub small_concurrency: usize,
    pub large_concurrency: usize,
}

impl From<&AssetConfig> for AssetSettings {
    fn from(config: &AssetConfig) -> Self {
        Self {
            small_asset_max_bytes: config.small_asset_max_bytes,
            small_concurrency: config.small_concurrency,
            large_concurrency: config.large_concurrency,
        }
    }
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self::from(&AssetConfig::default())
    }
}

/// Deployment tier of one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetTier {
    Critical,
    Small,
    Large,
}

/// Critical asset kinds, in deployment order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CriticalKind {
    Document,
    Script,
    Stylesheet,
}

/// Strip a bundler content hash such as `index-4f9a2c1b` or `main.8e1f0a`
fn strip_content_hash(stem: &str) -> &str {
    let Some(split) = stem.rfind(['-', '.']) else {
        return stem;
    };
    let suffix = &stem[split + 1..];
    let looks_hashed = suffix.len() >= 6
        && suffix.chars().all(|c| c.is_ascii_alphanumeric())
        && suffix.chars().any(|c| c.is_ascii_digit());
    if looks_hashed {
        &stem[..split]
    } else {
        stem
    }
}

fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (file_name, ""),
    }
}

fn critical_kind(path: &str) -> Option<CriticalKind> {
    if path == INDEX_PATH || path == INDEX_ALT_PATH {
        return Some(CriticalKind::Document);
    }

    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = split_extension(file_name);
    let stem = strip_content_hash(stem).to_ascii_lowercase();

    match ext.to_ascii_lowercase().as_str() {
        "js" | "mjs" if SCRIPT_STEMS.contains(&stem.as_str()) => Some(CriticalKind::Script),
        "css" if STYLE_STEMS.contains(&stem.as_str()) => Some(CriticalKind::Stylesheet),
        _ => None,
    }
}

/// True for the entry document and the primary script or stylesheet
pub fn is_critical(path: &str) -> bool {
    critical_kind(path).is_some()
}

/// Tier of one asset
pub fn classify(entry: &AssetEntry, settings: &AssetSettings) -> AssetTier {
    if is_critical(&entry.path) {
        AssetTier::Critical
    } else if entry.size() <= settings.small_asset_max_bytes {
        AssetTier::Small
    } else {
        AssetTier::Large
    }
}

/// Bundle split into disjoint tiers
#[derive(Debug, Clone, Default)]
pub struct TieredAssets {
    /// Deployment order: document, then script, then stylesheet
    pub critical: Vec<AssetEntry>,
    pub small: Vec<AssetEntry>,
    pub large: Vec<AssetEntry>,
}

impl TieredAssets {
    pub fn len(&self) -> usize {
        self.critical.len() + self.small.len() + self.large.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition a bundle. Every asset lands in exactly one tier.
pub fn partition(bundle: AssetBundle, settings: &AssetSettings) -> TieredAssets {
    let mut tiers = TieredAssets::default();
    let mut critical = Vec::new();

    for entry in bundle.into_entries() {
        match critical_kind(&entry.path) {
            Some(kind) => critical.push((kind, entry)),
            None if entry.size() <= settings.small_asset_max_bytes => tiers.small.push(entry),
            None => tiers.large.push(entry),
        }
    }

    critical.sort_by(|(a, ea), (b, eb)| a.cmp(b).then_with(|| ea.path.cmp(&eb.path)));
    tiers.critical = critical.into_iter().map(|(_, entry)| entry).collect();
    tiers
}

/// Content type for an asset.
///
/// A declared MIME type wins; otherwise it is inferred from the extension.
pub fn content_type(entry: &AssetEntry) -> String {
    if entry.kind.contains('/') {
        return entry.kind.clone();
    }

    let (_, ext) = split_extension(entry.file_name());
    let mime = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "json5" => "application/json5",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain; charset=utf-8",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

/// Permissive asset-server security configuration
pub fn security_config() -> Vec<u8> {
    let config = json!([
        {
            "match": "**/*",
            "headers": {
                "Access-Control-Allow-Origin": "*",
                "Content-Security-Policy": "default-src * 'unsafe-inline' 'unsafe-eval' data: blob:",
                "X-Content-Type-Options": "nosniff"
            },
            "allow_raw_access": true
        }
    ]);
    serde_json::to_vec_pretty(&config).unwrap_or_default()
}

/// Minimal entry document, used when a bundle has none
pub fn default_index_html(title: &str) -> Vec<u8> {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\" />\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n\
         <title>{}</title>\n</head>\n<body>\n<div id=\"root\"></div>\n</body>\n</html>\n",
        title
    )
    .into_bytes()
}

/// Result of a phased deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetDeployReport {
    pub target: String,
    pub critical: usize,
    pub small: usize,
    pub large: usize,
    pub bytes: usize,

    /// An entry document was generated because the bundle had none
    pub synthesized_index: bool,
}

impl AssetDeployReport {
    pub fn total(&self) -> usize {
        self.critical + self.small + self.large
    }
}

/// Stores a bundle on the frontend host in tiers
pub struct PhasedDeployer<'a> {
    host: &'a dyn ExecutionHost,
    settings: &'a AssetSettings,
    target: &'a str,
}

impl<'a> PhasedDeployer<'a> {
    pub fn new(host: &'a dyn ExecutionHost, settings: &'a AssetSettings, target: &'a str) -> Self {
        Self {
            host,
            settings,
            target,
        }
    }

    async fn store(&self, entry: &AssetEntry) -> Result<(), DeployError> {
        let mime = content_type(entry);
        debug!("Storing {} ({} bytes, {})", entry.path, entry.size(), mime);
        self.host
            .store_asset(self.target, &entry.path, &entry.content, &mime)
            .await
            .inspect_err(|e| error!("Failed to store {}: {}", entry.path, e))
    }

    async fn store_batch(
        &self,
        entries: &[AssetEntry],
        concurrency: usize,
        on_stored: &(dyn Fn() + Send + Sync),
    ) -> Result<(), DeployError> {
        let tasks: Vec<_> = entries
            .iter()
            .map(|entry| move || self.store(entry))
            .collect();

        let results = BoundedLimiter::new(concurrency)
            .submit(tasks, |_, _| on_stored())
            .await;
        collect_settled(results).map(|_| ())
    }

    /// Deploy every asset of `bundle`.
    ///
    /// `project_name` titles the generated entry document when one is needed.
    pub async fn deploy(
        &self,
        mut bundle: AssetBundle,
        project_name: &str,
        progress: ProgressFn<'_>,
    ) -> Result<AssetDeployReport, DeployError> {
        let synthesized_index = !bundle.contains(INDEX_PATH) && !bundle.contains(INDEX_ALT_PATH);
        if synthesized_index {
            info!("Bundle has no {}, generating a default one", INDEX_PATH);
            bundle.insert(AssetEntry::new(
                INDEX_PATH,
                default_index_html(project_name),
                "text/html",
            ));
        }

        let bytes = bundle.total_bytes();
        let tiers = partition(bundle, self.settings);
        info!(
            "Deploying {} assets to {}: {} critical, {} small, {} large",
            tiers.len(),
            self.target,
            tiers.critical.len(),
            tiers.small.len(),
            tiers.large.len()
        );

        // The security configuration counts as one unit of progress.
        let total = tiers.len() + 1;
        let stored = std::sync::atomic::AtomicUsize::new(0);
        let on_stored = || {
            let done = stored.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            progress(done as f64 / total as f64);
        };

        let config = AssetEntry::new(SECURITY_CONFIG_PATH, security_config(), "application/json5");
        self.store(&config).await?;
        on_stored();

        for entry in &tiers.critical {
            self.store(entry).await?;
            on_stored();
        }

        self.store_batch(&tiers.small, self.settings.small_concurrency, &on_stored)
            .await?;
        self.store_batch(&tiers.large, self.settings.large_concurrency, &on_stored)
            .await?;

        Ok(AssetDeployReport {
            target: self.target.to_string(),
            critical: tiers.critical.len(),
            small: tiers.small.len(),
            large: tiers.large.len(),
            bytes,
            synthesized_index,
        })
    }
}
