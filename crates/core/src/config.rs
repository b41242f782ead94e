use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vault_providers::Category;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub vault: VaultConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Per-provider rate-limit profiles, keyed by provider name.
    #[serde(default)]
    pub limits: HashMap<String, LimitConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Root of the organized corpus.
    pub root: String,
    /// Folder (under root) holding unsorted incoming files.
    #[serde(default = "default_inbox")]
    pub inbox: String,
    /// Recoverable-delete destination, relative to root.
    #[serde(default = "default_trash")]
    pub trash_dir: String,
    /// Reserved per-folder summary file name; never overwritten by ingest.
    #[serde(default = "default_index_name")]
    pub index_file_name: String,
    #[serde(default)]
    pub folders: FolderNames,
}

/// Top-level folder name for each of the four categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderNames {
    #[serde(default = "default_projects")]
    pub projects: String,
    #[serde(default = "default_areas")]
    pub areas: String,
    #[serde(default = "default_resources")]
    pub resources: String,
    #[serde(default = "default_archive")]
    pub archive: String,
}

impl FolderNames {
    pub fn folder_for(&self, category: Category) -> &str {
        match category {
            Category::Project => &self.projects,
            Category::Area => &self.areas,
            Category::Resource => &self.resources,
            Category::Archive => &self.archive,
        }
    }

    pub fn category_for(&self, folder: &str) -> Option<Category> {
        if folder.eq_ignore_ascii_case(&self.projects) {
            Some(Category::Project)
        } else if folder.eq_ignore_ascii_case(&self.areas) {
            Some(Category::Area)
        } else if folder.eq_ignore_ascii_case(&self.resources) {
            Some(Category::Resource)
        } else if folder.eq_ignore_ascii_case(&self.archive) {
            Some(Category::Archive)
        } else {
            None
        }
    }
}

impl Default for FolderNames {
    fn default() -> Self {
        Self {
            projects: default_projects(),
            areas: default_areas(),
            resources: default_resources(),
            archive: default_archive(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Glob patterns excluded from every walk.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Provider used for the fast first pass.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Optional slower provider for re-checking low-confidence results.
    #[serde(default)]
    pub refine_provider: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_attempts")]
    pub max_attempts: usize,
    /// First-pass results below this confidence go through the refine pass.
    #[serde(default = "default_escalation")]
    pub escalation_threshold: f32,
    #[serde(default = "default_extract_chars")]
    pub max_extract_chars: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            refine_provider: None,
            batch_size: default_batch_size(),
            max_concurrent_batches: default_concurrency(),
            max_attempts: default_attempts(),
            escalation_threshold: default_escalation(),
            max_extract_chars: default_extract_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    pub slot_count: usize,
    pub interval_ms: u64,
    #[serde(default)]
    pub floor_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Fingerprint cache location, relative to the vault root.
    #[serde(default = "default_cache_path")]
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_inbox() -> String {
    "Inbox".to_string()
}
fn default_trash() -> String {
    ".trash".to_string()
}
fn default_index_name() -> String {
    "INDEX.md".to_string()
}
fn default_projects() -> String {
    "Projects".to_string()
}
fn default_areas() -> String {
    "Areas".to_string()
}
fn default_resources() -> String {
    "Resources".to_string()
}
fn default_archive() -> String {
    "Archive".to_string()
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    5
}
fn default_concurrency() -> usize {
    5
}
fn default_attempts() -> usize {
    3
}
fn default_escalation() -> f32 {
    0.8
}
fn default_extract_chars() -> usize {
    4000
}
fn default_cache_path() -> String {
    ".vault-fingerprints.json".to_string()
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
