//! Classifier provider abstractions and admission control.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub mod limiter;
pub mod openai;
pub mod scripted;

pub use limiter::{ProviderProfile, RateLimiter};

/// The four fixed top-level buckets a file can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Active work with a defined outcome.
    Project,
    /// Ongoing responsibility with no end date.
    Area,
    /// Reference material.
    Resource,
    /// Inactive or completed items.
    Archive,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Project,
        Category::Area,
        Category::Resource,
        Category::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Project => "project",
            Category::Area => "area",
            Category::Resource => "resource",
            Category::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_lowercase().as_str() {
            "project" | "projects" => Some(Category::Project),
            "area" | "areas" => Some(Category::Area),
            "resource" | "resources" => Some(Category::Resource),
            "archive" | "archives" => Some(Category::Archive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedNote {
    pub name: String,
    pub context: String,
}

/// One file entering a classification batch. Immutable once built.
#[derive(Debug, Clone)]
pub struct ClassificationInput {
    pub id: u64,
    pub path: PathBuf,
    pub file_name: String,
    pub extracted_text: String,
    pub preview_text: String,
}

/// What the external classifier proposes for a single input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub tags: Vec<String>,
    pub summary: String,
    pub destination_folder: String,
    pub project: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub related_notes: Vec<RelatedNote>,
}

impl ClassificationResult {
    /// Clamp provider output to the documented bounds: at most five tags
    /// (first occurrence wins, anywhere in the list), at most five related
    /// notes, confidence inside [0, 1].
    pub fn normalized(mut self) -> Self {
        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags.drain(..) {
            if !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
                tags.push(tag);
            }
        }
        tags.truncate(5);
        self.tags = tags;
        self.related_notes.truncate(5);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// Corpus context handed to the classifier alongside each batch.
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    pub existing_projects: Vec<String>,
    pub existing_tags: Vec<String>,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limit exceeded: {0}")]
    Quota(String),
    #[error("service temporarily unavailable: {0}")]
    TransientServer(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unparseable classifier response: {0}")]
    Parse(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("{0}")]
    Unknown(String),
}

impl ProviderError {
    /// True for the HTTP 429 class. Drives the limiter's hard backoff.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::Quota(_))
    }

    /// Failures the rate limiter should be told about.
    pub fn affects_limiter(&self) -> bool {
        matches!(
            self,
            ProviderError::Quota(_) | ProviderError::TransientServer(_)
        )
    }

    /// Whether retrying the same call can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Quota(_)
                | ProviderError::TransientServer(_)
                | ProviderError::Network(_)
        )
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(format!("status {status}: {body}")),
            429 => ProviderError::Quota(format!("status {status}: {body}")),
            408 | 500..=599 => ProviderError::TransientServer(format!("status {status}: {body}")),
            _ => ProviderError::Unknown(format!("status {status}: {body}")),
        }
    }
}

#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a batch of inputs. The reply must contain exactly one result
    /// per input, in input order.
    async fn classify(
        &self,
        batch: &[ClassificationInput],
        ctx: &ClassifyContext,
    ) -> Result<Vec<ClassificationResult>, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    classifiers: HashMap<String, Arc<dyn Classifier>>,
    pub preferred: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifier(mut self, name: &str, provider: Arc<dyn Classifier>) -> Self {
        self.classifiers.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred(mut self, name: &str) -> Self {
        self.preferred = Some(name.to_string());
        self
    }

    pub fn classifier(&self, name: Option<&str>) -> Result<Arc<dyn Classifier>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no classifier configured".into()))?;
        self.classifiers
            .get(&key)
            .cloned()
            .ok_or(ProviderError::UnknownProvider(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_tags(tags: &[&str]) -> ClassificationResult {
        ClassificationResult {
            category: Category::Resource,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            summary: String::new(),
            destination_folder: String::new(),
            project: None,
            confidence: 0.9,
            related_notes: Vec::new(),
        }
    }

    #[test]
    fn normalized_drops_repeated_tags_wherever_they_appear() {
        let r = result_with_tags(&["rust", "notes", "Rust", "cli", "rust"]).normalized();
        assert_eq!(r.tags, vec!["rust", "notes", "cli"]);
    }

    #[test]
    fn normalized_caps_tags_after_dedup() {
        let r = result_with_tags(&["a", "a", "b", "c", "d", "e", "f"]).normalized();
        assert_eq!(r.tags, vec!["a", "b", "c", "d", "e"]);
    }
}
