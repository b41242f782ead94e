//! Deterministic classifiers for tests and offline runs.

use crate::{
    Category, ClassificationInput, ClassificationResult, Classifier, ClassifyContext,
    ProviderError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type ScriptFn = dyn Fn(&[ClassificationInput], usize) -> Result<Vec<ClassificationResult>, ProviderError>
    + Send
    + Sync;

/// Replays a caller-supplied function per batch. The function also receives
/// the zero-based call ordinal, so scripts can fail the first attempt and
/// succeed on retry, or slow down specific calls.
pub struct ScriptedClassifier {
    script: Arc<ScriptFn>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedClassifier {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[ClassificationInput], usize) -> Result<Vec<ClassificationResult>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            script: Arc::new(script),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep this long inside every call, to exercise completion-order
    /// shuffling under the paused tokio clock.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        batch: &[ClassificationInput],
        _ctx: &ClassifyContext,
    ) -> Result<Vec<ClassificationResult>, ProviderError> {
        let ordinal = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(batch, ordinal)
    }
}

/// Builds a plausible high-confidence result for one input; the common
/// building block for scripted tests.
pub fn canned_result(input: &ClassificationInput, category: Category) -> ClassificationResult {
    ClassificationResult {
        category,
        tags: vec!["auto".to_string()],
        summary: format!("summary of {}", input.file_name),
        destination_folder: match category {
            Category::Project => "Projects".to_string(),
            Category::Area => "Areas".to_string(),
            Category::Resource => "Resources".to_string(),
            Category::Archive => "Archive".to_string(),
        },
        project: None,
        confidence: 0.95,
        related_notes: Vec::new(),
    }
}
