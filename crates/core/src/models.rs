use crate::error::EngineError;
use serde::Serialize;
use std::path::PathBuf;

pub use vault_providers::{
    Category, ClassificationInput, ClassificationResult, ClassifyContext, RelatedNote,
};

/// Why a file was routed to a human instead of being placed automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationReason {
    LowConfidence,
    UnmatchedProject,
    IndexNameConflict,
    ExistingNameConflict,
}

/// Terminal decision for one file in one pipeline run.
#[derive(Debug)]
pub enum PlacementOutcome {
    AutoPlace(ClassificationResult),
    NeedsConfirmation {
        reason: ConfirmationReason,
        alternatives: Vec<ClassificationResult>,
    },
    Rejected(EngineError),
}

impl PlacementOutcome {
    pub fn is_auto(&self) -> bool {
        matches!(self, PlacementOutcome::AutoPlace(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokenLink {
    pub file_path: PathBuf,
    pub link_target: String,
    pub suggestion: Option<String>,
}

/// One audit pass over the whole corpus. Built fresh every run, consumed by
/// the repair pass, never persisted.
#[derive(Debug, Default, Serialize)]
pub struct AuditReport {
    pub broken_links: Vec<BrokenLink>,
    pub missing_frontmatter: Vec<PathBuf>,
    pub missing_category: Vec<PathBuf>,
    pub untagged_files: Vec<PathBuf>,
    pub total_scanned: usize,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.broken_links.is_empty()
            && self.missing_frontmatter.is_empty()
            && self.missing_category.is_empty()
    }
}

#[derive(Debug, Default, Serialize)]
pub struct RepairSummary {
    pub links_fixed: usize,
    pub links_stripped: usize,
    pub frontmatter_injected: usize,
    pub categories_filled: usize,
    pub failures: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub discovered: usize,
    pub skipped_unchanged: usize,
    pub duplicates_merged: usize,
    pub auto_placed: usize,
    pub needs_confirmation: usize,
    pub rejected: usize,
}

/// Everything a caller needs to act on one ingest pass.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub summary: IngestSummary,
    pub outcomes: Vec<FileOutcome>,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub source: PathBuf,
    /// Where the file ended up, for auto-placed files.
    pub placed_at: Option<PathBuf>,
    pub outcome: PlacementOutcome,
}
