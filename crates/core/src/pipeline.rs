//! Ingest orchestration: cache-filtered discovery, dedup, rate-limited
//! classification, placement, and the cache checkpoint at the end.

use crate::cache::{FileStatus, FingerprintCache};
use crate::cancel::CancelFlag;
use crate::config::AppConfig;
use crate::dispatcher::ClassificationDispatcher;
use crate::error::EngineError;
use crate::extractor::ContentExtractor;
use crate::fingerprint;
use crate::frontmatter;
use crate::fs_ops;
use crate::models::{
    ClassificationInput, ClassificationResult, ClassifyContext, FileOutcome, IngestReport,
    PlacementOutcome,
};
use crate::placement::{self, VaultSnapshot};
use anyhow::Context;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vault_providers::openai::{OpenAiClassifier, OpenAiConfig};
use vault_providers::{ProviderProfile, ProviderRegistry, RateLimiter};
use walkdir::WalkDir;

const PREVIEW_CHARS: usize = 500;

pub async fn run_ingest(
    cfg: &AppConfig,
    registry: Arc<ProviderRegistry>,
    limiter: Arc<RateLimiter>,
    extractor: Arc<dyn ContentExtractor>,
    cancel: &CancelFlag,
    dry_run: bool,
) -> anyhow::Result<IngestReport> {
    let root = PathBuf::from(&cfg.vault.root);
    let inbox = root.join(&cfg.vault.inbox);
    let trash = root.join(&cfg.vault.trash_dir);
    let cache = FingerprintCache::load(&root, &root.join(&cfg.cache.path));

    let mut report = IngestReport::default();

    info!(inbox = %inbox.display(), "discovering inbox files");
    let discovered = discover_files(&inbox);
    report.summary.discovered = discovered.len();
    if discovered.is_empty() {
        return Ok(report);
    }

    let checked = cache.check_many(&discovered).await;
    let mut pending: Vec<PathBuf> = Vec::new();
    for (path, status) in checked {
        if status == FileStatus::Unchanged {
            report.summary.skipped_unchanged += 1;
        } else {
            pending.push(path);
        }
    }
    info!(
        discovered = report.summary.discovered,
        skipped = report.summary.skipped_unchanged,
        "cache filter complete"
    );

    if cancel.is_cancelled() {
        return Ok(report);
    }

    // Duplicate bodies collapse onto their first occurrence before any
    // classification call is spent on them.
    let (survivors, trashed) = dedup_pass(&pending, &trash, dry_run, cancel)?;
    report.summary.duplicates_merged = trashed.len();
    cache.forget(&trashed).await;

    if cancel.is_cancelled() {
        if !dry_run {
            cache.save().await?;
        }
        return Ok(report);
    }

    let mut inputs = Vec::with_capacity(survivors.len());
    for (i, path) in survivors.iter().enumerate() {
        let text = extractor
            .extract(path, cfg.classification.max_extract_chars)
            .await;
        let preview = text.chars().take(PREVIEW_CHARS).collect::<String>();
        inputs.push(ClassificationInput {
            id: i as u64,
            path: path.clone(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            extracted_text: text,
            preview_text: preview,
        });
    }

    let snapshot = VaultSnapshot::scan(&root, &cfg.vault, &cfg.scan.exclude)
        .context("scanning vault for placement context")?;
    let ctx = ClassifyContext {
        existing_projects: snapshot.projects.clone(),
        existing_tags: Vec::new(),
    };

    let dispatcher =
        ClassificationDispatcher::new(registry, limiter, cfg.classification.clone());
    info!(files = inputs.len(), "dispatching classification");
    let results = match dispatcher.dispatch(&inputs, &ctx, cancel).await {
        Ok(results) => results,
        // A cancelled dispatch still yields the partial report built so far.
        Err(EngineError::Cancelled) => {
            if !dry_run {
                cache.save().await?;
            }
            return Ok(report);
        }
        Err(e) => return Err(anyhow::anyhow!(e)),
    };

    let mut placed = Vec::new();
    let mut awaiting = Vec::new();
    for (input, result) in inputs.into_iter().zip(results) {
        if cancel.is_cancelled() {
            break;
        }
        let outcome = match result {
            Ok(res) => placement::resolve(&input.file_name, res, &snapshot),
            Err(e) => PlacementOutcome::Rejected(e),
        };

        let mut placed_at = None;
        let outcome = match outcome {
            PlacementOutcome::AutoPlace(res) => {
                if dry_run {
                    report.summary.auto_placed += 1;
                    PlacementOutcome::AutoPlace(res)
                } else {
                    match place_file(&root, &input.path, &input.file_name, &res) {
                        Ok(target) => {
                            report.summary.auto_placed += 1;
                            placed.push((input.path.clone(), target.clone()));
                            placed_at = Some(target);
                            PlacementOutcome::AutoPlace(res)
                        }
                        // A failed move is a rejection, in the report as well
                        // as in the summary.
                        Err(e) => {
                            warn!(path = %input.path.display(), error = %e, "placement failed");
                            report.summary.rejected += 1;
                            PlacementOutcome::Rejected(EngineError::Unknown(format!(
                                "placement failed: {e:#}"
                            )))
                        }
                    }
                }
            }
            PlacementOutcome::NeedsConfirmation {
                reason,
                alternatives,
            } => {
                debug!(path = %input.path.display(), ?reason, "needs confirmation");
                report.summary.needs_confirmation += 1;
                // Fingerprinted in place: re-runs skip the file until a human
                // acts on it or its content changes.
                awaiting.push(input.path.clone());
                PlacementOutcome::NeedsConfirmation {
                    reason,
                    alternatives,
                }
            }
            PlacementOutcome::Rejected(e) => {
                warn!(path = %input.path.display(), error = %e.user_message(), "rejected");
                report.summary.rejected += 1;
                PlacementOutcome::Rejected(e)
            }
        };

        report.outcomes.push(FileOutcome {
            source: input.path,
            placed_at,
            outcome,
        });
    }

    if !dry_run {
        let (moved_from, moved_to): (Vec<_>, Vec<_>) = placed.into_iter().unzip();
        cache.forget(&moved_from).await;
        cache.update_many(&moved_to).await;
        cache.update_many(&awaiting).await;
        cache.save().await.context("saving fingerprint cache")?;
    }

    info!(
        auto = report.summary.auto_placed,
        confirm = report.summary.needs_confirmation,
        rejected = report.summary.rejected,
        "ingest complete"
    );
    Ok(report)
}

/// Collapse identical bodies: the first occurrence survives, later copies
/// donate their tags and go to the trash. Returns (survivors, trashed).
fn dedup_pass(
    paths: &[PathBuf],
    trash: &Path,
    dry_run: bool,
    cancel: &CancelFlag,
) -> anyhow::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut first_by_hash: HashMap<String, PathBuf> = HashMap::new();
    let mut survivors = Vec::new();
    let mut trashed = Vec::new();

    for path in paths {
        if cancel.is_cancelled() {
            break;
        }
        let hash = match fingerprint::dedup_hash(path) {
            Ok(h) => h,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unhashable file");
                continue;
            }
        };
        match first_by_hash.get(&hash) {
            None => {
                first_by_hash.insert(hash, path.clone());
                survivors.push(path.clone());
            }
            Some(survivor) => {
                if !dry_run {
                    merge_tags_into(survivor, path)?;
                    fs_ops::move_to_trash(path, trash)?;
                }
                debug!(duplicate = %path.display(), survivor = %survivor.display(), "duplicate merged");
                trashed.push(path.clone());
            }
        }
    }
    Ok((survivors, trashed))
}

/// Union the duplicate's tags into the survivor's metadata block.
fn merge_tags_into(survivor: &Path, duplicate: &Path) -> anyhow::Result<()> {
    if !fingerprint::is_text_file(survivor) || !fingerprint::is_text_file(duplicate) {
        return Ok(());
    }
    let dup_text = std::fs::read_to_string(duplicate)?;
    let extra = frontmatter::tags(&dup_text);
    if extra.is_empty() {
        return Ok(());
    }
    let text = std::fs::read_to_string(survivor)?;
    if !frontmatter::has_block(&text) {
        return Ok(());
    }
    let merged = frontmatter::merge_tags(&frontmatter::tags(&text), &extra);
    if let Some(updated) = frontmatter::set_tags(&text, &merged) {
        fs_ops::atomic_write(survivor, updated.as_bytes())?;
    }
    Ok(())
}

/// Write classification metadata into the document, then move it to its
/// destination with conflict-suffix resolution.
fn place_file(
    root: &Path,
    source: &Path,
    file_name: &str,
    result: &ClassificationResult,
) -> anyhow::Result<PathBuf> {
    if fingerprint::is_text_file(source) {
        annotate_document(source, result)?;
    }
    let target = root.join(&result.destination_folder).join(file_name);
    let landed = fs_ops::move_with_conflict(source, &target)?;
    Ok(landed)
}

fn annotate_document(path: &Path, result: &ClassificationResult) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let mut updated = if frontmatter::has_block(&text) {
        text
    } else {
        let mut with_block =
            frontmatter::minimal_block(result.category.as_str(), &today, "active");
        with_block.push_str(&text);
        with_block
    };
    if frontmatter::get_field(&updated, "category").is_none() {
        if let Some(out) = frontmatter::insert_field(&updated, "category", result.category.as_str())
        {
            updated = out;
        }
    }
    if frontmatter::get_field(&updated, "summary").is_none() && !result.summary.is_empty() {
        if let Some(out) = frontmatter::insert_field(&updated, "summary", &result.summary) {
            updated = out;
        }
    }
    let merged = frontmatter::merge_tags(&frontmatter::tags(&updated), &result.tags);
    if let Some(out) = frontmatter::set_tags(&updated, &merged) {
        updated = out;
    }
    fs_ops::atomic_write(path, updated.as_bytes())?;
    Ok(())
}

fn discover_files(inbox: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(inbox)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.path().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    files
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Env-driven provider wiring. An OpenAI-compatible endpoint registers both
/// the fast first-stage model and a precise refine model.
pub fn build_registry(cfg: &AppConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    if let Some(key) = std::env::var_os("OPENAI_API_KEY") {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let key = key.to_string_lossy().into_owned();
        registry = registry
            .with_classifier(
                "openai",
                Arc::new(OpenAiClassifier::new(OpenAiConfig {
                    api_key: key.clone(),
                    base_url: base_url.clone(),
                    model: "gpt-4o-mini".to_string(),
                })),
            )
            .with_classifier(
                "openai-precise",
                Arc::new(OpenAiClassifier::new(OpenAiConfig {
                    api_key: key,
                    base_url,
                    model: "gpt-4o".to_string(),
                })),
            );
    }
    registry.set_preferred(&cfg.classification.provider)
}

pub fn build_limiter(cfg: &AppConfig) -> RateLimiter {
    let profiles = cfg
        .limits
        .iter()
        .map(|(name, limit)| {
            let interval = Duration::from_millis(limit.interval_ms);
            let floor = limit
                .floor_ms
                .map(Duration::from_millis)
                .unwrap_or(interval / 2);
            (
                name.clone(),
                ProviderProfile::new(limit.slot_count, interval, floor),
            )
        })
        .collect();
    RateLimiter::new(profiles)
}
