//! Corpus consistency: finds dangling `[[..]]` references and incomplete
//! metadata, then repairs what it safely can.
//!
//! Repairs touch exactly the violating span of the one file being fixed;
//! every other byte passes through untouched.

use crate::cancel::CancelFlag;
use crate::config::AppConfig;
use crate::error::EngineError;
use crate::frontmatter;
use crate::fs_ops;
use crate::models::{AuditReport, BrokenLink, Category, RepairSummary};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const DEFAULT_STATUS: &str = "active";

#[derive(Debug, Clone, PartialEq)]
pub struct LinkRef {
    pub target: String,
    pub alias: Option<String>,
}

/// All `[[target]]` and `[[target|display]]` references in a document body.
/// The metadata block is not scanned.
pub fn extract_links(text: &str) -> Vec<LinkRef> {
    let body = frontmatter::strip(text);
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("[[") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("]]") else { break };
        let inner = &after[..end];
        if !inner.is_empty() && !inner.contains('\n') {
            let (target, alias) = match inner.split_once('|') {
                Some((t, a)) => (t, Some(a.to_string())),
                None => (inner, None),
            };
            out.push(LinkRef {
                target: target.to_string(),
                alias,
            });
        }
        rest = &after[end + 2..];
    }
    out
}

/// Known document names: basenames and extension-less relative paths, both
/// usable as link targets.
#[derive(Debug, Default)]
pub struct NameIndex {
    basenames: Vec<String>,
    rel_paths: Vec<String>,
}

impl NameIndex {
    pub fn insert(&mut self, rel_path: &Path) {
        let no_ext = rel_path.with_extension("");
        self.rel_paths
            .push(no_ext.to_string_lossy().replace('\\', "/"));
        if let Some(stem) = rel_path.file_stem().and_then(|s| s.to_str()) {
            self.basenames.push(stem.to_string());
        }
    }

    /// Full-path or trailing-segment resolution, then plain basename match.
    pub fn resolves(&self, target: &str) -> bool {
        if target.contains('/') {
            return self.rel_paths.iter().any(|p| {
                p == target || p.ends_with(&format!("/{target}"))
            });
        }
        self.basenames.iter().any(|b| b == target)
    }

    pub fn basenames(&self) -> &[String] {
        &self.basenames
    }
}

/// Suggestion ladder for a broken target, tried in order until one heuristic
/// yields a candidate:
/// exact case-insensitive match; substring containment either direction
/// (shortest, i.e. most specific, match wins); Levenshtein within a
/// length-scaled tolerance; and a ≥2-token overlap on underscore tokens.
pub fn suggest(target: &str, candidates: &[String]) -> Option<String> {
    let target_lower = target.to_lowercase();

    if let Some(hit) = candidates.iter().find(|c| c.to_lowercase() == target_lower) {
        return Some(hit.clone());
    }

    let containing: Option<&String> = candidates
        .iter()
        .filter(|c| {
            let c_lower = c.to_lowercase();
            c_lower.contains(&target_lower) || target_lower.contains(&c_lower)
        })
        .min_by_key(|c| c.len());
    if let Some(hit) = containing {
        return Some(hit.clone());
    }

    // Tolerance scales with length so short names are not over-corrected.
    let max_distance = std::cmp::max(3, target.len() / 3);
    let nearest = candidates
        .iter()
        .map(|c| (strsim::levenshtein(&target_lower, &c.to_lowercase()), c))
        .min_by_key(|(d, _)| *d);
    if let Some((distance, hit)) = nearest {
        if distance <= max_distance {
            return Some(hit.clone());
        }
    }

    let target_tokens: HashSet<String> = target_lower
        .split('_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if target_tokens.len() >= 2 {
        let best = candidates
            .iter()
            .map(|c| {
                let overlap = c
                    .to_lowercase()
                    .split('_')
                    .filter(|t| target_tokens.contains(*t))
                    .count();
                (overlap, c)
            })
            .max_by_key(|(overlap, _)| *overlap);
        if let Some((overlap, hit)) = best {
            if overlap >= 2 {
                return Some(hit.clone());
            }
        }
    }

    None
}

/// Full-corpus scan. Read-only; the report is consumed by `repair`.
pub fn audit(root: &Path, cfg: &AppConfig, cancel: &CancelFlag) -> anyhow::Result<AuditReport> {
    let docs = collect_documents(root, &cfg.scan.exclude, &cfg.vault.trash_dir)?;
    let mut index = NameIndex::default();
    for doc in &docs {
        index.insert(doc.strip_prefix(root).unwrap_or(doc));
    }

    let mut report = AuditReport::default();
    for doc in &docs {
        if cancel.is_cancelled() {
            info!("audit cancelled");
            break;
        }
        report.total_scanned += 1;
        let text = match std::fs::read_to_string(doc) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %doc.display(), error = %e, "skipping unreadable document");
                continue;
            }
        };

        for link in extract_links(&text) {
            if !index.resolves(&link.target) {
                let suggestion = suggest(&link.target, index.basenames());
                report.broken_links.push(BrokenLink {
                    file_path: doc.clone(),
                    link_target: link.target,
                    suggestion,
                });
            }
        }

        if !frontmatter::has_block(&text) {
            report.missing_frontmatter.push(doc.clone());
        } else {
            if frontmatter::get_field(&text, "category").is_none() {
                report.missing_category.push(doc.clone());
            }
            if frontmatter::tags(&text).is_empty() {
                report.untagged_files.push(doc.clone());
            }
        }
    }

    debug!(
        scanned = report.total_scanned,
        broken = report.broken_links.len(),
        "audit complete"
    );
    Ok(report)
}

/// Best-effort repair of one report. Accepted suggestions are substituted in
/// place; references no heuristic could resolve are stripped to their plain
/// text so no permanently dangling reference survives. Documents missing
/// metadata get a minimal block, or just the category field merged in.
pub fn repair(
    root: &Path,
    cfg: &AppConfig,
    report: &AuditReport,
    cancel: &CancelFlag,
) -> anyhow::Result<RepairSummary> {
    let mut summary = RepairSummary::default();

    // Group link fixes per file so each file is rewritten at most once, one
    // entry per distinct target: the whole-text substitution covers every
    // occurrence in a single pass.
    let mut per_file: BTreeMap<PathBuf, Vec<&BrokenLink>> = BTreeMap::new();
    for link in &report.broken_links {
        let entry = per_file.entry(link.file_path.clone()).or_default();
        if !entry.iter().any(|l| l.link_target == link.link_target) {
            entry.push(link);
        }
    }

    for (path, links) in per_file {
        if cancel.is_cancelled() {
            info!("repair cancelled");
            return Ok(summary);
        }
        match repair_links_in_file(&path, &links) {
            Ok((fixed, stripped)) => {
                summary.links_fixed += fixed;
                summary.links_stripped += stripped;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e.user_message(), "link repair failed");
                summary.failures += 1;
            }
        }
    }

    for path in &report.missing_frontmatter {
        if cancel.is_cancelled() {
            return Ok(summary);
        }
        match inject_frontmatter(root, cfg, path) {
            Ok(()) => summary.frontmatter_injected += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e.user_message(), "frontmatter injection failed");
                summary.failures += 1;
            }
        }
    }

    // Documents fully repaired above are disjoint from this set: the audit
    // files a document under exactly one of the two.
    for path in &report.missing_category {
        if cancel.is_cancelled() {
            return Ok(summary);
        }
        match fill_category(root, cfg, path) {
            Ok(()) => summary.categories_filled += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e.user_message(), "category fill failed");
                summary.failures += 1;
            }
        }
    }

    info!(
        fixed = summary.links_fixed,
        stripped = summary.links_stripped,
        injected = summary.frontmatter_injected,
        "repair complete"
    );
    Ok(summary)
}

fn repair_links_in_file(
    path: &Path,
    links: &[&BrokenLink],
) -> Result<(usize, usize), EngineError> {
    let mut text = std::fs::read_to_string(path)?;
    let mut fixed = 0;
    let mut stripped = 0;

    for link in links {
        match &link.suggestion {
            Some(suggestion) => {
                // Both the plain and the alias-prefixed form.
                text = text.replace(
                    &format!("[[{}]]", link.link_target),
                    &format!("[[{suggestion}]]"),
                );
                text = text.replace(
                    &format!("[[{}|", link.link_target),
                    &format!("[[{suggestion}|"),
                );
                fixed += 1;
            }
            None => {
                text = strip_link(&text, &link.link_target);
                stripped += 1;
            }
        }
    }

    fs_ops::atomic_write(path, text.as_bytes())?;
    Ok((fixed, stripped))
}

/// Remove the bracket syntax around every reference to `target`, leaving its
/// plain text (or the alias display text) behind.
fn strip_link(content: &str, target: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("[[") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("]]") else { break };
        let inner = &after_open[..end];
        let (t, alias) = match inner.split_once('|') {
            Some((t, a)) => (t, Some(a)),
            None => (inner, None),
        };
        out.push_str(&rest[..start]);
        if t == target {
            out.push_str(alias.unwrap_or(t));
        } else {
            out.push_str(&rest[start..start + 2 + end + 2]);
        }
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    out
}

fn infer_category(root: &Path, cfg: &AppConfig, path: &Path) -> Category {
    path.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .and_then(|c| c.as_os_str().to_str())
        .and_then(|folder| cfg.vault.folders.category_for(folder))
        .unwrap_or(Category::Resource)
}

fn inject_frontmatter(root: &Path, cfg: &AppConfig, path: &Path) -> Result<(), EngineError> {
    let text = std::fs::read_to_string(path)?;
    let category = infer_category(root, cfg, path);
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let block = frontmatter::minimal_block(category.as_str(), &today, DEFAULT_STATUS);
    let mut out = String::with_capacity(block.len() + text.len());
    out.push_str(&block);
    out.push_str(&text);
    fs_ops::atomic_write(path, out.as_bytes())?;
    Ok(())
}

fn fill_category(root: &Path, cfg: &AppConfig, path: &Path) -> Result<(), EngineError> {
    let text = std::fs::read_to_string(path)?;
    let category = infer_category(root, cfg, path);
    let Some(out) = frontmatter::insert_field(&text, "category", category.as_str()) else {
        return Err(EngineError::Unknown(
            "document lost its metadata block between audit and repair".into(),
        ));
    };
    fs_ops::atomic_write(path, out.as_bytes())?;
    Ok(())
}

fn collect_documents(
    root: &Path,
    excludes: &[String],
    trash_dir: &str,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut builder = GlobSetBuilder::new();
    for pat in excludes {
        builder.add(Glob::new(pat)?);
    }
    let exclude_set: GlobSet = builder.build()?;
    let trash = root.join(trash_dir);

    let mut docs = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || (!is_hidden(e.path()) && e.path() != trash && !exclude_set.is_match(e.path()))
        })
    {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("md") {
            docs.push(path.to_path_buf());
        }
    }
    Ok(docs)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, CacheConfig, ClassificationConfig, ScanConfig, VaultConfig};
    use std::collections::HashMap;
    use std::fs;

    fn test_config(root: &Path) -> AppConfig {
        AppConfig {
            vault: VaultConfig {
                root: root.to_string_lossy().into_owned(),
                inbox: "Inbox".to_string(),
                trash_dir: ".trash".to_string(),
                index_file_name: "INDEX.md".to_string(),
                folders: Default::default(),
            },
            scan: ScanConfig::default(),
            classification: ClassificationConfig::default(),
            limits: HashMap::new(),
            cache: CacheConfig::default(),
        }
    }

    #[test]
    fn extracts_plain_and_aliased_links() {
        let text = "---\ntags: []\n---\nSee [[Project_A]] and [[Notes_2024|last year]].";
        let links = extract_links(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target, "Project_A");
        assert_eq!(links[0].alias, None);
        assert_eq!(links[1].target, "Notes_2024");
        assert_eq!(links[1].alias.as_deref(), Some("last year"));
    }

    #[test]
    fn resolution_accepts_trailing_path_segments() {
        let mut index = NameIndex::default();
        index.insert(Path::new("Resources/Dev/Rust_Notes.md"));
        assert!(index.resolves("Rust_Notes"));
        assert!(index.resolves("Dev/Rust_Notes"));
        assert!(index.resolves("Resources/Dev/Rust_Notes"));
        assert!(!index.resolves("Other/Rust_Notes"));
        assert!(!index.resolves("Rust"));
    }

    #[test]
    fn suggestion_prefers_exact_case_insensitive() {
        let names = vec!["project_a".to_string(), "Project_A_Plan".to_string()];
        assert_eq!(suggest("Project_A", &names).as_deref(), Some("project_a"));
    }

    #[test]
    fn suggestion_substring_picks_most_specific() {
        let names = vec![
            "Meeting_Notes_Archive_2023".to_string(),
            "Meeting_Notes".to_string(),
        ];
        assert_eq!(
            suggest("Notes", &names).as_deref(),
            Some("Meeting_Notes"),
            "shortest containing name wins"
        );
    }

    #[test]
    fn suggestion_levenshtein_within_scaled_tolerance() {
        let names = vec!["Project_A".to_string()];
        // Distance 1, well within max(3, 8/3) = 3.
        assert_eq!(suggest("Projct_A", &names).as_deref(), Some("Project_A"));
    }

    #[test]
    fn suggestion_rejects_distant_names() {
        let names = vec!["Budget".to_string()];
        assert_eq!(suggest("Totally_Unrelated_Xyz", &names), None);
    }

    #[test]
    fn suggestion_token_overlap_requires_two_shared_tokens() {
        let names = vec!["Quarterly_Budget_Review_Full_Version_2026".to_string()];
        // Levenshtein distance is far beyond tolerance; two shared tokens
        // rescue it.
        assert_eq!(
            suggest("Budget_Review_Draft_Preliminary", &names).as_deref(),
            Some("Quarterly_Budget_Review_Full_Version_2026")
        );
        // One shared token is not enough.
        assert_eq!(suggest("Budget_Forecast_Extrapolation_Xy", &names), None);
    }

    #[test]
    fn audit_reports_broken_links_and_metadata_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cfg = test_config(root);
        fs::create_dir_all(root.join("Projects")).unwrap();
        fs::write(
            root.join("Projects/Project_A.md"),
            "---\ncategory: project\ntags: [x]\n---\nbody",
        )
        .unwrap();
        fs::write(
            root.join("Projects/Status.md"),
            "---\ntags: [x]\n---\nSee [[Projct_A]] and [[Gone_Forever_Qz]].",
        )
        .unwrap();
        fs::write(root.join("bare.md"), "no metadata at all").unwrap();

        let report = audit(root, &cfg, &CancelFlag::new()).unwrap();
        assert_eq!(report.total_scanned, 3);
        assert_eq!(report.broken_links.len(), 2);
        assert_eq!(report.missing_frontmatter, vec![root.join("bare.md")]);
        assert_eq!(report.missing_category, vec![root.join("Projects/Status.md")]);

        let by_target: HashMap<_, _> = report
            .broken_links
            .iter()
            .map(|l| (l.link_target.as_str(), l.suggestion.clone()))
            .collect();
        assert_eq!(by_target["Projct_A"].as_deref(), Some("Project_A"));
        assert_eq!(by_target["Gone_Forever_Qz"], None);
    }

    #[test]
    fn repair_fixes_stripping_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cfg = test_config(root);
        fs::create_dir_all(root.join("Projects")).unwrap();
        fs::write(
            root.join("Projects/Project_A.md"),
            "---\ncategory: project\ntags: [x]\n---\nbody",
        )
        .unwrap();
        fs::write(
            root.join("Projects/Status.md"),
            "---\ncategory: project\ntags: [x]\n---\nSee [[Projct_A]] and [[Totally_Unrelated_Xyz|that thing]].",
        )
        .unwrap();

        let report = audit(root, &cfg, &CancelFlag::new()).unwrap();
        let summary = repair(root, &cfg, &report, &CancelFlag::new()).unwrap();
        assert_eq!(summary.links_fixed, 1);
        assert_eq!(summary.links_stripped, 1);

        let text = fs::read_to_string(root.join("Projects/Status.md")).unwrap();
        assert!(text.contains("[[Project_A]]"));
        assert!(text.contains("that thing"));
        assert!(!text.contains("Totally_Unrelated_Xyz"));
        assert!(!text.contains("[[Totally"));

        // Second pass: nothing fixable remains, no dangling brackets.
        let second = audit(root, &cfg, &CancelFlag::new()).unwrap();
        assert!(second.broken_links.iter().all(|l| l.suggestion.is_none()));
        assert!(second.broken_links.is_empty());
    }

    #[test]
    fn repeated_broken_target_is_counted_once_and_fully_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cfg = test_config(root);
        fs::write(
            root.join("Project_A.md"),
            "---\ncategory: project\ntags: [x]\n---\nbody",
        )
        .unwrap();
        fs::write(
            root.join("note.md"),
            "---\ncategory: resource\ntags: [x]\n---\nFirst [[Projct_A]], later [[Projct_A]] again, and [[Gone_Forever_Qz]] twice: [[Gone_Forever_Qz]].",
        )
        .unwrap();

        let report = audit(root, &cfg, &CancelFlag::new()).unwrap();
        // The audit reports every occurrence.
        assert_eq!(report.broken_links.len(), 4);

        let summary = repair(root, &cfg, &report, &CancelFlag::new()).unwrap();
        // Repair counts targets, not occurrences.
        assert_eq!(summary.links_fixed, 1);
        assert_eq!(summary.links_stripped, 1);

        let text = fs::read_to_string(root.join("note.md")).unwrap();
        assert_eq!(text.matches("[[Project_A]]").count(), 2);
        assert!(!text.contains("Projct_A"));
        assert!(!text.contains("[[Gone_Forever_Qz]]"));
        assert_eq!(text.matches("Gone_Forever_Qz").count(), 2);
    }

    #[test]
    fn repair_injects_minimal_frontmatter_with_inferred_category() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cfg = test_config(root);
        fs::create_dir_all(root.join("Areas")).unwrap();
        fs::write(root.join("Areas/health.md"), "just text\n").unwrap();

        let report = audit(root, &cfg, &CancelFlag::new()).unwrap();
        let summary = repair(root, &cfg, &report, &CancelFlag::new()).unwrap();
        assert_eq!(summary.frontmatter_injected, 1);

        let text = fs::read_to_string(root.join("Areas/health.md")).unwrap();
        assert_eq!(frontmatter::get_field(&text, "category").as_deref(), Some("area"));
        assert_eq!(frontmatter::get_field(&text, "status").as_deref(), Some(DEFAULT_STATUS));
        assert!(frontmatter::tags(&text).is_empty());
        assert_eq!(frontmatter::strip(&text), "just text\n");
    }

    #[test]
    fn repair_merges_category_without_touching_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cfg = test_config(root);
        fs::create_dir_all(root.join("Resources")).unwrap();
        let original = "---\ntags: [keep, these]\ncreated: 2020-05-05\n---\nbody stays\n";
        fs::write(root.join("Resources/notes.md"), original).unwrap();

        let report = audit(root, &cfg, &CancelFlag::new()).unwrap();
        repair(root, &cfg, &report, &CancelFlag::new()).unwrap();

        let text = fs::read_to_string(root.join("Resources/notes.md")).unwrap();
        assert_eq!(
            frontmatter::get_field(&text, "category").as_deref(),
            Some("resource")
        );
        assert_eq!(
            frontmatter::get_field(&text, "created").as_deref(),
            Some("2020-05-05")
        );
        assert_eq!(frontmatter::tags(&text), vec!["keep", "these"]);
        assert_eq!(frontmatter::strip(&text), "body stays\n");
    }

    #[test]
    fn aliased_broken_link_with_suggestion_keeps_alias() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cfg = test_config(root);
        fs::write(
            root.join("Project_A.md"),
            "---\ncategory: project\ntags: [x]\n---\nbody",
        )
        .unwrap();
        fs::write(
            root.join("note.md"),
            "---\ncategory: resource\ntags: [x]\n---\n[[Projct_A|the big one]]",
        )
        .unwrap();

        let report = audit(root, &cfg, &CancelFlag::new()).unwrap();
        repair(root, &cfg, &report, &CancelFlag::new()).unwrap();
        let text = fs::read_to_string(root.join("note.md")).unwrap();
        assert!(text.contains("[[Project_A|the big one]]"));
    }
}
