//! Placement policy: turns one classification result plus corpus state into
//! a terminal outcome. Pure decisions, no I/O.

use crate::config::{FolderNames, VaultConfig};
use crate::models::{
    Category, ClassificationResult, ConfirmationReason, PlacementOutcome,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};
use walkdir::WalkDir;

const LOW_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Read-only view of the corpus a placement decision needs: which projects
/// exist, and which file names each folder already holds.
#[derive(Debug, Clone, Default)]
pub struct VaultSnapshot {
    pub projects: Vec<String>,
    pub folder_files: HashMap<String, HashSet<String>>,
    pub index_file_name: String,
    pub folders: FolderNames,
}

impl VaultSnapshot {
    pub fn scan(root: &Path, vault: &VaultConfig, excludes: &[String]) -> anyhow::Result<Self> {
        let exclude_set = build_globset(excludes)?;
        let mut folder_files: HashMap<String, HashSet<String>> = HashMap::new();
        let mut projects = Vec::new();

        let projects_root = root.join(&vault.folders.projects);
        if projects_root.is_dir() {
            for entry in std::fs::read_dir(&projects_root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    projects.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            projects.sort();
        }

        for entry in WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || (!is_hidden(e.path()) && !exclude_set.is_match(e.path()))
            })
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let rel = path.strip_prefix(root).unwrap_or(path);
            let folder = rel
                .parent()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let name = rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            folder_files.entry(folder).or_default().insert(name);
        }

        Ok(Self {
            projects,
            folder_files,
            index_file_name: vault.index_file_name.clone(),
            folders: vault.folders.clone(),
        })
    }

    fn match_project(&self, name: &str) -> Option<&str> {
        self.projects
            .iter()
            .find(|p| p.eq_ignore_ascii_case(name))
            .map(|p| p.as_str())
    }

    fn holds(&self, folder: &str, file_name: &str) -> bool {
        self.folder_files
            .get(folder)
            .map(|names| names.contains(file_name))
            .unwrap_or(false)
    }
}

/// Decision policy, first match wins:
/// low confidence, unmatched project, index-name conflict, existing-name
/// conflict, auto-place. A project folder is never silently created: with no
/// matching project the file never auto-places there, whatever the
/// confidence.
pub fn resolve(
    file_name: &str,
    result: ClassificationResult,
    snapshot: &VaultSnapshot,
) -> PlacementOutcome {
    let mut result = result;
    // Classifier output is untrusted: a destination that is absolute or
    // steps outside the vault is discarded before it can route a move.
    if !is_vault_relative(&result.destination_folder) {
        result.destination_folder = String::new();
    }
    if result.destination_folder.trim().is_empty() {
        result.destination_folder = snapshot.folders.folder_for(result.category).to_string();
    }

    // Strictly below the threshold; exactly 0.5 passes.
    if result.confidence < LOW_CONFIDENCE_THRESHOLD {
        let alternatives = low_confidence_alternatives(&result, snapshot);
        return PlacementOutcome::NeedsConfirmation {
            reason: ConfirmationReason::LowConfidence,
            alternatives,
        };
    }

    if result.category == Category::Project {
        let matched = result
            .project
            .as_deref()
            .and_then(|name| snapshot.match_project(name))
            .map(str::to_string);
        match matched {
            Some(canonical) => {
                result.destination_folder =
                    format!("{}/{}", snapshot.folders.projects, canonical);
                result.project = Some(canonical);
            }
            None => {
                let alternatives = unmatched_project_alternatives(&result, snapshot);
                return PlacementOutcome::NeedsConfirmation {
                    reason: ConfirmationReason::UnmatchedProject,
                    alternatives,
                };
            }
        }
    }

    if file_name.eq_ignore_ascii_case(&snapshot.index_file_name) {
        return PlacementOutcome::NeedsConfirmation {
            reason: ConfirmationReason::IndexNameConflict,
            alternatives: vec![result],
        };
    }

    if snapshot.holds(&result.destination_folder, file_name) {
        return PlacementOutcome::NeedsConfirmation {
            reason: ConfirmationReason::ExistingNameConflict,
            alternatives: vec![result],
        };
    }

    PlacementOutcome::AutoPlace(result)
}

/// The original proposal plus one candidate per other category, same tags and
/// summary, pinned at the threshold confidence.
fn low_confidence_alternatives(
    result: &ClassificationResult,
    snapshot: &VaultSnapshot,
) -> Vec<ClassificationResult> {
    let mut alternatives = vec![result.clone()];
    for category in Category::ALL {
        if category == result.category {
            continue;
        }
        let mut alt = result.clone();
        alt.category = category;
        alt.confidence = LOW_CONFIDENCE_THRESHOLD;
        alt.destination_folder = snapshot.folders.folder_for(category).to_string();
        if category != Category::Project {
            alt.project = None;
        }
        alternatives.push(alt);
    }
    alternatives
}

/// Ranked fallbacks when the classifier wanted a project that does not exist:
/// resource first, then area, then archive. The archive candidate keeps the
/// suggested project name in its destination so the reviewer can see what the
/// classifier had in mind.
fn unmatched_project_alternatives(
    result: &ClassificationResult,
    snapshot: &VaultSnapshot,
) -> Vec<ClassificationResult> {
    let fallback = |category: Category, confidence: f32| {
        let mut alt = result.clone();
        alt.category = category;
        alt.confidence = confidence;
        alt.project = None;
        alt.destination_folder = snapshot.folders.folder_for(category).to_string();
        alt
    };

    let resource = fallback(Category::Resource, 0.7);
    let area = fallback(Category::Area, 0.6);
    let mut archive = fallback(Category::Archive, 0.5);
    if let Some(suggested) = result.project.as_deref() {
        archive.destination_folder =
            format!("{}/{}", snapshot.folders.archive, suggested);
    }
    vec![resource, area, archive]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> VaultSnapshot {
        let mut folder_files = HashMap::new();
        folder_files.insert(
            "Resources/Dev".to_string(),
            ["taken.md".to_string()].into_iter().collect(),
        );
        VaultSnapshot {
            projects: vec!["Project_A".to_string(), "Website".to_string()],
            folder_files,
            index_file_name: "INDEX.md".to_string(),
            folders: FolderNames::default(),
        }
    }

    fn result(category: Category, confidence: f32) -> ClassificationResult {
        ClassificationResult {
            category,
            tags: vec!["t1".to_string()],
            summary: "a note".to_string(),
            destination_folder: "Resources/Dev".to_string(),
            project: None,
            confidence,
            related_notes: Vec::new(),
        }
    }

    #[test]
    fn low_confidence_offers_all_four_categories() {
        let outcome = resolve("note.md", result(Category::Resource, 0.3), &snapshot());
        match outcome {
            PlacementOutcome::NeedsConfirmation {
                reason: ConfirmationReason::LowConfidence,
                alternatives,
            } => {
                assert_eq!(alternatives.len(), 4);
                assert_eq!(alternatives[0].category, Category::Resource);
                assert_eq!(alternatives[0].confidence, 0.3);
                for alt in &alternatives[1..] {
                    assert_eq!(alt.confidence, 0.5);
                    assert_eq!(alt.tags, alternatives[0].tags);
                }
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn confidence_exactly_half_is_not_low() {
        let outcome = resolve("note.md", result(Category::Area, 0.5), &snapshot());
        assert!(outcome.is_auto());
    }

    #[test]
    fn project_without_name_needs_confirmation() {
        let outcome = resolve("note.md", result(Category::Project, 0.95), &snapshot());
        match outcome {
            PlacementOutcome::NeedsConfirmation {
                reason: ConfirmationReason::UnmatchedProject,
                alternatives,
            } => {
                assert_eq!(alternatives[0].category, Category::Resource);
                assert_eq!(alternatives[0].confidence, 0.7);
                assert_eq!(alternatives[1].category, Category::Area);
                assert_eq!(alternatives[1].confidence, 0.6);
                assert_eq!(alternatives[2].category, Category::Archive);
                assert_eq!(alternatives[2].confidence, 0.5);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn project_with_unknown_name_still_needs_confirmation() {
        let mut r = result(Category::Project, 0.99);
        r.project = Some("Moonshot".to_string());
        r.related_notes = vec![crate::models::RelatedNote {
            name: "taken.md".to_string(),
            context: "same topic".to_string(),
        }];
        let outcome = resolve("note.md", r, &snapshot());
        match outcome {
            PlacementOutcome::NeedsConfirmation {
                reason: ConfirmationReason::UnmatchedProject,
                alternatives,
            } => {
                // Archive fallback keeps the suggested name visible.
                assert!(alternatives[2].destination_folder.ends_with("Moonshot"));
                // Fallbacks carry the classifier's context unchanged.
                for alt in &alternatives {
                    assert_eq!(alt.related_notes.len(), 1);
                    assert_eq!(alt.tags, vec!["t1".to_string()]);
                }
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn project_name_is_normalized_to_existing_case() {
        let mut r = result(Category::Project, 0.9);
        r.project = Some("project_a".to_string());
        let outcome = resolve("note.md", r, &snapshot());
        match outcome {
            PlacementOutcome::AutoPlace(placed) => {
                assert_eq!(placed.project.as_deref(), Some("Project_A"));
                assert_eq!(placed.destination_folder, "Projects/Project_A");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn index_name_is_reserved() {
        let outcome = resolve("index.md", result(Category::Resource, 0.9), &snapshot());
        assert!(matches!(
            outcome,
            PlacementOutcome::NeedsConfirmation {
                reason: ConfirmationReason::IndexNameConflict,
                ..
            }
        ));
    }

    #[test]
    fn occupied_destination_name_conflicts() {
        let outcome = resolve("taken.md", result(Category::Resource, 0.9), &snapshot());
        assert!(matches!(
            outcome,
            PlacementOutcome::NeedsConfirmation {
                reason: ConfirmationReason::ExistingNameConflict,
                ..
            }
        ));
    }

    #[test]
    fn confident_unconflicted_result_auto_places() {
        let outcome = resolve("fresh.md", result(Category::Resource, 0.9), &snapshot());
        assert!(outcome.is_auto());
    }

    #[test]
    fn traversal_destination_is_redirected_to_category_folder() {
        let mut r = result(Category::Resource, 0.95);
        r.destination_folder = "../escaped".to_string();
        match resolve("note.md", r, &snapshot()) {
            PlacementOutcome::AutoPlace(placed) => {
                assert_eq!(placed.destination_folder, "Resources");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn absolute_destination_is_redirected_to_category_folder() {
        let mut r = result(Category::Archive, 0.9);
        r.destination_folder = "/tmp/elsewhere".to_string();
        match resolve("note.md", r, &snapshot()) {
            PlacementOutcome::AutoPlace(placed) => {
                assert_eq!(placed.destination_folder, "Archive");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn empty_destination_defaults_to_category_folder() {
        let mut r = result(Category::Archive, 0.9);
        r.destination_folder = String::new();
        match resolve("fresh.md", r, &snapshot()) {
            PlacementOutcome::AutoPlace(placed) => {
                assert_eq!(placed.destination_folder, "Archive");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}

fn is_vault_relative(folder: &str) -> bool {
    let path = Path::new(folder);
    !path.is_absolute() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
