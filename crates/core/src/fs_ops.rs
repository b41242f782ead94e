//! Local file operations: atomic writes, conflict-suffixed moves, and a
//! recoverable vault-local trash.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Whole-content atomic write: write a sibling temp file, then rename over
/// the target. A crash mid-write leaves either the old content or the new,
/// never a torn file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let mut tmp = parent.join(format!(".{file_name}.tmp"));
    let mut counter = 0;
    while tmp.exists() {
        counter += 1;
        tmp = parent.join(format!(".{file_name}.tmp{counter}"));
    }
    fs::write(&tmp, contents)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Next free `stem_N.ext` name next to an occupied destination.
pub fn resolve_conflict(dest: &Path) -> PathBuf {
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{stem}_{counter}")
        } else {
            format!("{stem}_{counter}.{ext}")
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Move a file, suffixing the name if the destination is taken. Returns the
/// path the file actually landed at.
pub fn move_with_conflict(from: &Path, to: &Path) -> Result<PathBuf> {
    let target = if to.exists() {
        resolve_conflict(to)
    } else {
        to.to_path_buf()
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    rename_or_copy(from, &target)?;
    Ok(target)
}

/// Recoverable delete: move into the trash directory under a collision-free
/// name. Nothing in this engine removes a file permanently.
pub fn move_to_trash(src: &Path, trash_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(trash_dir)?;
    let file_name = src
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "file".into());
    let mut candidate = trash_dir.join(&file_name);
    if candidate.exists() {
        candidate = resolve_conflict(&candidate);
    }
    rename_or_copy(src, &candidate)?;
    Ok(candidate)
}

// Rename when possible; cross-device moves fall back to copy-then-delete.
fn rename_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
