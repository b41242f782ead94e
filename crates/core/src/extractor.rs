//! Content extraction collaborator.
//!
//! Format-specific binary extraction lives outside this engine; the trait
//! below is the seam. Extractors return sentinel-prefixed strings instead of
//! errors so one unreadable file never aborts a batch.

use std::path::{Path, PathBuf};
use tokio::task;
use tracing::debug;

/// Marks extractor output that is a placeholder, not document text.
pub const UNREADABLE_SENTINEL: &str = "[unreadable]";
pub const BINARY_SENTINEL: &str = "[binary]";

#[async_trait::async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Plain text for a file, truncated to `max_len` characters. Unreadable
    /// or unsupported files yield a sentinel-prefixed string, never an error.
    async fn extract(&self, path: &Path, max_len: usize) -> String;
}

/// Reads text formats directly; everything else gets a sentinel carrying the
/// guessed type so the classifier can still reason about the file name.
pub struct PlainTextExtractor;

#[async_trait::async_trait]
impl ContentExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path, max_len: usize) -> String {
        let path = path.to_path_buf();
        task::spawn_blocking(move || extract_blocking(&path, max_len))
            .await
            .unwrap_or_else(|_| format!("{UNREADABLE_SENTINEL} extraction task failed"))
    }
}

fn extract_blocking(path: &PathBuf, max_len: usize) -> String {
    let mime = guess_mime(path);
    if !is_texty(&mime) {
        debug!(path = %path.display(), mime, "binary file, sentinel text");
        return format!(
            "{BINARY_SENTINEL} {} ({})",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mime
        );
    }
    match std::fs::read_to_string(path) {
        Ok(text) => truncate_chars(&text, max_len),
        Err(e) => format!("{UNREADABLE_SENTINEL} {e}"),
    }
}

fn guess_mime(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| match ext.to_lowercase().as_str() {
            "txt" | "md" | "markdown" | "org" | "rst" | "log" => "text/plain",
            "rs" | "py" | "js" | "ts" | "json" | "toml" | "yaml" | "yml" | "csv" => "text/plain",
            "pdf" => "application/pdf",
            "doc" | "docx" => "application/msword",
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            _ => "application/octet-stream",
        })
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn is_texty(mime: &str) -> bool {
    mime.starts_with("text/")
}

fn truncate_chars(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        text.chars().take(max_len).collect()
    }
}
