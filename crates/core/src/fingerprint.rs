//! Content fingerprinting.
//!
//! Two hash flavors over one primitive: `full_hash` covers every byte and
//! drives change detection; `dedup_hash` ignores the leading metadata block
//! of text files so a tag edit does not make two copies look distinct.

use std::fs;
use std::io::Read;
use std::path::Path;

/// Bump when the hashing scheme changes; entries recorded under another
/// version are treated as cache misses.
pub const ALGORITHM_VERSION: &str = "blake3-v1";

const STREAM_CHUNK: usize = 1024 * 1024;

const TEXT_EXTENSIONS: &[&str] = &[
    "md", "txt", "markdown", "org", "rst", "log", "csv", "json", "toml", "yaml", "yml",
];

pub fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Hash of the complete file content, streamed in 1 MiB chunks so memory use
/// stays constant regardless of file size.
pub fn full_hash(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; STREAM_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Duplicate-detection hash: text files are hashed with the leading metadata
/// block stripped; everything else falls back to the streaming full hash.
pub fn dedup_hash(path: &Path) -> std::io::Result<String> {
    if is_text_file(path) {
        match fs::read_to_string(path) {
            Ok(text) => return Ok(hash_bytes(crate::frontmatter::strip(&text).as_bytes())),
            // Mislabeled binary; fall through to the byte stream.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {}
            Err(e) => return Err(e),
        }
    }
    full_hash(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn same_content_hashes_identically() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        fs::write(&a, "hello world").unwrap();
        fs::write(&b, "hello world").unwrap();
        assert_eq!(full_hash(&a).unwrap(), full_hash(&b).unwrap());
        assert_eq!(dedup_hash(&a).unwrap(), dedup_hash(&b).unwrap());
    }

    #[test]
    fn body_edit_changes_both_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        fs::write(&path, "---\ntags: [a]\n---\nbody one\n").unwrap();
        let full_before = full_hash(&path).unwrap();
        let dedup_before = dedup_hash(&path).unwrap();
        fs::write(&path, "---\ntags: [a]\n---\nbody two\n").unwrap();
        assert_ne!(full_hash(&path).unwrap(), full_before);
        assert_ne!(dedup_hash(&path).unwrap(), dedup_before);
    }

    #[test]
    fn metadata_only_edit_changes_full_but_not_dedup_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        fs::write(&path, "---\ntags: [a]\n---\nsame body\n").unwrap();
        let full_before = full_hash(&path).unwrap();
        let dedup_before = dedup_hash(&path).unwrap();
        fs::write(&path, "---\ntags: [a, b, c]\n---\nsame body\n").unwrap();
        assert_ne!(full_hash(&path).unwrap(), full_before);
        assert_eq!(dedup_hash(&path).unwrap(), dedup_before);
    }

    #[test]
    fn binary_extension_uses_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, b"---\nnot frontmatter\n---\npayload").unwrap();
        assert_eq!(dedup_hash(&path).unwrap(), full_hash(&path).unwrap());
    }

    #[test]
    fn large_file_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data = vec![0xabu8; 3 * 1024 * 1024 + 17];
        fs::write(&path, &data).unwrap();
        assert_eq!(full_hash(&path).unwrap(), hash_bytes(&data));
    }
}
