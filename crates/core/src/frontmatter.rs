//! Minimal frontmatter handling for the `---`-delimited metadata block at the
//! top of vault documents.
//!
//! Mutating helpers only touch the span they change; every other byte of the
//! document passes through untouched.

struct BlockBounds {
    /// Byte offset of the first content byte inside the block.
    content_start: usize,
    /// Byte offset just past the last content byte (start of closing `---`).
    content_end: usize,
    /// Byte offset of the first body byte after the closing delimiter line.
    body_start: usize,
}

fn is_delim(line: &str) -> bool {
    line.trim_end_matches('\r').trim_end() == "---"
}

fn block_bounds(text: &str) -> Option<BlockBounds> {
    let mut offset = 0usize;
    let mut lines = text.split_inclusive('\n');

    let first = lines.next()?;
    if !is_delim(first) {
        return None;
    }
    offset += first.len();
    let content_start = offset;

    for line in lines {
        if is_delim(line) {
            return Some(BlockBounds {
                content_start,
                content_end: offset,
                body_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

pub fn has_block(text: &str) -> bool {
    block_bounds(text).is_some()
}

/// Document body with the leading metadata block removed. Documents without
/// a block pass through whole.
pub fn strip(text: &str) -> &str {
    match block_bounds(text) {
        Some(b) => &text[b.body_start..],
        None => text,
    }
}

/// Raw content of the metadata block, without delimiters.
pub fn block(text: &str) -> Option<&str> {
    block_bounds(text).map(|b| &text[b.content_start..b.content_end])
}

/// Scalar field lookup inside the block (`key: value`).
pub fn get_field(text: &str, key: &str) -> Option<String> {
    let block = block(text)?;
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix(key) {
            if let Some(value) = rest.strip_prefix(':') {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// Insert `key: value` just before the closing delimiter, leaving every other
/// byte alone. Returns `None` when the document has no block.
pub fn insert_field(text: &str, key: &str, value: &str) -> Option<String> {
    let b = block_bounds(text)?;
    let mut out = String::with_capacity(text.len() + key.len() + value.len() + 3);
    out.push_str(&text[..b.content_end]);
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
    out.push_str(&text[b.content_end..]);
    Some(out)
}

/// Tags from the block: inline `tags: [a, b]` or a dash list under `tags:`.
pub fn tags(text: &str) -> Vec<String> {
    let Some(block) = block(text) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut in_list = false;
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("tags:") {
            let rest = rest.trim();
            if let Some(inline) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                for tag in inline.split(',') {
                    let tag = tag.trim().trim_matches('"').trim_matches('\'');
                    if !tag.is_empty() {
                        out.push(tag.to_string());
                    }
                }
                return out;
            }
            in_list = rest.is_empty();
            continue;
        }
        if in_list {
            let trimmed = line.trim_start();
            if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix('-')) {
                let tag = item.trim().trim_matches('"').trim_matches('\'');
                if !tag.is_empty() {
                    out.push(tag.to_string());
                }
            } else {
                in_list = false;
            }
        }
    }
    out
}

/// Replace (or insert) the tags field with an inline list, preserving every
/// unrelated line. Order of existing tags is kept; new tags append.
pub fn set_tags(text: &str, tags: &[String]) -> Option<String> {
    let b = block_bounds(text)?;
    let block = &text[b.content_start..b.content_end];
    let rendered = format!("tags: [{}]\n", tags.join(", "));

    let mut new_block = String::with_capacity(block.len() + rendered.len());
    let mut replaced = false;
    let mut in_list = false;
    for line in block.split_inclusive('\n') {
        let bare = line.trim_end_matches('\n');
        if bare.trim_start().starts_with("tags:") {
            new_block.push_str(&rendered);
            replaced = true;
            in_list = bare.trim_start() == "tags:";
            continue;
        }
        if in_list {
            let trimmed = bare.trim_start();
            if trimmed.starts_with('-') {
                continue;
            }
            in_list = false;
        }
        new_block.push_str(line);
    }
    if !replaced {
        new_block.push_str(&rendered);
    }

    let mut out = String::with_capacity(text.len() + rendered.len());
    out.push_str(&text[..b.content_start]);
    out.push_str(&new_block);
    out.push_str(&text[b.content_end..]);
    Some(out)
}

/// Union of two tag sets, first-seen order.
pub fn merge_tags(base: &[String], extra: &[String]) -> Vec<String> {
    let mut out: Vec<String> = base.to_vec();
    for tag in extra {
        if !out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            out.push(tag.clone());
        }
    }
    out
}

/// Minimal block for documents that have none at all.
pub fn minimal_block(category: &str, date: &str, status: &str) -> String {
    format!("---\ncategory: {category}\ntags: []\ncreated: {date}\nstatus: {status}\n---\n")
}
