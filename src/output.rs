/// Output naming: filename sanitising and collision-free paths
use std::path::{Path, PathBuf};

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Make a title safe to use as a file name on every common filesystem.
///
/// Invalid characters and control characters become `_`, whitespace runs become
/// a single `_`, and leading/trailing dots and underscores are dropped.
pub fn sanitize_filename(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| {
            if INVALID_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let joined = replaced.split_whitespace().collect::<Vec<_>>().join("_");
    let trimmed = joined.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `dir/stem.ext`, or `dir/stem_1.ext`, `dir/stem_2.ext`, ... if taken
pub fn unique_file_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{}.{}", stem, extension));
    let mut counter = 0;
    while candidate.exists() {
        counter += 1;
        candidate = dir.join(format!("{}_{}.{}", stem, counter, extension));
    }
    candidate
}

/// Page title cleaned for display: the text before the first `|`, `-` or `–`
pub fn clean_page_title(title: &str) -> String {
    title
        .split(['|', '-', '–'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}
