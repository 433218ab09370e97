//! Artifact file naming.
//!
//! Every file a job produces lives flat in one directory, so the source path
//! is folded into a single file name: path separators and drive colons become
//! underscores, then optional track and language tags and the extension are
//! appended.

use std::path::{Path, PathBuf};

/// Characters folded into `_` when a source path becomes a file name.
const FOLDED_CHARS: &[char] = &['\\', '/', ':'];

/// Fold a source path into a flat file name stem.
///
/// # Examples
///
/// ```
/// use monitor_encoder::utils::filename::flatten_source;
///
/// assert_eq!(flatten_source(r"D:\raw\ep01.mkv"), "D__raw_ep01.mkv");
/// assert_eq!(flatten_source("a.mkv"), "a.mkv");
/// ```
pub fn flatten_source(src: &str) -> String {
    src.chars()
        .map(|c| if FOLDED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Build the file name of an artifact derived from `src`.
///
/// `.track<N>` is added when `track > 0` and `.<language>` when a language is
/// set, in that order, followed by `.<ext>`.
pub fn artifact_file_name(src: &str, ext: &str, language: Option<&str>, track: u32) -> String {
    let mut name = flatten_source(src);
    if track > 0 {
        name.push_str(&format!(".track{track}"));
    }
    if let Some(lang) = language.filter(|l| !l.is_empty()) {
        name.push('.');
        name.push_str(lang);
    }
    name.push('.');
    name.push_str(ext);
    name
}

/// Full path of an artifact in `dir`.
pub fn artifact_file_path(
    src: &str,
    dir: &Path,
    ext: &str,
    language: Option<&str>,
    track: u32,
) -> PathBuf {
    dir.join(artifact_file_name(src, ext, language, track))
}
