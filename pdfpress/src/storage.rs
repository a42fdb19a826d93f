//! File naming and storage helpers for uploaded and compressed files.
//!
//! Every file the service writes lives under one of two directories (uploads and compressed
//! output) and is named `{token}_{name}`, where `token` is a fresh random UUID. The random token
//! is the only thing keeping concurrent requests from clobbering each other's files, so nothing
//! here takes locks.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, error, info};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Suffix inserted before the extension of every compressed output file.
pub const COMPRESSED_SUFFIX: &str = "_compressed";

const WINDOWS_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9", "LPT1", "LPT2", "LPT3",
    "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Lowercased suffix after the last dot, if the filename has one.
pub fn extension(filename: &str) -> Option<String> {
    filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Returns true iff `filename` has a dot and its lowercased suffix is one of `allowed`.
pub fn is_allowed_extension(filename: &str, allowed: &[String]) -> bool {
    extension(filename).is_some_and(|ext| allowed.iter().any(|candidate| candidate.eq_ignore_ascii_case(&ext)))
}

/// Reduce a client-supplied filename to something safe to use as a single path component.
///
/// Accented characters are folded to their ASCII base (`résumé` becomes `resume`), path
/// separators turn into word breaks, runs of whitespace become `_`, anything outside
/// `[A-Za-z0-9_.-]` (including non-ASCII without an ASCII base) is dropped, and leading/trailing dots and
/// underscores are stripped. Windows device names such as `CON` get a `_` prefix.
///
/// Returns `None` if nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let spaced: String = raw
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return None;
    }

    let stem = trimmed.split('.').next().unwrap_or_default().to_ascii_uppercase();
    if WINDOWS_DEVICE_NAMES.contains(&stem.as_str()) {
        Some(format!("_{trimmed}"))
    } else {
        Some(trimmed.to_string())
    }
}

/// Prefix `safe_name` with a random 32 hex character token.
pub fn unique_storage_name(safe_name: &str) -> String {
    format!("{}_{}", Uuid::new_v4().simple(), safe_name)
}

/// Split `name` into stem and extension (including the dot).
///
/// A dot only starts an extension if something other than dots precedes it, so `.hidden` has no
/// extension and `archive.tar.gz` splits as `archive.tar` + `.gz`.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Path of the compressed output for `input_storage_name`, creating `output_dir` if needed.
pub async fn output_path_for(input_storage_name: &str, output_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(output_dir).await?;

    let (stem, ext) = split_extension(input_storage_name);
    Ok(output_dir.join(format!("{stem}{COMPRESSED_SUFFIX}{ext}")))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Size of the file at `path` in kilobytes, rounded to two decimals. Missing files are 0.
pub async fn size_of(path: &Path) -> f64 {
    match fs::metadata(path).await {
        Ok(metadata) => round2(metadata.len() as f64 / 1024.0),
        Err(_) => 0.0,
    }
}

/// Percentage saved going from `original` to `compressed`, rounded to two decimals.
pub fn reduction_percent(original: f64, compressed: f64) -> f64 {
    if original <= 0.0 {
        return 0.0;
    }
    round2((original - compressed) / original * 100.0)
}

/// Remove `path` if it exists.
///
/// Returns `Ok(false)` when there was nothing to remove; any other OS error is returned.
pub async fn delete_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete `path`, logging instead of failing. `what` describes the file in log lines.
pub async fn remove_best_effort(path: &Path, what: &str) {
    match delete_if_exists(path).await {
        Ok(true) => info!(path = %path.display(), "Deleted {}", what),
        Ok(false) => debug!(path = %path.display(), "No {} to delete", what),
        Err(e) => error!(path = %path.display(), error = %e, "Failed to delete {}", what),
    }
}

/// Resolve a requested download name to a path inside `output_dir`.
///
/// Only a single plain path component is accepted; anything that could walk out of the
/// directory (separators, `..`, absolute paths) resolves to `None`.
pub fn resolve_download(output_dir: &Path, requested: &str) -> Option<PathBuf> {
    let mut components = Path::new(requested).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(output_dir.join(name)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn pdf_only() -> Vec<String> {
        vec!["pdf".to_string()]
    }

    #[test]
    fn test_allowed_extension_is_case_insensitive() {
        assert!(is_allowed_extension("report.PDF", &pdf_only()));
        assert!(is_allowed_extension("report.pdf", &pdf_only()));
        assert!(is_allowed_extension("archive.tar.pdf", &pdf_only()));
    }

    #[test]
    fn test_disallowed_extensions() {
        for name in ["report", "pdf", "notes.txt", "report.pdf.exe", "report.", ""] {
            assert!(!is_allowed_extension(name, &pdf_only()), "{name} should be rejected");
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_filename("My cool report.pdf").as_deref(), Some("My_cool_report.pdf"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("etc_passwd"));
        assert_eq!(sanitize_filename("C:\\Users\\me\\scan (1).pdf").as_deref(), Some("C_Users_me_scan_1.pdf"));
        assert_eq!(sanitize_filename("..hidden.pdf").as_deref(), Some("hidden.pdf"));
        assert_eq!(sanitize_filename("con.pdf").as_deref(), Some("_con.pdf"));
    }

    #[test]
    fn test_sanitize_filename_folds_accents() {
        assert_eq!(sanitize_filename("résumé.pdf").as_deref(), Some("resume.pdf"));
        assert_eq!(sanitize_filename("Übersicht 2024.pdf").as_deref(), Some("Ubersicht_2024.pdf"));
        assert_eq!(sanitize_filename("ﬁnal.pdf").as_deref(), Some("final.pdf"));
    }

    #[test]
    fn test_sanitize_filename_empty_result() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("../.."), None);
        assert_eq!(sanitize_filename("日本語"), None);
    }

    #[test]
    fn test_unique_storage_name_never_collides() {
        let names: HashSet<String> = (0..10_000).map(|_| unique_storage_name("report.pdf")).collect();
        assert_eq!(names.len(), 10_000);

        let name = names.iter().next().unwrap();
        let (token, rest) = name.split_once('_').unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest, "report.pdf");
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("abc_report.pdf"), ("abc_report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
        assert_eq!(split_extension("noext"), ("noext", ""));
    }

    #[tokio::test]
    async fn test_output_path_for_creates_directory() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");

        let path = output_path_for("abc_report.pdf", &out).await.unwrap();

        assert_eq!(path, out.join("abc_report_compressed.pdf"));
        assert!(out.is_dir());
    }

    #[tokio::test]
    async fn test_size_of() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("two_kb.bin");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();

        assert_eq!(size_of(&path).await, 2.0);
        assert_eq!(size_of(&dir.path().join("missing")).await, 0.0);

        std::fs::write(&path, vec![0u8; 1000]).unwrap();
        assert_eq!(size_of(&path).await, 0.98);
    }

    #[test]
    fn test_reduction_percent() {
        assert_eq!(reduction_percent(1000.0, 400.0), 60.0);
        assert_eq!(reduction_percent(0.0, 0.0), 0.0);
        assert_eq!(reduction_percent(3.0, 2.0), 33.33);
        // Compression can make things bigger
        assert_eq!(reduction_percent(100.0, 150.0), -50.0);
    }

    #[tokio::test]
    async fn test_delete_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        assert!(delete_if_exists(&path).await.unwrap());
        assert!(!path.exists());
        assert!(!delete_if_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_exists_surfaces_other_errors() {
        let dir = TempDir::new().unwrap();
        // Removing a directory with remove_file is an error other than NotFound
        assert!(delete_if_exists(dir.path()).await.is_err());
    }

    #[test]
    fn test_resolve_download() {
        let out = Path::new("/srv/compressed");
        assert_eq!(
            resolve_download(out, "abc_report_compressed.pdf"),
            Some(out.join("abc_report_compressed.pdf"))
        );
        assert_eq!(resolve_download(out, "../secret.pdf"), None);
        assert_eq!(resolve_download(out, "nested/file.pdf"), None);
        assert_eq!(resolve_download(out, "/etc/passwd"), None);
        assert_eq!(resolve_download(out, ".."), None);
        assert_eq!(resolve_download(out, ""), None);
    }
}
