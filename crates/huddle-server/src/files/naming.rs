//! Stored filename selection.
//!
//! Sender-supplied names are reduced to a basename, then made unique inside
//! the recipient's directory by appending `(n)` before the extension. The
//! unique name is claimed with a create-new open, so two uploads racing for
//! the same name cannot both win it.

use crate::errors::ServerError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

/// Give up after this many collisions in one directory.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Reduce a sender-supplied filename to a safe basename.
///
/// Both `/` and `\` are treated as separators regardless of platform.
///
/// # Errors
///
/// Returns `InvalidRequest` if nothing usable remains.
pub fn sanitize_filename(raw: &str) -> Result<String, ServerError> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(ServerError::InvalidRequest(format!(
            "unusable filename: {raw:?}"
        )));
    }
    Ok(cleaned.to_string())
}

/// The `n`th candidate for `filename`: `report.pdf`, `report(1).pdf`, ...
#[must_use]
pub fn candidate_name(filename: &str, n: u32) -> String {
    if n == 0 {
        return filename.to_string();
    }

    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}({n}).{ext}"),
        None => format!("{stem}({n})"),
    }
}

/// Create a new file in `dir` under the first free candidate of `filename`.
///
/// Returns the open handle, its path, and the stored name.
pub async fn create_unique(
    dir: &Path,
    filename: &str,
) -> Result<(File, PathBuf, String), ServerError> {
    for n in 0..=MAX_COLLISION_SUFFIX {
        let stored = candidate_name(filename, n);
        let path = dir.join(&stored);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file, path, stored)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(ServerError::Io(e)),
        }
    }

    Err(ServerError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free name for {filename} in {}", dir.display()),
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_basename() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("/etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini").unwrap(), "boot.ini");
        assert_eq!(sanitize_filename("dir/sub/notes.txt").unwrap(), "notes.txt");
        assert_eq!(sanitize_filename("bad\nname.txt").unwrap(), "badname.txt");
    }

    #[test]
    fn test_sanitize_rejects_unusable_names() {
        for raw in ["", "   ", ".", "..", "dir/", "../..", "a\\"] {
            assert!(
                sanitize_filename(raw).is_err(),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_name("report.pdf", 0), "report.pdf");
        assert_eq!(candidate_name("report.pdf", 1), "report(1).pdf");
        assert_eq!(candidate_name("report.pdf", 12), "report(12).pdf");
        assert_eq!(candidate_name("archive.tar.gz", 2), "archive.tar(2).gz");
        assert_eq!(candidate_name("README", 3), "README(3)");
        assert_eq!(candidate_name(".bashrc", 1), ".bashrc(1)");
    }

    #[tokio::test]
    async fn test_create_unique_appends_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();

        let (_f0, p0, s0) = create_unique(dir.path(), "report.pdf").await.unwrap();
        let (_f1, p1, s1) = create_unique(dir.path(), "report.pdf").await.unwrap();
        let (_f2, _p2, s2) = create_unique(dir.path(), "report.pdf").await.unwrap();

        assert_eq!(s0, "report.pdf");
        assert_eq!(s1, "report(1).pdf");
        assert_eq!(s2, "report(2).pdf");
        assert_eq!(p0, dir.path().join("report.pdf"));
        assert_eq!(p1, dir.path().join("report(1).pdf"));
        assert!(p1.exists());
    }

    #[tokio::test]
    async fn test_create_unique_concurrent_claims_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let path = path.clone();
            tasks.push(tokio::spawn(async move {
                create_unique(&path, "same.txt").await.unwrap().2
            }));
        }

        let mut names = Vec::new();
        for task in tasks {
            names.push(task.await.unwrap());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
    }
}
