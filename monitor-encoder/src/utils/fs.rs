//! Filesystem helpers shared across modules.
//!
//! Errors carry the operation and the path. Descriptor claims are plain
//! renames; artifact moves fall back to a copy when the output directory sits
//! on another filesystem.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Fail unless `path` is an existing directory.
pub fn require_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(Error::config(format!(
            "directory does not exist: {}",
            path.display()
        )))
    }
}

fn target_in(file: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", file.display()),
        )
    })?;
    Ok(dir.join(name))
}

/// Rename `file` into `dir`, keeping its file name.
///
/// Only a rename is attempted, so the file is either still in its old place
/// or fully in the new one. Fails with `CrossesDevices` when `dir` is on
/// another filesystem.
pub async fn claim_into_dir(file: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let target = target_in(file, dir)?;
    tokio::fs::rename(file, &target).await?;
    Ok(target)
}

/// Move `file` into `dir`, keeping its file name. Returns the new path.
///
/// When a rename is not possible the file is copied under a `.part` name,
/// renamed into place and only then removed from its old location.
pub async fn move_into_dir(file: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let target = target_in(file, dir)?;

    match tokio::fs::rename(file, &target).await {
        Ok(()) => return Ok(target),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(e),
        Err(e) => {
            debug!(from = %file.display(), to = %target.display(), error = %e, "Rename failed, copying instead");
        }
    }

    let mut partial = target.clone().into_os_string();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    if let Err(e) = tokio::fs::copy(file, &partial).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&partial, &target).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    tokio::fs::remove_file(file).await?;
    Ok(target)
}

/// Move a file into a directory, reporting `failed to move <path>` on error.
pub async fn move_artifact(file: &Path, dir: &Path) -> Result<PathBuf> {
    move_into_dir(file, dir).await.map_err(|source| Error::Move {
        path: file.to_path_buf(),
        source,
    })
}

/// Delete a file, reporting `failed to delete <path>` on error.
pub async fn delete_artifact(file: &Path) -> Result<()> {
    tokio::fs::remove_file(file)
        .await
        .map_err(|source| Error::Delete {
            path: file.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn move_keeps_file_name() {
        let from = tempfile::tempdir().unwrap();
        let to = tempfile::tempdir().unwrap();
        let file = from.path().join("a.json");
        tokio::fs::write(&file, b"{}").await.unwrap();

        let moved = move_artifact(&file, to.path()).await.unwrap();
        assert_eq!(moved, to.path().join("a.json"));
        assert!(moved.exists());
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn claim_is_a_rename() {
        let root = tempfile::tempdir().unwrap();
        let monitor = root.path().join("monitor");
        let work = root.path().join("work");
        std::fs::create_dir_all(&monitor).unwrap();
        std::fs::create_dir_all(&work).unwrap();
        let file = monitor.join("job.json");
        std::fs::write(&file, b"{}").unwrap();

        let claimed = claim_into_dir(&file, &work).await.unwrap();
        assert_eq!(claimed, work.join("job.json"));
        assert!(!file.exists());

        // a second claim of the same descriptor finds nothing to move
        let err = claim_into_dir(&file, &work).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_claim_leaves_descriptor_in_place() {
        let root = tempfile::tempdir().unwrap();
        let monitor = root.path().join("monitor");
        let work = root.path().join("work");
        std::fs::create_dir_all(&monitor).unwrap();
        // the name is taken by a non-empty directory, so the rename fails
        std::fs::create_dir_all(work.join("job.json").join("x")).unwrap();
        let file = monitor.join("job.json");
        std::fs::write(&file, b"{}").unwrap();

        assert!(claim_into_dir(&file, &work).await.is_err());
        assert_eq!(std::fs::read(&file).unwrap(), b"{}");
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn moving_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.hevc");
        let err = move_artifact(&missing, dir.path()).await.unwrap_err();
        assert!(err.to_string().starts_with("failed to move "));
        assert!(err.to_string().ends_with("nope.hevc"));
    }

    #[tokio::test]
    async fn delete_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = delete_artifact(&dir.path().join("x.flac"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Delete { .. }));
    }

    #[test]
    fn require_dir_rejects_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(require_dir(dir.path()).is_ok());
        assert!(require_dir(&dir.path().join("missing")).is_err());
    }
}
