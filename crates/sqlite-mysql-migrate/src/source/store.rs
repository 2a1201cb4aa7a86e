//! Uploaded source file lookup.

use std::path::{Path, PathBuf};

use crate::core::SourceStore;
use crate::error::{MigrateError, Result};

/// Resolves `sqlite_file_id` handles to `<dir>/<id>.db`.
#[derive(Debug, Clone)]
pub struct UploadDirectory {
    dir: PathBuf,
}

impl UploadDirectory {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SourceStore for UploadDirectory {
    fn resolve(&self, file_id: &str) -> Result<PathBuf> {
        let valid = !file_id.is_empty()
            && file_id != "."
            && file_id != ".."
            && !file_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(MigrateError::Validation(format!(
                "invalid sqlite_file_id '{}'",
                file_id
            )));
        }

        let path = self.dir.join(format!("{}.db", file_id));
        if !path.is_file() {
            return Err(MigrateError::SourceUnreadable(format!(
                "no uploaded file for id '{}'",
                file_id
            )));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_existing_upload() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("abc123.db"), b"").unwrap();
        let store = UploadDirectory::new(dir.path());
        assert_eq!(
            store.resolve("abc123").unwrap(),
            dir.path().join("abc123.db")
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let store = UploadDirectory::new("/tmp/uploads");
        for id in ["", "..", "../etc/passwd", "a/b", "a\\b"] {
            assert!(matches!(
                store.resolve(id),
                Err(MigrateError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_resolve_missing_upload() {
        let dir = TempDir::new().unwrap();
        let store = UploadDirectory::new(dir.path());
        assert!(matches!(
            store.resolve("missing"),
            Err(MigrateError::SourceUnreadable(_))
        ));
    }
}
