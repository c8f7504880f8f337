//! Project registries: resolve a project identifier to the location of its
//! store on disk.

use crate::error::{Result, StoreError};
use std::path::PathBuf;

/// File name of the per-project store inside a project directory.
pub const STORE_FILE_NAME: &str = "orc.db";

const PROJECT_ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$";

/// Resolves a project identifier to the filesystem path of its store.
///
/// A lookup failure distinguishes "unregistered project" (`NotFound`) from
/// "registered but broken" (`StorageFailure`), so callers can report each
/// sensibly.
pub trait ProjectRegistry: Send + Sync {
    fn lookup(&self, project_id: &str) -> Result<PathBuf>;
}

/// Reject ids that could escape the registry root or confuse downstream
/// tooling. Ids are path components, never paths.
pub fn validate_project_id(project_id: &str) -> Result<()> {
    let ok = regex_lite::Regex::new(PROJECT_ID_PATTERN)
        .map(|re| re.is_match(project_id))
        .unwrap_or(false);
    if !ok {
        return Err(StoreError::validation(
            "project_id",
            "must be 1-64 characters of [A-Za-z0-9._-] and start alphanumeric",
        ));
    }
    Ok(())
}

/// Registry backed by a directory of project subdirectories, each holding
/// an `orc.db`.
pub struct DirRegistry {
    root: PathBuf,
}

impl DirRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl ProjectRegistry for DirRegistry {
    fn lookup(&self, project_id: &str) -> Result<PathBuf> {
        validate_project_id(project_id)?;

        let dir = self.root.join(project_id);
        if !dir.is_dir() {
            return Err(StoreError::not_found("project", project_id));
        }
        Ok(dir.join(STORE_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_project_resolves_to_store_path() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("acme")).unwrap();

        let registry = DirRegistry::new(root.path());
        let path = registry.lookup("acme").unwrap();
        assert_eq!(path, root.path().join("acme").join(STORE_FILE_NAME));
    }

    #[test]
    fn unregistered_project_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let registry = DirRegistry::new(root.path());
        assert!(matches!(
            registry.lookup("ghost"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn hostile_ids_are_rejected_before_touching_the_filesystem() {
        let root = tempfile::tempdir().unwrap();
        let registry = DirRegistry::new(root.path());
        for id in ["", "../escape", "a/b", ".hidden", "-flag", "a b"] {
            assert!(
                matches!(registry.lookup(id), Err(StoreError::Validation { .. })),
                "expected {id:?} to be rejected"
            );
        }
    }

    #[test]
    fn lookup_does_not_create_directories() {
        let root = tempfile::tempdir().unwrap();
        let registry = DirRegistry::new(root.path());
        let _ = registry.lookup("acme");
        assert!(!root.path().join("acme").exists());
    }
}
