//! Filesystem helpers for directory normalization and git probing.

use std::path::{Path, PathBuf};

/// Expand `~` and resolve a directory path to an absolute, cleaned form.
///
/// Missing paths are normalized lexically rather than rejected; existence
/// checks belong to the caller.
pub fn normalize_directory_path(raw: &str) -> String {
    let expanded = shellexpand::tilde(raw).into_owned();
    let path = PathBuf::from(&expanded);
    match path.canonicalize() {
        Ok(resolved) => resolved.to_string_lossy().into_owned(),
        Err(_) => expanded,
    }
}

/// Whether `path` contains a `.git` directory or file (worktrees use files).
pub fn has_git_repository(path: &str) -> bool {
    Path::new(path).join(".git").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_existing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let normalized = normalize_directory_path(&dir.path().to_string_lossy());
        assert!(Path::new(&normalized).is_absolute());
    }

    #[test]
    fn normalize_keeps_missing_paths_lexical() {
        let normalized = normalize_directory_path("/definitely/not/here");
        assert_eq!(normalized, "/definitely/not/here");
    }

    #[test]
    fn git_probe_detects_dot_git() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().into_owned();
        assert!(!has_git_repository(&path));
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(has_git_repository(&path));
    }
}
