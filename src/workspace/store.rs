//! Commit checkpoints: where a run's file set is persisted.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::{DirEntry, WalkDir};

use super::files::{is_directory_marker, validate_relative_path, FileSet};
use crate::error::WorkspaceError;

/// Receives the current file set at workflow checkpoints.
#[async_trait]
pub trait WorkspaceCommitter: Send + Sync {
    /// Persists `files`. Called after verification and again after documentation.
    async fn commit(&self, files: &FileSet) -> Result<(), WorkspaceError>;
}

/// Discards every commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullWorkspace;

#[async_trait]
impl WorkspaceCommitter for NullWorkspace {
    async fn commit(&self, files: &FileSet) -> Result<(), WorkspaceError> {
        tracing::debug!(file_count = files.len(), "Discarding commit");
        Ok(())
    }
}

/// Writes every file under a root directory, overwriting in place.
///
/// Files are never deleted: a key missing from a later commit keeps whatever
/// an earlier commit wrote.
#[derive(Debug, Clone)]
pub struct DirectoryWorkspace {
    root: PathBuf,
}

impl DirectoryWorkspace {
    /// Creates a committer rooted at `root`. The directory is created on first commit.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl WorkspaceCommitter for DirectoryWorkspace {
    async fn commit(&self, files: &FileSet) -> Result<(), WorkspaceError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut written = 0usize;
        for (path, content) in files.iter() {
            if is_directory_marker(path) {
                tracing::debug!(path, "Skipping directory entry");
                continue;
            }

            let relative =
                validate_relative_path(path).map_err(|e| WorkspaceError::InvalidPath {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
            let target = self.root.join(relative);

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, content).await?;
            written += 1;
        }

        tracing::info!(
            root = %self.root.display(),
            files = written,
            "Committed workspace"
        );
        Ok(())
    }
}

/// Directory names never loaded into a file set.
const IGNORED_DIRS: &[&str] = &["__pycache__", "node_modules", "target", "venv", ".venv"];

fn is_ignored(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && IGNORED_DIRS.contains(&&*name))
}

/// Reads every UTF-8 file under `root` into a file set keyed by relative path.
///
/// Hidden entries and build or cache directories are skipped, as are files
/// that are not valid UTF-8.
pub fn load_directory(root: &Path) -> Result<FileSet, WorkspaceError> {
    let mut files = FileSet::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
    {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => WorkspaceError::Io(io),
            None => WorkspaceError::Io(std::io::Error::other("filesystem loop detected")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::debug!(path = %key, "Skipping non-UTF-8 file");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        files
            .insert(&key, content)
            .map_err(|e| WorkspaceError::InvalidPath {
                path: key.clone(),
                reason: e.to_string(),
            })?;
    }

    tracing::debug!(root = %root.display(), files = files.len(), "Loaded directory");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_directory_workspace_writes_nested_files() {
        let dir = TempDir::new().unwrap();
        let workspace = DirectoryWorkspace::new(dir.path().join("out"));

        let files = FileSet::from_pairs([
            ("main.py", "print('hi')\n"),
            ("tests/test_main.py", "def test_x():\n    assert True\n"),
            ("assets/", ""),
        ])
        .unwrap();

        workspace.commit(&files).await.unwrap();

        let root = workspace.root();
        assert_eq!(
            std::fs::read_to_string(root.join("main.py")).unwrap(),
            "print('hi')\n"
        );
        assert!(root.join("tests/test_main.py").is_file());
        assert!(!root.join("assets").exists());
    }

    #[tokio::test]
    async fn test_later_commit_overwrites_but_never_deletes() {
        let dir = TempDir::new().unwrap();
        let workspace = DirectoryWorkspace::new(dir.path());

        let first = FileSet::from_pairs([("a.py", "1"), ("b.py", "1")]).unwrap();
        let second = FileSet::from_pairs([("a.py", "2")]).unwrap();
        workspace.commit(&first).await.unwrap();
        workspace.commit(&second).await.unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "2");
        assert_eq!(std::fs::read_to_string(dir.path().join("b.py")).unwrap(), "1");
    }

    #[test]
    fn test_load_directory_skips_hidden_and_cache() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("tests")).unwrap();
        std::fs::create_dir_all(root.join("__pycache__")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("main.py"), "print(1)\n").unwrap();
        std::fs::write(root.join("tests/test_main.py"), "def test_x(): pass\n").unwrap();
        std::fs::write(root.join("__pycache__/main.pyc"), "x").unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(root.join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();

        let files = load_directory(root).unwrap();
        let paths: Vec<&str> = files.paths().collect();
        assert_eq!(paths, vec!["main.py", "tests/test_main.py"]);
        assert_eq!(files.get("main.py"), Some("print(1)\n"));
    }

    #[tokio::test]
    async fn test_null_workspace_accepts_everything() {
        let files = FileSet::from_pairs([("x.py", "")]).unwrap();
        assert!(NullWorkspace.commit(&files).await.is_ok());
    }
}
