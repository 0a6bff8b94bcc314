use std::io;
use std::path::{Path, PathBuf};

const PART_SUFFIX: &str = ".part";

/// Downloaded files under one root directory, at the bucket paths from `assets`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Size of the file if it is already there.
    pub async fn existing_size(&self, relative: &Path) -> Option<u64> {
        match tokio::fs::metadata(self.path(relative)).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        }
    }

    /// Write `bytes`, creating the bucket directories as needed.
    ///
    /// The data goes to a `.part` sibling first and is renamed into place, so
    /// the final path only ever holds complete files.
    pub async fn write(&self, relative: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
        let full = self.path(relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = part_path(&full);
        let written = match tokio::fs::write(&part, bytes).await {
            Ok(()) => tokio::fs::rename(&part, &full).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        Ok(full)
    }
}

fn part_path(full: &Path) -> PathBuf {
    let mut name = full.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PART_SUFFIX);
    full.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let rel = Path::new("7/70/Example.png");

        assert_eq!(store.existing_size(rel).await, None);
        let full = store.write(rel, b"12345").await.unwrap();
        assert_eq!(full, dir.path().join("7/70/Example.png"));
        assert_eq!(store.existing_size(rel).await, Some(5));

        store.write(rel, b"12").await.unwrap();
        assert_eq!(store.existing_size(rel).await, Some(2));
    }

    #[tokio::test]
    async fn leftover_part_file_is_not_a_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let rel = Path::new("7/70/Example.png");

        // an interrupted earlier run
        std::fs::create_dir_all(dir.path().join("7/70")).unwrap();
        std::fs::write(dir.path().join("7/70/Example.png.part"), b"tru").unwrap();
        assert_eq!(store.existing_size(rel).await, None);

        store.write(rel, b"complete").await.unwrap();
        assert_eq!(store.existing_size(rel).await, Some(8));
        assert!(!dir.path().join("7/70/Example.png.part").exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_nothing_at_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        // a directory where the file should go makes the rename fail
        std::fs::create_dir_all(dir.path().join("a/ab/taken.png/inner")).unwrap();

        assert!(store.write(Path::new("a/ab/taken.png"), b"bytes").await.is_err());
        assert!(!dir.path().join("a/ab/taken.png.part").exists());
        assert_eq!(store.existing_size(Path::new("a/ab/taken.png")).await, None);
    }

    #[tokio::test]
    async fn directories_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/ab")).unwrap();
        let store = LocalStore::new(dir.path());
        assert_eq!(store.existing_size(Path::new("a/ab")).await, None);
    }
}
