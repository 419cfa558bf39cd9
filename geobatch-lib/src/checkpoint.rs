//! Checkpoint snapshots of the resolved store.
//!
//! Each checkpoint writes the complete store to a sibling temporary file and
//! renames it over the destination, so a reader (or the next run after a
//! crash) sees either the previous snapshot or the new one, never a torn file.

use crate::error::GeobatchError;
use crate::store::format_store_line;
use crate::types::ResolvedStore;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Destination for resolved-store snapshots.
pub trait Checkpointer {
    /// Replace the previous snapshot with `store` in full.
    fn persist(&self, store: &ResolvedStore) -> impl Future<Output = Result<(), GeobatchError>> + Send;
}

impl<C: Checkpointer + Sync> Checkpointer for &C {
    fn persist(&self, store: &ResolvedStore) -> impl Future<Output = Result<(), GeobatchError>> + Send {
        (**self).persist(store)
    }
}

/// Writes snapshots in the persisted store format.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    path: PathBuf,
}

impl CheckpointWriter {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Serialize the whole store, one `key\tlon\tlat\n` record per entry.
    pub fn render(store: &ResolvedStore) -> String {
        store.iter().map(format_store_line).collect()
    }

    async fn write_snapshot(&self, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.temp_path();
        let result = replace_via(&tmp_path, &self.path, contents).await;
        if result.is_err() {
            // The destination is untouched; only the partial temp file goes.
            if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
                debug!(path = %tmp_path.display(), error = %e, "temp snapshot not removed");
            }
        }
        result
    }
}

async fn replace_via(tmp_path: &Path, dest: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = tokio::fs::File::create(tmp_path).await?;
    tmp.write_all(contents).await?;
    tmp.flush().await?;
    tmp.sync_all().await?;
    drop(tmp);

    tokio::fs::rename(tmp_path, dest).await
}

impl Checkpointer for CheckpointWriter {
    fn persist(&self, store: &ResolvedStore) -> impl Future<Output = Result<(), GeobatchError>> + Send {
        // Render synchronously so the snapshot is taken before any await point.
        let contents = Self::render(store);
        let entries = store.len();
        async move {
            self.write_snapshot(contents.as_bytes())
                .await
                .map_err(|e| GeobatchError::io_failure(self.path.to_string_lossy(), e.to_string()))?;
            info!(path = %self.path.display(), entries, "checkpoint written");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinate, LocationKey};

    fn store_with(entries: &[(&str, f64, f64)]) -> ResolvedStore {
        let mut store = ResolvedStore::new();
        for (name, lon, lat) in entries {
            store.promote(
                LocationKey::new(name).unwrap(),
                Coordinate::new(*lon, *lat).unwrap(),
            );
        }
        store
    }

    #[test]
    fn test_render_format() {
        let store = store_with(&[("Paris", 2.35, 48.85), ("Atlantis", -25.0, 31.0)]);
        assert_eq!(
            CheckpointWriter::render(&store),
            "Paris\t2.35\t48.85\nAtlantis\t-25\t31\n"
        );
        assert_eq!(CheckpointWriter::render(&ResolvedStore::new()), "");
    }

    #[test]
    fn test_persist_twice_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CheckpointWriter::new(dir.path().join("geocodes2.list"));
        let store = store_with(&[("Paris", 2.35, 48.85), ("Oslo", 10.75, 59.91)]);

        tokio_test::block_on(writer.persist(&store)).unwrap();
        let first = std::fs::read(writer.path()).unwrap();
        tokio_test::block_on(writer.persist(&store)).unwrap();
        let second = std::fs::read(writer.path()).unwrap();

        assert_eq!(first, second);
        assert!(!writer.temp_path().exists());
    }

    #[tokio::test]
    async fn test_persist_supersedes_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.list");
        std::fs::write(&path, "stale\t0\t0\nolder\t1\t1\n").unwrap();

        let writer = CheckpointWriter::new(&path);
        writer
            .persist(&store_with(&[("Paris", 2.35, 48.85)]))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Paris\t2.35\t48.85\n");
    }

    #[tokio::test]
    async fn test_persist_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("out.list");

        CheckpointWriter::new(&path)
            .persist(&store_with(&[("Rome", 12.49, 41.9)]))
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_persist_reports_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should go makes the rename fail.
        let path = dir.path().join("occupied");
        std::fs::create_dir_all(path.join("child")).unwrap();

        let writer = CheckpointWriter::new(&path);
        let result = writer.persist(&store_with(&[("Rome", 12.49, 41.9)])).await;
        assert!(matches!(result, Err(GeobatchError::IoFailure { .. })));

        // No partial snapshot is left next to the destination.
        assert!(!writer.temp_path().exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("occupied")]);
    }
}
