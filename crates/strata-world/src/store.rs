//! Durable chunk persistence.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use strata_common::{ChunkCoords, WorldError, WorldResult};

use crate::chunk::ChunkColumnData;
use crate::tasks::TaskPool;

/// Durable, asynchronous persistence of chunk columns keyed by
/// coordinates. One instance per world; chunks live as one file per
/// coordinate under the world's `chunks` directory.
pub struct ChunkStore {
    chunks_dir: PathBuf,
    io_pool: Arc<TaskPool>,
}

impl ChunkStore {
    /// Opens the store under `world_dir`, creating the chunks directory
    /// if needed.
    pub fn open(world_dir: impl AsRef<Path>, io_pool: Arc<TaskPool>) -> WorldResult<Self> {
        let chunks_dir = world_dir.as_ref().join("chunks");
        fs::create_dir_all(&chunks_dir).map_err(|e| {
            WorldError::SaveFailed(format!("mkdir {} failed: {e}", chunks_dir.display()))
        })?;
        Ok(Self {
            chunks_dir,
            io_pool,
        })
    }

    /// Returns the file path holding a chunk's data.
    #[must_use]
    pub fn chunk_path(&self, coords: ChunkCoords) -> PathBuf {
        self.chunks_dir.join(format!("{}_{}.chunk", coords.x, coords.z))
    }

    /// Checks presence without loading.
    #[must_use]
    pub fn exists(&self, coords: ChunkCoords) -> bool {
        self.chunk_path(coords).exists()
    }

    /// Blocking read of a chunk's payload.
    pub fn read_sync(&self, coords: ChunkCoords) -> WorldResult<ChunkColumnData> {
        read_file(&self.chunk_path(coords), coords)
    }

    /// Non-blocking read; `on_done` is invoked exactly once from the
    /// store's IO context.
    pub fn read_async(
        &self,
        coords: ChunkCoords,
        on_done: impl FnOnce(WorldResult<ChunkColumnData>) + Send + 'static,
    ) {
        let path = self.chunk_path(coords);
        self.io_pool.execute(move || on_done(read_file(&path, coords)));
    }

    /// Blocking write of an immutable snapshot.
    pub fn write_sync(&self, coords: ChunkCoords, data: &ChunkColumnData) -> WorldResult<()> {
        write_file(&self.chunk_path(coords), coords, data)
    }

    /// Non-blocking write of an immutable snapshot; `on_done` is invoked
    /// exactly once from the store's IO context.
    ///
    /// The store does not order concurrent writes to the same coordinate;
    /// last writer wins.
    pub fn write_async(
        &self,
        coords: ChunkCoords,
        snapshot: ChunkColumnData,
        on_done: impl FnOnce(WorldResult<()>) + Send + 'static,
    ) {
        let path = self.chunk_path(coords);
        self.io_pool
            .execute(move || on_done(write_file(&path, coords, &snapshot)));
    }

    /// Deletes a chunk's data. Returns whether a file was removed.
    pub fn delete(&self, coords: ChunkCoords) -> WorldResult<bool> {
        let path = self.chunk_path(coords);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| {
            WorldError::SaveFailed(format!("delete {} failed: {e}", path.display()))
        })?;
        Ok(true)
    }
}

fn read_file(path: &Path, coords: ChunkCoords) -> WorldResult<ChunkColumnData> {
    if !path.exists() {
        return Err(WorldError::ChunkNotFound {
            x: coords.x,
            z: coords.z,
        });
    }
    let bytes = fs::read(path)
        .map_err(|e| WorldError::LoadFailed(format!("read {} failed: {e}", path.display())))?;
    ChunkColumnData::decode(&bytes)
        .map_err(|e| WorldError::LoadFailed(format!("chunk {coords}: {e}")))
}

fn write_file(path: &Path, coords: ChunkCoords, data: &ChunkColumnData) -> WorldResult<()> {
    let bytes = data
        .encode()
        .map_err(|e| WorldError::SaveFailed(format!("chunk {coords}: {e}")))?;
    // temp file + rename: a crashed write never truncates a persisted chunk
    let tmp = path.with_extension("chunk.tmp");
    fs::write(&tmp, &bytes)
        .map_err(|e| WorldError::SaveFailed(format!("write {} failed: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| WorldError::SaveFailed(format!("rename {} failed: {e}", path.display())))?;
    debug!("Chunk saved: {coords} ({} bytes)", bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> ChunkStore {
        let pool = Arc::new(TaskPool::new("store-test", 1));
        ChunkStore::open(dir.path(), pool).expect("open store")
    }

    fn sample_data() -> ChunkColumnData {
        let mut data = ChunkColumnData::new();
        data.set_block(1, 64, 1, 5);
        data.set_biome(1, 1, 1);
        data
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let store = test_store(&dir);
        let coords = ChunkCoords::new(4, -9);
        let data = sample_data();

        assert!(!store.exists(coords));
        store.write_sync(coords, &data).expect("write");
        assert!(store.exists(coords));

        let loaded = store.read_sync(coords).expect("read");
        assert!(loaded.same_terrain(&data));
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let store = test_store(&dir);
        assert!(matches!(
            store.read_sync(ChunkCoords::new(7, 7)),
            Err(WorldError::ChunkNotFound { x: 7, z: 7 })
        ));
    }

    #[test]
    fn test_read_corrupt_is_load_failed() {
        let dir = TempDir::new().expect("tempdir");
        let store = test_store(&dir);
        let coords = ChunkCoords::new(2, 2);
        fs::write(store.chunk_path(coords), b"garbage").expect("write garbage");
        assert!(matches!(
            store.read_sync(coords),
            Err(WorldError::LoadFailed(_))
        ));
    }

    #[test]
    fn test_read_async_delivers_off_thread() {
        let dir = TempDir::new().expect("tempdir");
        let store = test_store(&dir);
        let coords = ChunkCoords::new(0, 0);
        store.write_sync(coords, &sample_data()).expect("write");

        let (tx, rx) = crossbeam_channel::bounded(1);
        store.read_async(coords, move |result| {
            let _ = tx.send((thread::current().id(), result));
        });
        let (io_thread, result) = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("read completion");
        assert_ne!(io_thread, thread::current().id());
        assert!(result.expect("read").same_terrain(&sample_data()));
    }

    #[test]
    fn test_write_async_completion() {
        let dir = TempDir::new().expect("tempdir");
        let store = test_store(&dir);
        let coords = ChunkCoords::new(-1, 3);

        let (tx, rx) = crossbeam_channel::bounded(1);
        store.write_async(coords, sample_data(), move |result| {
            let _ = tx.send(result);
        });
        rx.recv_timeout(std::time::Duration::from_secs(5))
            .expect("write completion")
            .expect("write");
        assert!(store.exists(coords));
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().expect("tempdir");
        let store = test_store(&dir);
        let coords = ChunkCoords::new(5, 5);
        store.write_sync(coords, &sample_data()).expect("write");

        assert!(store.delete(coords).expect("delete"));
        assert!(!store.exists(coords));
        assert!(!store.delete(coords).expect("second delete"));
    }
}
