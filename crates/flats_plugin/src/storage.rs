//! JSON persistence of flats

use crate::cache::{grid_cells, MAX_AREA_CELLS};
use crate::error::{StorageError, StorageResult};
use crate::volumes::{Area, Flat};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::{fs as tokio_fs, io::AsyncWriteExt};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const FLATS_FILE: &str = "flats.json";

/// On-disk form of one flat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredFlat {
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(default)]
    pub owner: Option<Uuid>,
    #[serde(default)]
    pub trusted: Vec<Uuid>,
}

impl From<&Flat> for StoredFlat {
    fn from(flat: &Flat) -> Self {
        Self {
            areas: flat.areas().iter().map(Area::location_string).collect(),
            owner: flat.owner(),
            trusted: flat.trusted().to_vec(),
        }
    }
}

/// On-disk form of the whole flats file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatsFile {
    #[serde(default)]
    pub flats: BTreeMap<String, StoredFlat>,
}

impl FlatsFile {
    pub fn from_flats<'a>(flats: impl IntoIterator<Item = &'a Flat>) -> Self {
        Self {
            flats: flats
                .into_iter()
                .map(|flat| (flat.name().to_string(), StoredFlat::from(flat)))
                .collect(),
        }
    }

    /// Rebuilds flats, skipping areas that do not parse and flats left without any.
    pub fn into_flats(self) -> Vec<Flat> {
        let mut flats = Vec::with_capacity(self.flats.len());
        for (name, stored) in self.flats {
            let areas: Vec<Area> = stored
                .areas
                .iter()
                .filter_map(|location| match Area::parse(location, name.as_str()) {
                    Ok(area) if grid_cells(&area) > MAX_AREA_CELLS => {
                        warn!(
                            "⚠️ Skipping area {} of flat '{}': it covers more than {} grid cells",
                            location, name, MAX_AREA_CELLS
                        );
                        None
                    }
                    Ok(area) => Some(area),
                    Err(e) => {
                        warn!("⚠️ Skipping area of flat '{}': {}", name, e);
                        None
                    }
                })
                .collect();
            if areas.is_empty() {
                warn!("⚠️ Skipping flat '{}' without a valid area", name);
                continue;
            }
            flats.push(Flat::with_parts(name, areas, stored.owner, stored.trusted));
        }
        flats
    }
}

/// Flats captured for one save, stamped in the order they were taken.
#[derive(Debug, Clone)]
pub struct FlatsSnapshot {
    generation: u64,
    flats: Vec<Flat>,
}

impl FlatsSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn flats(&self) -> &[Flat] {
        &self.flats
    }
}

/// What became of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// A newer snapshot reached the file first, so this one was dropped.
    Superseded,
}

/// Flats storage trait
#[async_trait]
pub trait FlatsStorage: Send + Sync + std::fmt::Debug {
    /// Load every stored flat
    async fn load_all(&self) -> StorageResult<Vec<Flat>>;

    /// Stamps `flats` for a later write. Call it where the flats are read.
    fn snapshot(&self, flats: Vec<Flat>) -> FlatsSnapshot;

    /// Writes a snapshot unless a newer one has already been written.
    async fn write(&self, snapshot: FlatsSnapshot) -> StorageResult<SaveOutcome>;

    /// Replace the stored flats with `flats`
    async fn save_all(&self, flats: &[Flat]) -> StorageResult<()> {
        self.write(self.snapshot(flats.to_vec())).await.map(|_| ())
    }
}

/// Stores all flats in one JSON file inside the data directory.
///
/// Every write goes to its own temp file. Only the rename into place is
/// serialized, and a snapshot older than the last one renamed is discarded,
/// so a slow auto-save can never undo a later save.
#[derive(Debug, Clone)]
pub struct JsonFlatsStorage {
    path: PathBuf,
    next_generation: Arc<AtomicU64>,
    /// Generation of the snapshot currently on disk.
    committed: Arc<Mutex<u64>>,
}

impl JsonFlatsStorage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(FLATS_FILE),
            next_generation: Arc::new(AtomicU64::new(1)),
            committed: Arc::new(Mutex::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path
            .with_file_name(format!("{}.{}.tmp", FLATS_FILE, Uuid::new_v4().simple()))
    }

    fn encode(snapshot: &FlatsSnapshot) -> StorageResult<String> {
        serde_json::to_string_pretty(&FlatsFile::from_flats(&snapshot.flats))
            .map_err(StorageError::Serialization)
    }

    /// Renames a fully written temp file into place unless a newer snapshot
    /// got there first.
    fn commit(&self, temp_path: PathBuf, snapshot: &FlatsSnapshot) -> StorageResult<SaveOutcome> {
        let mut committed = self.committed.lock();
        if snapshot.generation < *committed {
            debug!(
                "Dropping flats snapshot {} behind {}",
                snapshot.generation, *committed
            );
            let _ = std::fs::remove_file(&temp_path);
            return Ok(SaveOutcome::Superseded);
        }
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StorageError::FileRename(temp_path, self.path.clone(), e));
        }
        *committed = snapshot.generation;
        info!(
            "Saved {} flat(s) to {}",
            snapshot.flats.len(),
            self.path.display()
        );
        Ok(SaveOutcome::Written)
    }

    /// Writes a snapshot with blocking I/O, for shutdown paths that cannot
    /// await.
    #[instrument(skip(self, snapshot), fields(generation = snapshot.generation))]
    pub fn write_blocking(&self, snapshot: FlatsSnapshot) -> StorageResult<SaveOutcome> {
        use std::io::Write;

        let json = Self::encode(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::DirectoryCreate(parent.to_path_buf(), e))?;
        }
        let temp_path = self.temp_path();
        let mut file = std::fs::File::create(&temp_path)
            .map_err(|e| StorageError::FileCreate(temp_path.clone(), e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| StorageError::FileWrite(temp_path.clone(), e))?;
        file.sync_all()
            .map_err(|e| StorageError::FileSync(temp_path.clone(), e))?;
        drop(file);

        self.commit(temp_path, &snapshot)
    }

    /// Snapshots and writes `flats` with blocking I/O.
    pub fn save_all_blocking(&self, flats: &[Flat]) -> StorageResult<()> {
        self.write_blocking(self.snapshot(flats.to_vec())).map(|_| ())
    }
}

#[async_trait]
impl FlatsStorage for JsonFlatsStorage {
    #[instrument(skip(self))]
    async fn load_all(&self) -> StorageResult<Vec<Flat>> {
        let contents = match tokio_fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No flats file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(StorageError::FileRead(self.path.clone(), e)),
        };

        let file: FlatsFile = serde_json::from_str(&contents)
            .map_err(|e| StorageError::Deserialization(self.path.clone(), e))?;
        let flats = file.into_flats();
        info!("Loaded {} flat(s) from {}", flats.len(), self.path.display());
        Ok(flats)
    }

    fn snapshot(&self, flats: Vec<Flat>) -> FlatsSnapshot {
        FlatsSnapshot {
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            flats,
        }
    }

    #[instrument(skip(self, snapshot), fields(generation = snapshot.generation))]
    async fn write(&self, snapshot: FlatsSnapshot) -> StorageResult<SaveOutcome> {
        let json = Self::encode(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            tokio_fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::DirectoryCreate(parent.to_path_buf(), e))?;
        }

        let temp_path = self.temp_path();
        let mut file = tokio_fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::FileCreate(temp_path.clone(), e))?;

        file.write_all(json.as_bytes())
            .await
            .map_err(|e| StorageError::FileWrite(temp_path.clone(), e))?;

        file.sync_all()
            .await
            .map_err(|e| StorageError::FileSync(temp_path.clone(), e))?;
        drop(file);

        self.commit(temp_path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flats_core::BlockPos;
    use tempfile::TempDir;

    fn sample_flat(name: &str) -> Flat {
        let area = Area::new(
            BlockPos::new("world", 0, 60, 0),
            BlockPos::new("world", 9, 70, 9),
            name,
        );
        let mut flat = Flat::new(name, area);
        flat.set_owner(Uuid::new_v4());
        flat.add_trusted(Uuid::new_v4());
        flat
    }

    fn leftover_temp_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFlatsStorage::new(dir.path());
        assert!(storage.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saved_flats_load_back() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFlatsStorage::new(dir.path());
        let flats = vec![sample_flat("a"), sample_flat("b")];

        storage.save_all(&flats).await.unwrap();
        assert_eq!(leftover_temp_files(&dir), 0);

        let loaded = storage.load_all().await.unwrap();
        assert_eq!(loaded, flats);
    }

    #[tokio::test]
    async fn malformed_areas_are_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFlatsStorage::new(dir.path());
        let owner = Uuid::new_v4();
        let json = serde_json::json!({
            "flats": {
                "good": {
                    "areas": ["world:0,0,0;1,1,1", "world:oops"],
                    "owner": owner,
                },
                "broken": { "areas": ["nonsense"] }
            }
        });
        tokio_fs::write(storage.path(), json.to_string()).await.unwrap();

        let loaded = storage.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "good");
        assert_eq!(loaded[0].areas().len(), 1);
        assert_eq!(loaded[0].owner(), Some(owner));
    }

    #[tokio::test]
    async fn areas_too_large_to_index_are_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFlatsStorage::new(dir.path());
        let json = serde_json::json!({
            "flats": {
                "huge": {
                    "areas": ["world:-2147483648,0,-2147483648;2147483647,1,2147483647"]
                },
                "mixed": {
                    "areas": [
                        "world:0,0,0;9,9,9",
                        "world:0,0,0;2000000,0,2000000"
                    ]
                }
            }
        });
        tokio_fs::write(storage.path(), json.to_string()).await.unwrap();

        let loaded = storage.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "mixed");
        assert_eq!(loaded[0].areas().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFlatsStorage::new(dir.path());
        tokio_fs::write(storage.path(), "{ not json").await.unwrap();
        assert!(matches!(
            storage.load_all().await,
            Err(StorageError::Deserialization(_, _))
        ));
    }

    #[test]
    fn blocking_save_replaces_the_file() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFlatsStorage::new(dir.path());
        storage.save_all_blocking(&[sample_flat("a")]).unwrap();
        storage.save_all_blocking(&[]).unwrap();

        let written: FlatsFile =
            serde_json::from_str(&std::fs::read_to_string(storage.path()).unwrap()).unwrap();
        assert!(written.flats.is_empty());
    }

    #[tokio::test]
    async fn older_snapshot_written_late_is_dropped() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFlatsStorage::new(dir.path());

        let stale = storage.snapshot(vec![sample_flat("a")]);
        storage
            .save_all_blocking(&[sample_flat("a"), sample_flat("b")])
            .unwrap();
        assert_eq!(storage.write(stale).await.unwrap(), SaveOutcome::Superseded);

        let names: Vec<String> = storage
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|flat| flat.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(leftover_temp_files(&dir), 0);
    }

    #[tokio::test]
    async fn concurrent_writes_keep_the_newest_snapshot() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(JsonFlatsStorage::new(dir.path()));
        let snapshots: Vec<FlatsSnapshot> = (0..8)
            .map(|n| {
                let flats = (0..=n).map(|i| sample_flat(&format!("f{}", i))).collect();
                storage.snapshot(flats)
            })
            .collect();

        let writes: Vec<_> = snapshots
            .into_iter()
            .rev()
            .map(|snapshot| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.write(snapshot).await })
            })
            .collect();
        for write in writes {
            write.await.unwrap().unwrap();
        }

        assert_eq!(storage.load_all().await.unwrap().len(), 8);
        assert_eq!(leftover_temp_files(&dir), 0);
    }
}
