// Content-addressed tile storage: an append-only index file paired with
// per-tile data files. TileStore owns the index file handle and the data
// directory; callers never touch files directly.

mod error;
mod index;

pub use error::StoreError;

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use tilecoord_core::{Coord, IndexEntry, TileCategory, TilePayload};

const INDEX_FILE_NAME: &str = "_index.dat";
const LOCK_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Owns the on-disk state for one coordinator: the append-only index file
/// and the directory of per-tile data files.
pub struct TileStore {
    data_dir: PathBuf,
    index_path: PathBuf,
    files_in_use: Mutex<HashSet<String>>,
}

impl TileStore {
    /// Open (creating if necessary) the store rooted at `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let index_path = data_dir.join(INDEX_FILE_NAME);
        if !index_path.exists() {
            File::create(&index_path)?;
        }
        Ok(TileStore {
            data_dir,
            index_path,
            files_in_use: Mutex::new(HashSet::new()),
        })
    }

    /// All index entries, in the order they were appended.
    pub fn enumerate(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let file = self.open_index_locked(false)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        while let Some(entry) = index::read_record(&mut reader)? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Persist a tile: data file first (if `Regular`), index record second,
    /// so a crash between the two leaves a recoverable orphan file rather
    /// than a dangling index entry.
    pub fn save(&self, coord: Coord, payload: &TilePayload) -> Result<IndexEntry, StoreError> {
        let category = payload.category();
        let filename = if category == TileCategory::Regular {
            let name = self.allocate_filename(coord)?;
            self.write_data_file(&name, payload)?;
            Some(name)
        } else {
            None
        };

        let entry = IndexEntry::new(coord, category, filename);
        self.append_entry(&entry)?;
        Ok(entry)
    }

    /// Scan the index for the first entry matching `coord`.
    pub fn load_entry(&self, coord: Coord) -> Result<Option<IndexEntry>, StoreError> {
        Ok(self.enumerate()?.into_iter().find(|e| e.coord == coord))
    }

    /// Resolve a set of coords to their index entries in one index pass,
    /// preserving input order, early-exiting once every coord has resolved.
    pub fn load_entries(&self, coords: &[Coord]) -> Result<Vec<Option<IndexEntry>>, StoreError> {
        let mut found: Vec<Option<IndexEntry>> = vec![None; coords.len()];
        let mut remaining = coords.len();
        if remaining == 0 {
            return Ok(found);
        }

        let file = self.open_index_locked(false)?;
        let mut reader = BufReader::new(file);
        while let Some(entry) = index::read_record(&mut reader)? {
            for (slot, coord) in found.iter_mut().zip(coords) {
                if slot.is_none() && *coord == entry.coord {
                    *slot = Some(entry.clone());
                    remaining -= 1;
                }
            }
            if remaining == 0 {
                break;
            }
        }
        Ok(found)
    }

    /// Load the decoded payload for an already-resolved index entry.
    pub fn load_payload(&self, entry: &IndexEntry) -> Result<TilePayload, StoreError> {
        match entry.category {
            TileCategory::AllZero => Ok(TilePayload::uniform(0x00)),
            TileCategory::AllOne => Ok(TilePayload::uniform(0x01)),
            TileCategory::Regular => {
                let name = entry.filename.as_deref().ok_or(StoreError::MissingDataFile)?;
                self.read_data_file(name)
            }
        }
    }

    fn append_entry(&self, entry: &IndexEntry) -> Result<(), StoreError> {
        let mut file = self.open_index_locked(true)?;
        index::write_record(&mut file, entry)?;
        file.flush()?;
        Ok(())
    }

    /// Open the index file and take the process-wide exclusive lock for
    /// the duration of the caller's operation, retrying indefinitely on
    /// lock contention with a short fixed backoff.
    fn open_index_locked(&self, append: bool) -> Result<File, StoreError> {
        loop {
            let file = if append {
                OpenOptions::new().append(true).open(&self.index_path)?
            } else {
                File::open(&self.index_path)?
            };
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    tracing::debug!("index file locked by another user, retrying");
                    thread::sleep(LOCK_RETRY_BACKOFF);
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
    }

    /// `"{level};{iReal};{iImag}"`, with the smallest non-negative integer
    /// suffix appended on collision (the base name is never retried once a
    /// collision has been observed).
    fn allocate_filename(&self, coord: Coord) -> Result<String, StoreError> {
        let base = coord.base_filename();
        if !self.data_dir.join(&base).exists() {
            return Ok(base);
        }
        let mut suffix: u64 = 0;
        loop {
            let candidate = format!("{base}{suffix}");
            if !self.data_dir.join(&candidate).exists() {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    fn write_data_file(&self, name: &str, payload: &TilePayload) -> Result<(), StoreError> {
        self.with_file_lock(name, || {
            let bytes = tilecoord_codec::encode(payload);
            let mut file = File::create(self.data_dir.join(name))?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(())
        })
    }

    fn read_data_file(&self, name: &str) -> Result<TilePayload, StoreError> {
        self.with_file_lock(name, || {
            let mut file = File::open(self.data_dir.join(name))?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            Ok(tilecoord_codec::decode(&bytes)?)
        })
    }

    /// Hold `name` in the filenames-in-use set for the duration of `f`,
    /// bounded-wait polling if another caller already holds it.
    fn with_file_lock<T>(
        &self,
        name: &str,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        loop {
            let acquired = {
                let mut in_use = self.files_in_use.lock().unwrap();
                if in_use.contains(name) {
                    false
                } else {
                    in_use.insert(name.to_string());
                    true
                }
            };
            if acquired {
                break;
            }
            thread::sleep(LOCK_RETRY_BACKOFF);
        }

        let result = f();
        self.files_in_use.lock().unwrap().remove(name);
        result
    }

    #[cfg(test)]
    pub(crate) fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
