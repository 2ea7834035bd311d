// Single-consumer job queue serialising all TileStore operations, so that
// no network handler ever blocks another handler while holding the index
// lock. One background thread processes jobs FIFO; callers submit a job and
// await a one-shot completion signal instead of polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use tilecoord_core::{Coord, IndexEntry, TilePayload};
use tilecoord_store::{StoreError, TileStore};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("a StorageWorker has already been spawned for this process")]
    AlreadySpawned,
}

enum Job {
    Enumerate {
        owned_levels: Vec<u32>,
        respond_to: oneshot::Sender<Result<Vec<IndexEntry>, StoreError>>,
    },
    Lookup {
        coords: Vec<Coord>,
        respond_to: oneshot::Sender<Result<Vec<Option<IndexEntry>>, StoreError>>,
    },
    LoadPayload {
        entry: IndexEntry,
        respond_to: oneshot::Sender<Result<TilePayload, StoreError>>,
    },
    Save {
        coord: Coord,
        payload: TilePayload,
        respond_to: oneshot::Sender<Result<IndexEntry, StoreError>>,
    },
}

/// A cheaply-cloneable handle to the single background StorageWorker. Every
/// subsystem that needs storage access holds one of these rather than the
/// `TileStore` itself.
#[derive(Clone)]
pub struct StorageHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl StorageHandle {
    pub async fn enumerate(&self, owned_levels: Vec<u32>) -> Result<Vec<IndexEntry>, StoreError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(Job::Enumerate {
            owned_levels,
            respond_to,
        });
        await_reply(rx).await
    }

    pub async fn lookup(&self, coords: Vec<Coord>) -> Result<Vec<Option<IndexEntry>>, StoreError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(Job::Lookup { coords, respond_to });
        await_reply(rx).await
    }

    pub async fn load_payload(&self, entry: IndexEntry) -> Result<TilePayload, StoreError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(Job::LoadPayload { entry, respond_to });
        await_reply(rx).await
    }

    /// Submit a save job and return a receiver for its eventual result,
    /// without waiting. Callers that need fire-and-forget semantics (the
    /// Dispatcher's response handler) spawn a task to log the outcome
    /// instead of awaiting this inline.
    pub fn save_detached(
        &self,
        coord: Coord,
        payload: TilePayload,
    ) -> oneshot::Receiver<Result<IndexEntry, StoreError>> {
        let (respond_to, rx) = oneshot::channel();
        self.send(Job::Save {
            coord,
            payload,
            respond_to,
        });
        rx
    }

    pub async fn save(&self, coord: Coord, payload: TilePayload) -> Result<IndexEntry, StoreError> {
        await_reply(self.save_detached(coord, payload)).await
    }

    fn send(&self, job: Job) {
        // The receiver only disappears if the worker thread panicked, which
        // is itself a fatal condition for the process; dropping the job is
        // the right behavior; the caller observes it via a closed channel.
        let _ = self.tx.send(job);
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<Result<T, StoreError>>) -> Result<T, StoreError> {
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "storage worker thread is gone",
        ))),
    }
}

static SPAWNED: AtomicBool = AtomicBool::new(false);

/// Spawn the single StorageWorker for this process. Exactly one may ever
/// exist; a second call is a programmer error.
pub fn spawn(store: TileStore) -> Result<StorageHandle, WorkerError> {
    if SPAWNED.swap(true, Ordering::SeqCst) {
        return Err(WorkerError::AlreadySpawned);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    thread::Builder::new()
        .name("storage-worker".into())
        .spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                run_job(&store, job);
            }
            tracing::debug!("storage worker job queue closed, exiting");
        })
        .expect("failed to spawn storage worker thread");

    Ok(StorageHandle { tx })
}

fn run_job(store: &TileStore, job: Job) {
    match job {
        Job::Enumerate {
            owned_levels,
            respond_to,
        } => {
            let result = store.enumerate().map(|entries| {
                entries
                    .into_iter()
                    .filter(|e| owned_levels.contains(&e.coord.level))
                    .collect()
            });
            let _ = respond_to.send(result);
        }
        Job::Lookup { coords, respond_to } => {
            let result = store.load_entries(&coords);
            let _ = respond_to.send(result);
        }
        Job::LoadPayload { entry, respond_to } => {
            let result = store.load_payload(&entry);
            let _ = respond_to.send(result);
        }
        Job::Save {
            coord,
            payload,
            respond_to,
        } => {
            let result = store.save(coord, &payload);
            if let Err(ref e) = result {
                tracing::error!(?coord, error = %e, "failed to persist tile");
            }
            let _ = respond_to.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use tilecoord_core::TilePayload;

    // Only one StorageWorker may exist per process, and `cargo test` runs
    // `#[tokio::test]` functions as concurrent threads in one process, so
    // every test in this module shares a single spawned worker and picks
    // non-overlapping levels instead of spawning its own.
    fn shared_handle() -> &'static StorageHandle {
        static HANDLE: OnceLock<StorageHandle> = OnceLock::new();
        HANDLE.get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            let store = TileStore::open(dir.path()).unwrap();
            let handle = spawn(store).expect("first spawn in this test binary");
            std::mem::forget(dir);
            handle
        })
    }

    #[tokio::test]
    async fn save_then_enumerate_round_trips() {
        let handle = shared_handle();
        let coord = Coord::new(9001, 0, 0);
        handle
            .save(coord, TilePayload::uniform(0x00))
            .await
            .unwrap();

        let entries = handle.enumerate(vec![9001]).await.unwrap();
        assert!(entries.iter().any(|e| e.coord == coord));
    }

    #[tokio::test]
    async fn enumerate_filters_to_owned_levels() {
        let handle = shared_handle();
        handle
            .save(Coord::new(9002, 0, 0), TilePayload::uniform(0x00))
            .await
            .unwrap();
        handle
            .save(Coord::new(9003, 0, 0), TilePayload::uniform(0x01))
            .await
            .unwrap();

        let entries = handle.enumerate(vec![9002]).await.unwrap();
        assert!(entries.iter().all(|e| e.coord.level == 9002));
        assert!(entries.iter().any(|e| e.coord.level == 9002));
    }

    #[tokio::test]
    async fn second_spawn_in_process_is_rejected() {
        let _handle = shared_handle();
        let dir2 = tempfile::tempdir().unwrap();
        let store2 = TileStore::open(dir2.path()).unwrap();
        assert!(matches!(spawn(store2), Err(WorkerError::AlreadySpawned)));
    }
}
