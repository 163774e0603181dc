use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use walkdir::WalkDir;

use crate::reddit::progress::ProgressEvent;

/// Bytes per gigabyte, as quotas are configured in binary gigabytes.
pub(crate) const GIGABYTE: f64 = 1_073_741_824.0;

/// Converts a quota in gigabytes into bytes.
pub(crate) fn gigabytes_to_bytes(gigabytes: f64) -> u64 {
    (gigabytes.max(0.0) * GIGABYTE) as u64
}

pub(crate) fn bytes_to_gigabytes(bytes: u64) -> f64 {
    bytes as f64 / GIGABYTE
}

/// Creates `dir` (and its parents) if it does not exist yet.
pub(crate) fn make_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory at {:?}", dir))
}

/// Recursive size in bytes of every regular file under `path`.
///
/// Symbolic links are not followed or counted, unreadable entries are skipped.
pub(crate) fn measure(path: &Path) -> u64 {
    let total: u64 = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum();

    trace!("{:.6} gigabytes in {}", bytes_to_gigabytes(total), path.display());
    total
}

/// Counters shared by all workers of one subreddit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QuotaState {
    pub(crate) bytes_used: u64,
    pub(crate) posts_completed: u32,
    pub(crate) byte_limit: u64,
    pub(crate) post_limit: u32,
}

impl QuotaState {
    pub(crate) fn exceeded(&self) -> bool {
        self.bytes_used >= self.byte_limit
    }
}

/// Process-wide quota bookkeeping for one run.
///
/// Its mutex is the single lock serializing every filesystem-mutating download step; the
/// directory rescan and the progress push happen under it as well.
#[derive(Debug)]
pub(crate) struct QuotaTracker {
    root: PathBuf,
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    /// Starts tracking `root`, seeding the counters with its current size.
    pub(crate) fn new(root: &Path, byte_limit: u64, post_limit: u32) -> Self {
        let bytes_used = measure(root);
        Self {
            root: root.to_path_buf(),
            state: Mutex::new(QuotaState {
                bytes_used,
                posts_completed: 0,
                byte_limit,
                post_limit,
            }),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn snapshot(&self) -> QuotaState {
        *self.state.lock()
    }

    /// Acquires the global download lock, unless the quota is already used up.
    ///
    /// The directory is rescanned under the lock, so writes other workers finished but have not
    /// recorded yet count as well.
    pub(crate) fn lock_within_quota(&self) -> Option<MutexGuard<'_, QuotaState>> {
        let mut state = self.state.lock();
        state.bytes_used = state.bytes_used.max(measure(&self.root));
        (!state.exceeded()).then_some(state)
    }

    /// Rescans the directory after a worker finished a post and publishes its progress.
    ///
    /// `bytes_used` never decreases, even when a step removed files. The push is best-effort: a
    /// full queue drops the event.
    ///
    /// returns: the state after the update.
    pub(crate) fn record(
        &self,
        events: &flume::Sender<ProgressEvent>,
        worker_id: usize,
        posts_done: u32,
        downloaded: bool,
    ) -> QuotaState {
        let mut state = self.state.lock();
        state.bytes_used = state.bytes_used.max(measure(&self.root));
        if downloaded {
            state.posts_completed += 1;
        }

        let event = ProgressEvent {
            worker_id,
            posts_done,
            bytes_used: state.bytes_used,
        };
        if let Err(err) = events.try_send(event) {
            trace!("Dropped progress event of worker {}: {}", worker_id, err);
        }

        *state
    }
}
