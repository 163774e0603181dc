use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use thiserror::Error;

use crate::reddit::fetcher::Fetcher;
use crate::reddit::imgur::ImageHost;
use crate::reddit::io::DownloadSection;
use crate::reddit::io::directory::{QuotaTracker, bytes_to_gigabytes, gigabytes_to_bytes};
use crate::reddit::listing::{ListingError, ListingSource, SortMode, TimeFilter};
use crate::reddit::resolver::clean;
use crate::reddit::tui::ProgressDisplay;
use crate::reddit::worker::WorkerPool;

pub(crate) mod fetcher;
pub(crate) mod imgur;
pub(crate) mod io;
pub(crate) mod listing;
pub(crate) mod progress;
pub(crate) mod redirect;
pub(crate) mod resolver;
pub(crate) mod sender;
pub(crate) mod tui;
pub(crate) mod worker;

/// Failures that abort a run before any worker starts.
#[derive(Error, Debug)]
pub(crate) enum RunError {
    #[error("Subreddit \"{0}\" does not exist")]
    SubredditNotFound(String),

    #[error("Subreddit \"{0}\" is marked as adult content")]
    AdultSubreddit(String),

    #[error("{used:.2}/{limit:.2} gigabytes already used in {}", dir.display())]
    QuotaExceeded { dir: PathBuf, used: f64, limit: f64 },

    #[error("Listing failed: {0}")]
    Listing(#[from] ListingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs of one subreddit run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunParameters {
    pub(crate) subreddit: String,
    pub(crate) sort: SortMode,
    pub(crate) time_filter: TimeFilter,
    pub(crate) posts: u32,
    pub(crate) storage_gb: f64,
    pub(crate) workers: usize,
}

impl From<&DownloadSection> for RunParameters {
    fn from(section: &DownloadSection) -> Self {
        Self {
            subreddit: section.subreddit.clone(),
            sort: section.sort,
            time_filter: section.time_filter,
            posts: section.posts,
            storage_gb: section.storage_gb,
            workers: section.workers,
        }
    }
}

/// Totals of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunResult {
    pub(crate) workers_used: usize,
    pub(crate) posts_target: u32,
    pub(crate) duration_seconds: f64,
    pub(crate) bytes_used_final: u64,
    pub(crate) posts_done_final: u32,
}

/// Downloads subreddits into `<destination>/<subreddit>/`.
pub(crate) struct SubredditDownloader {
    listing: Arc<dyn ListingSource>,
    pool: WorkerPool,
    destination: PathBuf,
    attended: bool,
}

impl SubredditDownloader {
    pub(crate) fn new(
        listing: Arc<dyn ListingSource>,
        image_host: Arc<dyn ImageHost>,
        fetcher: Fetcher,
        destination: &Path,
        queue_capacity: usize,
    ) -> Self {
        Self {
            listing,
            pool: WorkerPool::new(fetcher, image_host, queue_capacity),
            destination: destination.to_path_buf(),
            attended: false,
        }
    }

    /// Draws a percentage bar when attended, prints plain progress lines otherwise.
    pub(crate) fn attended(mut self, attended: bool) -> Self {
        self.attended = attended;
        self
    }

    /// Runs one subreddit download and prints its summary.
    pub(crate) fn download_subreddit(&self, params: &RunParameters) -> Result<RunResult, RunError> {
        let started = Instant::now();

        let info = self.listing.subreddit(&params.subreddit).map_err(|err| {
            if err.is_not_found() {
                RunError::SubredditNotFound(params.subreddit.clone())
            } else {
                RunError::Listing(err)
            }
        })?;
        if info.display_name.trim().is_empty() {
            return Err(RunError::SubredditNotFound(params.subreddit.clone()));
        }
        if info.is_adult {
            return Err(RunError::AdultSubreddit(info.display_name));
        }

        let name = clean(&info.display_name);
        info!("Starting r/{} at {}", info.display_name, Local::now().format("%Y-%m-%d %H:%M:%S"));
        println!("Downloading {}...", name);
        println!("Title: {}", clean(&info.title));

        // Titles are trimmed against this path, so it has to be the full one.
        let dir = std::path::absolute(self.destination.join(&name))?;
        fs::create_dir_all(&dir)?;

        let tracker = QuotaTracker::new(&dir, gigabytes_to_bytes(params.storage_gb), params.posts);
        let state = tracker.snapshot();
        if state.exceeded() {
            return Err(RunError::QuotaExceeded {
                dir,
                used: bytes_to_gigabytes(state.bytes_used),
                limit: params.storage_gb,
            });
        }

        let posts = self
            .listing
            .posts(&info.display_name, params.sort, params.time_filter, params.posts as usize)?;
        info!(
            "Fetched {} posts from r/{} ({}, {})",
            posts.len(),
            info.display_name,
            params.sort,
            params.time_filter
        );

        let result = self
            .pool
            .run(posts, params.workers, &tracker, ProgressDisplay::for_console(self.attended), started);

        println!(
            "{:.2}/{:.2} gigabytes reached",
            bytes_to_gigabytes(result.bytes_used_final),
            params.storage_gb
        );
        println!("{}/{} posts downloaded", result.posts_done_final, result.posts_target);
        println!("Took {:.1} seconds total", result.duration_seconds);
        info!("Run finished: {:?}", result);

        Ok(result)
    }
}
