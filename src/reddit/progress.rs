use crate::reddit::tui::ProgressDisplay;

/// Snapshot a worker publishes after each post it worked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProgressEvent {
    pub(crate) worker_id: usize,
    /// Posts downloaded by this worker so far.
    pub(crate) posts_done: u32,
    /// Bytes under the subreddit directory when the event was produced.
    pub(crate) bytes_used: u64,
}

/// Folds per-worker events into a single percentage.
///
/// The percentage is the larger of post progress and byte progress, clamped to 100, and never
/// moves backwards even when events arrive out of order.
#[derive(Debug)]
pub(crate) struct ProgressAggregator {
    posts_by_worker: Vec<u32>,
    post_limit: u32,
    byte_limit: u64,
    bytes_used: u64,
    percent: u8,
    display: ProgressDisplay,
}

impl ProgressAggregator {
    pub(crate) fn new(workers: usize, post_limit: u32, byte_limit: u64, display: ProgressDisplay) -> Self {
        Self {
            posts_by_worker: vec![0; workers],
            post_limit,
            byte_limit,
            bytes_used: 0,
            percent: 0,
            display,
        }
    }

    /// Applies one event, showing the percentage when it moved.
    ///
    /// returns: the current percentage.
    pub(crate) fn apply(&mut self, event: ProgressEvent) -> u8 {
        match self.posts_by_worker.get_mut(event.worker_id) {
            Some(done) => *done = (*done).max(event.posts_done),
            None => warn!("Progress event from unknown worker {}", event.worker_id),
        }
        self.bytes_used = self.bytes_used.max(event.bytes_used);

        let computed = compute_percent(self.total_posts(), self.post_limit, self.bytes_used, self.byte_limit);
        if computed > self.percent {
            self.percent = computed;
            self.display.show(self.percent);
        }

        self.percent
    }

    /// Drains `events` until every sender is gone, i.e. until all workers have ended.
    pub(crate) fn drive(&mut self, events: &flume::Receiver<ProgressEvent>) {
        while let Ok(event) = events.recv() {
            let percent = self.apply(event);
            trace!("Progress {}% after event {:?}", percent, event);
        }
    }

    /// Marks the run as finished, forcing 100% regardless of the computed value.
    pub(crate) fn finish(&mut self) -> u8 {
        if self.percent < 100 {
            self.percent = 100;
            self.display.show(self.percent);
        }
        self.display.finish();
        self.percent
    }

    pub(crate) fn percent(&self) -> u8 {
        self.percent
    }

    pub(crate) fn total_posts(&self) -> u32 {
        self.posts_by_worker.iter().sum()
    }
}

/// `round(100 * max(posts / post_limit, bytes / byte_limit))`, clamped to `0..=100`.
pub(crate) fn compute_percent(posts: u32, post_limit: u32, bytes: u64, byte_limit: u64) -> u8 {
    let fraction = |done: f64, limit: f64| if limit > 0.0 { done / limit } else { 1.0 };
    let post_fraction = fraction(f64::from(posts), f64::from(post_limit));
    let byte_fraction = fraction(bytes as f64, byte_limit as f64);

    (100.0 * post_fraction.max(byte_fraction)).round().clamp(0.0, 100.0) as u8
}
