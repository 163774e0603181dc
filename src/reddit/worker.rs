use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::reddit::RunResult;
use crate::reddit::fetcher::{FetchSource, Fetcher, Outcome};
use crate::reddit::imgur::{ImageHost, ImgurImage};
use crate::reddit::io::directory::{QuotaTracker, make_dir};
use crate::reddit::listing::Post;
use crate::reddit::progress::{ProgressAggregator, ProgressEvent};
use crate::reddit::resolver::{
    DownloadPlan, FileSource, Resolution, TITLE_LIMIT, find_extension, post_title, resolve, slim_title,
};
use crate::reddit::tui::ProgressDisplay;

/// Splits `len` posts into `workers` contiguous shards of `len / workers`, the last shard taking
/// the remainder.
pub(crate) fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let portion = len / workers;
    let remainder = len % workers;

    (0..workers)
        .map(|i| {
            let start = i * portion;
            let mut end = (i + 1) * portion;
            if i == workers - 1 {
                end += remainder;
            }
            start..end
        })
        .collect()
}

/// Moves `posts` into per-worker shards following [partition].
fn split(mut posts: Vec<Post>, workers: usize) -> Vec<Vec<Post>> {
    let ranges = partition(posts.len(), workers);
    let mut shards: Vec<Vec<Post>> = ranges
        .iter()
        .rev()
        .map(|range| posts.split_off(range.start))
        .collect();
    shards.reverse();
    shards
}

/// Runs a fixed number of download workers over one ordered batch of posts.
pub(crate) struct WorkerPool {
    fetcher: Fetcher,
    image_host: Arc<dyn ImageHost>,
    queue_capacity: usize,
}

impl WorkerPool {
    pub(crate) fn new(fetcher: Fetcher, image_host: Arc<dyn ImageHost>, queue_capacity: usize) -> Self {
        Self {
            fetcher,
            image_host,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Downloads `posts` into the tracker's directory with `workers` threads, driving `display`
    /// from the calling thread until every worker has ended.
    pub(crate) fn run(
        &self,
        posts: Vec<Post>,
        workers: usize,
        tracker: &QuotaTracker,
        display: ProgressDisplay,
        started: Instant,
    ) -> RunResult {
        let workers = workers.max(1);
        let limits = tracker.snapshot();
        let (events_tx, events_rx) = flume::bounded::<ProgressEvent>(self.queue_capacity);
        let mut aggregator = ProgressAggregator::new(workers, limits.post_limit, limits.byte_limit, display);

        thread::scope(|scope| {
            for (worker_id, shard) in split(posts, workers).into_iter().enumerate() {
                info!("Worker {} gets {} posts", worker_id + 1, shard.len());
                let events = events_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("download-worker-{}", worker_id))
                    .spawn_scoped(scope, move || self.work(worker_id, shard, tracker, events));
                if let Err(err) = spawned {
                    error!("Failed to spawn worker {}: {}", worker_id, err);
                }
            }
            drop(events_tx);

            aggregator.drive(&events_rx);
        });
        debug!("All workers ended at {}%", aggregator.percent());
        aggregator.finish();

        let state = tracker.snapshot();
        RunResult {
            workers_used: workers,
            posts_target: state.post_limit,
            duration_seconds: started.elapsed().as_secs_f64(),
            bytes_used_final: state.bytes_used,
            posts_done_final: state.posts_completed,
        }
    }

    /// Processes one shard in listing order, stopping once the byte quota is reached.
    ///
    /// The quota is checked before each post and again once it holds the download lock.
    fn work(&self, worker_id: usize, shard: Vec<Post>, tracker: &QuotaTracker, events: flume::Sender<ProgressEvent>) {
        let root = tracker.root();
        let mut posts_done: u32 = 0;

        for post in shard {
            let state = tracker.snapshot();
            if state.exceeded() {
                info!(
                    "Worker {} not starting post {}, {} of {} bytes used",
                    worker_id, post.id, state.bytes_used, state.byte_limit
                );
                return;
            }

            let plan = match resolve(&post, root) {
                Resolution::Skip => {
                    debug!("Worker {} skipped adult post {}", worker_id, post.id);
                    continue;
                }
                Resolution::Plan(plan) => plan,
            };

            info!(
                "Worker {} post {}: url \"{}\", title \"{}\", {}",
                worker_id,
                post.id,
                post.url,
                post.title,
                plan.kind()
            );

            let shortcut = root.join(format!("{}.url", post_title(&post, root)));
            let outcome = if shortcut.exists() {
                Outcome::AlreadyExists(shortcut)
            } else {
                self.execute(&plan, tracker)
            };

            match &outcome {
                Outcome::Success => info!("Worker {} post {}: {}", worker_id, post.id, outcome),
                Outcome::QuotaReached => {
                    info!("Worker {} post {}: {}", worker_id, post.id, outcome);
                    return;
                }
                _ => warn!("Worker {} post {}: {}", worker_id, post.id, outcome),
            }

            let downloaded = outcome.is_downloaded();
            if downloaded {
                posts_done += 1;
            }

            let state = tracker.record(&events, worker_id, posts_done, downloaded);
            if state.exceeded() {
                info!(
                    "Worker {} stopping, {} of {} bytes used",
                    worker_id, state.bytes_used, state.byte_limit
                );
                return;
            }
        }

        debug!("Worker {} finished its shard", worker_id);
    }

    /// Runs one plan. Lookups happen outside the download lock, every filesystem write inside it.
    ///
    /// returns: [Outcome::QuotaReached] without touching the disk when the lock is refused.
    fn execute(&self, plan: &DownloadPlan, tracker: &QuotaTracker) -> Outcome {
        let root = tracker.root();

        match plan {
            DownloadPlan::DirectFile { name, source: FileSource::Text(text) } => {
                let Some(_lock) = tracker.lock_within_quota() else {
                    return Outcome::QuotaReached;
                };
                self.fetcher.fetch_to_file(&root.join(name), FetchSource::Text(text))
            }
            DownloadPlan::DirectFile { name, source: FileSource::Url { url, redirect } } => {
                let url = match redirect {
                    Some(host) => host.resolve(self.fetcher.http(), url),
                    None => url.clone(),
                };
                let Some(_lock) = tracker.lock_within_quota() else {
                    return Outcome::QuotaReached;
                };
                self.fetcher.fetch_to_file(&root.join(name), FetchSource::Url(&url))
            }
            DownloadPlan::TextShortcut { name, content } => {
                let Some(_lock) = tracker.lock_within_quota() else {
                    return Outcome::QuotaReached;
                };
                self.fetcher.fetch_to_file(&root.join(name), FetchSource::Text(content))
            }
            DownloadPlan::ImgurImage { title, image_id } => {
                let image = match self.image_host.image(image_id) {
                    Ok(image) => image,
                    Err(err) => return Outcome::Error(format!("Imgur image {} could not be resolved: {}", image_id, err)),
                };
                let Some(_lock) = tracker.lock_within_quota() else {
                    return Outcome::QuotaReached;
                };
                self.fetch_image(&image, Some(title.as_str()), root)
            }
            DownloadPlan::ImgurAlbum { title, album_id } => {
                if title.is_empty() {
                    return Outcome::Error(format!("Imgur album {} has no usable directory name", album_id));
                }
                let Some(_lock) = tracker.lock_within_quota() else {
                    return Outcome::QuotaReached;
                };
                debug!("Locked workers for imgur album {}", album_id);
                self.download_album(&root.join(title), album_id)
            }
            DownloadPlan::RedditVideo { name, video_url, audio_url } => {
                let Some(_lock) = tracker.lock_within_quota() else {
                    return Outcome::QuotaReached;
                };
                self.fetcher.fetch_and_mux(root, name, video_url, audio_url)
            }
        }
    }

    /// Must be called with the download lock held.
    fn download_album(&self, album_dir: &Path, album_id: &str) -> Outcome {
        if let Err(err) = make_dir(album_dir) {
            return Outcome::Error(err.to_string());
        }

        let images = match self.image_host.album_images(album_id) {
            Ok(images) => images,
            Err(err) => return Outcome::Error(format!("Imgur album {} could not be resolved: {}", album_id, err)),
        };

        info!("Downloading imgur album {} ({} images)", album_id, images.len());
        let mut downloaded = 0;
        for image in &images {
            let outcome = self.fetch_image(image, None, album_dir);
            debug!("Imgur {}", outcome);
            if outcome.is_downloaded() {
                downloaded += 1;
            }
        }
        info!("Finished imgur album {}", album_id);

        if downloaded == 0 && !images.is_empty() {
            return Outcome::Error(format!("No image of album {} could be downloaded", album_id));
        }
        Outcome::Success
    }

    /// Must be called with the download lock held.
    fn fetch_image(&self, image: &ImgurImage, fallback_title: Option<&str>, dir: &Path) -> Outcome {
        let url = image.direct_url();
        let Some(extension) = find_extension(url) else {
            return Outcome::Error(format!("No file extension in {}", url));
        };
        trace!("Imgur link: {}", url);

        let title = image
            .title
            .as_deref()
            .map(|title| slim_title(title, TITLE_LIMIT, dir))
            .filter(|title| !title.is_empty())
            .or_else(|| fallback_title.map(str::to_string))
            .unwrap_or_else(|| untitled_name(dir));

        self.fetcher
            .fetch_to_file(&dir.join(format!("{}{}", title, extension)), FetchSource::Url(url))
    }
}

/// `Untitled N` with the lowest `N` not yet used as a file stem in `dir`.
fn untitled_name(dir: &Path) -> String {
    let taken: HashSet<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    Path::new(&entry.file_name())
                        .file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                })
                .collect()
        })
        .unwrap_or_default();

    (1..)
        .map(|i| format!("Untitled {}", i))
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| "Untitled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reddit::fetcher::Muxer;
    use crate::reddit::fetcher::testing::{ConcatMuxer, MissingMuxer};
    use crate::reddit::imgur::testing::StaticImageHost;
    use crate::reddit::io::directory::gigabytes_to_bytes;
    use crate::reddit::listing::RedditVideo;
    use crate::reddit::resolver::testing::post;
    use crate::reddit::sender::testing::StaticHttp;
    use std::fs;
    use tempfile::TempDir;

    fn text_post(id: &str, title: &str, text: &str) -> Post {
        let mut post = post(id, title);
        post.self_text = text.to_string();
        post
    }

    fn pool(http: StaticHttp, muxer: Arc<dyn Muxer>, images: StaticImageHost) -> WorkerPool {
        WorkerPool::new(Fetcher::new(Arc::new(http), muxer), Arc::new(images), 100)
    }

    fn run(pool: &WorkerPool, posts: Vec<Post>, workers: usize, dir: &Path, byte_limit: u64, post_limit: u32) -> RunResult {
        let tracker = QuotaTracker::new(dir, byte_limit, post_limit);
        pool.run(posts, workers, &tracker, ProgressDisplay::Lines, Instant::now())
    }

    #[test]
    fn test_partition_covers_batch_exactly_once() {
        for len in 0..40 {
            for workers in 1..8 {
                let shards = partition(len, workers);
                assert_eq!(shards.len(), workers);
                assert_eq!(shards.iter().map(|shard| shard.len()).sum::<usize>(), len);
                assert_eq!(shards[0].start, 0);
                assert_eq!(shards[workers - 1].end, len);
                for pair in shards.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
            }
        }
    }

    #[test]
    fn test_last_shard_takes_remainder() {
        assert_eq!(partition(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(partition(2, 3), vec![0..0, 0..0, 0..2]);
        assert_eq!(partition(5, 0), vec![0..5]);
    }

    #[test]
    fn test_split_preserves_listing_order() {
        let posts: Vec<Post> = (0..7).map(|i| post(&i.to_string(), "t")).collect();
        let shards = split(posts, 3);
        let ids: Vec<Vec<&str>> = shards
            .iter()
            .map(|shard| shard.iter().map(|post| post.id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["0", "1"], vec!["2", "3"], vec!["4", "5", "6"]]);
    }

    #[test]
    fn test_small_batch_completes() {
        let dir = TempDir::new().unwrap();
        let mut http = StaticHttp::default();
        let mut posts = Vec::new();
        for i in 0..9 {
            if i % 2 == 0 {
                posts.push(text_post(&format!("p{}", i), &format!("Post {}", i), "tiny body"));
            } else {
                let url = format!("https://i.redd.it/p{}.png", i);
                http = http.with_body(&url, b"png bytes");
                let mut image = post(&format!("p{}", i), &format!("Post {}", i));
                image.url = url;
                posts.push(image);
            }
        }
        let pool = pool(http, Arc::new(ConcatMuxer), StaticImageHost::default());

        let result = run(&pool, posts, 3, dir.path(), gigabytes_to_bytes(1.0), 10);

        assert_eq!(result.posts_done_final, 9);
        assert_eq!(result.workers_used, 3);
        assert_eq!(result.posts_target, 10);
        assert!(result.bytes_used_final < gigabytes_to_bytes(1.0));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 9);
        assert_eq!(fs::read_to_string(dir.path().join("Post 0.txt")).unwrap(), "tiny body");
        assert_eq!(fs::read(dir.path().join("Post 1.png")).unwrap(), b"png bytes");
    }

    #[test]
    fn test_name_collision_skips_only_that_post() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("First.txt"), "already here").unwrap();
        let posts = vec![
            text_post("a", "First", "new text"),
            text_post("b", "Second", "two"),
            text_post("c", "Third", "three"),
        ];
        let pool = pool(StaticHttp::default(), Arc::new(ConcatMuxer), StaticImageHost::default());

        let result = run(&pool, posts, 1, dir.path(), gigabytes_to_bytes(1.0), 3);

        assert_eq!(result.posts_done_final, 2);
        assert_eq!(fs::read_to_string(dir.path().join("First.txt")).unwrap(), "already here");
        assert!(dir.path().join("Second.txt").exists());
        assert!(dir.path().join("Third.txt").exists());
    }

    #[test]
    fn test_existing_shortcut_blocks_post() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Linked.url"), "[InternetShortcut]").unwrap();
        let pool = pool(StaticHttp::default(), Arc::new(ConcatMuxer), StaticImageHost::default());

        let result = run(&pool, vec![text_post("a", "Linked", "body")], 1, dir.path(), 1 << 30, 1);

        assert_eq!(result.posts_done_final, 0);
        assert!(!dir.path().join("Linked.txt").exists());
    }

    #[test]
    fn test_video_without_mux_tool_keeps_streams() {
        let dir = TempDir::new().unwrap();
        let http = StaticHttp::default()
            .with_body("https://v.redd.it/v1/DASH_720.mp4", b"video")
            .with_body("https://v.redd.it/v1/audio", b"audio");
        let mut video = post("v1", "Big jump");
        video.is_reddit_media = true;
        video.is_video = true;
        video.reddit_video = Some(RedditVideo {
            fallback_url: "https://v.redd.it/v1/DASH_720.mp4".to_string(),
            is_gif: false,
        });
        let pool = pool(http, Arc::new(MissingMuxer), StaticImageHost::default());

        let result = run(&pool, vec![video], 3, dir.path(), 1 << 30, 1);

        assert_eq!(result.posts_done_final, 1);
        let raw = dir.path().join("Big jump");
        assert_eq!(fs::read(raw.join("video.mp4")).unwrap(), b"video");
        assert_eq!(fs::read(raw.join("audio.mp3")).unwrap(), b"audio");
        assert!(!dir.path().join("Big jump.mp4").exists());
        assert!(!dir.path().join("combined.mp4").exists());
    }

    #[test]
    fn test_quota_stops_single_worker() {
        let dir = TempDir::new().unwrap();
        let posts: Vec<Post> = (0..5)
            .map(|i| text_post(&i.to_string(), &format!("Note {}", i), &"x".repeat(100)))
            .collect();
        let pool = pool(StaticHttp::default(), Arc::new(ConcatMuxer), StaticImageHost::default());

        let result = run(&pool, posts, 1, dir.path(), 10, 5);

        assert_eq!(result.posts_done_final, 1);
        assert_eq!(result.bytes_used_final, 100);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_quota_allows_at_most_one_post_per_worker_past_limit() {
        let dir = TempDir::new().unwrap();
        let posts: Vec<Post> = (0..12)
            .map(|i| text_post(&i.to_string(), &format!("Note {}", i), &"x".repeat(100)))
            .collect();
        let pool = pool(StaticHttp::default(), Arc::new(ConcatMuxer), StaticImageHost::default());

        let result = run(&pool, posts, 3, dir.path(), 150, 12);

        assert!(result.bytes_used_final >= 150);
        assert!(result.posts_done_final >= 2);
        assert!(result.posts_done_final <= 3 + 1);
    }

    #[test]
    fn test_adult_posts_are_not_counted() {
        let dir = TempDir::new().unwrap();
        let mut adult = text_post("a", "Adult", "hidden");
        adult.is_adult = true;
        let posts = vec![adult, text_post("b", "Safe", "shown")];
        let pool = pool(StaticHttp::default(), Arc::new(ConcatMuxer), StaticImageHost::default());

        let result = run(&pool, posts, 1, dir.path(), 1 << 30, 2);

        assert_eq!(result.posts_done_final, 1);
        assert!(!dir.path().join("Adult.txt").exists());
    }

    #[test]
    fn test_imgur_album_creates_directory() {
        let dir = TempDir::new().unwrap();
        let http = StaticHttp::default()
            .with_body("https://i.imgur.com/one.jpg", b"one")
            .with_body("https://i.imgur.com/two.mp4", b"two");
        let mut images = StaticImageHost::default();
        images.albums.insert(
            "alb".to_string(),
            vec![
                ImgurImage {
                    title: Some("Sunset!".to_string()),
                    is_animated: false,
                    static_url: "https://i.imgur.com/one.jpg".to_string(),
                    video_url: None,
                },
                ImgurImage {
                    title: None,
                    is_animated: true,
                    static_url: "https://i.imgur.com/two.gif".to_string(),
                    video_url: Some("https://i.imgur.com/two.mp4".to_string()),
                },
            ],
        );
        let mut album = post("al", "Road trip");
        album.url = "https://imgur.com/a/alb".to_string();
        let pool = pool(http, Arc::new(ConcatMuxer), images);

        let result = run(&pool, vec![album], 2, dir.path(), 1 << 30, 1);

        assert_eq!(result.posts_done_final, 1);
        let album_dir = dir.path().join("Road trip");
        assert_eq!(fs::read(album_dir.join("Sunset.jpg")).unwrap(), b"one");
        assert_eq!(fs::read(album_dir.join("Untitled 1.mp4")).unwrap(), b"two");
    }

    #[test]
    fn test_imgur_image_uses_post_title() {
        let dir = TempDir::new().unwrap();
        let http = StaticHttp::default().with_body("https://i.imgur.com/cat.png", b"meow");
        let mut images = StaticImageHost::default();
        images.images.insert(
            "cat".to_string(),
            ImgurImage {
                title: None,
                is_animated: false,
                static_url: "https://i.imgur.com/cat.png".to_string(),
                video_url: None,
            },
        );
        let mut image = post("c", "My cat");
        image.url = "https://imgur.com/cat".to_string();
        let pool = pool(http, Arc::new(ConcatMuxer), images);

        let result = run(&pool, vec![image], 1, dir.path(), 1 << 30, 1);

        assert_eq!(result.posts_done_final, 1);
        assert_eq!(fs::read(dir.path().join("My cat.png")).unwrap(), b"meow");
    }

    #[test]
    fn test_video_with_emoji_title_is_named_after_post() {
        let dir = TempDir::new().unwrap();
        let http = StaticHttp::default()
            .with_body("https://v.redd.it/f1/DASH_720.mp4", b"video")
            .with_body("https://v.redd.it/f1/audio", b"audio");
        let mut video = post("f1", "🔥🔥🔥");
        video.is_reddit_media = true;
        video.is_video = true;
        video.reddit_video = Some(RedditVideo {
            fallback_url: "https://v.redd.it/f1/DASH_720.mp4".to_string(),
            is_gif: false,
        });
        let pool = pool(http, Arc::new(ConcatMuxer), StaticImageHost::default());

        let result = run(&pool, vec![video], 1, dir.path(), 1 << 30, 1);

        assert_eq!(result.posts_done_final, 1);
        assert_eq!(fs::read(dir.path().join("Untitled f1.mp4")).unwrap(), b"videoaudio");
    }

    #[test]
    fn test_full_directory_starts_no_post() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.bin"), vec![0u8; 100]).unwrap();
        let posts = vec![text_post("a", "First", "one"), text_post("b", "Second", "two")];
        let pool = pool(StaticHttp::default(), Arc::new(ConcatMuxer), StaticImageHost::default());

        let result = run(&pool, posts, 2, dir.path(), 10, 2);

        assert_eq!(result.posts_done_final, 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    /// Image host that fills the directory past the quota while the lookup is in flight, as
    /// another worker finishing a large download would.
    struct FillingImageHost {
        tracker: Arc<QuotaTracker>,
        image: ImgurImage,
    }

    impl ImageHost for FillingImageHost {
        fn image(&self, _id: &str) -> crate::reddit::imgur::ImgurResult<ImgurImage> {
            fs::write(self.tracker.root().join("other worker.bin"), vec![0u8; 1000]).unwrap();
            let (tx, _rx) = flume::bounded(1);
            self.tracker.record(&tx, 0, 0, false);
            Ok(self.image.clone())
        }

        fn album_images(&self, _album_id: &str) -> crate::reddit::imgur::ImgurResult<Vec<ImgurImage>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_quota_crossed_during_lookup_blocks_write() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(QuotaTracker::new(dir.path(), 500, 2));
        let images = FillingImageHost {
            tracker: tracker.clone(),
            image: ImgurImage {
                title: None,
                is_animated: false,
                static_url: "https://i.imgur.com/cat.png".to_string(),
                video_url: None,
            },
        };
        let http = StaticHttp::default().with_body("https://i.imgur.com/cat.png", b"meow");
        let pool = WorkerPool::new(Fetcher::new(Arc::new(http), Arc::new(ConcatMuxer)), Arc::new(images), 100);
        let mut image = post("c", "My cat");
        image.url = "https://imgur.com/cat".to_string();
        let posts = vec![image, text_post("d", "Later", "never written")];

        let result = pool.run(posts, 1, &tracker, ProgressDisplay::Lines, Instant::now());

        assert_eq!(result.posts_done_final, 0);
        assert_eq!(result.bytes_used_final, 1000);
        assert!(!dir.path().join("My cat.png").exists());
        assert!(!dir.path().join("Later.txt").exists());
    }

    #[test]
    fn test_untitled_name_picks_lowest_free_number() {
        let dir = TempDir::new().unwrap();
        assert_eq!(untitled_name(dir.path()), "Untitled 1");
        fs::write(dir.path().join("Untitled 1.jpg"), "").unwrap();
        fs::write(dir.path().join("Untitled 3.jpg"), "").unwrap();
        assert_eq!(untitled_name(dir.path()), "Untitled 2");
    }
}
