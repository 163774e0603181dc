use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use thiserror::Error;

use crate::reddit::sender::{HttpClient, SenderError};

/// Fixed scratch names used while assembling a video. Only valid under the global download lock.
const VIDEO_TEMP: &str = "video.mp4";
const AUDIO_TEMP: &str = "audio.mp3";
const COMBINED_TEMP: &str = "combined.mp4";

/// What gets written by [Fetcher::fetch_to_file].
#[derive(Debug, Clone, Copy)]
pub(crate) enum FetchSource<'a> {
    Text(&'a str),
    Url(&'a str),
}

/// Result of one fetch. Fetches never fail past this boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    /// Content was saved, but not in its intended final form.
    Degraded(String),
    /// The destination (or its `.url` sibling) was already on disk.
    AlreadyExists(PathBuf),
    /// The byte quota was reached before this post got the download lock.
    QuotaReached,
    Error(String),
}

impl Outcome {
    /// Whether something new ended up on disk.
    pub(crate) fn is_downloaded(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Degraded(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "File successfully downloaded"),
            Outcome::Degraded(message) => write!(f, "Partially downloaded: {}", message),
            Outcome::AlreadyExists(path) => write!(f, "Error: {} already exists", path.display()),
            Outcome::QuotaReached => write!(f, "Skipped: storage quota already reached"),
            Outcome::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Error types for the external mux tool
#[derive(Error, Debug)]
pub(crate) enum MuxError {
    #[error("Mux tool \"{0}\" is not installed")]
    NotFound(String),

    #[error("Mux tool exited with status {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Combines a video stream and an audio stream into one file.
pub(crate) trait Muxer: Send + Sync {
    fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MuxError>;
}

/// Muxes with an ffmpeg-compatible executable: copies the video codec, re-encodes audio to aac.
#[derive(Debug, Clone)]
pub(crate) struct Ffmpeg {
    program: String,
}

impl Ffmpeg {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Muxer for Ffmpeg {
    fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MuxError> {
        let status = Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c:v", "copy", "-c:a", "aac", "-strict", "experimental"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => MuxError::NotFound(self.program.clone()),
                _ => MuxError::Io(e),
            })?;

        if !status.success() {
            return Err(MuxError::Failed(
                status.code().map_or_else(|| "signal".to_string(), |code| code.to_string()),
            ));
        }

        Ok(())
    }
}

#[derive(Error, Debug)]
enum FetchError {
    #[error("{0}")]
    Sender(#[from] SenderError),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Mux(#[from] MuxError),
}

/// Performs single fetch-to-file and fetch-and-mux operations.
pub(crate) struct Fetcher {
    http: Arc<dyn HttpClient>,
    muxer: Arc<dyn Muxer>,
}

impl Fetcher {
    pub(crate) fn new(http: Arc<dyn HttpClient>, muxer: Arc<dyn Muxer>) -> Self {
        Self { http, muxer }
    }

    pub(crate) fn http(&self) -> &dyn HttpClient {
        self.http.as_ref()
    }

    /// Writes `source` to `path`, refusing to touch an existing file.
    pub(crate) fn fetch_to_file(&self, path: &Path, source: FetchSource<'_>) -> Outcome {
        if let Some(existing) = existing_target(path) {
            return Outcome::AlreadyExists(existing);
        }

        let result = match source {
            FetchSource::Text(text) => fs::write(path, text).map_err(FetchError::from),
            FetchSource::Url(url) => self.stream_to_file(url, path).map(|bytes| {
                trace!("Wrote {} bytes to {}", bytes, path.display());
            }),
        };

        match result {
            Ok(()) => Outcome::Success,
            Err(err) => {
                remove_quietly(path);
                Outcome::Error(err.to_string())
            }
        }
    }

    /// Downloads both streams of a video into `dir` and combines them as `<name>.mp4`.
    ///
    /// Without a mux tool the raw streams are kept in a directory called `name`.
    pub(crate) fn fetch_and_mux(&self, dir: &Path, name: &str, video_url: &str, audio_url: &str) -> Outcome {
        if name.trim().is_empty() {
            return Outcome::Error("Video has no usable file name".to_string());
        }

        let final_path = dir.join(format!("{}.mp4", name));
        let fallback_dir = dir.join(name);
        if let Some(existing) = existing_target(&final_path).or_else(|| fallback_dir.exists().then(|| fallback_dir.clone())) {
            return Outcome::AlreadyExists(existing);
        }
        debug!("Video name: {}", final_path.display());

        let video = dir.join(VIDEO_TEMP);
        let audio = dir.join(AUDIO_TEMP);
        let combined = dir.join(COMBINED_TEMP);

        match self.assemble(&video, &audio, &combined, &final_path, &fallback_dir, video_url, audio_url) {
            Ok(outcome) => outcome,
            Err(err) => {
                for temp in [&video, &audio, &combined] {
                    remove_quietly(temp);
                }
                Outcome::Error(err.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        video: &Path,
        audio: &Path,
        combined: &Path,
        final_path: &Path,
        fallback_dir: &Path,
        video_url: &str,
        audio_url: &str,
    ) -> Result<Outcome, FetchError> {
        self.stream_to_file(video_url, video)?;

        if let Err(err) = self.stream_to_file(audio_url, audio) {
            warn!("Audio track unavailable ({}), keeping video only", err);
            remove_quietly(audio);
            fs::rename(video, final_path)?;
            return Ok(Outcome::Degraded("video has no audio track".to_string()));
        }

        match self.muxer.mux(video, audio, combined) {
            Ok(()) => {
                fs::rename(combined, final_path)?;
                fs::remove_file(video)?;
                fs::remove_file(audio)?;
                Ok(Outcome::Success)
            }
            Err(MuxError::NotFound(program)) => {
                info!("Making '{}' and moving video/audio to it", fallback_dir.display());
                fs::create_dir(fallback_dir)?;
                fs::rename(video, fallback_dir.join(VIDEO_TEMP))?;
                fs::rename(audio, fallback_dir.join(AUDIO_TEMP))?;
                Ok(Outcome::Degraded(format!(
                    "Could not combine video and audio, consider installing {}",
                    program
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn stream_to_file(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let mut writer = BufWriter::new(File::create(path)?);
        let written = self.http.stream_to(url, &mut writer)?;
        writer.flush()?;

        Ok(written)
    }
}

/// Returns the path blocking a write to `path`: the path itself or its `.url` sibling.
fn existing_target(path: &Path) -> Option<PathBuf> {
    let shortcut = path.with_extension("url");
    [path.to_path_buf(), shortcut].into_iter().find(|candidate| candidate.exists())
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(err) = fs::remove_file(path) {
            warn!("Failed to remove {}: {}", path.display(), err);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{BrokenMuxer, ConcatMuxer, MissingMuxer};
    use super::*;
    use crate::reddit::sender::testing::StaticHttp;
    use tempfile::TempDir;

    const VIDEO_URL: &str = "https://v.redd.it/xyz/DASH_720.mp4";
    const AUDIO_URL: &str = "https://v.redd.it/xyz/audio";

    fn video_http() -> StaticHttp {
        StaticHttp::default()
            .with_body(VIDEO_URL, b"video-bytes")
            .with_body(AUDIO_URL, b"audio-bytes")
    }

    fn fetcher(http: StaticHttp, muxer: Arc<dyn Muxer>) -> Fetcher {
        Fetcher::new(Arc::new(http), muxer)
    }

    #[test]
    fn test_text_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Story.txt");
        let fetcher = fetcher(StaticHttp::default(), Arc::new(ConcatMuxer));

        assert_eq!(fetcher.fetch_to_file(&path, FetchSource::Text("Once upon a time")), Outcome::Success);
        assert_eq!(fs::read_to_string(&path).unwrap(), "Once upon a time");
    }

    #[test]
    fn test_url_is_streamed_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Sky.jpg");
        let http = StaticHttp::default().with_body("https://i.redd.it/sky.jpg", b"jpeg");
        let fetcher = fetcher(http, Arc::new(ConcatMuxer));

        assert_eq!(fetcher.fetch_to_file(&path, FetchSource::Url("https://i.redd.it/sky.jpg")), Outcome::Success);
        assert_eq!(fs::read(&path).unwrap(), b"jpeg");
    }

    #[test]
    fn test_failed_fetch_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Gone.jpg");
        let fetcher = fetcher(StaticHttp::default(), Arc::new(ConcatMuxer));

        let outcome = fetcher.fetch_to_file(&path, FetchSource::Url("https://i.redd.it/gone.jpg"));
        assert!(matches!(outcome, Outcome::Error(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_file_or_shortcut_blocks_write() {
        let dir = TempDir::new().unwrap();
        let fetcher = fetcher(StaticHttp::default(), Arc::new(ConcatMuxer));

        let path = dir.path().join("Taken.txt");
        fs::write(&path, "first").unwrap();
        assert_eq!(fetcher.fetch_to_file(&path, FetchSource::Text("second")), Outcome::AlreadyExists(path.clone()));
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        let shortcut = dir.path().join("Linked.url");
        fs::write(&shortcut, "[InternetShortcut]").unwrap();
        let outcome = fetcher.fetch_to_file(&dir.path().join("Linked.jpg"), FetchSource::Text("x"));
        assert_eq!(outcome, Outcome::AlreadyExists(shortcut));
    }

    #[test]
    fn test_mux_combines_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let fetcher = fetcher(video_http(), Arc::new(ConcatMuxer));

        assert_eq!(fetcher.fetch_and_mux(dir.path(), "Clip", VIDEO_URL, AUDIO_URL), Outcome::Success);
        assert_eq!(fs::read(dir.path().join("Clip.mp4")).unwrap(), b"video-bytesaudio-bytes");
        for temp in [VIDEO_TEMP, AUDIO_TEMP, COMBINED_TEMP] {
            assert!(!dir.path().join(temp).exists());
        }
    }

    #[test]
    fn test_missing_mux_tool_keeps_raw_streams() {
        let dir = TempDir::new().unwrap();
        let fetcher = fetcher(video_http(), Arc::new(MissingMuxer));

        let outcome = fetcher.fetch_and_mux(dir.path(), "Clip", VIDEO_URL, AUDIO_URL);
        assert!(matches!(&outcome, Outcome::Degraded(message) if message.contains("ffmpeg")));
        assert!(outcome.is_downloaded());
        assert_eq!(fs::read(dir.path().join("Clip").join(VIDEO_TEMP)).unwrap(), b"video-bytes");
        assert_eq!(fs::read(dir.path().join("Clip").join(AUDIO_TEMP)).unwrap(), b"audio-bytes");
        assert!(!dir.path().join("Clip.mp4").exists());
    }

    #[test]
    fn test_failed_mux_removes_temp_files() {
        let dir = TempDir::new().unwrap();
        let fetcher = fetcher(video_http(), Arc::new(BrokenMuxer));

        let outcome = fetcher.fetch_and_mux(dir.path(), "Clip", VIDEO_URL, AUDIO_URL);
        assert!(matches!(outcome, Outcome::Error(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_audio_keeps_video() {
        let dir = TempDir::new().unwrap();
        let http = StaticHttp::default().with_body(VIDEO_URL, b"video-bytes");
        let fetcher = fetcher(http, Arc::new(ConcatMuxer));

        let outcome = fetcher.fetch_and_mux(dir.path(), "Silent", VIDEO_URL, AUDIO_URL);
        assert!(matches!(outcome, Outcome::Degraded(_)));
        assert_eq!(fs::read(dir.path().join("Silent.mp4")).unwrap(), b"video-bytes");
        assert!(!dir.path().join(AUDIO_TEMP).exists());
    }

    #[test]
    fn test_existing_video_is_not_refetched() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("Clip")).unwrap();
        let fetcher = fetcher(video_http(), Arc::new(ConcatMuxer));

        let outcome = fetcher.fetch_and_mux(dir.path(), "Clip", VIDEO_URL, AUDIO_URL);
        assert_eq!(outcome, Outcome::AlreadyExists(dir.path().join("Clip")));
    }

    #[test]
    fn test_blank_video_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let fetcher = fetcher(video_http(), Arc::new(ConcatMuxer));

        let outcome = fetcher.fetch_and_mux(dir.path(), "", VIDEO_URL, AUDIO_URL);
        assert!(matches!(outcome, Outcome::Error(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_quota_reached_is_not_a_download() {
        assert!(!Outcome::QuotaReached.is_downloaded());
        assert_eq!(Outcome::QuotaReached.to_string(), "Skipped: storage quota already reached");
    }

    #[test]
    fn test_ffmpeg_absence_is_distinguished() {
        let dir = TempDir::new().unwrap();
        let muxer = Ffmpeg::new("definitely-not-an-installed-muxer");
        let result = muxer.mux(&dir.path().join("v"), &dir.path().join("a"), &dir.path().join("o"));
        assert!(matches!(result, Err(MuxError::NotFound(_))));
    }
}
