//! Turns a listing [Post] into the [DownloadPlan] a worker executes.
//!
//! Resolution performs no I/O: lookups against imgur and the redirect hosts are deferred to the
//! worker, so the same post and output directory always produce the same plan.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::reddit::listing::{Post, RedditVideo};
use crate::reddit::redirect::RedirectHost;

/// Ceiling for `title + output directory` of a regular file.
pub(crate) const TITLE_LIMIT: usize = 250;
/// Ceiling for album directories, which hold further files.
pub(crate) const ALBUM_TITLE_LIMIT: usize = 200;
/// Ceiling for video base names (`.mp4` is appended, or a directory is made of it).
pub(crate) const VIDEO_TITLE_LIMIT: usize = 244;

static IMGUR_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"imgur").unwrap());
static IMGUR_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(imgur\.com/)(\w+/)?(\w+)(\.\w+)?(.*)?$").unwrap());
static EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\.\w{3,5})(\?.{1,2})?$").unwrap());
static INVALID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\s\w',]").unwrap());
static LAST_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[^/]+$").unwrap());

/// Where the bytes of a [DownloadPlan::DirectFile] come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileSource {
    /// Fetched over the network, after resolving `redirect` if set.
    Url {
        url: String,
        redirect: Option<RedirectHost>,
    },
    /// Written verbatim.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DownloadPlan {
    DirectFile { name: String, source: FileSource },
    /// Link file pointing back at the post, used when nothing else can be saved.
    TextShortcut { name: String, content: String },
    /// A single imgur image; its direct url is looked up when the plan runs.
    ImgurImage { title: String, image_id: String },
    ImgurAlbum { title: String, album_id: String },
    /// Reddit-hosted video with its audio track stored separately.
    RedditVideo {
        name: String,
        video_url: String,
        audio_url: String,
    },
}

impl DownloadPlan {
    /// Short label used in log lines.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            DownloadPlan::DirectFile { .. } => "file",
            DownloadPlan::TextShortcut { .. } => "shortcut",
            DownloadPlan::ImgurImage { .. } => "imgur image",
            DownloadPlan::ImgurAlbum { .. } => "imgur album",
            DownloadPlan::RedditVideo { .. } => "reddit video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Adult posts are never downloaded.
    Skip,
    Plan(DownloadPlan),
}

/// An imgur link split into its album flag and identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImgurLink {
    pub(crate) is_album: bool,
    pub(crate) id: String,
}

/// Strips everything except whitespace, word characters, apostrophes and commas.
pub(crate) fn clean(text: &str) -> String {
    INVALID_CHARS.replace_all(text, "").trim().to_string()
}

/// Cleans `title` and truncates it so that its length plus the length of `base` stays below `limit`.
///
/// Lengths are measured in bytes; truncation never splits a character.
pub(crate) fn slim_title(title: &str, limit: usize, base: &Path) -> String {
    let mut name = clean(title);
    let char_max = limit.saturating_sub(base.as_os_str().len());
    if name.len() >= char_max {
        let mut cut = char_max.saturating_sub(1);
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
        // A cut may leave trailing whitespace behind.
        name.truncate(name.trim_end().len());
    }

    name
}

/// The sanitized title of `post`, or `Untitled <id>` when nothing of the title survives cleaning.
pub(crate) fn post_title(post: &Post, base: &Path) -> String {
    let title = slim_title(&post.title, TITLE_LIMIT, base);
    if !title.is_empty() {
        return title;
    }

    slim_title(&format!("Untitled {}", post.id), TITLE_LIMIT, base)
}

/// Extension (with its dot) at the end of `url`, tolerating a one or two character query.
pub(crate) fn find_extension(url: &str) -> Option<&str> {
    EXTENSION
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|extension| extension.as_str())
}

/// Parses `imgur.com/[album/]id[.ext][trailing]`.
pub(crate) fn parse_imgur_url(url: &str) -> Option<ImgurLink> {
    let captures = IMGUR_URL.captures(url)?;
    let id = captures.get(3)?.as_str().to_string();

    Some(ImgurLink {
        is_album: captures.get(2).is_some(),
        id,
    })
}

/// The audio track lives next to the video stream, under the final path segment `audio`.
pub(crate) fn audio_url(video_url: &str) -> String {
    LAST_SEGMENT.replace(video_url, "/audio").into_owned()
}

/// Resolves `post` into a plan whose artifacts land in `output_dir`.
pub(crate) fn resolve(post: &Post, output_dir: &Path) -> Resolution {
    if post.is_adult {
        return Resolution::Skip;
    }

    let title = post_title(post, output_dir);

    if IMGUR_MARKER.is_match(&post.url) {
        return match parse_imgur_url(&post.url) {
            Some(link) if link.is_album => Resolution::Plan(DownloadPlan::ImgurAlbum {
                title: slim_title(&title, ALBUM_TITLE_LIMIT, output_dir),
                album_id: link.id,
            }),
            Some(link) => Resolution::Plan(DownloadPlan::ImgurImage {
                title,
                image_id: link.id,
            }),
            None => {
                debug!("Unparseable imgur url {}, falling back", post.url);
                Resolution::Plan(fallback(post, title))
            }
        };
    }

    if post.is_reddit_media {
        match (&post.reddit_video, post.is_video) {
            (Some(RedditVideo { fallback_url, is_gif: true }), true) => {
                return Resolution::Plan(direct(title, ".mp4", fallback_url, None));
            }
            (Some(RedditVideo { fallback_url, is_gif: false }), true) => {
                return Resolution::Plan(DownloadPlan::RedditVideo {
                    name: slim_title(&title, VIDEO_TITLE_LIMIT, output_dir),
                    video_url: fallback_url.clone(),
                    audio_url: audio_url(fallback_url),
                });
            }
            (_, false) => return Resolution::Plan(direct(title, ".jpg", &post.url, None)),
            (None, true) => {
                debug!("Post {} is flagged as video but carries no stream", post.id);
            }
        }
    }

    if let Some(host) = RedirectHost::detect(&post.url) {
        return Resolution::Plan(direct(title, ".mp4", &post.url, Some(host)));
    }

    Resolution::Plan(fallback(post, title))
}

/// Self-text, then a direct link by extension, then a shortcut to the post.
fn fallback(post: &Post, title: String) -> DownloadPlan {
    let text = clean(&post.self_text);
    if !text.is_empty() {
        return DownloadPlan::DirectFile {
            name: format!("{}.txt", title),
            source: FileSource::Text(text),
        };
    }

    if let Some(extension) = find_extension(&post.url) {
        return direct(title, extension, &post.url, None);
    }

    DownloadPlan::TextShortcut {
        name: format!("{}.url", title),
        content: shortcut(&post.permalink),
    }
}

fn direct(title: String, extension: &str, url: &str, redirect: Option<RedirectHost>) -> DownloadPlan {
    DownloadPlan::DirectFile {
        name: format!("{}{}", title, extension),
        source: FileSource::Url {
            url: url.to_string(),
            redirect,
        },
    }
}

fn shortcut(permalink: &str) -> String {
    format!("[InternetShortcut]\nURL=https://www.reddit.com{}", permalink)
}
