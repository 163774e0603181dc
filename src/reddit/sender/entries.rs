//! Wire shapes of the JSON documents returned by reddit, imgur and the redirect hosts.

use serde::Deserialize;

/// A `Listing` thing, as returned by `/r/<name>/<sort>.json`.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct ListingEntry {
    pub(crate) data: ListingData,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct ListingData {
    /// Cursor of the next page, absent on the last page.
    #[serde(default)]
    pub(crate) after: Option<String>,
    #[serde(default)]
    pub(crate) children: Vec<PostChild>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PostChild {
    pub(crate) data: PostEntry,
}

/// A single submission (`t3`).
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PostEntry {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) selftext: String,
    #[serde(default)]
    pub(crate) permalink: String,
    #[serde(default)]
    pub(crate) subreddit: String,
    #[serde(default)]
    pub(crate) is_video: bool,
    #[serde(default)]
    pub(crate) is_reddit_media_domain: bool,
    #[serde(default)]
    pub(crate) over_18: bool,
    #[serde(default)]
    pub(crate) media: Option<MediaEntry>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct MediaEntry {
    #[serde(default)]
    pub(crate) reddit_video: Option<RedditVideoEntry>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct RedditVideoEntry {
    pub(crate) fallback_url: String,
    #[serde(default)]
    pub(crate) is_gif: bool,
}

/// Subreddit metadata (`t5`), as returned by `/r/<name>/about.json`.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct SubredditEntry {
    pub(crate) data: SubredditData,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct SubredditData {
    pub(crate) display_name: String,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) over18: bool,
}

/// Envelope imgur wraps every API response in.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct ImgurEnvelope<T> {
    pub(crate) data: T,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct ImgurImageEntry {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) animated: bool,
    pub(crate) link: String,
    #[serde(default)]
    pub(crate) mp4: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct StreamableEntry {
    pub(crate) files: StreamableFiles,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct StreamableFiles {
    pub(crate) mp4: StreamableFile,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct StreamableFile {
    pub(crate) url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct GfycatEntry {
    #[serde(rename = "gfyItem")]
    pub(crate) gfy_item: GfyItem,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct GfyItem {
    #[serde(rename = "mp4Url")]
    pub(crate) mp4_url: String,
}
