use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reddit::sender::entries::{ListingEntry, PostEntry, SubredditEntry};
use crate::reddit::sender::{HttpClient, SenderError};

const REDDIT_BASE: &str = "https://www.reddit.com";

/// Reddit refuses to return more than this many posts per listing page.
const PAGE_LIMIT: usize = 100;

/// Error types for the subreddit listing API
#[derive(Error, Debug)]
pub(crate) enum ListingError {
    #[error("Request failed: {0}")]
    Sender(#[from] SenderError),

    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Random subreddit request returned no posts")]
    EmptyRandom,
}

impl ListingError {
    /// Reddit answers unknown subreddits with a 404 or with a payload that is not an `about` page.
    pub(crate) fn is_not_found(&self) -> bool {
        match self {
            ListingError::Sender(err) => err.is_not_found(),
            ListingError::Decode(_) => true,
            _ => false,
        }
    }
}

pub(crate) type ListingResult<T> = Result<T, ListingError>;

/// How a subreddit listing is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SortMode {
    Top,
    Hot,
    New,
    #[serde(alias = "cont")]
    Controversial,
}

impl SortMode {
    pub(crate) fn variants() -> &'static [SortMode] {
        &[SortMode::Top, SortMode::Hot, SortMode::New, SortMode::Controversial]
    }

    fn path(&self) -> &'static str {
        match self {
            SortMode::Top => "top",
            SortMode::Hot => "hot",
            SortMode::New => "new",
            SortMode::Controversial => "controversial",
        }
    }

    /// Only `top` and `controversial` accept a time window.
    fn uses_time_filter(&self) -> bool {
        matches!(self, SortMode::Top | SortMode::Controversial)
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Time window for `top` and `controversial` listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub(crate) fn variants() -> &'static [TimeFilter] {
        &[
            TimeFilter::Hour,
            TimeFilter::Day,
            TimeFilter::Week,
            TimeFilter::Month,
            TimeFilter::Year,
            TimeFilter::All,
        ]
    }

    fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hosted video attached to a reddit media post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RedditVideo {
    pub(crate) fallback_url: String,
    pub(crate) is_gif: bool,
}

/// A submission, as handed from the listing to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Post {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) url: String,
    pub(crate) self_text: String,
    pub(crate) permalink: String,
    pub(crate) is_video: bool,
    pub(crate) is_reddit_media: bool,
    pub(crate) is_adult: bool,
    pub(crate) reddit_video: Option<RedditVideo>,
}

impl From<PostEntry> for Post {
    fn from(entry: PostEntry) -> Self {
        let reddit_video = entry
            .media
            .and_then(|media| media.reddit_video)
            .map(|video| RedditVideo {
                fallback_url: video.fallback_url,
                is_gif: video.is_gif,
            });

        Post {
            id: entry.id,
            title: entry.title,
            url: entry.url,
            self_text: entry.selftext,
            permalink: entry.permalink,
            is_video: entry.is_video,
            is_reddit_media: entry.is_reddit_media_domain,
            is_adult: entry.over_18,
            reddit_video,
        }
    }
}

/// Subreddit metadata needed before a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubredditInfo {
    pub(crate) display_name: String,
    pub(crate) title: String,
    pub(crate) is_adult: bool,
}

/// The subreddit listing API.
pub(crate) trait ListingSource: Send + Sync {
    /// Looks up a subreddit. `r` or `random` picks one at random.
    fn subreddit(&self, selector: &str) -> ListingResult<SubredditInfo>;

    /// Returns up to `limit` posts of `subreddit` in listing order.
    fn posts(
        &self,
        subreddit: &str,
        sort: SortMode,
        time_filter: TimeFilter,
        limit: usize,
    ) -> ListingResult<Vec<Post>>;
}

/// Returns true when the selector asks for a random subreddit.
pub(crate) fn is_random_selector(selector: &str) -> bool {
    matches!(selector.trim().to_lowercase().as_str(), "r" | "random")
}

/// Listing client for reddit's public JSON endpoints.
pub(crate) struct RedditListing {
    http: Arc<dyn HttpClient>,
}

impl RedditListing {
    pub(crate) fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    fn random_name(&self) -> ListingResult<String> {
        let url = format!("{}/r/random.json?limit=1&raw_json=1", REDDIT_BASE);
        let listing: ListingEntry = serde_json::from_value(self.http.get_json(&url, &[])?)?;
        listing
            .data
            .children
            .into_iter()
            .map(|child| child.data.subreddit)
            .find(|name| !name.is_empty())
            .ok_or(ListingError::EmptyRandom)
    }

    fn page_url(
        subreddit: &str,
        sort: SortMode,
        time_filter: TimeFilter,
        limit: usize,
        after: Option<&str>,
    ) -> String {
        let mut url = format!(
            "{}/r/{}/{}.json?limit={}&raw_json=1",
            REDDIT_BASE,
            subreddit,
            sort.path(),
            limit
        );
        if sort.uses_time_filter() {
            url.push_str(&format!("&t={}", time_filter));
        }
        if let Some(after) = after {
            url.push_str(&format!("&after={}", after));
        }

        url
    }
}

impl ListingSource for RedditListing {
    fn subreddit(&self, selector: &str) -> ListingResult<SubredditInfo> {
        let name = if is_random_selector(selector) {
            let name = self.random_name()?;
            debug!("Random subreddit resolved to {}", name);
            name
        } else {
            selector.trim().to_string()
        };

        let url = format!("{}/r/{}/about.json?raw_json=1", REDDIT_BASE, name);
        let about: SubredditEntry = serde_json::from_value(self.http.get_json(&url, &[])?)?;

        Ok(SubredditInfo {
            display_name: about.data.display_name,
            title: about.data.title,
            is_adult: about.data.over18,
        })
    }

    fn posts(
        &self,
        subreddit: &str,
        sort: SortMode,
        time_filter: TimeFilter,
        limit: usize,
    ) -> ListingResult<Vec<Post>> {
        let mut posts = Vec::with_capacity(limit);
        let mut after: Option<String> = None;

        while posts.len() < limit {
            let page_size = (limit - posts.len()).min(PAGE_LIMIT);
            let url = Self::page_url(subreddit, sort, time_filter, page_size, after.as_deref());
            let listing: ListingEntry = serde_json::from_value(self.http.get_json(&url, &[])?)?;
            let fetched = listing.data.children.len();
            trace!("Listing page returned {} posts", fetched);

            posts.extend(
                listing
                    .data
                    .children
                    .into_iter()
                    .take(limit - posts.len())
                    .map(|child| Post::from(child.data)),
            );

            after = listing.data.after;
            if fetched == 0 || after.is_none() {
                break;
            }
        }

        Ok(posts)
    }
}
