use once_cell::sync::Lazy;
use regex::Regex;

use crate::reddit::sender::entries::{GfycatEntry, StreamableEntry};
use crate::reddit::sender::HttpClient;

static STREAMABLE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"streamable\.com/\w+").unwrap());
static GFYCAT_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"gfycat\.com/\w+").unwrap());
static TRAILING_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w+)([-\w]+)?$").unwrap());

/// Hosts whose links point at a page that has to be looked up to find the media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RedirectHost {
    Streamable,
    Gfycat,
}

impl RedirectHost {
    /// Returns the redirect host `url` belongs to, if any.
    pub(crate) fn detect(url: &str) -> Option<Self> {
        if STREAMABLE_URL.is_match(url) {
            Some(RedirectHost::Streamable)
        } else if GFYCAT_URL.is_match(url) {
            Some(RedirectHost::Gfycat)
        } else {
            None
        }
    }

    /// Resolves `url` to a direct `.mp4` url.
    ///
    /// Lookup failures are swallowed: the original url is returned unchanged.
    pub(crate) fn resolve(&self, http: &dyn HttpClient, url: &str) -> String {
        match self.lookup(http, url) {
            Some(resolved) => {
                trace!("{:?} link {} resolved to {}", self, url, resolved);
                resolved
            }
            None => {
                debug!("{:?} lookup failed for {}, keeping original url", self, url);
                url.to_string()
            }
        }
    }

    fn lookup(&self, http: &dyn HttpClient, url: &str) -> Option<String> {
        let id = TRAILING_ID.captures(url)?.get(1)?.as_str();
        match self {
            RedirectHost::Streamable => {
                let value = http
                    .get_json(&format!("https://api.streamable.com/videos/{}", id), &[])
                    .ok()?;
                let entry: StreamableEntry = serde_json::from_value(value).ok()?;
                Some(format!("http:{}", entry.files.mp4.url))
            }
            RedirectHost::Gfycat => {
                let value = http
                    .get_json(&format!("https://api.gfycat.com/v1/gfycats/{}", id), &[])
                    .ok()?;
                let entry: GfycatEntry = serde_json::from_value(value).ok()?;
                Some(entry.gfy_item.mp4_url)
            }
        }
    }
}
