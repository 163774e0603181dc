use std::sync::Arc;

use thiserror::Error;

use crate::reddit::sender::entries::{ImgurEnvelope, ImgurImageEntry};
use crate::reddit::sender::{HttpClient, SenderError};

const IMGUR_API: &str = "https://api.imgur.com/3";

/// Error types for the image-host API
#[derive(Error, Debug)]
pub(crate) enum ImgurError {
    #[error("Request failed: {0}")]
    Sender(#[from] SenderError),

    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub(crate) type ImgurResult<T> = Result<T, ImgurError>;

/// Metadata of one hosted image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImgurImage {
    pub(crate) title: Option<String>,
    pub(crate) is_animated: bool,
    pub(crate) static_url: String,
    pub(crate) video_url: Option<String>,
}

impl ImgurImage {
    /// The url worth downloading: the video stream of an animated image, otherwise the still.
    pub(crate) fn direct_url(&self) -> &str {
        match (&self.video_url, self.is_animated) {
            (Some(video), true) => video,
            _ => &self.static_url,
        }
    }
}

impl From<ImgurImageEntry> for ImgurImage {
    fn from(entry: ImgurImageEntry) -> Self {
        ImgurImage {
            title: entry.title.filter(|title| !title.trim().is_empty()),
            is_animated: entry.animated,
            static_url: entry.link,
            video_url: entry.mp4,
        }
    }
}

/// The image-host API.
pub(crate) trait ImageHost: Send + Sync {
    fn image(&self, id: &str) -> ImgurResult<ImgurImage>;

    /// Images of an album in album order.
    fn album_images(&self, album_id: &str) -> ImgurResult<Vec<ImgurImage>>;
}

/// Client for the imgur v3 API, authenticated by client id.
pub(crate) struct ImgurClient {
    http: Arc<dyn HttpClient>,
    authorization: String,
}

impl ImgurClient {
    pub(crate) fn new(http: Arc<dyn HttpClient>, client_id: &str) -> Self {
        Self {
            http,
            authorization: format!("Client-ID {}", client_id),
        }
    }

    fn get(&self, url: &str) -> ImgurResult<serde_json::Value> {
        Ok(self
            .http
            .get_json(url, &[("Authorization", self.authorization.as_str())])?)
    }
}

impl ImageHost for ImgurClient {
    fn image(&self, id: &str) -> ImgurResult<ImgurImage> {
        let url = format!("{}/image/{}", IMGUR_API, id);
        let envelope: ImgurEnvelope<ImgurImageEntry> = serde_json::from_value(self.get(&url)?)?;
        trace!("Imgur image {} resolved to {}", envelope.data.id, envelope.data.link);

        Ok(envelope.data.into())
    }

    fn album_images(&self, album_id: &str) -> ImgurResult<Vec<ImgurImage>> {
        let url = format!("{}/album/{}/images", IMGUR_API, album_id);
        let envelope: ImgurEnvelope<Vec<ImgurImageEntry>> = serde_json::from_value(self.get(&url)?)?;

        Ok(envelope.data.into_iter().map(ImgurImage::from).collect())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::{ImageHost, ImgurImage, ImgurResult};
    use crate::reddit::sender::SenderError;

    /// Image host answering from fixed tables.
    #[derive(Default)]
    pub(crate) struct StaticImageHost {
        pub(crate) images: HashMap<String, ImgurImage>,
        pub(crate) albums: HashMap<String, Vec<ImgurImage>>,
    }

    fn missing(id: &str) -> super::ImgurError {
        SenderError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, id.to_string())).into()
    }

    impl ImageHost for StaticImageHost {
        fn image(&self, id: &str) -> ImgurResult<ImgurImage> {
            self.images.get(id).cloned().ok_or_else(|| missing(id))
        }

        fn album_images(&self, album_id: &str) -> ImgurResult<Vec<ImgurImage>> {
            self.albums.get(album_id).cloned().ok_or_else(|| missing(album_id))
        }
    }
}
