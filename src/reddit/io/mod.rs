use std::fs::{read_to_string, write};
use std::io;
use std::path::Path;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reddit::listing::{SortMode, TimeFilter};

pub(crate) mod directory;

/// Name of the configuration file.
pub(crate) const CONFIG_NAME: &str = "config.toml";

/// Name of the login file.
pub(crate) const LOGIN_NAME: &str = "login.toml";

#[derive(Error, Debug)]
pub(crate) enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) type ConfigResult<T> = Result<T, ConfigError>;

/// `[download]`: defaults of a run, offered again at the prompts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct DownloadSection {
    /// Directory holding one folder per subreddit.
    pub(crate) destination: String,
    /// Subreddit name, or `r`/`random`.
    pub(crate) subreddit: String,
    pub(crate) sort: SortMode,
    pub(crate) time_filter: TimeFilter,
    /// Target number of downloaded posts.
    pub(crate) posts: u32,
    /// Storage quota for the subreddit folder, in gigabytes.
    pub(crate) storage_gb: f64,
    pub(crate) workers: usize,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            destination: "downloads".to_string(),
            subreddit: "pics".to_string(),
            sort: SortMode::Top,
            time_filter: TimeFilter::All,
            posts: 10,
            storage_gb: 1.0,
            workers: 3,
        }
    }
}

/// `[network]`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct NetworkSection {
    pub(crate) timeout_secs: u64,
    /// Capacity of the progress queue between the workers and the console.
    pub(crate) queue_capacity: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            queue_capacity: 100,
        }
    }
}

/// `[mux]`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct MuxSection {
    /// Program combining reddit's separate video and audio streams.
    pub(crate) program: String,
}

impl Default for MuxSection {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

/// Config that is used to do general setup.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) download: DownloadSection,
    pub(crate) network: NetworkSection,
    pub(crate) mux: MuxSection,
}

impl Config {
    /// Loads the config at `path`, writing the defaults there first when it does not exist.
    pub(crate) fn load_or_create(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            info!("Creating config file at {}...", path.display());
            let config = Self::default();
            write(path, toml::to_string_pretty(&config)?)?;
            return Ok(config);
        }

        let config: Config = toml::from_str(&read_to_string(path)?)?;
        config.validate()?;
        trace!("Config loaded from {}: {:?}", path.display(), config);

        Ok(config)
    }

    pub(crate) fn validate(&self) -> ConfigResult<()> {
        let download = &self.download;
        if download.destination.trim().is_empty() {
            return Err(ConfigError::Invalid("download.destination must not be empty".to_string()));
        }
        if download.subreddit.trim().is_empty() {
            return Err(ConfigError::Invalid("download.subreddit must not be empty".to_string()));
        }
        if download.posts == 0 {
            return Err(ConfigError::Invalid("download.posts must be at least 1".to_string()));
        }
        if !(download.storage_gb.is_finite() && download.storage_gb > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "download.storage_gb must be above 0, got {}",
                download.storage_gb
            )));
        }
        if download.workers == 0 {
            return Err(ConfigError::Invalid("download.workers must be at least 1".to_string()));
        }
        if self.network.queue_capacity == 0 {
            return Err(ConfigError::Invalid("network.queue_capacity must be at least 1".to_string()));
        }
        if self.mux.program.trim().is_empty() {
            return Err(ConfigError::Invalid("mux.program must not be empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct RedditLogin {
    /// Reddit throttles requests carrying a generic user agent.
    pub(crate) user_agent: String,
}

impl Default for RedditLogin {
    fn default() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub(crate) struct ImgurLogin {
    pub(crate) client_id: String,
}

/// Identity sent to the upstream APIs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub(crate) struct Login {
    reddit: RedditLogin,
    imgur: ImgurLogin,
}

static LOGIN: OnceCell<Login> = OnceCell::new();

impl Login {
    /// Gets the global login, loading [LOGIN_NAME] on first use.
    pub(crate) fn get() -> ConfigResult<&'static Login> {
        LOGIN.get_or_try_init(|| Self::load_or_create(Path::new(LOGIN_NAME)))
    }

    /// Loads the login at `path`, writing an empty one there first when it does not exist.
    pub(crate) fn load_or_create(path: &Path) -> ConfigResult<Self> {
        let login = if path.exists() {
            toml::from_str(&read_to_string(path)?)?
        } else {
            info!("Creating login file at {}...", path.display());
            let login = Self::default();
            write(path, toml::to_string_pretty(&login)?)?;
            login
        };

        if login.is_imgur_empty() {
            warn!("No imgur client id in {}, imgur posts will fail", path.display());
        }

        Ok(login)
    }

    pub(crate) fn user_agent(&self) -> &str {
        &self.reddit.user_agent
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.imgur.client_id
    }

    pub(crate) fn is_imgur_empty(&self) -> bool {
        self.imgur.client_id.trim().is_empty()
    }
}
