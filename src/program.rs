use std::env::current_dir;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use console::Term;
use dialoguer::{Input, Select};

use crate::reddit::fetcher::{Fetcher, Ffmpeg};
use crate::reddit::imgur::ImgurClient;
use crate::reddit::io::{CONFIG_NAME, Config, Login};
use crate::reddit::listing::{RedditListing, SortMode, TimeFilter, is_random_selector};
use crate::reddit::sender::{HttpClient, RequestSender};
use crate::reddit::{RunParameters, SubredditDownloader};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// A program class that handles the flow of the downloader user experience and steps of execution.
pub(crate) struct Program;

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new() -> Self {
        Self
    }

    /// Runs the downloader program.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("subreddit downloader");
        trace!("Starting subreddit downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        let working_dir = current_dir().context("Failed to get working directory")?;
        trace!("Program Working Directory: {}", working_dir.display());

        let config = Config::load_or_create(Path::new(CONFIG_NAME))
            .with_context(|| format!("Unable to load {}", CONFIG_NAME))?;
        let login = Login::get().context("Unable to load login information")?;
        trace!("Login information loaded...");
        trace!("Reddit User Agent: {}", login.user_agent());
        trace!("Imgur Client ID: {}", "*".repeat(login.client_id().len()));

        let interactive = console::user_attended();
        let mut params = RunParameters::from(&config.download);
        if interactive {
            params = prompt_parameters(params)?;
        }
        trace!("Run parameters: {:?}", params);

        let http: Arc<dyn HttpClient> = Arc::new(RequestSender::new(
            login.user_agent(),
            Duration::from_secs(config.network.timeout_secs),
        )?);
        let fetcher = Fetcher::new(http.clone(), Arc::new(Ffmpeg::new(config.mux.program.as_str())));
        let downloader = SubredditDownloader::new(
            Arc::new(RedditListing::new(http.clone())),
            Arc::new(ImgurClient::new(http, login.client_id())),
            fetcher,
            Path::new(&config.download.destination),
            config.network.queue_capacity,
        )
        .attended(interactive);

        match downloader.download_subreddit(&params) {
            Ok(result) => {
                info!("Finished downloading r/{} ({} posts)", params.subreddit, result.posts_done_final);
                Ok(())
            }
            Err(err) => {
                error!("Download aborted: {}", err);
                Err(err.into())
            }
        }
    }
}

/// Asks for every run parameter, offering the configured values as defaults.
fn prompt_parameters(defaults: RunParameters) -> Result<RunParameters, Error> {
    let subreddit: String = Input::new()
        .with_prompt("Subreddit (r for random)")
        .default(defaults.subreddit.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("A subreddit name is required")
            } else {
                Ok(())
            }
        })
        .interact_text()
        .context("Terminal unable to set up subreddit prompt...")?;
    if is_random_selector(&subreddit) {
        trace!("A random subreddit was requested");
    }

    let sort = select("Sort by", SortMode::variants(), defaults.sort)?;
    let time_filter = select("Time filter", TimeFilter::variants(), defaults.time_filter)?;

    let posts: u32 = Input::new()
        .with_prompt("Number of posts")
        .default(defaults.posts)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input >= 1 { Ok(()) } else { Err("At least one post is required") }
        })
        .interact_text()
        .unwrap_or(defaults.posts);

    let storage_gb: f64 = Input::new()
        .with_prompt("Storage limit in gigabytes")
        .default(defaults.storage_gb)
        .validate_with(|input: &f64| -> Result<(), &str> {
            if input.is_finite() && *input > 0.0 { Ok(()) } else { Err("The limit must be above 0") }
        })
        .interact_text()
        .unwrap_or(defaults.storage_gb);

    let workers: usize = Input::new()
        .with_prompt("Worker threads")
        .default(defaults.workers)
        .interact_text()
        .unwrap_or(defaults.workers);

    Ok(RunParameters {
        subreddit: subreddit.trim().to_string(),
        sort,
        time_filter,
        posts,
        storage_gb,
        workers: workers.max(1),
    })
}

fn select<T: Copy + PartialEq + ToString>(prompt: &str, options: &[T], default: T) -> Result<T, Error> {
    let labels: Vec<String> = options.iter().map(ToString::to_string).collect();
    let index = Select::new()
        .with_prompt(prompt)
        .items(&labels)
        .default(options.iter().position(|option| *option == default).unwrap_or(0))
        .interact()
        .with_context(|| format!("Terminal unable to set up \"{}\" prompt...", prompt))?;

    Ok(options.get(index).copied().unwrap_or(default))
}
