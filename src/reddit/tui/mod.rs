/*
 * Copyright (c) 2022 McSib
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Template of the run's percentage bar.
const PERCENT_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}";

/// Used when a template is rejected by indicatif.
const FALLBACK_TEMPLATE: &str = "[{elapsed_precise}] {bar} {pos}%";

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    /// The [ProgressStyle] being built.
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style, falling back to a plain one when it does not parse.
    ///
    /// # Arguments
    ///
    /// * `msg_template`: The template to use.
    ///
    /// returns: ProgressStyleBuilder
    pub(crate) fn template(mut self, msg_template: &str) -> Self {
        self.progress_style = match self.progress_style.clone().template(msg_template) {
            Ok(style) => style,
            Err(err) => {
                warn!("Template error with '{}': {}. Using fallback template.", msg_template, err);
                match self.progress_style.clone().template(FALLBACK_TEMPLATE) {
                    Ok(style) => style,
                    Err(err) => {
                        error!("Fallback template also failed: {}. Using default bar.", err);
                        ProgressStyle::default_bar()
                    }
                }
            }
        };

        self
    }

    /// Sets the progress style chars.
    pub(crate) fn progress_chars(mut self, chars: &str) -> Self {
        self.progress_style = self.progress_style.progress_chars(chars);
        self
    }

    pub(crate) fn build(self) -> ProgressStyle {
        self.progress_style
    }
}

impl Default for ProgressStyleBuilder {
    fn default() -> Self {
        Self {
            progress_style: ProgressStyle::default_bar(),
        }
    }
}

/// A builder that helps in initializing and configuring a new [ProgressBar] for use.
pub(crate) struct ProgressBarBuilder {
    /// The [ProgressBar] to build.
    progress_bar: ProgressBar,
}

impl ProgressBarBuilder {
    /// Creates new instance of the builder.
    ///
    /// # Arguments
    ///
    /// * `len`: Total length of the progress bar.
    pub(crate) fn new(len: u64) -> Self {
        Self {
            progress_bar: ProgressBar::new(len),
        }
    }

    /// Sets the style of the progress bar to the style given.
    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    /// Sets the draw target (output) of the progress bar to the target given.
    pub(crate) fn draw_target(self, target: ProgressDrawTarget) -> Self {
        self.progress_bar.set_draw_target(target);
        self
    }

    /// Sets the steady tick's duration to the given duration.
    ///
    /// # Arguments
    ///
    /// * `duration`: Steady tick duration.
    pub(crate) fn steady_tick(self, duration: Duration) -> Self {
        self.progress_bar.enable_steady_tick(duration);
        self
    }

    /// Returns the newly built progress bar.
    pub(crate) fn build(self) -> ProgressBar {
        self.progress_bar
    }
}

/// The console bar of one subreddit run, counting from 0 to 100 percent on stderr.
pub(crate) fn percent_bar() -> ProgressBar {
    let style = ProgressStyleBuilder::default()
        .template(PERCENT_TEMPLATE)
        .progress_chars("=>-")
        .build();

    ProgressBarBuilder::new(100)
        .style(style)
        .draw_target(ProgressDrawTarget::stderr())
        .steady_tick(Duration::from_millis(100))
        .build()
}

/// Where the run's percentage is shown.
#[derive(Debug)]
pub(crate) enum ProgressDisplay {
    /// A redrawn [percent_bar], for terminals.
    Bar(ProgressBar),
    /// One `Progress: N%` line per change, for redirected output and logs.
    Lines,
}

impl ProgressDisplay {
    /// The bar when someone is watching the console, plain lines otherwise.
    pub(crate) fn for_console(attended: bool) -> Self {
        if attended {
            ProgressDisplay::Bar(percent_bar())
        } else {
            ProgressDisplay::Lines
        }
    }

    pub(crate) fn show(&self, percent: u8) {
        match self {
            ProgressDisplay::Bar(bar) => bar.set_position(u64::from(percent)),
            ProgressDisplay::Lines => println!("Progress: {}%", percent),
        }
    }

    pub(crate) fn finish(&self) {
        if let ProgressDisplay::Bar(bar) = self {
            bar.finish();
        }
    }
}
