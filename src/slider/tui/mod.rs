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

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{error, warn};

/// Template of a per-task bar: cyan bar, green `(index) filename` label.
pub(crate) const TASK_TEMPLATE: &str = "||{bar:40.cyan}||{msg:.green}";

/// Used when a template fails to parse.
const FALLBACK_TEMPLATE: &str = "{bar:40} {pos}/{len} {msg}";

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    /// The [ProgressStyle] being built.
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style.
    ///
    /// # Arguments
    ///
    /// * `msg_template`: The template to use.
    ///
    /// returns: ProgressStyleBuilder
    pub(crate) fn template(mut self, msg_template: &str) -> Self {
        match self.progress_style.clone().template(msg_template) {
            Ok(style) => {
                self.progress_style = style;
            }
            Err(err) => {
                warn!("Template error with '{}': {}. Using fallback template.", msg_template, err);
                match self.progress_style.clone().template(FALLBACK_TEMPLATE) {
                    Ok(style) => self.progress_style = style,
                    Err(e) => {
                        error!("Fallback template also failed: {}. Using default bar.", e);
                        self.progress_style = ProgressStyle::default_bar();
                    }
                }
            }
        }
        self
    }

    /// Sets the progress style chars.
    ///
    /// # Arguments
    ///
    /// * `chars`: Progress chars to use.
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

/// The style every task bar uses.
pub(crate) fn task_style() -> ProgressStyle {
    ProgressStyleBuilder::default()
        .template(TASK_TEMPLATE)
        .progress_chars("\u{2588}\u{2591}")
        .build()
}

/// A builder that helps in initializing and configuring a new [ProgressBar] for use.
pub(crate) struct ProgressBarBuilder {
    /// The [ProgressBar] to build.
    progress_bar: ProgressBar,
}

impl ProgressBarBuilder {
    /// Creates new instance of the builder.
    ///
    /// The bar draws nowhere until [attach](Self::attach) hands it to a
    /// [MultiProgress], so setting the message never prints a stray line.
    ///
    /// # Arguments
    ///
    /// * `len`: Total length of the progress bar.
    pub(crate) fn new(len: u64) -> Self {
        Self {
            progress_bar: ProgressBar::with_draw_target(Some(len), ProgressDrawTarget::hidden()),
        }
    }

    /// Sets the style of the progress bar to the style given.
    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    /// Sets the starting position.
    pub(crate) fn position(self, pos: u64) -> Self {
        self.progress_bar.set_position(pos);
        self
    }

    /// Sets the label shown next to the bar.
    pub(crate) fn message(self, msg: String) -> Self {
        self.progress_bar.set_message(msg);
        self
    }

    /// Registers the bar with `multi` and returns the registered handle.
    pub(crate) fn attach(self, multi: &MultiProgress) -> ProgressBar {
        multi.add(self.progress_bar)
    }
}

/// Draw target for the multi bar: stderr at a modest refresh rate, hidden
/// when stderr is not a terminal.
pub(crate) fn multi_draw_target() -> ProgressDrawTarget {
    if console::Term::stderr().is_term() {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    }
}
