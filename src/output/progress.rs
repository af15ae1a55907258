//! Terminal progress bars for crawl and detail runs
//!
//! A hidden bar still keeps its counters, so the phases advance whatever bar
//! they were given and only `main` decides whether anything is drawn.

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg} ({eta})";

/// Creates an empty bar counting `unit`, drawn on stderr only when `visible`
///
/// The length starts at zero; phases add their work with `inc_length` once
/// they know how much there is.
pub fn progress_bar(unit: &'static str, visible: bool) -> ProgressBar {
    let bar = if visible {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.set_message(unit);
    bar
}
