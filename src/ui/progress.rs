//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::transport::{Direction, TransferObserver, TransferOutcome};
use console::style;
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// One bar per running transfer; plain lines when not on a terminal
pub struct TransferProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    interactive: bool,
}

impl TransferProgress {
    pub fn new(ctx: &UiContext) -> Self {
        let multi = if ctx.use_fancy_output() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            interactive: ctx.use_fancy_output(),
        }
    }

    fn bar_style(total: Option<u64>) -> ProgressStyle {
        let template = match total {
            Some(_) => "  {prefix:.dim} {msg:<32} {bar:24.cyan/dim} {bytes}/{total_bytes} {bytes_per_sec:.dim}",
            None => "  {prefix:.dim} {msg:<32} {spinner:.cyan} {bytes} {bytes_per_sec:.dim}",
        };
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
    }

    fn take_bar(&self, filename: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(filename)
    }
}

impl TransferObserver for TransferProgress {
    fn started(&self, filename: &str, direction: Direction, total: Option<u64>) {
        let verb = match direction {
            Direction::Download => "get",
            Direction::Upload => "put",
        };

        if !self.interactive {
            match total {
                Some(total) => println!("{} {} ({})", style(verb).dim(), filename, HumanBytes(total)),
                None => println!("{} {}", style(verb).dim(), filename),
            }
            return;
        }

        let bar = self.multi.add(ProgressBar::new(total.unwrap_or(0)));
        bar.set_style(Self::bar_style(total));
        bar.set_prefix(verb);
        bar.set_message(filename.to_string());
        if let Ok(mut bars) = self.bars.lock() {
            if let Some(previous) = bars.insert(filename.to_string(), bar) {
                previous.finish_and_clear();
            }
        }
    }

    fn progressed(&self, filename: &str, bytes: u64) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(filename) {
                bar.inc(bytes);
            }
        }
    }

    fn finished(&self, filename: &str, outcome: &TransferOutcome) {
        if let Some(bar) = self.take_bar(filename) {
            bar.finish_and_clear();
        }
        if !outcome.is_success() {
            // Final per-file outcomes are printed by the command
            debug!("{}: {}", filename, outcome);
        }
    }
}
