//! Terminal observer for a running propagation

use async_trait::async_trait;
use console::style;
use dialoguer::Confirm;
use ferrosync_engine::PropagationReport;
use ferrosync_types::{ItemId, PropagationObserver};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Renders progress with `indicatif` and asks merge questions with `dialoguer`
pub struct TerminalObserver {
    progress_bar: Option<ProgressBar>,
    interactive: bool,
    bytes: AtomicU64,
}

/// Bar position for a completion percentage
fn bar_position(percent: f64) -> u64 {
    percent.clamp(0.0, 100.0).round() as u64
}

impl TerminalObserver {
    /// Create an observer; `quiet` hides the bar, `interactive` allows prompts
    pub fn new(quiet: bool, interactive: bool) -> Self {
        let progress_bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos:>3}% {wide_msg}",
                    )
                    .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        };

        Self {
            progress_bar,
            interactive,
            bytes: AtomicU64::new(0),
        }
    }

    /// Stop the bar and leave a one-line summary
    pub fn finish(&self, report: &PropagationReport) {
        if let Some(pb) = &self.progress_bar {
            pb.finish_with_message(format!(
                "{} ({})",
                report,
                indicatif::HumanBytes(self.bytes.load(Ordering::Relaxed))
            ));
        }
    }

    /// Print a warning without tearing the bar
    pub fn display_warning(&self, message: &str) {
        let print = || println!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
        match &self.progress_bar {
            Some(pb) => pb.suspend(print),
            None => print(),
        }
    }
}

fn ask_merge(title: &str, transcript: &str) -> bool {
    println!();
    println!("{}", style(title).bold().underlined());
    for line in transcript.lines() {
        println!("  {}", style(line).dim());
    }

    Confirm::new()
        .with_prompt("Commit this merge to both replicas?")
        .default(false)
        .interact()
        .unwrap_or(false)
}

#[async_trait]
impl PropagationObserver for TerminalObserver {
    fn progress(&self, _item: ItemId, bytes_delta: u64) {
        self.bytes.fetch_add(bytes_delta, Ordering::Relaxed);
    }

    fn percentage(&self, percent: f64) {
        if let Some(pb) = &self.progress_bar {
            pb.set_position(bar_position(percent));
        }
    }

    fn log_line(&self, line: &str) {
        if let Some(pb) = &self.progress_bar {
            pb.set_message(line.to_string());
        }
    }

    async fn confirm_merge(&self, title: &str, transcript: &str) -> bool {
        if !self.interactive {
            self.display_warning(&format!("{}: not committed (no terminal to confirm)", title));
            return false;
        }

        let title = title.to_string();
        let transcript = transcript.to_string();
        let progress_bar = self.progress_bar.clone();

        tokio::task::spawn_blocking(move || match progress_bar {
            Some(pb) => pb.suspend(|| ask_merge(&title, &transcript)),
            None => ask_merge(&title, &transcript),
        })
        .await
        .unwrap_or(false)
    }

    fn status(&self, text: &str) {
        if let Some(pb) = &self.progress_bar {
            pb.set_prefix(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_interactive_declines_merges() {
        let observer = TerminalObserver::new(true, false);
        observer.progress(ItemId(0), 10);
        observer.log_line("[BGN] Merging a");
        observer.status("Propagating updates");
        assert!(!observer.confirm_merge("Merge result for a", "+ line").await);
    }

    #[test]
    fn test_bar_follows_percentage() {
        let observer = TerminalObserver::new(false, false);
        let pb = observer.progress_bar.clone().unwrap();
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());

        observer.percentage(42.4);
        assert_eq!(pb.position(), 42);
        observer.percentage(100.0);
        assert_eq!(pb.position(), 100);

        observer.finish(&PropagationReport::default());
        assert!(pb.is_finished());
    }

    #[test]
    fn test_bar_position_is_clamped() {
        assert_eq!(bar_position(-3.0), 0);
        assert_eq!(bar_position(99.6), 100);
        assert_eq!(bar_position(250.0), 100);
    }
}
