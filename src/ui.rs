//! Stderr progress for the command-line tools.
//!
//! Pretty output (spinners and the replay bar) is only drawn on a terminal;
//! otherwise stages and progress fall back to plain `eprintln!` lines.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    stdout_piped: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, stdout_piped: bool) -> Self {
        Self {
            mode,
            is_tty,
            stdout_piped,
        }
    }

    pub fn from_args(ui_flag: &str, is_tty: bool, stdout_piped: bool) -> Self {
        Self::new(UiMode::parse(ui_flag), is_tty, stdout_piped)
    }

    pub fn is_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.stdout_piped,
                UiMode::Plain => false,
            }
    }

    /// Announce a named step. The returned guard reports its duration on drop.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.is_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(format!("{name}..."));
            Some(spinner)
        } else {
            eprintln!("==> {name}");
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// Progress over replay seconds remaining.
    pub fn replay_progress(&self) -> ReplayProgress {
        if self.is_pretty() {
            ReplayProgress::pretty()
        } else {
            ReplayProgress::hidden()
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("done: {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// Bar over the replay's simulated seconds, advanced from remaining time.
pub struct ReplayProgress {
    bar: ProgressBar,
}

impl ReplayProgress {
    fn pretty() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} ms sim {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn set_total(&self, duration_secs: f64) {
        self.bar.set_length(secs_to_ms(duration_secs));
    }

    /// Position on the bar given simulator seconds left.
    pub fn update(&self, remaining_secs: f64) {
        let total = self.bar.length().unwrap_or(0);
        let done = total.saturating_sub(secs_to_ms(remaining_secs));
        self.bar.set_position(done);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(self, frames_accepted: u64) {
        self.bar
            .finish_with_message(format!("{frames_accepted} frames written"));
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_output_requires_a_terminal() {
        assert!(!Ui::from_args("pretty", false, false).is_pretty());
        assert!(Ui::from_args("pretty", true, true).is_pretty());
        assert!(!Ui::from_args("auto", true, true).is_pretty());
        assert!(Ui::from_args("auto", true, false).is_pretty());
        assert!(!Ui::from_args("plain", true, false).is_pretty());
    }

    #[test]
    fn progress_tracks_elapsed_share() {
        let progress = ReplayProgress::hidden();
        progress.set_total(2.0);
        progress.update(1.5);
        assert_eq!(progress.position(), 500);
        progress.update(-0.2);
        assert_eq!(progress.position(), 2000);
    }
}
