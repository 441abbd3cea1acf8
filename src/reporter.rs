//! User-facing progress and status output.
//!
//! Components never print directly; they talk to a [`Reporter`]. The
//! interactive implementation draws colored status lines, `indicatif` download
//! bars and the OSC 9;4 terminal progress indicator (Ghostty, WezTerm,
//! Windows Terminal). The plain implementation writes uncolored lines and hides
//! progress bars, which keeps redirected output and test logs readable.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

pub trait Reporter: Send + Sync {
    /// Top-level step, e.g. "Installing acme/tool"
    fn header(&self, message: &str);
    fn info(&self, message: &str);
    fn success(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    /// Byte progress bar for a download; hidden when not drawing.
    fn progress_bar(&self, label: &str) -> ProgressBar;
    /// Coarse progress through the install phases.
    fn phase(&self, _current: usize, _total: usize) {}
    fn phase_done(&self, _failed: bool) {}
}

/// Pick the reporter matching stdout.
pub fn for_terminal(quiet: bool) -> Arc<dyn Reporter> {
    if io::stdout().is_terminal() && !quiet {
        Arc::new(TtyReporter::new())
    } else {
        Arc::new(PlainReporter::new(quiet))
    }
}

/// Progress state for terminal indicators
#[derive(Debug, Clone, Copy)]
enum ProgressState {
    Off = 0,
    Normal = 1,
    Error = 2,
}

/// Set terminal progress using OSC 9;4. Unsupported terminals ignore it.
fn set_terminal_progress(progress: u8, state: ProgressState) {
    let progress = progress.min(100);
    print!("\x1b]9;4;{};{}\x1b\\", state as u8, progress);
    let _ = io::stdout().flush();
}

fn clear_terminal_progress() {
    set_terminal_progress(0, ProgressState::Off);
}

fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current as f64 / total as f64) * 100.0).min(100.0) as u8
}

#[derive(Debug, Default)]
pub struct TtyReporter;

impl TtyReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for TtyReporter {
    fn header(&self, message: &str) {
        println!("{} {}", "==>".blue().bold(), message.bold());
    }

    fn info(&self, message: &str) {
        println!("  {}", message);
    }

    fn success(&self, message: &str) {
        println!("  {} {}", "✓".green(), message);
    }

    fn warn(&self, message: &str) {
        eprintln!("  {} {}", "⚠".yellow(), message);
    }

    fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    fn progress_bar(&self, label: &str) -> ProgressBar {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("⬇ {label}"));
        pb
    }

    fn phase(&self, current: usize, total: usize) {
        set_terminal_progress(percent(current, total), ProgressState::Normal);
    }

    fn phase_done(&self, failed: bool) {
        if failed {
            set_terminal_progress(100, ProgressState::Error);
        }
        clear_terminal_progress();
    }
}

/// Uncolored line output; `quiet` drops everything but warnings and errors.
#[derive(Debug, Default)]
pub struct PlainReporter {
    quiet: bool,
}

impl PlainReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for PlainReporter {
    fn header(&self, message: &str) {
        if !self.quiet {
            println!("==> {message}");
        }
    }

    fn info(&self, message: &str) {
        if !self.quiet {
            println!("  {message}");
        }
    }

    fn success(&self, message: &str) {
        if !self.quiet {
            println!("  ok: {message}");
        }
    }

    fn warn(&self, message: &str) {
        eprintln!("warning: {message}");
    }

    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn progress_bar(&self, _label: &str) -> ProgressBar {
        ProgressBar::hidden()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 5), 0);
        assert_eq!(percent(5, 5), 100);
        assert_eq!(percent(7, 5), 100);
        assert_eq!(percent(1, 0), 0);
        assert_eq!(percent(1, 4), 25);
    }

    #[test]
    fn test_plain_progress_bar_is_hidden() {
        let reporter = PlainReporter::new(true);
        assert!(reporter.progress_bar("tool").is_hidden());
    }
}
