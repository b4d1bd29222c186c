// src/progress.rs

//! Shared progress tracking trait and implementations
//!
//! The engine reports progress at unit-of-work boundaries: one step per
//! feature pack while building a layout, one step per producer while
//! querying updates. Implementations must be non-blocking.
//!
//! - `SilentProgress`: no-op for embedded/scripted use
//! - `LogProgress`: logs progress through tracing
//! - `CliProgress`: visual progress bars using indicatif

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use indicatif::{ProgressBar, ProgressStyle as IndicatifStyle};
use tracing::info;

/// Progress reporting style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressStyle {
    /// Progress bar with percentage (for known totals)
    #[default]
    Bar,
    /// Spinner (for unknown totals)
    Spinner,
}

/// Core trait for progress tracking
pub trait ProgressTracker {
    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Increment progress by the given amount
    fn increment(&self, amount: u64);

    /// Set the total (length) of the progress
    fn set_length(&self, length: u64);

    /// Get current position
    fn position(&self) -> u64;

    /// Finish progress successfully with a message
    fn finish_with_message(&self, message: &str);

    /// Check if progress is finished
    fn is_finished(&self) -> bool;
}

/// Silent progress tracker (no-op)
#[derive(Debug, Default)]
pub struct SilentProgress {
    position: AtomicU64,
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.position.fetch_add(amount, Ordering::Relaxed);
    }

    fn set_length(&self, _length: u64) {}

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Logging progress tracker
///
/// Logs every step to tracing at info level. Useful for non-interactive
/// environments or when progress belongs in logs.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: AtomicU64::new(0),
            length: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn increment(&self, amount: u64) {
        let new_pos = self.position.fetch_add(amount, Ordering::Relaxed) + amount;
        let length = self.length.load(Ordering::Relaxed);
        if length > 0 {
            info!("{}: {}/{}", self.name, new_pos, length);
        }
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, message: &str) {
        self.finished.store(true, Ordering::Relaxed);
        info!("{}: {}", self.name, message);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// CLI progress tracker with visual progress bars
pub struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub fn new(message: impl Into<String>, length: u64, style: ProgressStyle) -> Self {
        let bar = match style {
            ProgressStyle::Bar => {
                let bar = ProgressBar::new(length);
                bar.set_style(
                    IndicatifStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
                        .expect("valid progress template")
                        .progress_chars("=> "),
                );
                bar
            }
            ProgressStyle::Spinner => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    IndicatifStyle::with_template("{spinner} {msg}")
                        .expect("valid progress template"),
                );
                bar
            }
        };
        bar.set_message(message.into());
        Self { bar }
    }
}

impl ProgressTracker for CliProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}
