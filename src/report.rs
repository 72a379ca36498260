// ============================================================================
// report.rs — Console output (tagged, coloured, timestamped lines)
// ============================================================================
//
// Every line carries a local timestamp and a tag such as [INFO] or [WATCH].
// A process-wide verbosity decides what reaches the terminal; errors always
// go to stderr regardless of the level.
// ============================================================================

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::Local;
use colored::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Normal = 1,
    Verbose = 2,
}

static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Normal as u8);

pub fn set_verbosity(level: Verbosity) {
    VERBOSITY.store(level as u8, Ordering::Relaxed);
}

pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Quiet,
        1 => Verbosity::Normal,
        _ => Verbosity::Verbose,
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn line(tag: ColoredString, msg: &str) -> String {
    format!("{} {} {}", timestamp().dimmed(), tag, msg)
}

/// General progress information.
pub fn info(msg: impl AsRef<str>) {
    if verbosity() >= Verbosity::Normal {
        println!("{}", line("[INFO]".cyan(), msg.as_ref()));
    }
}

/// Watch registration and detected file changes.
pub fn watch(msg: impl AsRef<str>) {
    if verbosity() >= Verbosity::Normal {
        println!("{}", line("[WATCH]".blue(), msg.as_ref()));
    }
}

/// A finished conversion.
pub fn converted(msg: impl AsRef<str>) {
    if verbosity() >= Verbosity::Normal {
        println!("{}", line("[CONVERT]".green(), msg.as_ref()));
    }
}

/// Only shown with --verbose.
pub fn detail(msg: impl AsRef<str>) {
    if verbosity() >= Verbosity::Verbose {
        println!("{}", line("[DEBUG]".normal(), msg.as_ref()));
    }
}

pub fn warn(msg: impl AsRef<str>) {
    if verbosity() >= Verbosity::Normal {
        eprintln!("{}", line("[WARN]".yellow().bold(), msg.as_ref()));
    }
}

pub fn error(msg: impl AsRef<str>) {
    eprintln!("{}", line("[ERROR]".red().bold(), msg.as_ref()));
}
