// ============================================================================
// options.rs — Command-line arguments (CLI)
// ============================================================================

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::default_config_path;
use crate::report::Verbosity;

/// Where to read icons.toml from: `--config` wins over the positional FILE,
/// both fall back to ./icons.toml.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Optional path to the configuration file (can also use --config)
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn resolve(&self) -> PathBuf {
        self.config
            .clone()
            .or_else(|| self.file.clone())
            .unwrap_or_else(default_config_path)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Regenerate stale icons, watch the sources and show the icons in the tray (default)
    Run {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Regenerate and watch without a tray icon
    Watch {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Regenerate icons once and exit
    Convert {
        #[command(flatten)]
        config: ConfigArgs,

        /// Convert a single source instead of the configured list
        #[arg(long, value_name = "SRC", requires = "dst")]
        src: Option<PathBuf>,

        /// Destination .ico for --src
        #[arg(long, value_name = "DST", requires = "src")]
        dst: Option<PathBuf>,
    },

    /// Write a starter icons.toml
    Init {
        /// Where to write the configuration
        #[arg(short, long, value_name = "FILE", default_value = "icons.toml")]
        config: PathBuf,

        /// Directory to scan for .kra/.krz files
        #[arg(short, long, value_name = "DIR")]
        scan: Option<PathBuf>,

        /// Directory (relative to the config) for generated icons
        #[arg(short, long, value_name = "DIR", default_value = "icons")]
        out_dir: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(name = "trayicons")]
#[command(version)]
#[command(about = "trayicons - regenerate .ico files from Krita documents and show them in the tray", long_about = None)]
pub struct Options {
    #[command(subcommand)]
    pub command: Option<Command>,

    // Used when no subcommand is given (same as `run`)
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Verbose output (commands, skipped events)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode: only errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Regenerate icons even when they look up to date (overwrite for init)
    #[arg(short, long, global = true)]
    pub force: bool,
}

impl Options {
    /// If both verbose and quiet are set, quiet takes precedence
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// The subcommand to execute; bare invocation means `run`.
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or_else(|| Command::Run {
            config: self.config.clone(),
        })
    }
}
