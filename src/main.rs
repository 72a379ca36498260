// ============================================================================
// main.rs — trayicons CLI entry point
// ============================================================================

use std::path::Path;
use std::process;
use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use trayicons::init::{init_config, InitOptions};
use trayicons::options::Command;
use trayicons::{converter_for, prepare_icons, report, Config, Converter, Options, SourceWatcher};

fn main() {
    let options = Options::parse();
    report::set_verbosity(options.verbosity());

    let code = match options.resolved_command() {
        Command::Run { config } => run_tray(&config.resolve(), options.force),
        Command::Watch { config } => run_watch(&config.resolve(), options.force),
        Command::Convert { config, src, dst } => match (src, dst) {
            (Some(src), Some(dst)) => convert_one(&config.resolve(), &src, &dst),
            _ => convert_all(&config.resolve()),
        },
        Command::Init {
            config,
            scan,
            out_dir,
        } => run_init(InitOptions {
            path: config,
            scan,
            out_dir,
            force: options.force,
        }),
    };
    process::exit(code);
}

/// Loads the config or terminates: missing/invalid files and empty icon
/// lists are fatal.
fn load_config_or_exit(path: &Path) -> Config {
    report::detail(format!("Parsing configuration file: {}", path.display()));
    let config = match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            report::error(format!("Error loading configuration: {}", e));
            process::exit(1);
        }
    };
    if config.is_empty() {
        report::error(format!("No icons configured in '{}'. Exiting.", path.display()));
        process::exit(1);
    }
    report::info(format!(
        "Loaded {} icon(s) from {} (converter: {})",
        config.icons.len(),
        path.display(),
        config.converter
    ));
    for icon in &config.icons {
        report::detail(format!("  • {} → {}", icon.src.display(), icon.dst.display()));
    }
    config
}

/// Brings destinations up to date before watching. Failures are reported
/// but do not stop the watcher; the next save retries.
fn prepare(config: &Config, force: bool) {
    let converter = Converter::from_config(config);
    let summary = prepare_icons(config, &converter, force, None);
    for r in &summary.converted {
        report::converted(format!("{} ({:?})", r.dst.display(), r.frames));
    }
    for (src, e) in &summary.failed {
        report::error(format!("Conversion of {} failed: {}", src.display(), e));
    }
    report::detail(format!("{} icon(s) already up to date", summary.up_to_date.len()));
}

fn build_watcher_or_exit(config: &Config) -> SourceWatcher {
    match SourceWatcher::from_config(config) {
        Ok(w) => w,
        Err(e) => {
            report::error(format!("Failed to register watches: {}", e));
            process::exit(1);
        }
    }
}

#[cfg(windows)]
fn run_tray(path: &Path, force: bool) -> i32 {
    let config = load_config_or_exit(path);
    prepare(&config, force);
    let watcher = build_watcher_or_exit(&config);

    match trayicons::tray::run(config, watcher) {
        Ok(()) => 0,
        Err(e) => {
            report::error(format!("Tray error: {}", e));
            1
        }
    }
}

#[cfg(not(windows))]
fn run_tray(path: &Path, force: bool) -> i32 {
    report::warn("The tray is only available on Windows; running in watch mode.");
    run_watch(path, force)
}

fn run_watch(path: &Path, force: bool) -> i32 {
    let config = load_config_or_exit(path);
    prepare(&config, force);
    let watcher = build_watcher_or_exit(&config);

    let handle = match watcher.start(|update| {
        report::detail(format!("Icon ready: {}", update.dst.display()));
    }) {
        Ok(h) => h,
        Err(e) => {
            report::error(format!("Failed to start watcher: {}", e));
            return 1;
        }
    };
    report::info("Watching for changes (Ctrl+C to stop)");
    handle.join();
    0
}

fn convert_all(path: &Path) -> i32 {
    let config = load_config_or_exit(path);
    let converter = Converter::from_config(&config);
    let start = Instant::now();

    let progress = ProgressBar::new(config.icons.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(style.progress_chars("#>-"));
    }
    if report::verbosity() == report::Verbosity::Quiet {
        progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    // `convert` always rewrites every icon
    let summary = prepare_icons(&config, &converter, true, Some(&progress));
    progress.finish_with_message("Conversion completed");

    for (src, e) in &summary.failed {
        report::error(format!("Conversion of {} failed: {}", src.display(), e));
    }
    report::info(format!(
        "{} converted, {} failed in {:.2?}",
        summary.converted.len(),
        summary.failed.len(),
        start.elapsed()
    ));
    if summary.success() {
        0
    } else {
        1
    }
}

/// Single conversion: converter settings come from the config file when one
/// is present, its icon list is ignored.
fn convert_one(config_path: &Path, src: &Path, dst: &Path) -> i32 {
    let converter = match converter_for(config_path) {
        Ok(c) => c,
        Err(e) => {
            report::error(format!("Error loading configuration: {}", e));
            return 1;
        }
    };
    match converter.convert(src, dst) {
        Ok(r) => {
            report::converted(format!("{} → {} ({:?}, {} bytes)", src.display(), r.dst.display(), r.frames, r.bytes));
            0
        }
        Err(e) => {
            report::error(format!("Conversion of {} failed: {}", src.display(), e));
            1
        }
    }
}

fn run_init(opts: InitOptions) -> i32 {
    match init_config(&opts) {
        Ok(count) => {
            report::info(format!(
                "Wrote {} with {} icon entr{}",
                opts.path.display(),
                count,
                if count == 1 { "y" } else { "ies" }
            ));
            if opts.scan.is_none() {
                report::info("Default config created. Please correct the config and re-run this tool.");
            }
            0
        }
        Err(e) => {
            report::error(format!("{:#}", e));
            1
        }
    }
}
