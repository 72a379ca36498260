// ============================================================================
// init.rs — Starter icons.toml generation
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use dialoguer::Confirm;
use walkdir::WalkDir;

use crate::config::{ConfigFile, IconEntry};
use crate::convert::is_krita_document;

const SCAN_DEPTH: usize = 4;

const HEADER: &str = "\
# trayicons configuration
#
# converter = \"archive\"   # \"archive\" reads mergedimage.png, \"krita\" runs Krita's exporter
# krita = \"C:/Program Files/Krita (x64)/bin/krita.exe\"
# sizes = [16, 24, 32, 48, 64, 256]
# debounce_ms = 300
#
# Paths are relative to this file.

";

pub struct InitOptions {
    pub path: PathBuf,
    pub scan: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub force: bool,
}

/// Krita documents under `dir`, sorted. Hidden directories are skipped.
pub fn scan_sources(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(SCAN_DEPTH)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_krita_document(e.path()))
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found
}

/// One entry per source; `src` relative to `base_dir` where possible. The
/// destinations mirror the layout under `scan_root`, so equally named sources
/// in different folders get distinct icons.
pub fn entries_for(
    sources: &[PathBuf],
    scan_root: &Path,
    base_dir: &Path,
    out_dir: &Path,
) -> Vec<IconEntry> {
    sources
        .iter()
        .map(|src| {
            let rel = src.strip_prefix(base_dir).unwrap_or(src).to_path_buf();
            let stem = src
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "icon".to_string());
            let mirrored = match src.strip_prefix(scan_root) {
                Ok(p) => p.to_path_buf(),
                Err(_) => PathBuf::from(src.file_name().unwrap_or(src.as_os_str())),
            };
            IconEntry {
                src: Some(rel),
                dst: Some(out_dir.join(mirrored).with_extension("ico")),
                name: Some(stem),
            }
        })
        .collect()
}

pub fn demo_entries() -> Vec<IconEntry> {
    vec![IconEntry {
        src: Some(PathBuf::from("demo.kra")),
        dst: Some(PathBuf::from("./demo.ico")),
        name: None,
    }]
}

pub fn render_config(entries: Vec<IconEntry>) -> anyhow::Result<String> {
    let file = ConfigFile {
        icon: Some(entries),
        ..ConfigFile::default()
    };
    let body = toml::to_string_pretty(&file).context("Failed to serialize configuration")?;
    Ok(format!("{}{}", HEADER, body))
}

/// Writes the starter config and returns the number of icon entries.
pub fn init_config(opts: &InitOptions) -> anyhow::Result<usize> {
    if opts.path.exists() && !opts.force {
        let overwrite = Confirm::new()
            .with_prompt(format!("'{}' already exists. Overwrite?", opts.path.display()))
            .default(false)
            .interact()?;
        if !overwrite {
            return Err(anyhow::anyhow!("Initialization cancelled"));
        }
    }

    let base_dir = opts
        .path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let entries = match &opts.scan {
        Some(dir) => {
            let found = scan_sources(dir);
            if found.is_empty() {
                return Err(anyhow::anyhow!("No .kra/.krz files found under {}", dir.display()));
            }
            let base = fs::canonicalize(&base_dir).unwrap_or(base_dir.clone());
            let root = fs::canonicalize(dir).unwrap_or(dir.clone());
            let found: Vec<PathBuf> = found
                .into_iter()
                .map(|p| fs::canonicalize(&p).unwrap_or(p))
                .collect();
            entries_for(&found, &root, &base, &opts.out_dir)
        }
        None => demo_entries(),
    };

    let count = entries.len();
    let content = render_config(entries)?;
    fs::create_dir_all(&base_dir)
        .with_context(|| format!("Failed to create {}", base_dir.display()))?;
    fs::write(&opts.path, content)
        .with_context(|| format!("Failed to write {}", opts.path.display()))?;
    Ok(count)
}
