// ============================================================================
// config.rs — icons.toml parsing and validation
// ============================================================================
//
// The config file is a flat list of (src, dst) pairs plus a few optional
// converter settings:
//
//   converter = "archive"        # or "krita"
//   sizes = [16, 32, 48, 256]
//
//   [[icon]]
//   src = "art/app.kra"
//   dst = "icons/app.ico"
//
// Relative paths are resolved against the directory holding the config file.
// Entries missing `src` or `dst` are skipped with a warning.
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrayIconsError};
use crate::report;

pub const DEFAULT_CONFIG_FILE: &str = "icons.toml";
pub const DEFAULT_SIZES: [u32; 6] = [16, 24, 32, 48, 64, 256];
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
const MAX_ICO_SIZE: u32 = 256;

// ---------------------------------------------------------------------------
// Raw TOML layout
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<ConverterKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub krita: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(default, alias = "icons", skip_serializing_if = "Option::is_none")]
    pub icon: Option<Vec<IconEntry>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct IconEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterKind {
    /// Read `mergedimage.png` straight out of the .kra archive.
    #[default]
    Archive,
    /// Let a Krita installation export the image.
    Krita,
}

impl std::fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConverterKind::Archive => write!(f, "archive"),
            ConverterKind::Krita => write!(f, "krita"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconConfig {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub name: Option<String>,
}

impl IconConfig {
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            name: None,
        }
    }

    /// Tray tooltip: the configured name, else the source file name.
    pub fn tooltip(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.src
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.src.display().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub icons: Vec<IconConfig>,
    pub converter: ConverterKind,
    pub krita: Option<PathBuf>,
    /// Sorted, de-duplicated, each in 1..=256.
    pub sizes: Vec<u32>,
    pub debounce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            icons: Vec::new(),
            converter: ConverterKind::default(),
            krita: None,
            sizes: DEFAULT_SIZES.to_vec(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TrayIconsError::ConfigNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|e| TrayIconsError::io(path, e))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let raw: ConfigFile = toml::from_str(&content).map_err(|e| TrayIconsError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        if raw.icon.is_none() {
            report::warn(format!("No 'icon' table found in {}", path.display()));
        }
        Self::from_raw(raw, base_dir)
    }

    /// Parses config text; relative paths are joined onto `base_dir`.
    pub fn parse(content: &str, base_dir: &Path) -> Result<Self> {
        let raw: ConfigFile = toml::from_str(content).map_err(|e| TrayIconsError::ConfigParse {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        Self::from_raw(raw, base_dir)
    }

    fn from_raw(raw: ConfigFile, base_dir: &Path) -> Result<Self> {
        let mut config = Config::default();

        if let Some(kind) = raw.converter {
            config.converter = kind;
        }
        config.krita = raw.krita.map(|p| resolve(base_dir, &p));
        if let Some(ms) = raw.debounce_ms {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(sizes) = raw.sizes {
            config.sizes = validate_sizes(sizes)?;
        }

        for entry in raw.icon.unwrap_or_default() {
            match (&entry.src, &entry.dst) {
                (Some(src), Some(dst)) => config.icons.push(IconConfig {
                    src: resolve(base_dir, src),
                    dst: resolve(base_dir, dst),
                    name: entry.name.clone(),
                }),
                _ => report::warn(format!("Incomplete icon configuration skipped: {:?}", entry)),
            }
        }

        Ok(config)
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }

    /// Icons (with their position in the list) that write to `dst`.
    pub fn icons_with_dst(&self, dst: &Path) -> Vec<(usize, &IconConfig)> {
        self.icons
            .iter()
            .enumerate()
            .filter(|(_, icon)| icon.dst == dst)
            .collect()
    }
}

fn resolve(base_dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn validate_sizes(mut sizes: Vec<u32>) -> Result<Vec<u32>> {
    if sizes.is_empty() {
        return Err(TrayIconsError::InvalidConfig("'sizes' must not be empty".to_string()));
    }
    if let Some(bad) = sizes.iter().find(|s| **s == 0 || **s > MAX_ICO_SIZE) {
        return Err(TrayIconsError::InvalidConfig(format!(
            "icon size {} out of range (1..={})",
            bad, MAX_ICO_SIZE
        )));
    }
    sizes.sort_unstable();
    sizes.dedup();
    Ok(sizes)
}

/// `icons.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_CONFIG_FILE)
}
