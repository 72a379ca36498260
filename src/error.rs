// ============================================================================
// error.rs — Error type shared by the library modules
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrayIconsError {
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file '{}' not found (run `trayicons init` to create one)", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Failed to parse '{}': {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("'{}' is not a valid Krita (zip) file: {source}", .path.display())]
    NotAnArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("'mergedimage.png' not found in '{}'", .0.display())]
    MissingMergedImage(PathBuf),

    #[error("Image error for '{}': {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Cannot find Krita (searched: {searched})")]
    KritaNotFound { searched: String },

    #[error("Krita export of '{}' failed: {message}", .path.display())]
    KritaExport { path: PathBuf, message: String },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Cannot load icon '{}': {message}", .path.display())]
    IconLoad { path: PathBuf, message: String },
}

impl TrayIconsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrayIconsError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrayIconsError>;
