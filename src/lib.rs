// ============================================================================
// lib.rs — Library API (shared by the CLI modes)
// ============================================================================

pub mod config;
pub mod convert;
pub mod digest;
pub mod error;
pub mod icon;
pub mod init;
pub mod krita;
pub mod options;
pub mod report;
#[cfg(windows)]
pub mod tray;
pub mod watcher;

pub use config::{default_config_path, Config, ConverterKind, IconConfig};
pub use convert::{needs_regeneration, ConvertReport, Converter};
pub use error::{Result, TrayIconsError};
pub use options::Options;
pub use watcher::{IconUpdate, SourceWatcher, WatchHandle};

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use rayon::prelude::*;

// ---------------------------------------------------------------------------
// Initial regeneration
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PrepareSummary {
    pub converted: Vec<ConvertReport>,
    pub up_to_date: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, TrayIconsError)>,
}

impl PrepareSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Converted(ConvertReport),
    UpToDate(PathBuf),
    Failed(PathBuf, TrayIconsError),
}

/// Converts every configured icon whose destination is missing or older
/// than its source (all of them with `force`). Icons are independent, so
/// they are converted in parallel.
pub fn prepare_icons(
    config: &Config,
    converter: &Converter,
    force: bool,
    progress: Option<&ProgressBar>,
) -> PrepareSummary {
    let outcomes: Vec<Outcome> = config
        .icons
        .par_iter()
        .map(|icon| {
            let outcome = if !force && !needs_regeneration(&icon.src, &icon.dst) {
                Outcome::UpToDate(icon.dst.clone())
            } else {
                match converter.convert(&icon.src, &icon.dst) {
                    Ok(r) => Outcome::Converted(r),
                    Err(e) => Outcome::Failed(icon.src.clone(), e),
                }
            };
            if let Some(pb) = progress {
                pb.inc(1);
            }
            outcome
        })
        .collect();

    let mut summary = PrepareSummary::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Converted(r) => summary.converted.push(r),
            Outcome::UpToDate(p) => summary.up_to_date.push(p),
            Outcome::Failed(p, e) => summary.failed.push((p, e)),
        }
    }
    summary
}

/// Converter settings for one-off conversions: taken from the config file
/// when it exists, built-in defaults otherwise.
pub fn converter_for(config_path: &Path) -> Result<Converter> {
    if !config_path.is_file() {
        return Ok(Converter::default());
    }
    let config = Config::load(config_path)?;
    Ok(Converter::from_config(&config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::tests::{png_bytes, write_kra};

    #[test]
    fn test_prepare_converts_missing_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        write_kra(&dir.path().join("a.kra"), Some(&png_bytes(32, 32)));
        write_kra(&dir.path().join("b.kra"), Some(&png_bytes(32, 32)));
        std::fs::write(dir.path().join("c.kra"), b"broken").unwrap();

        let toml = r#"
sizes = [16, 32]

[[icon]]
src = "a.kra"
dst = "out/a.ico"

[[icon]]
src = "b.kra"
dst = "out/b.ico"

[[icon]]
src = "c.kra"
dst = "out/c.ico"
"#;
        let config = Config::parse(toml, dir.path()).unwrap();
        let converter = Converter::from_config(&config);

        let first = prepare_icons(&config, &converter, false, None);
        assert_eq!(first.converted.len(), 2);
        assert_eq!(first.failed.len(), 1);
        assert!(!first.success());
        assert!(dir.path().join("out/a.ico").is_file());

        // a and b are now current; c still fails
        let second = prepare_icons(&config, &converter, false, None);
        assert_eq!(second.up_to_date.len(), 2);
        assert_eq!(second.converted.len(), 0);

        let forced = prepare_icons(&config, &converter, true, None);
        assert_eq!(forced.converted.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_krita_exports_of_same_named_sources_stay_apart() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        // stand-in for krita: copies the PNG next to the source, then lingers
        // so both exports overlap
        let script = dir.path().join("fake-krita.sh");
        std::fs::write(&script, "#!/bin/sh\ncp \"$4.png\" \"$3\"\nsleep 0.3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        for (sub, edge) in [("a", 16u32), ("b", 64u32)] {
            let src_dir = dir.path().join(sub);
            std::fs::create_dir_all(&src_dir).unwrap();
            write_kra(&src_dir.join("logo.kra"), Some(&png_bytes(edge, edge)));
            std::fs::write(src_dir.join("logo.kra.png"), png_bytes(edge, edge)).unwrap();
        }

        let toml = format!(
            r#"
converter = "krita"
krita = "{}"
sizes = [16, 32, 64]

[[icon]]
src = "a/logo.kra"
dst = "out/a.ico"

[[icon]]
src = "b/logo.kra"
dst = "out/b.ico"
"#,
            script.display()
        );
        let config = Config::parse(&toml, dir.path()).unwrap();
        let converter = Converter::from_config(&config);

        let summary = prepare_icons(&config, &converter, true, None);
        assert!(summary.success(), "{:?}", summary.failed);

        let frames = |name: &str| -> Vec<u32> {
            let file = std::fs::File::open(dir.path().join("out").join(name)).unwrap();
            let icon = ico::IconDir::read(file).unwrap();
            icon.entries().iter().map(|e| e.width()).collect()
        };
        assert_eq!(frames("a.ico"), vec![16]);
        assert_eq!(frames("b.ico"), vec![16, 32, 64]);
    }

    #[test]
    fn test_converter_for_uses_config_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("logo.png");
        std::fs::write(&src, png_bytes(64, 64)).unwrap();

        let config_path = dir.path().join("icons.toml");
        std::fs::write(&config_path, "sizes = [16]\n").unwrap();
        let report = converter_for(&config_path)
            .unwrap()
            .convert(&src, &dir.path().join("one.ico"))
            .unwrap();
        assert_eq!(report.frames, vec![16]);

        // no config file: built-in sizes up to the source edge
        let report = converter_for(&dir.path().join("missing.toml"))
            .unwrap()
            .convert(&src, &dir.path().join("two.ico"))
            .unwrap();
        assert_eq!(report.frames, vec![16, 24, 32, 48, 64]);
    }

    #[test]
    fn test_converter_for_rejects_broken_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("icons.toml");
        std::fs::write(&config_path, "sizes = [0]\n").unwrap();
        assert!(converter_for(&config_path).is_err());
    }
}
