// ============================================================================
// krita.rs — Locating a Krita installation and exporting through its CLI
// ============================================================================
//
// Search order for the executable:
//   1. `krita = "..."` from icons.toml
//   2. KRITA_PATH environment variable
//   3. scoop install (~/scoop/apps/krita/current/bin)
//   4. the default Program Files install
//   5. `krita` on PATH
// ============================================================================

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, TrayIconsError};
use crate::report;

fn exe_name() -> &'static str {
    if cfg!(windows) {
        "krita.exe"
    } else {
        "krita"
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

/// Candidate locations, most specific first.
pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(p) = explicit {
        candidates.push(p.to_path_buf());
    }
    if let Some(p) = std::env::var_os("KRITA_PATH") {
        candidates.push(PathBuf::from(p));
    }
    if let Some(home) = home_dir() {
        candidates.push(home.join("scoop/apps/krita/current/bin").join(exe_name()));
    }
    if cfg!(windows) {
        candidates.push(PathBuf::from(r"C:\Program Files\Krita (x64)\bin\krita.exe"));
    }
    candidates
}

fn command_exists(command: &str) -> bool {
    Command::new(command).arg("--version").output().is_ok()
}

/// Resolves the Krita executable. An explicit path that does not exist is an
/// error rather than a silent fallback.
pub fn find_krita(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        if p.is_file() {
            return Ok(p.to_path_buf());
        }
        return Err(TrayIconsError::KritaNotFound {
            searched: p.display().to_string(),
        });
    }

    let candidates = candidate_paths(None);
    for candidate in &candidates {
        // KRITA_PATH may point at the bin directory rather than the binary
        let exe = if candidate.is_dir() {
            candidate.join(exe_name())
        } else {
            candidate.clone()
        };
        if exe.is_file() {
            report::detail(format!("Using Krita at {}", exe.display()));
            return Ok(exe);
        }
    }

    if command_exists("krita") {
        return Ok(PathBuf::from("krita"));
    }

    let searched = candidates
        .iter()
        .map(|p| p.display().to_string())
        .chain(std::iter::once("PATH".to_string()))
        .collect::<Vec<_>>()
        .join(", ");
    Err(TrayIconsError::KritaNotFound { searched })
}

pub fn export_command(krita: &Path, src: &Path, out_png: &Path) -> Command {
    let mut cmd = Command::new(krita);
    cmd.arg("--export")
        .arg("--export-filename")
        .arg(out_png)
        .arg(src);
    cmd
}

/// Runs Krita headless to flatten `src` into `out_png`.
pub fn export_png(krita: &Path, src: &Path, out_png: &Path) -> Result<()> {
    let mut cmd = export_command(krita, src, out_png);
    report::detail(format!("Command: {:?}", cmd));

    let output = cmd.output().map_err(|e| TrayIconsError::KritaExport {
        path: src.to_path_buf(),
        message: format!("cannot start {}: {}", krita.display(), e),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TrayIconsError::KritaExport {
            path: src.to_path_buf(),
            message: format!("{} {}", output.status, stderr.trim()),
        });
    }
    if !out_png.is_file() {
        return Err(TrayIconsError::KritaExport {
            path: src.to_path_buf(),
            message: format!("no output written to {}", out_png.display()),
        });
    }
    Ok(())
}
