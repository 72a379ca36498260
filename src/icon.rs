// ============================================================================
// icon.rs — Loading .ico files for display
// ============================================================================

use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::error::{Result, TrayIconsError};
use crate::report;

pub const LOAD_ATTEMPTS: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Decoded icon frame, RGBA8, row-major.
#[derive(Debug, Clone)]
pub struct IconPixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Reads the frame whose width is closest to `preferred` (larger wins ties).
pub fn read_icon(path: &Path, preferred: u32) -> Result<IconPixels> {
    let load_err = |message: String| TrayIconsError::IconLoad {
        path: path.to_path_buf(),
        message,
    };

    let file = File::open(path).map_err(|e| load_err(e.to_string()))?;
    let dir = ico::IconDir::read(file).map_err(|e| load_err(e.to_string()))?;

    let entry = dir
        .entries()
        .iter()
        .min_by_key(|e| (e.width().abs_diff(preferred), std::cmp::Reverse(e.width())))
        .ok_or_else(|| load_err("icon has no frames".to_string()))?;

    let image = entry.decode().map_err(|e| load_err(e.to_string()))?;
    Ok(IconPixels {
        width: image.width(),
        height: image.height(),
        rgba: image.rgba_data().to_vec(),
    })
}

/// `read_icon` with retries; the file may be mid-replacement when a change
/// notification arrives.
pub fn read_icon_with_retry(path: &Path, preferred: u32, attempts: u32) -> Result<IconPixels> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match read_icon(path, preferred) {
            Ok(pixels) => return Ok(pixels),
            Err(e) => {
                if attempt < attempts {
                    report::detail(format!(
                        "Could not load icon (attempt {}/{}), retrying: {}",
                        attempt, attempts, e
                    ));
                    thread::sleep(RETRY_DELAY);
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| TrayIconsError::IconLoad {
        path: path.to_path_buf(),
        message: "no attempts made".to_string(),
    }))
}
