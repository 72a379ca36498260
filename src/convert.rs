// ============================================================================
// convert.rs — Source image → multi-resolution .ico
// ============================================================================
//
// Krita documents (.kra / .krz) are zip archives that carry a flattened
// `mergedimage.png`. The archive backend reads that entry directly; the krita
// backend asks a Krita installation to export the document instead. Any
// other source extension is decoded as a plain image.
//
// The icon is written to a sibling temp file and renamed into place, so the
// tray never loads a half-written .ico.
// ============================================================================

use std::fs::{self, File};
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};

use crate::config::{Config, ConverterKind, DEFAULT_SIZES};
use crate::error::{Result, TrayIconsError};
use crate::krita;

const MERGED_IMAGE: &str = "mergedimage.png";

pub fn is_krita_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "kra" | "krz"))
        .unwrap_or(false)
}

/// Destination missing, or source modified after destination.
pub fn needs_regeneration(src: &Path, dst: &Path) -> bool {
    let dst_mtime = match fs::metadata(dst).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return true,
    };
    match fs::metadata(src).and_then(|m| m.modified()) {
        Ok(src_mtime) => src_mtime > dst_mtime,
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub dst: PathBuf,
    /// Frame edge lengths actually written, ascending.
    pub frames: Vec<u32>,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Converter {
    kind: ConverterKind,
    krita: Option<PathBuf>,
    sizes: Vec<u32>,
}

impl Default for Converter {
    fn default() -> Self {
        Self {
            kind: ConverterKind::Archive,
            krita: None,
            sizes: DEFAULT_SIZES.to_vec(),
        }
    }
}

impl Converter {
    pub fn new(kind: ConverterKind, sizes: Vec<u32>) -> Self {
        Self {
            kind,
            krita: None,
            sizes,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            kind: config.converter,
            krita: config.krita.clone(),
            sizes: config.sizes.clone(),
        }
    }

    pub fn convert(&self, src: &Path, dst: &Path) -> Result<ConvertReport> {
        if !src.is_file() {
            return Err(TrayIconsError::SourceNotFound(src.to_path_buf()));
        }
        let image = self.load_source(src)?;
        let data = encode_ico(&image, &self.sizes, src)?;
        let frames = ico_frame_sizes(&image, &self.sizes);
        write_atomically(dst, &data)?;
        Ok(ConvertReport {
            dst: dst.to_path_buf(),
            frames,
            bytes: data.len() as u64,
        })
    }

    fn load_source(&self, src: &Path) -> Result<DynamicImage> {
        if !is_krita_document(src) {
            return image::open(src).map_err(|e| TrayIconsError::Image {
                path: src.to_path_buf(),
                source: e,
            });
        }
        match self.kind {
            ConverterKind::Archive => {
                let png = read_merged_image(src)?;
                image::load_from_memory_with_format(&png, ImageFormat::Png).map_err(|e| {
                    TrayIconsError::Image {
                        path: src.to_path_buf(),
                        source: e,
                    }
                })
            }
            ConverterKind::Krita => export_with_krita(self.krita.as_deref(), src),
        }
    }
}

/// Pulls the flattened preview out of a Krita archive.
pub fn read_merged_image(src: &Path) -> Result<Vec<u8>> {
    let file = File::open(src).map_err(|e| TrayIconsError::io(src, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| TrayIconsError::NotAnArchive {
        path: src.to_path_buf(),
        source: e,
    })?;

    let mut entry = match archive.by_name(MERGED_IMAGE) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(TrayIconsError::MissingMergedImage(src.to_path_buf()))
        }
        Err(e) => {
            return Err(TrayIconsError::NotAnArchive {
                path: src.to_path_buf(),
                source: e,
            })
        }
    };

    let mut png = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut png)
        .map_err(|e| TrayIconsError::io(src, e))?;
    Ok(png)
}

fn export_with_krita(explicit: Option<&Path>, src: &Path) -> Result<DynamicImage> {
    let exe = krita::find_krita(explicit)?;
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "export".to_string());
    // private directory per export; concurrent conversions of equally named
    // sources must not share an output path
    let tmp_dir = tempfile::Builder::new()
        .prefix("trayicons-")
        .tempdir()
        .map_err(|e| TrayIconsError::io(std::env::temp_dir(), e))?;
    let tmp = tmp_dir.path().join(format!("{}.png", stem));

    krita::export_png(&exe, src, &tmp)?;
    image::open(&tmp).map_err(|e| TrayIconsError::Image {
        path: tmp.clone(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// ICO encoding
// ---------------------------------------------------------------------------

/// Sizes that will be emitted for this image: everything up to the larger
/// source edge. The smallest requested size is always kept.
pub fn ico_frame_sizes(image: &DynamicImage, sizes: &[u32]) -> Vec<u32> {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    let mut frames: Vec<u32> = sizes.iter().copied().filter(|s| *s <= longest).collect();
    if frames.is_empty() {
        if let Some(min) = sizes.iter().min() {
            frames.push(*min);
        }
    }
    frames.sort_unstable();
    frames.dedup();
    frames
}

/// Fits the image into a `size`×`size` transparent square, keeping aspect.
fn square_frame(image: &DynamicImage, size: u32) -> RgbaImage {
    let scaled = image.resize(size, size, FilterType::Lanczos3).to_rgba8();
    let mut canvas = RgbaImage::new(size, size);
    let x = (size - scaled.width()) / 2;
    let y = (size - scaled.height()) / 2;
    imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
    canvas
}

pub fn encode_ico(image: &DynamicImage, sizes: &[u32], src: &Path) -> Result<Vec<u8>> {
    let mut icon_dir = ico::IconDir::new(ico::ResourceType::Icon);
    for size in ico_frame_sizes(image, sizes) {
        let frame = square_frame(image, size);
        let entry = ico::IconDirEntry::encode(&ico::IconImage::from_rgba_data(
            size,
            size,
            frame.into_raw(),
        ))
        .map_err(|e| TrayIconsError::io(src, e))?;
        icon_dir.add_entry(entry);
    }

    let mut data = Vec::new();
    icon_dir
        .write(&mut data)
        .map_err(|e| TrayIconsError::io(src, e))?;
    Ok(data)
}

/// Creates the parent directory, writes `<dst>.part`, renames over `dst`.
pub fn write_atomically(dst: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TrayIconsError::io(parent, e))?;
    }

    let file_name = dst
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "icon.ico".to_string());
    let part = dst.with_file_name(format!(".{}.part", file_name));

    {
        let file = File::create(&part).map_err(|e| TrayIconsError::io(&part, e))?;
        let mut writer = BufWriter::new(file);
        std::io::Write::write_all(&mut writer, data).map_err(|e| TrayIconsError::io(&part, e))?;
        std::io::Write::flush(&mut writer).map_err(|e| TrayIconsError::io(&part, e))?;
    }

    fs::rename(&part, dst).map_err(|e| {
        let _ = fs::remove_file(&part);
        TrayIconsError::io(dst, e)
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    pub(crate) fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(w, h, |x, y| image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    pub(crate) fn write_kra(path: &Path, merged: Option<&[u8]>) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("mimetype", options).unwrap();
        zip.write_all(b"application/x-krita").unwrap();
        if let Some(png) = merged {
            zip.start_file(MERGED_IMAGE, options).unwrap();
            zip.write_all(png).unwrap();
        }
        zip.finish().unwrap();
    }

    fn read_frames(path: &Path) -> Vec<u32> {
        let dir = ico::IconDir::read(File::open(path).unwrap()).unwrap();
        let mut sizes: Vec<u32> = dir.entries().iter().map(|e| e.width()).collect();
        sizes.sort_unstable();
        sizes
    }

    #[test]
    fn test_kra_archive_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("art.kra");
        write_kra(&src, Some(&png_bytes(64, 64)));
        let dst = dir.path().join("nested/out/art.ico");

        let converter = Converter::new(ConverterKind::Archive, vec![16, 32, 64, 256]);
        let report = converter.convert(&src, &dst).unwrap();

        assert!(dst.is_file());
        assert_eq!(report.frames, vec![16, 32, 64]);
        assert_eq!(read_frames(&dst), vec![16, 32, 64]);
        assert!(!dst.with_file_name(".art.ico.part").exists());
    }

    #[test]
    fn test_plain_png_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("logo.png");
        fs::write(&src, png_bytes(40, 20)).unwrap();
        let dst = dir.path().join("logo.ico");

        Converter::new(ConverterKind::Archive, vec![16, 32])
            .convert(&src, &dst)
            .unwrap();
        assert_eq!(read_frames(&dst), vec![16, 32]);
    }

    #[test]
    fn test_tiny_source_keeps_smallest_size() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(8, 8));
        assert_eq!(ico_frame_sizes(&img, &[16, 32]), vec![16]);
    }

    #[test]
    fn test_non_square_frame_is_padded() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 20, image::Rgba([255, 0, 0, 255])));
        let frame = square_frame(&img, 16);
        assert_eq!(frame.dimensions(), (16, 16));
        // top row is padding
        assert_eq!(frame.get_pixel(8, 0)[3], 0);
        assert_eq!(frame.get_pixel(8, 8)[3], 255);
    }

    #[test]
    fn test_missing_merged_image() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty.kra");
        write_kra(&src, None);
        let err = Converter::default()
            .convert(&src, &dir.path().join("x.ico"))
            .unwrap_err();
        assert!(matches!(err, TrayIconsError::MissingMergedImage(_)));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.kra");
        fs::write(&src, b"definitely not a zip").unwrap();
        let err = Converter::default()
            .convert(&src, &dir.path().join("x.ico"))
            .unwrap_err();
        assert!(matches!(err, TrayIconsError::NotAnArchive { .. }));
    }

    #[test]
    fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = Converter::default()
            .convert(&dir.path().join("gone.kra"), &dir.path().join("x.ico"))
            .unwrap_err();
        assert!(matches!(err, TrayIconsError::SourceNotFound(_)));
    }

    #[test]
    fn test_needs_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.kra");
        let dst = dir.path().join("a.ico");
        fs::write(&src, b"x").unwrap();
        assert!(needs_regeneration(&src, &dst));

        fs::write(&dst, b"y").unwrap();
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(old)
            .unwrap();
        assert!(!needs_regeneration(&src, &dst));
    }

    #[test]
    fn test_is_krita_document() {
        assert!(is_krita_document(Path::new("a.kra")));
        assert!(is_krita_document(Path::new("a.KRZ")));
        assert!(!is_krita_document(Path::new("a.png")));
        assert!(!is_krita_document(Path::new("kra")));
    }
}
