//! Folder validation: list a directory and keep only the image files.
//!
//! Classification is by content sniffing (magic bytes), not file extension,
//! so a misnamed `.txt` holding JPEG data still counts and a renamed binary
//! does not.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};

/// Enough bytes for every magic number `image` recognizes.
const SNIFF_LEN: usize = 64;

/// List `dir` and return its image files, sorted for stable runs.
///
/// Non-image entries are logged and skipped; subdirectories are not
/// descended into. A folder with no images at all is an error.
pub fn scan_image_folder(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    let mut images = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            debug!("skipping subdirectory {}", path.display());
            continue;
        }
        match is_image_file(&path) {
            Ok(true) => images.push(path),
            Ok(false) => warn!("{} is not an image file", path.display()),
            Err(e) => warn!("skipping unreadable entry {}: {e:#}", path.display()),
        }
    }

    if images.is_empty() {
        anyhow::bail!("there is no image in {}", dir.display());
    }
    images.sort();
    Ok(images)
}

/// Sniff the head of the file for a known image magic number.
pub fn is_image_file(path: &Path) -> Result<bool> {
    let mut head = [0u8; SNIFF_LEN];
    let mut file =
        fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let n = file.read(&mut head)?;
    Ok(image::guess_format(&head[..n]).is_ok())
}
