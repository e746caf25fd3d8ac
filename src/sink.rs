//! File placement for positive matches.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

/// What to do with a positively matched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Copy,
    Move,
    /// Record the match only; touch nothing on disk.
    DryRun,
}

/// Create the timestamped destination folder for this run.
pub fn session_dir(output_root: &Path) -> Result<PathBuf> {
    let dir = output_root.join(format!("match_{}", Local::now().format("%Y%m%d-%H%M%S")));
    fs::create_dir_all(&dir)
        .with_context(|| format!("creating output folder {}", dir.display()))?;
    Ok(dir)
}

/// Copy or move `src` into `dest_dir`, renaming on name collision.
///
/// Returns the destination path, or `None` for a dry run. The collision
/// probe is best-effort when several workers place files concurrently.
pub fn place(src: &Path, dest_dir: &Path, action: Action) -> Result<Option<PathBuf>> {
    if action == Action::DryRun {
        return Ok(None);
    }

    let dest = unique_destination(src, dest_dir)?;
    match action {
        Action::Copy => {
            fs::copy(src, &dest).with_context(|| {
                format!("copying {} to {}", src.display(), dest.display())
            })?;
        }
        Action::Move => {
            // rename fails across filesystems; fall back to copy + remove.
            if fs::rename(src, &dest).is_err() {
                fs::copy(src, &dest).with_context(|| {
                    format!("copying {} to {}", src.display(), dest.display())
                })?;
                fs::remove_file(src)
                    .with_context(|| format!("removing {}", src.display()))?;
            }
        }
        Action::DryRun => unreachable!(),
    }
    Ok(Some(dest))
}

fn unique_destination(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .with_context(|| format!("{} has no file name", src.display()))?;
    let mut candidate = dest_dir.join(name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = src.extension().map(|e| e.to_string_lossy().into_owned());
    for n in 1.. {
        let renamed = match &ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        candidate = dest_dir.join(renamed);
        if !candidate.exists() {
            break;
        }
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap().write_all(content).unwrap();
        path
    }

    #[test]
    fn session_dir_is_timestamped_and_created() {
        let root = tempfile::tempdir().unwrap();
        let dir = session_dir(root.path()).unwrap();
        assert!(dir.is_dir());
        assert!(dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("match_"));
    }

    #[test]
    fn copy_keeps_the_source() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src = write_file(src_dir.path(), "photo.jpg", b"jpeg bytes");

        let placed = place(&src, dest_dir.path(), Action::Copy).unwrap().unwrap();
        assert_eq!(placed, dest_dir.path().join("photo.jpg"));
        assert!(src.exists());
        assert_eq!(fs::read(&placed).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn move_removes_the_source() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src = write_file(src_dir.path(), "photo.jpg", b"jpeg bytes");

        let placed = place(&src, dest_dir.path(), Action::Move).unwrap().unwrap();
        assert!(!src.exists());
        assert!(placed.exists());
    }

    #[test]
    fn colliding_names_get_a_numeric_suffix() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        write_file(dest_dir.path(), "photo.jpg", b"already here");
        write_file(dest_dir.path(), "photo-1.jpg", b"also here");
        let src = write_file(src_dir.path(), "photo.jpg", b"new");

        let placed = place(&src, dest_dir.path(), Action::Copy).unwrap().unwrap();
        assert_eq!(placed, dest_dir.path().join("photo-2.jpg"));
    }

    #[test]
    fn dry_run_touches_nothing() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src = write_file(src_dir.path(), "photo.jpg", b"jpeg bytes");

        let placed = place(&src, dest_dir.path(), Action::DryRun).unwrap();
        assert_eq!(placed, None);
        assert!(fs::read_dir(dest_dir.path()).unwrap().next().is_none());
    }
}
