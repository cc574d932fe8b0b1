use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use filetime::FileTime;
use walkdir::WalkDir;

/// Free-space source for the pre-copy check.
pub trait FreeSpace {
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Fs2FreeSpace;

impl FreeSpace for Fs2FreeSpace {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Sum of regular file sizes below `root`. Symlinks are not followed and
/// count as zero.
pub fn dir_size(root: &Path) -> Result<u64> {
    let mut total = 0_u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        total = total.saturating_add(metadata.len());
    }
    Ok(total)
}

/// Mirrors `src` onto `dst`, keeping permissions, symlinks and access and
/// modification times. Returns the number of file bytes copied.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0_u64;
    let mut dirs: Vec<(PathBuf, PathBuf)> = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let src_path = entry.path();
        let rel = src_path
            .strip_prefix(src)
            .with_context(|| format!("failed to relativize {}", src_path.display()))?;
        let dst_path = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dst_path)
                .with_context(|| format!("failed to create {}", dst_path.display()))?;
            dirs.push((src_path.to_path_buf(), dst_path));
            continue;
        }

        #[cfg(unix)]
        if file_type.is_symlink() {
            let target = fs::read_link(src_path)
                .with_context(|| format!("failed to read symlink {}", src_path.display()))?;
            std::os::unix::fs::symlink(&target, &dst_path).with_context(|| {
                format!(
                    "failed to create symlink {} -> {}",
                    dst_path.display(),
                    target.display()
                )
            })?;
            continue;
        }

        let bytes = fs::copy(src_path, &dst_path).with_context(|| {
            format!(
                "failed to copy {} to {}",
                src_path.display(),
                dst_path.display()
            )
        })?;
        copied = copied.saturating_add(bytes);
        copy_file_times(src_path, &dst_path)?;
    }

    // Children bump their parent's mtime and may need a writable parent, so
    // directory attributes are applied last, deepest first.
    for (src_dir, dst_dir) in dirs.iter().rev() {
        let permissions = fs::metadata(src_dir)
            .with_context(|| format!("failed to stat {}", src_dir.display()))?
            .permissions();
        fs::set_permissions(dst_dir, permissions)
            .with_context(|| format!("failed to set permissions on {}", dst_dir.display()))?;
        copy_file_times(src_dir, dst_dir)?;
    }

    Ok(copied)
}

fn copy_file_times(src: &Path, dst: &Path) -> Result<()> {
    let metadata =
        fs::metadata(src).with_context(|| format!("failed to stat {}", src.display()))?;
    let atime = FileTime::from_last_access_time(&metadata);
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(dst, atime, mtime)
        .with_context(|| format!("failed to preserve timestamps on {}", dst.display()))
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(true)
}
