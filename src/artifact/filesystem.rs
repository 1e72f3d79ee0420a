//! Filesystem utilities for unit assembly.
//!
//! Copying artifacts and resources into a distribution, moving finished
//! archives into place and checksumming them.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

/// Recursively copy a directory and return the number of bytes copied.
///
/// Symbolic links are recreated, not followed, and count as zero bytes.
/// Entries are visited in name order so repeated copies log identically.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
    }

    let mut entries = fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read directory: {}", src.display()))?;
    entries.sort_by_key(|e| e.file_name());

    let mut copied = 0;
    for entry in entries {
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)
                .with_context(|| format!("Failed to create symlink: {}", dst_path.display()))?;
        } else if file_type.is_dir() {
            copied += copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            copied += fs::copy(&src_path, &dst_path)
                .with_context(|| format!("Failed to copy file: {}", src_path.display()))?;
        }
    }

    Ok(copied)
}

/// Copy a file or a directory to `dst` and return the bytes copied.
pub fn copy_path(src: &Path, dst: &Path) -> Result<u64> {
    if src.is_dir() {
        return copy_dir_recursive(src, dst);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))
}

/// Atomically move a file by renaming, with fallback to copy+delete.
///
/// Archives are written to a temporary file next to the target and moved
/// into place once complete.
pub fn atomic_move(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Different filesystem, fall back to copy+delete
            fs::copy(src, dst)
                .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
            fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
            Ok(())
        }
    }
}

/// SHA-256 (lowercase hex) and size of a file.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let sha = format!("{:x}", hasher.finalize());
    Ok((sha, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_recursive_counts_bytes() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");

        fs::create_dir_all(src.join("subdir")).unwrap();
        fs::write(src.join("file.txt"), "hello").unwrap();
        fs::write(src.join("subdir/nested.txt"), "world!").unwrap();
        std::os::unix::fs::symlink("file.txt", src.join("link")).unwrap();

        let copied = copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(copied, 11);
        assert!(dst.join("subdir/nested.txt").exists());
        assert!(dst.join("link").is_symlink());
        assert_eq!(fs::read_link(dst.join("link")).unwrap().to_str().unwrap(), "file.txt");
    }

    #[test]
    fn test_copy_path_single_file() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.txt");
        fs::write(&src, "abc").unwrap();

        let copied = copy_path(&src, &temp.path().join("deep/dir/a.txt")).unwrap();
        assert_eq!(copied, 3);
        assert!(temp.path().join("deep/dir/a.txt").exists());
    }

    #[test]
    fn test_atomic_move() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.txt");
        let dst = temp.path().join("dst.txt");

        fs::write(&src, "content").unwrap();
        atomic_move(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "content");
    }

    #[test]
    fn test_sha256_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, "").unwrap();
        let (sha, size) = sha256_file(&path).unwrap();
        assert_eq!(size, 0);
        assert_eq!(
            sha,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
