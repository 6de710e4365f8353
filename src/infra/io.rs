//! Filesystem mutations used by the executor and state persistence

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Write `content` to `path`, creating parent directories.
pub fn write_file_content(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

pub fn delete_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

/// Rename `from` to `to`, creating parents of `to`. Refuses to clobber.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::symlink_metadata(to).is_ok() {
        return Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("destination exists: {}", to.display()),
        ));
    }
    if !from.exists() {
        return Err(io::Error::new(
            ErrorKind::NotFound,
            format!("source missing: {}", from.display()),
        ));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)
}

/// Atomic write: same-dir temp file, fsync, then rename over the target.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;

    // Preserve original permissions
    let perms = fs::metadata(path).map(|m| m.permissions()).ok();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(data).context("write temp file")?;
    tmp.as_file().sync_all().ok();

    if let Some(perms) = perms {
        fs::set_permissions(tmp.path(), perms).context("set temp permissions")?;
    }

    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Discover the project root with multiple fallback strategies:
/// explicit override, then `git rev-parse --show-toplevel`, then an
/// ascending search for `.git`, and finally `start` itself.
pub fn discover_root(explicit: Option<PathBuf>, start: &Path) -> PathBuf {
    if let Some(root) = explicit {
        return dunce::canonicalize(&root).unwrap_or(root);
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start)
        .output()
        && output.status.success()
    {
        let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !s.is_empty() {
            let p = PathBuf::from(s);
            return dunce::canonicalize(&p).unwrap_or(p);
        }
    }

    let mut cur = Some(start);
    while let Some(dir) = cur {
        if dir.join(".git").exists() {
            let d = dir.to_path_buf();
            return dunce::canonicalize(&d).unwrap_or(d);
        }
        cur = dir.parent();
    }

    dunce::canonicalize(start).unwrap_or_else(|_| start.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_creates_parents() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("a/b/c.txt");
        write_file_content(&p, "hi").unwrap();
        assert_eq!(fs::read_to_string(p).unwrap(), "hi");
    }

    #[test]
    fn move_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        let err = move_file(&a, &b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&b).unwrap(), "b");

        let c = dir.path().join("nested/c.txt");
        move_file(&a, &c).unwrap();
        assert!(!a.exists());
        assert_eq!(fs::read_to_string(c).unwrap(), "a");
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("state.json");
        atomic_write(&p, b"one").unwrap();
        atomic_write(&p, b"two").unwrap();
        assert_eq!(fs::read(&p).unwrap(), b"two");
    }

    #[test]
    fn explicit_root_wins() {
        let dir = tempdir().unwrap();
        let root = discover_root(Some(dir.path().to_path_buf()), Path::new("/"));
        assert_eq!(root, dunce::canonicalize(dir.path()).unwrap());
    }
}
