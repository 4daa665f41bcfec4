//! Crash-safe file replacement.
//!
//! Content is written to a temporary file in the destination directory,
//! synced, and renamed over the target. A reader either sees the old file or
//! the complete new one; an interrupted write leaves the original untouched.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Owner-only permissions for everything the registry writes.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Prefix of the temporary files created next to a target while writing.
pub const TEMP_FILE_PREFIX: &str = ".hostbook-tmp-";

/// Atomically replace `path` with `contents`.
///
/// Creates the parent directory if it is missing. The temporary file lives in
/// the same directory so the final rename never crosses filesystems.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    create_private_dir(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(dir)?;
    set_private(&tmp)?;

    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    // Dropping the handle on error removes the temp file.
    tmp.persist(path).map_err(|e| e.error)?;

    // Make the rename itself durable.
    if let Ok(dir_handle) = File::open(dir) {
        let _ = dir_handle.sync_all();
    }

    Ok(())
}

/// `create_dir_all` that restricts newly created directories to the owner.
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }

    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}

fn set_private(tmp: &NamedTempFile) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(PRIVATE_FILE_MODE))
    }

    #[cfg(not(unix))]
    {
        let _ = tmp;
        Ok(())
    }
}

/// Treat "not found" as success when removing a file.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Expand a leading `~/` using the current user's home directory.
pub fn expand_tilde(path: &str) -> std::path::PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    std::path::PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parent_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested").join("dir").join("file.txt");

        write_atomic(&target, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("config");
        fs::write(&target, "old").unwrap();

        write_atomic(&target, b"new contents").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new contents");

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_FILE_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("metadata.json");
        write_atomic(&target, b"{}").unwrap();

        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, PRIVATE_FILE_MODE);
    }

    #[test]
    fn test_remove_if_exists_ignores_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        assert!(remove_if_exists(&missing).is_ok());

        let present = tmp.path().join("yes");
        fs::write(&present, "x").unwrap();
        remove_if_exists(&present).unwrap();
        assert!(!present.exists());
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/etc/ssh/config"), Path::new("/etc/ssh/config"));
        assert_eq!(expand_tilde("relative/x"), Path::new("relative/x"));
        assert_eq!(expand_tilde("~other/x"), Path::new("~other/x"));
    }
}
