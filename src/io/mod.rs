//! Filesystem helpers shared by the installer/remover: destination-path
//! resolution, the busy-file-safe `remove_or_rename`, and a scratch
//! directory guard, generalized to googet's file-tracking and Windows
//! in-use-file story.

pub mod blocking;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{ErrorKind, GooError};

/// A scratch directory removed on drop.
pub struct TmpDir {
    pub path: PathBuf,
}

impl TmpDir {
    pub fn new(path: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(TmpDir { path })
    }
}

impl Drop for TmpDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove scratch directory '{}': {e}", self.path.display());
            }
        }
    }
}

/// Resolves a `Files` destination template (spec §4.6 step 6 / §9 open
/// question 1): `<VAR>/rest` substitutes the environment variable; any
/// other non-absolute path is prefixed with `/`. Further OS-specific
/// normalization (e.g. Windows drive roots) is the platform driver's job.
pub fn resolve_dst(template: &str) -> PathBuf {
    if let Some(rest) = template.strip_prefix('<') {
        if let Some((var, rest)) = rest.split_once('>') {
            let value = std::env::var(var).unwrap_or_default();
            let rest = rest.trim_start_matches(['/', '\\']);
            return PathBuf::from(value).join(rest);
        }
    }
    if Path::new(template).is_absolute() {
        PathBuf::from(template)
    } else {
        PathBuf::from("/").join(template)
    }
}

/// Attempts `remove`; on Windows "file busy" errors, renames the file to a
/// sibling tempfile so a future reboot (or cleanup pass) can finish the
/// removal. Returns the stashed path, if any.
pub fn remove_or_rename(path: &Path) -> Result<Option<PathBuf>, GooError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) if is_busy(&e) => {
            let stash = path.with_extension(format!(
                "{}.deleteme",
                path.extension().and_then(|e| e.to_str()).unwrap_or("")
            ));
            std::fs::rename(path, &stash).map_err(|e| {
                GooError::wrap(ErrorKind::Filesystem, format!("failed to stash busy file '{}'", path.display()), e.into())
            })?;
            log::warn!("'{}' is in use, stashed as '{}' for later removal", path.display(), stash.display());
            Ok(Some(stash))
        }
        Err(e) => Err(GooError::wrap(
            ErrorKind::Filesystem,
            format!("failed to remove '{}'", path.display()),
            e.into(),
        )),
    }
}

#[cfg(windows)]
fn is_busy(e: &std::io::Error) -> bool {
    // ERROR_SHARING_VIOLATION / ERROR_ACCESS_DENIED
    matches!(e.raw_os_error(), Some(32) | Some(5))
}

#[cfg(not(windows))]
fn is_busy(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::PermissionDenied
}

/// Streams `src` to `dst`, creating parent directories as needed, and
/// returns the SHA-256 hex of what was written.
pub fn copy_file_with_hash(src: &Path, dst: &Path) -> Result<String, GooError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to create '{}'", parent.display()), e.into()))?;
    }

    let mut reader = std::fs::File::open(src)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to open '{}'", src.display()), e.into()))?;

    let open_result = std::fs::File::create(dst);
    let mut writer = match open_result {
        Ok(f) => f,
        Err(_) => {
            remove_or_rename(dst)?;
            std::fs::File::create(dst).map_err(|e| {
                GooError::wrap(ErrorKind::Filesystem, format!("failed to create '{}'", dst.display()), e.into())
            })?
        }
    };

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        use std::io::Read;
        let n = reader
            .read(&mut buf)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to read source file", e.into()))?;
        if n == 0 {
            break;
        }
        use std::io::Write;
        writer
            .write_all(&buf[..n])
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to write destination file", e.into()))?;
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_dst_substitutes_var() {
        std::env::set_var("GOOGET_TEST_VAR", "/opt/thing");
        let resolved = resolve_dst("<GOOGET_TEST_VAR>/bin/tool.exe");
        assert_eq!(resolved, PathBuf::from("/opt/thing/bin/tool.exe"));
    }

    #[test]
    fn resolve_dst_prefixes_relative_paths() {
        assert_eq!(resolve_dst("Program Files/tool"), PathBuf::from("/Program Files/tool"));
    }

    #[test]
    fn resolve_dst_leaves_absolute_paths() {
        assert_eq!(resolve_dst("/usr/local/bin/tool"), PathBuf::from("/usr/local/bin/tool"));
    }

    #[test]
    fn copy_file_with_hash_matches_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"payload").unwrap();
        let dst = dir.path().join("nested/dst.bin");
        let hash = copy_file_with_hash(&src, &dst).unwrap();
        assert_eq!(hash, crate::archive::checksum_bytes(b"payload"));
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }
}
