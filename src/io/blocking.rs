//! Directory-walk helpers used while laying down a package's `Files`
//! manifest. Kept in its own submodule apart from `io::mod`'s path-resolution
//! helpers.

use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, GooError};

/// Recursively lists every regular file and directory under `root`,
/// returning paths relative to `root`. Directories are listed before the
/// files/subdirectories they contain.
pub fn walk(root: &Path) -> Result<Vec<(PathBuf, bool)>, GooError> {
    let mut out = Vec::new();
    walk_into(root, Path::new(""), &mut out)?;
    Ok(out)
}

fn walk_into(base: &Path, rel: &Path, out: &mut Vec<(PathBuf, bool)>) -> Result<(), GooError> {
    let full = base.join(rel);
    let metadata = std::fs::symlink_metadata(&full)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to stat '{}'", full.display()), e.into()))?;

    if metadata.is_dir() {
        out.push((rel.to_path_buf(), true));
        let mut children: Vec<_> = std::fs::read_dir(&full)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to read dir '{}'", full.display()), e.into()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to read directory entry", e.into()))?;
        children.sort_by_key(|e| e.file_name());
        for entry in children {
            walk_into(base, &rel.join(entry.file_name()), out)?;
        }
    } else {
        out.push((rel.to_path_buf(), false));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_lists_dirs_before_children() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file.txt"), b"x").unwrap();

        let entries = walk(dir.path()).unwrap();
        let names: Vec<_> = entries.iter().map(|(p, is_dir)| (p.to_string_lossy().to_string(), *is_dir)).collect();
        assert!(names.contains(&("".to_string(), true)));
        assert!(names.contains(&("sub".to_string(), true)));
        assert!(names.contains(&("sub/file.txt".to_string(), false)));
    }
}
