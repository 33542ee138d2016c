//! Install/remove/reinstall/verify transaction: the layer that turns a
//! `resolver::PlanStep` list into archive downloads, extraction,
//! platform-driver dispatch, and state-DB bookkeeping. The download-then-unpack
//! flow follows a general-purpose-tool install shape, generalized here to a
//! full package transaction with tracked file manifests and supersede
//! cleanup.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::archive::{self, PackageInfo, PackageSpec};
use crate::config::{HttpClient, Paths};
use crate::error::{ErrorKind, GooError};
use crate::io;
use crate::platform::PlatformDriver;
use crate::repo::{self, RepoMap};
use crate::resolver::PlanStep;
use crate::state_db::{PackageState, StateDb};

/// Marker stored in `PackageState::installed_files` for a tracked directory
/// (as opposed to a file, which carries its SHA-256 hex hash).
const DIR_MARKER: &str = "";

pub(crate) fn cache_archive_path(paths: &Paths, pi: &PackageInfo) -> PathBuf {
    paths.cache_dir.join(format!("{}.{}.{}.goo", pi.name, pi.arch, pi.ver))
}

fn unpack_dir_path(paths: &Paths, pi: &PackageInfo) -> PathBuf {
    paths.cache_dir.join("unpack").join(format!("{}.{}", pi.name, pi.arch))
}

/// Downloads (or reuses a checksum-matching cached copy of) a repo-hosted
/// `.goo` archive, then runs the shared extract/install/lay-down-files flow.
pub async fn install_from_repo(
    pi: &PackageInfo,
    repo_url: &str,
    repo_map: &RepoMap,
    paths: &Paths,
    http: &HttpClient,
    driver: &dyn PlatformDriver,
    db: &StateDb,
) -> Result<(), GooError> {
    let repo = repo_map
        .get(repo_url)
        .ok_or_else(|| GooError::resolve(format!("repo '{repo_url}' is not in the current index")))?;
    let repo_spec = repo::find_repo_spec(pi, repo)?.clone();
    let download_url = repo::download_url(repo_url, &repo_spec.source);
    let cache_path = cache_archive_path(paths, pi);

    let need_download = match std::fs::read(&cache_path) {
        Ok(bytes) => archive::checksum_bytes(&bytes) != repo_spec.checksum.as_str(),
        Err(_) => true,
    };

    if need_download {
        log::info!("downloading {pi} from {download_url}");
        let response = http.get_with_retry(&download_url).await?;
        if !response.status().is_success() {
            return Err(GooError::new(
                ErrorKind::Network,
                format!("failed to download '{download_url}': HTTP {}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GooError::wrap(ErrorKind::Network, "failed to read archive body", e.into()))?;

        let actual = archive::checksum_bytes(&bytes);
        if actual != repo_spec.checksum.as_str() {
            return Err(GooError::checksum(format!(
                "checksum mismatch for {pi}: expected {}, got {actual}",
                repo_spec.checksum
            )));
        }

        let cache_path = cache_path.clone();
        crate::spawn_blocking(move || {
            if let Some(parent) = cache_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&cache_path, &bytes)?;
            Ok(())
        })
        .await
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to write cached archive", e))?;
    }

    let old = db.fetch_exact(&pi.name, &pi.arch)?;

    install_archive_common(
        repo_spec.spec.clone(),
        &cache_path,
        &download_url,
        repo_url,
        repo_spec.checksum.as_str(),
        paths,
        driver,
        db,
        old,
    )
    .await
}

/// Installs directly from a local `.goo` file (spec §4.6's "install from a
/// file already on disk" path), bypassing the repo/download step entirely.
pub async fn install_from_local_file(
    local_path: &Path,
    paths: &Paths,
    driver: &dyn PlatformDriver,
    db: &StateDb,
) -> Result<(), GooError> {
    let bytes = std::fs::read(local_path)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to read '{}'", local_path.display()), e.into()))?;

    let spec = archive::extract_spec(std::io::Cursor::new(&bytes))?;
    archive::verify_spec(&spec)?;
    let checksum = archive::checksum_bytes(&bytes);

    let old = db.fetch_exact(&spec.identity.name, &spec.identity.arch)?;

    install_archive_common(
        spec,
        local_path,
        &local_path.to_string_lossy(),
        "local",
        &checksum,
        paths,
        driver,
        db,
        old,
    )
    .await
}

/// Extracts `archive_path` into the package's persistent unpack directory,
/// runs the platform driver's install step, lays down `Files` entries at
/// their resolved destinations, cleans up superseded files/dirs/cache
/// archive, and records the new `PackageState` row.
async fn install_archive_common(
    spec: PackageSpec,
    archive_path: &Path,
    download_url: &str,
    source_repo: &str,
    checksum: &str,
    paths: &Paths,
    driver: &dyn PlatformDriver,
    db: &StateDb,
    old: Option<PackageState>,
) -> Result<(), GooError> {
    let unpack_dir = unpack_dir_path(paths, &spec.identity);
    if unpack_dir.exists() {
        std::fs::remove_dir_all(&unpack_dir)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to clear stale unpack dir", e.into()))?;
    }
    {
        let archive_path = archive_path.to_path_buf();
        let unpack_dir = unpack_dir.clone();
        crate::spawn_blocking(move || {
            let file = std::fs::File::open(&archive_path)?;
            archive::extract_all(file, &unpack_dir).map_err(anyhow::Error::from)
        })
        .await
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to extract archive", e))?;
    }

    driver.install(&unpack_dir, &spec).await?;

    let installed_files = lay_down_files(&unpack_dir, &spec)?;

    if let Some(old) = old {
        cleanup_superseded(&old.installed_files, &installed_files)?;

        let old_cache_path = Path::new(old.local_path.as_str());
        if !old.local_path.is_empty() && old_cache_path != archive_path {
            match std::fs::remove_file(old_cache_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("failed to remove old cached archive '{}': {e}", old_cache_path.display()),
            }
        }
    }

    let installed_app = driver.app_association(&spec, archive_path);

    let state = PackageState {
        spec,
        source_repo: source_repo.into(),
        download_url: download_url.into(),
        checksum: checksum.into(),
        local_path: archive_path.to_string_lossy().into_owned().into(),
        unpack_dir: Some(unpack_dir.to_string_lossy().into_owned().into()),
        installed_files,
        install_date: 0,
        installed_app,
    };
    db.add(state)
}

/// Copies every `Files` entry from the unpack directory to its resolved
/// destination, returning the manifest of what landed where (file -> hash,
/// directory -> empty string) for later removal/supersede diffing.
fn lay_down_files(unpack_dir: &Path, spec: &PackageSpec) -> Result<HashMap<String, String>, GooError> {
    let mut manifest = HashMap::new();
    for (src, dst_template) in &spec.files {
        let src_full = unpack_dir.join(src.as_str());
        let dst_root = io::resolve_dst(dst_template);

        if src_full.is_dir() {
            for (rel, is_dir) in io::blocking::walk(&src_full)? {
                if rel.as_os_str().is_empty() {
                    continue;
                }
                let dst_path = dst_root.join(&rel);
                let key = dst_path.to_string_lossy().into_owned();
                if is_dir {
                    std::fs::create_dir_all(&dst_path).map_err(|e| {
                        GooError::wrap(ErrorKind::Filesystem, format!("failed to create '{}'", dst_path.display()), e.into())
                    })?;
                    manifest.insert(key, DIR_MARKER.to_string());
                } else {
                    let hash = io::copy_file_with_hash(&src_full.join(&rel), &dst_path)?;
                    manifest.insert(key, hash);
                }
            }
        } else {
            let hash = io::copy_file_with_hash(&src_full, &dst_root)?;
            manifest.insert(dst_root.to_string_lossy().into_owned(), hash);
        }
    }
    Ok(manifest)
}

/// Set-difference cleanup (spec §9 open question 2): anything tracked by
/// the old install but absent from the new one is removed, files first,
/// then directories in a reverse-sorted second pass so children go before
/// parents.
fn cleanup_superseded(old_files: &HashMap<String, String>, new_files: &HashMap<String, String>) -> Result<(), GooError> {
    let mut stale_dirs = Vec::new();
    for (path, hash) in old_files {
        if new_files.contains_key(path) {
            continue;
        }
        if hash == DIR_MARKER {
            stale_dirs.push(path.clone());
            continue;
        }
        io::remove_or_rename(Path::new(path))?;
    }
    stale_dirs.sort();
    stale_dirs.reverse();
    for dir in stale_dirs {
        let _ = std::fs::remove_dir(Path::new(&dir));
    }
    Ok(())
}

/// Reinstalls the currently-recorded version of `pi` from its original
/// repo without re-resolving dependencies/conflicts and without running
/// supersede cleanup (spec §4.6: same version in, same files expected out).
pub async fn reinstall(
    pi: &PackageInfo,
    repo_map: &RepoMap,
    paths: &Paths,
    http: &HttpClient,
    driver: &dyn PlatformDriver,
    db: &StateDb,
) -> Result<(), GooError> {
    let state = db
        .fetch_exact(&pi.name, &pi.arch)?
        .ok_or_else(|| GooError::resolve(format!("{pi} is not installed")))?;

    if state.source_repo.as_str() == "local" {
        return install_from_local_file(Path::new(state.local_path.as_str()), paths, driver, db).await;
    }

    install_from_repo(&state.spec.identity, state.source_repo.as_str(), repo_map, paths, http, driver, db).await
}

/// Removes an installed package: runs the platform driver's uninstall step,
/// deletes every tracked file/dir (files first, directories reverse-sorted
/// after), drops the unpack directory, and removes the state row.
pub async fn remove(pi: &PackageInfo, paths: &Paths, driver: &dyn PlatformDriver, db: &StateDb) -> Result<(), GooError> {
    let state = db
        .fetch_exact(&pi.name, &pi.arch)?
        .ok_or_else(|| GooError::resolve(format!("{pi} is not installed")))?;

    let unpack_dir = state
        .unpack_dir
        .as_ref()
        .map(|p| PathBuf::from(p.as_str()))
        .unwrap_or_else(|| unpack_dir_path(paths, pi));

    driver.uninstall(&unpack_dir, &state).await?;

    let mut dirs = Vec::new();
    for (path, hash) in &state.installed_files {
        if hash == DIR_MARKER {
            dirs.push(path.clone());
        } else {
            io::remove_or_rename(Path::new(path))?;
        }
    }
    dirs.sort();
    dirs.reverse();
    for dir in dirs {
        let _ = std::fs::remove_dir(Path::new(&dir));
    }

    if unpack_dir.exists() {
        let _ = std::fs::remove_dir_all(&unpack_dir);
    }

    db.remove(&pi.name, &pi.arch)
}

/// Executes a resolved install plan in order: pre-install removals of
/// replaced packages, then each dependency/target install (spec §4.5/§4.6).
pub async fn execute_plan(
    plan: &[PlanStep],
    repo_map: &RepoMap,
    paths: &Paths,
    http: &HttpClient,
    driver: &dyn PlatformDriver,
    db: &StateDb,
) -> Result<(), GooError> {
    for step in plan {
        match step {
            PlanStep::RemoveForReplace(pi) => {
                remove(pi, paths, driver, db).await?;
            }
            PlanStep::Install { pi, repo_url } => {
                install_from_repo(pi, repo_url, repo_map, paths, http, driver, db).await?;
            }
        }
    }
    Ok(())
}

/// Verifies an installed package: re-runs its `Verify` script (if any) and
/// confirms every tracked file still exists with a matching hash.
pub async fn verify(pi: &PackageInfo, paths: &Paths, driver: &dyn PlatformDriver, db: &StateDb) -> Result<(), GooError> {
    let state = db
        .fetch_exact(&pi.name, &pi.arch)?
        .ok_or_else(|| GooError::resolve(format!("{pi} is not installed")))?;

    let unpack_dir = state
        .unpack_dir
        .as_ref()
        .map(|p| PathBuf::from(p.as_str()))
        .unwrap_or_else(|| unpack_dir_path(paths, pi));

    driver.verify(&unpack_dir, &state.spec).await?;

    for (path, expected_hash) in &state.installed_files {
        if expected_hash == DIR_MARKER {
            if !Path::new(path).is_dir() {
                return Err(GooError::new(ErrorKind::Invariant, format!("tracked directory '{path}' is missing")));
            }
            continue;
        }
        let mut file = std::fs::File::open(path)
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, format!("tracked file '{path}' is missing"), e.into()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to read '{path}'"), e.into()))?;
        let actual = archive::checksum_bytes(&buf);
        if &actual != expected_hash {
            return Err(GooError::checksum(format!("tracked file '{path}' has been modified since install")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PackageInfo as PI;
    use crate::platform::PortableDriver;

    fn make_archive(dir: &Path, name: &str, ver: &str, content: &[u8]) -> (PathBuf, PackageSpec) {
        std::fs::write(dir.join("payload.txt"), content).unwrap();
        let mut spec = PackageSpec::default();
        spec.identity = PI::new(name, "noarch", ver);
        spec.files.insert("payload.txt".into(), dir.join("installed.txt").to_string_lossy().into_owned().into());
        let archive_path = dir.join(format!("{name}.goo"));
        let file = std::fs::File::create(&archive_path).unwrap();
        archive::write_archive(file, &spec, dir).unwrap();
        (archive_path, spec)
    }

    #[tokio::test]
    async fn install_from_local_file_lays_down_tracked_files_and_records_state() {
        let root = tempfile::tempdir().unwrap();
        let paths = Paths::new(root.path().to_path_buf());
        let db = StateDb::new(&paths.db_path).unwrap();
        let driver = PortableDriver;

        let work = tempfile::tempdir().unwrap();
        let (archive_path, _spec) = make_archive(work.path(), "demo", "1.0.0", b"hello");

        install_from_local_file(&archive_path, &paths, &driver, &db).await.unwrap();

        let dst = work.path().join("installed.txt");
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello");
        let row = db.fetch_exact("demo", "noarch").unwrap().unwrap();
        assert_eq!(row.installed_files.len(), 1);
    }

    #[tokio::test]
    async fn remove_deletes_tracked_files_and_state_row() {
        let root = tempfile::tempdir().unwrap();
        let paths = Paths::new(root.path().to_path_buf());
        let db = StateDb::new(&paths.db_path).unwrap();
        let driver = PortableDriver;

        let work = tempfile::tempdir().unwrap();
        let (archive_path, spec) = make_archive(work.path(), "demo", "1.0.0", b"hello");
        install_from_local_file(&archive_path, &paths, &driver, &db).await.unwrap();

        let dst = work.path().join("installed.txt");
        assert!(dst.exists());

        remove(&spec.identity, &paths, &driver, &db).await.unwrap();
        assert!(!dst.exists());
        assert!(db.fetch_exact("demo", "noarch").unwrap().is_none());
    }
}
