//! State database: a single-file SQLite store keyed by `(pkg_name,
//! pkg_arch)`, JSON-encoded row blobs, replace-on-reinsert.
//!
//! Uses `rusqlite` (bundled), the same persistence choice `pahkat_client`
//! makes for its own installed-package table.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::archive::PackageSpec;
use crate::error::{ErrorKind, GooError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledApp {
    pub display_name: SmolStr,
    pub reg_key: SmolStr,
}

/// A row in the state DB (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageState {
    #[serde(flatten)]
    pub spec: PackageSpec,
    #[serde(default, rename = "SourceRepo")]
    pub source_repo: SmolStr,
    #[serde(default, rename = "DownloadURL")]
    pub download_url: SmolStr,
    #[serde(default, rename = "Checksum")]
    pub checksum: SmolStr,
    #[serde(default, rename = "LocalPath")]
    pub local_path: SmolStr,
    #[serde(default)]
    pub unpack_dir: Option<SmolStr>,
    /// file path -> sha256 hex; empty hash marks a directory.
    #[serde(default)]
    pub installed_files: HashMap<String, String>,
    #[serde(default)]
    pub install_date: i64,
    #[serde(default)]
    pub installed_app: Option<InstalledApp>,
}

impl PackageState {
    pub fn name(&self) -> &SmolStr {
        &self.spec.identity.name
    }

    pub fn arch(&self) -> &SmolStr {
        &self.spec.identity.arch
    }

    pub fn version(&self) -> &SmolStr {
        &self.spec.identity.ver
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    /// Opens `path`, creating the schema if it doesn't exist yet, and
    /// importing a legacy `googet.state` JSON file (or its `.bak` sibling)
    /// the first time the DB is created.
    pub fn new(path: &Path) -> Result<Self, GooError> {
        let is_new = !path.exists();
        let conn = Connection::open(path)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to open state db", e.into()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS InstalledPackages (
                id INTEGER PRIMARY KEY,
                pkg_name TEXT NOT NULL,
                pkg_arch TEXT NOT NULL,
                pkg_ver TEXT NOT NULL,
                pkg_json BLOB NOT NULL,
                UNIQUE(pkg_name, pkg_arch) ON CONFLICT REPLACE
            )",
        )
        .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to create schema", e.into()))?;

        let db = StateDb { conn };
        if is_new {
            db.import_legacy(path)?;
        }
        Ok(db)
    }

    fn import_legacy(&self, db_path: &Path) -> Result<(), GooError> {
        let root = db_path.parent().unwrap_or_else(|| Path::new("."));
        let legacy = root.join("googet.state");
        let legacy_bak = root.join("googet.state.bak");

        let source = if legacy.exists() {
            Some(legacy)
        } else if legacy_bak.exists() {
            Some(legacy_bak)
        } else {
            None
        };

        let Some(source) = source else { return Ok(()) };
        let bytes = std::fs::read(&source)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to read legacy state", e.into()))?;
        let states: Vec<PackageState> = serde_json::from_slice(&bytes).map_err(|e| {
            GooError::wrap(ErrorKind::Invariant, "malformed legacy googet.state", e.into())
        })?;
        for state in states {
            self.add(state)?;
        }
        log::info!("imported legacy state from {}", source.display());
        Ok(())
    }

    /// Replace-or-insert one row. Stamps `install_date` if zero.
    pub fn add(&self, mut state: PackageState) -> Result<(), GooError> {
        if state.install_date == 0 {
            state.install_date = now_unix();
        }
        let json = serde_json::to_vec(&state)
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to encode state row", e.into()))?;
        self.conn
            .execute(
                "INSERT INTO InstalledPackages (pkg_name, pkg_arch, pkg_ver, pkg_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    state.name().as_str(),
                    state.arch().as_str(),
                    state.version().as_str(),
                    json
                ],
            )
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to write state row", e.into()))?;
        Ok(())
    }

    /// Deletes the row for `(name, arch)`. Missing is not an error.
    pub fn remove(&self, name: &str, arch: &str) -> Result<(), GooError> {
        self.conn
            .execute(
                "DELETE FROM InstalledPackages WHERE pkg_name = ?1 AND pkg_arch = ?2",
                params![name, arch],
            )
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to delete state row", e.into()))?;
        Ok(())
    }

    fn decode_row(json: Vec<u8>) -> Result<PackageState, GooError> {
        serde_json::from_slice(&json)
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "corrupt state row", e.into()))
    }

    /// Row matching `name` (any arch); `None` if absent.
    pub fn fetch_one(&self, name: &str) -> Result<Option<PackageState>, GooError> {
        let row: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT pkg_json FROM InstalledPackages WHERE pkg_name = ?1 LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to query state", e.into()))?;
        row.map(Self::decode_row).transpose()
    }

    /// Row matching `(name, arch)` exactly; `None` if absent.
    pub fn fetch_exact(&self, name: &str, arch: &str) -> Result<Option<PackageState>, GooError> {
        let row: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT pkg_json FROM InstalledPackages WHERE pkg_name = ?1 AND pkg_arch = ?2",
                params![name, arch],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to query state", e.into()))?;
        row.map(Self::decode_row).transpose()
    }

    /// All rows, optionally filtered by a name `LIKE` pattern (`%` wildcards).
    pub fn fetch_all(&self, name_glob: Option<&str>) -> Result<Vec<PackageState>, GooError> {
        let mut stmt = match name_glob {
            Some(_) => self
                .conn
                .prepare("SELECT pkg_json FROM InstalledPackages WHERE pkg_name LIKE ?1")
                .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to prepare query", e.into()))?,
            None => self
                .conn
                .prepare("SELECT pkg_json FROM InstalledPackages")
                .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to prepare query", e.into()))?,
        };

        let rows = match name_glob {
            Some(pattern) => stmt
                .query_map(params![pattern], |row| row.get::<_, Vec<u8>>(0))
                .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to query state", e.into()))?
                .collect::<Result<Vec<_>, _>>(),
            None => stmt
                .query_map([], |row| row.get::<_, Vec<u8>>(0))
                .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to query state", e.into()))?
                .collect::<Result<Vec<_>, _>>(),
        }
        .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to read state rows", e.into()))?;

        rows.into_iter().map(Self::decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PackageInfo;

    fn sample(name: &str, ver: &str) -> PackageState {
        let mut spec = PackageSpec::default();
        spec.identity = PackageInfo::new(name, "noarch", ver);
        PackageState {
            spec,
            source_repo: "https://example.test/repo".into(),
            download_url: "https://example.test/repo/a.goo".into(),
            checksum: "deadbeef".into(),
            local_path: "cache/a.goo".into(),
            unpack_dir: None,
            installed_files: HashMap::new(),
            install_date: 0,
            installed_app: None,
        }
    }

    #[test]
    fn add_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        db.add(sample("foo", "1.0.0")).unwrap();
        let row = db.fetch_exact("foo", "noarch").unwrap().unwrap();
        assert_eq!(row.version().as_str(), "1.0.0");
        assert!(row.install_date > 0);
    }

    #[test]
    fn reinsert_replaces_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        db.add(sample("foo", "1.0.0")).unwrap();
        db.add(sample("foo", "2.0.0")).unwrap();
        let all = db.fetch_all(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version().as_str(), "2.0.0");
    }

    #[test]
    fn remove_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        db.remove("nope", "noarch").unwrap();
    }

    #[test]
    fn fetch_all_glob_filters() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        db.add(sample("foo", "1.0.0")).unwrap();
        db.add(sample("bar", "1.0.0")).unwrap();
        let matched = db.fetch_all(Some("fo%")).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name().as_str(), "foo");
    }
}
