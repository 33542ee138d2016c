//! Package descriptor & archive: the immutable `PackageSpec` / `RepoSpec`
//! data model, the gzip+tar archive reader/writer, and checksum utilities.
//! The reader follows a `TarGz`-extraction shape common across the corpus
//! (`tar::Archive` over `flate2::read::GzDecoder`), with a writer added and
//! absolute/escaping entry names rejected on extraction.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use crate::error::{ErrorKind, GooError};

pub const MAX_TAG_KEY_BYTES: usize = 127;
pub const MAX_TAG_VALUE_BYTES: usize = 10 * 1024;
pub const MAX_TAGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    #[serde(rename = "")]
    Any,
    Noarch,
    X8632,
    X8664,
    Arm,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Any => "",
            Arch::Noarch => "noarch",
            Arch::X8632 => "x86_32",
            Arch::X8664 => "x86_64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
        }
    }

    pub fn parse(s: &str) -> Result<Arch, GooError> {
        match s {
            "" => Ok(Arch::Any),
            "noarch" => Ok(Arch::Noarch),
            "x86_32" => Ok(Arch::X8632),
            "x86_64" => Ok(Arch::X8664),
            "arm" => Ok(Arch::Arm),
            "arm64" => Ok(Arch::Arm64),
            other => Err(GooError::new(
                ErrorKind::Invariant,
                format!("unknown arch '{other}'"),
            )),
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity triple `(name, arch, version)`. `arch`/`version` may be
/// empty in queries to denote "any".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: SmolStr,
    #[serde(default)]
    pub arch: SmolStr,
    #[serde(default)]
    pub ver: SmolStr,
}

impl PackageInfo {
    pub fn new(name: impl Into<SmolStr>, arch: impl Into<SmolStr>, ver: impl Into<SmolStr>) -> Self {
        PackageInfo {
            name: name.into(),
            arch: arch.into(),
            ver: ver.into(),
        }
    }

    pub fn key(&self) -> (SmolStr, SmolStr) {
        (self.name.clone(), self.arch.clone())
    }
}

impl std::fmt::Display for PackageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.arch.is_empty() {
            write!(f, ".{}", self.arch)?;
        }
        if !self.ver.is_empty() {
            write!(f, " {}", self.ver)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecFile {
    #[serde(default, rename = "Path")]
    pub path: SmolStr,
    #[serde(default, rename = "Args")]
    pub args: Vec<SmolStr>,
    #[serde(default, rename = "ExitCodes")]
    pub exit_codes: Vec<i32>,
}

impl ExecFile {
    pub fn is_set(&self) -> bool {
        !self.path.is_empty()
    }
}

/// The declarative contract of a package (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageSpec {
    #[serde(flatten)]
    pub identity: PackageInfo,
    #[serde(default, rename = "Description")]
    pub description: Option<String>,
    #[serde(default, rename = "License")]
    pub license: Option<String>,
    #[serde(default, rename = "Authors")]
    pub authors: Option<String>,
    #[serde(default, rename = "Owners")]
    pub owners: Option<String>,
    #[serde(default, rename = "Source")]
    pub source: Option<String>,
    #[serde(default, rename = "ReleaseNotes")]
    pub release_notes: HashMap<SmolStr, String>,
    #[serde(default, rename = "Tags")]
    pub tags: HashMap<SmolStr, SmolStr>,
    #[serde(default, rename = "PkgDependencies")]
    pub pkg_dependencies: HashMap<SmolStr, SmolStr>,
    #[serde(default, rename = "Replaces")]
    pub replaces: Vec<SmolStr>,
    #[serde(default, rename = "Conflicts")]
    pub conflicts: Vec<SmolStr>,
    #[serde(default, rename = "Install")]
    pub install: ExecFile,
    #[serde(default, rename = "Uninstall")]
    pub uninstall: ExecFile,
    #[serde(default, rename = "Verify")]
    pub verify: ExecFile,
    #[serde(default, rename = "Files")]
    pub files: HashMap<SmolStr, SmolStr>,
}

/// `PackageSpec` plus the concrete artifact location in a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoSpec {
    #[serde(flatten)]
    pub spec: PackageSpec,
    #[serde(rename = "Source")]
    pub source: SmolStr,
    #[serde(rename = "Checksum")]
    pub checksum: SmolStr,
}

fn is_relative_and_safe(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    // Windows drive-letter absolute paths, e.g. "C:\...".
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| !matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir))
}

/// Enforces the invariants of spec §4.2: non-empty name, valid arch,
/// parsable version, tag limits, relative/escape-free paths.
pub fn verify_spec(spec: &PackageSpec) -> Result<(), GooError> {
    if spec.identity.name.is_empty() {
        return Err(GooError::new(ErrorKind::Invariant, "package name is empty"));
    }
    if !spec.identity.arch.is_empty() {
        Arch::parse(&spec.identity.arch)?;
    }
    if spec.identity.ver.is_empty() {
        return Err(GooError::new(
            ErrorKind::Invariant,
            format!("package '{}' has no version", spec.identity.name),
        ));
    }
    crate::version::parse(&spec.identity.ver)?;

    if spec.tags.len() > MAX_TAGS {
        return Err(GooError::new(
            ErrorKind::Invariant,
            format!("too many tags ({} > {MAX_TAGS})", spec.tags.len()),
        ));
    }
    for (k, v) in &spec.tags {
        if k.len() > MAX_TAG_KEY_BYTES {
            return Err(GooError::new(ErrorKind::Invariant, format!("tag key '{k}' too long")));
        }
        if v.len() > MAX_TAG_VALUE_BYTES {
            return Err(GooError::new(ErrorKind::Invariant, format!("tag value for '{k}' too long")));
        }
    }

    for min_ver in spec.pkg_dependencies.values() {
        crate::version::parse(min_ver)?;
    }

    for (exec_name, exec) in [
        ("Install", &spec.install),
        ("Uninstall", &spec.uninstall),
        ("Verify", &spec.verify),
    ] {
        if exec.is_set() && !is_relative_and_safe(&exec.path) {
            return Err(GooError::new(
                ErrorKind::Invariant,
                format!("{exec_name}.Path '{}' is absolute or escapes the archive", exec.path),
            ));
        }
    }

    for (src, dst) in &spec.files {
        if !is_relative_and_safe(src) {
            return Err(GooError::new(
                ErrorKind::Invariant,
                format!("Files source '{src}' is absolute or escapes the archive"),
            ));
        }
        if dst.is_empty() {
            return Err(GooError::new(ErrorKind::Invariant, "Files destination is empty"));
        }
    }

    Ok(())
}

/// Normalizes a path the way the parser does: backslashes to forward
/// slashes, leading `./` stripped.
pub fn normalize_archive_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    replaced.strip_prefix("./").unwrap_or(&replaced).to_string()
}

/// Streams tar headers until it finds the `.pkgspec` entry and decodes it.
/// Missing entry is a fatal error.
pub fn extract_spec<R: Read>(reader: R) -> Result<PackageSpec, GooError> {
    let gz = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);
    let entries = archive
        .entries()
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to read archive", e.into()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| {
            GooError::wrap(ErrorKind::Filesystem, "failed to read archive entry", e.into())
        })?;
        let path = entry
            .path()
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "bad entry path", e.into()))?
            .to_string_lossy()
            .into_owned();
        let path = normalize_archive_path(&path);
        if path.ends_with(".pkgspec") {
            let mut buf = String::new();
            entry
                .read_to_string(&mut buf)
                .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to read pkgspec", e.into()))?;
            let spec: PackageSpec = serde_json::from_str(&buf).map_err(|e| {
                GooError::wrap(ErrorKind::Invariant, "malformed pkgspec JSON", e.into())
            })?;
            return Ok(spec);
        }
    }

    Err(GooError::new(ErrorKind::Invariant, "archive contains no .pkgspec entry"))
}

/// Writes a `<name>.pkgspec` entry plus the `Files` payload into a
/// gzip+tar stream, the mirror of `extract_spec`.
pub fn write_archive<W: std::io::Write>(
    writer: W,
    spec: &PackageSpec,
    file_payload_root: &Path,
) -> Result<(), GooError> {
    let gz = GzEncoder::new(writer, Compression::default());
    let mut builder = tar::Builder::new(gz);

    let json = serde_json::to_vec_pretty(spec)
        .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to encode pkgspec", e.into()))?;
    let mut header = tar::Header::new_gnu();
    header.set_size(json.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    let pkgspec_name = format!("{}.pkgspec", spec.identity.name);
    builder
        .append_data(&mut header, &pkgspec_name, json.as_slice())
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to write pkgspec entry", e.into()))?;

    for src in spec.files.keys() {
        let full = file_payload_root.join(src.as_str());
        if full.is_file() {
            builder
                .append_path_with_name(&full, src.as_str())
                .map_err(|e| {
                    GooError::wrap(ErrorKind::Filesystem, format!("failed to pack '{src}'"), e.into())
                })?;
        } else if full.is_dir() {
            builder
                .append_dir_all(src.as_str(), &full)
                .map_err(|e| {
                    GooError::wrap(ErrorKind::Filesystem, format!("failed to pack dir '{src}'"), e.into())
                })?;
        }
    }

    builder
        .into_inner()
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to finish tar", e.into()))?
        .finish()
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to finish gzip", e.into()))?;
    Ok(())
}

/// Extracts a full archive's file payload into `dest_dir`, rejecting
/// absolute or `..`-escaping entry names (spec §4.6 step 5 / §6).
pub fn extract_all<R: Read>(reader: R, dest_dir: &Path) -> Result<(), GooError> {
    std::fs::create_dir_all(dest_dir)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to create extract dir", e.into()))?;
    let gz = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);
    let entries = archive
        .entries()
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to read archive", e.into()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| {
            GooError::wrap(ErrorKind::Filesystem, "failed to read archive entry", e.into())
        })?;
        let raw_path = entry
            .path()
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "bad entry path", e.into()))?
            .to_string_lossy()
            .into_owned();
        let path = normalize_archive_path(&raw_path);
        if !is_relative_and_safe(&path) {
            return Err(GooError::new(
                ErrorKind::Filesystem,
                format!("archive entry '{path}' is absolute or escapes the extraction root"),
            ));
        }
        let out_path: PathBuf = dest_dir.join(&path);
        entry
            .unpack(&out_path)
            .map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to extract '{path}'"), e.into()))?;
    }
    Ok(())
}

/// SHA-256 of the full byte stream, hex-encoded.
pub fn checksum<R: Read>(mut reader: R) -> Result<String, GooError> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to read for checksum", e.into()))?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_spec() -> PackageSpec {
        let mut spec = PackageSpec::default();
        spec.identity = PackageInfo::new("sample", "noarch", "1.0.0");
        spec.files.insert("bin/sample.exe".into(), "<ProgramFiles>/sample/sample.exe".into());
        spec
    }

    #[test]
    fn archive_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/sample.exe"), b"binary").unwrap();

        let spec = sample_spec();
        let mut buf = Vec::new();
        write_archive(&mut buf, &spec, dir.path()).unwrap();

        let decoded = extract_spec(Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.identity, spec.identity);
        assert_eq!(decoded.files, spec.files);
    }

    #[test]
    fn verify_spec_rejects_escaping_paths() {
        let mut spec = sample_spec();
        spec.files.insert("../evil".into(), "/tmp/evil".into());
        assert!(verify_spec(&spec).is_err());
    }

    #[test]
    fn verify_spec_rejects_bad_version() {
        let mut spec = sample_spec();
        spec.identity.ver = "".into();
        assert!(verify_spec(&spec).is_err());
    }

    #[test]
    fn checksum_changes_with_one_byte() {
        let a = checksum_bytes(b"hello world");
        let b = checksum_bytes(b"hello worlD");
        assert_ne!(a, b);
    }
}
