//! Repository client (spec §4.3): disk-cached indexes fetched from HTTP(S)
//! or object storage, and the priority-aware "latest-of" selector.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use smol_str::SmolStr;

use crate::archive::{Arch, PackageInfo, RepoSpec};
use crate::config::{strip_oauth_prefix, HttpClient};
use crate::error::{ErrorKind, GooError};
use crate::version::{self, Version};

/// One source's contribution to the resolver's view of the world:
/// its priority plus the `RepoSpec`s its index currently advertises.
#[derive(Debug, Clone)]
pub struct Repo {
    pub priority: i64,
    pub specs: Vec<RepoSpec>,
}

/// `repo URL -> Repo`, the resolver's complete view across every source.
pub type RepoMap = HashMap<String, Repo>;

fn cache_key(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_object_store_url(url: &str) -> bool {
    url.starts_with("gs://") || url.starts_with("https://storage.googleapis.com/")
}

/// Translates `gs://bucket/prefix` to the canonical public HTTPS form; an
/// already-HTTPS GCS URL passes through unchanged.
fn object_store_to_http(url: &str) -> String {
    match url.strip_prefix("gs://") {
        Some(rest) => format!("https://storage.googleapis.com/{rest}"),
        None => url.to_string(),
    }
}

fn cache_is_fresh(cache_file: &Path, cache_life: Duration) -> bool {
    let Ok(meta) = std::fs::metadata(cache_file) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age < cache_life,
        Err(_) => true, // mtime in the future; treat as fresh rather than thrash
    }
}

fn read_cache(cache_file: &Path) -> Result<Vec<RepoSpec>, GooError> {
    let bytes = std::fs::read(cache_file)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to read index cache", e.into()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| GooError::wrap(ErrorKind::Invariant, "corrupt index cache", e.into()))
}

fn write_cache(cache_dir: &Path, key: &str, url: &str, specs: &[RepoSpec]) -> Result<(), GooError> {
    std::fs::create_dir_all(cache_dir)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to create cache dir", e.into()))?;
    let json = serde_json::to_vec(specs)
        .map_err(|e| GooError::wrap(ErrorKind::Invariant, "failed to encode index cache", e.into()))?;
    let data_path = cache_dir.join(format!("{key}.rs"));
    let tmp_path = cache_dir.join(format!("{key}.rs.tmp"));
    std::fs::write(&tmp_path, &json)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to write index cache", e.into()))?;
    std::fs::rename(&tmp_path, &data_path)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to commit index cache", e.into()))?;
    std::fs::write(cache_dir.join(format!("{key}.url")), url.as_bytes())
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to write cache url sidecar", e.into()))?;
    Ok(())
}

fn decode_index_body(bytes: &[u8], gzipped: bool) -> Result<Vec<RepoSpec>, GooError> {
    if gzipped {
        let mut decoder = GzDecoder::new(bytes);
        let mut text = Vec::new();
        decoder
            .read_to_end(&mut text)
            .map_err(|e| GooError::wrap(ErrorKind::Network, "failed to decompress index", e.into()))?;
        serde_json::from_slice(&text)
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "malformed index JSON", e.into()))
    } else {
        serde_json::from_slice(bytes)
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "malformed index JSON", e.into()))
    }
}

async fn fetch_index(client: &HttpClient, base_url: &str, bearer: Option<&str>) -> Result<Vec<RepoSpec>, GooError> {
    let gz_url = format!("{}/index.gz", base_url.trim_end_matches('/'));
    let response = client.get_with_retry_bearer(&gz_url, bearer).await?;

    if response.status().is_success() {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GooError::wrap(ErrorKind::Network, "failed to read index.gz body", e.into()))?;
        return decode_index_body(&bytes, true);
    }

    let plain_url = format!("{}/index", base_url.trim_end_matches('/'));
    let response = client.get_with_retry_bearer(&plain_url, bearer).await?;
    if !response.status().is_success() {
        return Err(GooError::new(
            ErrorKind::Network,
            format!("failed to fetch index from '{base_url}': HTTP {}", response.status()),
        ));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GooError::wrap(ErrorKind::Network, "failed to read index body", e.into()))?;
    decode_index_body(&bytes, false)
}

/// Fetches (or reads from a fresh cache) the index for every `(url,
/// priority)` source, returning the resolver's complete view.
pub async fn available_versions(
    client: &HttpClient,
    sources: &[(String, i64)],
    cache_dir: &Path,
    cache_life: Duration,
) -> RepoMap {
    let mut repo_map = RepoMap::new();
    for (source_url, priority) in sources {
        let (bearer, fetch_url) = strip_oauth_prefix(source_url);
        let fetch_url = if is_object_store_url(fetch_url) {
            object_store_to_http(fetch_url)
        } else {
            fetch_url.to_string()
        };
        let key = cache_key(fetch_url.as_str());
        let cache_file = cache_dir.join(format!("{key}.rs"));

        let specs = if cache_is_fresh(&cache_file, cache_life) {
            match read_cache(&cache_file) {
                Ok(specs) => specs,
                Err(e) => {
                    log::warn!("index cache for '{source_url}' is corrupt, re-fetching: {e}");
                    match fetch_index(client, &fetch_url, bearer.as_deref()).await {
                        Ok(specs) => {
                            let _ = write_cache(cache_dir, &key, source_url, &specs);
                            specs
                        }
                        Err(e) => {
                            log::warn!("failed to fetch index for '{source_url}': {e}");
                            continue;
                        }
                    }
                }
            }
        } else {
            match fetch_index(client, &fetch_url, bearer.as_deref()).await {
                Ok(specs) => {
                    let _ = write_cache(cache_dir, &key, source_url, &specs);
                    specs
                }
                Err(e) => {
                    log::warn!("failed to fetch index for '{source_url}': {e}");
                    if cache_file.exists() {
                        match read_cache(&cache_file) {
                            Ok(specs) => specs,
                            Err(_) => continue,
                        }
                    } else {
                        continue;
                    }
                }
            }
        };

        repo_map.insert(
            source_url.clone(),
            Repo {
                priority: *priority,
                specs,
            },
        );
    }
    repo_map
}

fn arch_matches(wanted: &str, candidate: &str) -> bool {
    wanted.is_empty() || wanted == candidate
}

/// `find_repo_latest`: selects `(version, repo_url, arch)` per spec §4.3.
pub fn find_repo_latest<'a>(
    pi: &PackageInfo,
    repo_map: &'a RepoMap,
    archs: &[String],
) -> Result<(Version, &'a str, SmolStr), GooError> {
    let arch_candidates: Vec<String> = if !pi.arch.is_empty() {
        vec![pi.arch.to_string()]
    } else {
        archs.to_vec()
    };

    for arch in &arch_candidates {
        let mut best: Option<(i64, Version, &str)> = None;
        for (repo_url, repo) in repo_map {
            for spec in &repo.specs {
                if spec.spec.identity.name != pi.name {
                    continue;
                }
                if !arch_matches(arch, spec.spec.identity.arch.as_str()) {
                    continue;
                }
                let Ok(ver) = version::parse(spec.spec.identity.ver.as_str()) else {
                    continue;
                };
                let candidate = (repo.priority, ver, repo_url.as_str());
                best = Some(match best {
                    None => candidate,
                    Some(current) => {
                        match version::compare_priority_version(
                            (candidate.0, &candidate.1),
                            (current.0, &current.1),
                        ) {
                            Ordering::Greater => candidate,
                            _ => current,
                        }
                    }
                });
            }
        }
        if let Some((_, ver, repo_url)) = best {
            return Ok((ver, repo_url, SmolStr::from(arch.as_str())));
        }
        // Only the first arch that yields any candidate is considered, per spec:
        // but we keep scanning arch_candidates since this arch had none.
    }

    let suffix = if pi.arch.is_empty() {
        String::new()
    } else {
        format!(".{}", pi.arch)
    };
    Err(GooError::resolve(format!(
        "no versions of package {}{suffix} found in any repo",
        pi.name
    )))
}

/// Returns the repo URL of the unique exact `(name, arch, version)` match.
pub fn what_repo(pi: &PackageInfo, repo_map: &RepoMap) -> Result<String, GooError> {
    for (repo_url, repo) in repo_map {
        for spec in &repo.specs {
            if spec.spec.identity.name == pi.name
                && spec.spec.identity.arch == pi.arch
                && spec.spec.identity.ver == pi.ver
            {
                return Ok(repo_url.clone());
            }
        }
    }
    Err(GooError::resolve(format!("no repo has {pi} installed")))
}

/// Returns the `RepoSpec` matching `pi`'s identity within a single repo.
pub fn find_repo_spec<'a>(pi: &PackageInfo, repo: &'a Repo) -> Result<&'a RepoSpec, GooError> {
    repo.specs
        .iter()
        .find(|spec| {
            spec.spec.identity.name == pi.name
                && spec.spec.identity.arch == pi.arch
                && spec.spec.identity.ver == pi.ver
        })
        .ok_or_else(|| GooError::resolve(format!("{pi} not found in repo")))
}

/// Resolves `RepoSpec.Source` (relative) against `repo`'s base URL.
pub fn download_url(repo_base: &str, source: &str) -> String {
    format!("{}/{}", repo_base.trim_end_matches('/'), source.trim_start_matches('/'))
}

pub fn cache_key_for(url: &str) -> PathBuf {
    PathBuf::from(cache_key(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PackageSpec;

    fn spec(name: &str, arch: &str, ver: &str) -> RepoSpec {
        let mut s = PackageSpec::default();
        s.identity = PackageInfo::new(name, arch, ver);
        RepoSpec {
            spec: s,
            source: "pkg.goo".into(),
            checksum: "abc".into(),
        }
    }

    fn map_with(entries: Vec<(&str, i64, Vec<RepoSpec>)>) -> RepoMap {
        entries
            .into_iter()
            .map(|(url, priority, specs)| (url.to_string(), Repo { priority, specs }))
            .collect()
    }

    #[test]
    fn higher_priority_wins_regardless_of_version() {
        let repo_map = map_with(vec![
            ("A", 1500, vec![spec("pkg", "noarch", "1.0.0")]),
            ("B", 500, vec![spec("pkg", "noarch", "2.0.0")]),
        ]);
        let pi = PackageInfo::new("pkg", "", "");
        let (ver, repo, _) = find_repo_latest(&pi, &repo_map, &["noarch".into()]).unwrap();
        assert_eq!(repo, "A");
        assert_eq!(ver.as_str(), "1.0.0");
    }

    #[test]
    fn equal_priority_picks_higher_version() {
        let repo_map = map_with(vec![
            ("A", 500, vec![spec("pkg", "noarch", "1.0.0")]),
            ("B", 500, vec![spec("pkg", "noarch", "2.0.0")]),
        ]);
        let pi = PackageInfo::new("pkg", "", "");
        let (ver, repo, _) = find_repo_latest(&pi, &repo_map, &["noarch".into()]).unwrap();
        assert_eq!(repo, "B");
        assert_eq!(ver.as_str(), "2.0.0");
    }

    #[test]
    fn missing_package_errors() {
        let repo_map = map_with(vec![("A", 500, vec![spec("other", "noarch", "1.0.0")])]);
        let pi = PackageInfo::new("pkg", "", "");
        assert!(find_repo_latest(&pi, &repo_map, &["noarch".into()]).is_err());
    }

    #[test]
    fn object_store_url_translates_to_https() {
        assert_eq!(
            object_store_to_http("gs://my-bucket/repo"),
            "https://storage.googleapis.com/my-bucket/repo"
        );
    }
}
