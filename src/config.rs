//! Ambient configuration: `<root>/googet.conf`, `<root>/repos/*.repo`, path
//! layout, and the HTTP client — a load-or-default config reader paired with
//! a thin `reqwest` wrapper (`serde_yaml_ng` for both config and repo
//! documents), sized to googet's proxy/timeout/retry requirements.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::{ErrorKind, GooError};
use crate::version::priority;

pub const ROOT_ENV: &str = "GooGetRoot";
pub const OAUTH_PREFIX: &str = "oauth-";

fn default_cache_life() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_lock_max_age() -> Duration {
    Duration::from_secs(10 * 60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub archs: Vec<String>,
    #[serde(default, with = "humantime_duration_opt")]
    pub cachelife: Option<Duration>,
    #[serde(default, with = "humantime_duration_opt")]
    pub lockfilemaxage: Option<Duration>,
    #[serde(default)]
    pub proxyserver: Option<String>,
    #[serde(default)]
    pub allowunsafeurl: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            archs: Vec::new(),
            cachelife: None,
            lockfilemaxage: None,
            proxyserver: None,
            allowunsafeurl: false,
        }
    }
}

impl Config {
    pub fn cache_life(&self) -> Duration {
        self.cachelife.unwrap_or_else(default_cache_life)
    }

    pub fn lock_max_age(&self) -> Duration {
        self.lockfilemaxage.unwrap_or_else(default_lock_max_age)
    }
}

/// Minimal `humantime`-free duration decoder: accepts plain seconds as an
/// integer or a Go-style `"1h30m"` string. Kept dependency-free since the
/// teacher doesn't otherwise need a duration crate.
mod humantime_duration_opt {
    use super::*;
    use serde::Deserializer;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Seconds(u64),
            Text(String),
        }

        let repr: Option<Repr> = Option::deserialize(deserializer)?;
        match repr {
            None => Ok(None),
            Some(Repr::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
            Some(Repr::Text(text)) => parse_go_duration(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }

    pub fn parse_go_duration(text: &str) -> Result<Duration, String> {
        let mut total = Duration::ZERO;
        let mut number = String::new();
        for ch in text.chars() {
            if ch.is_ascii_digit() || ch == '.' {
                number.push(ch);
            } else {
                let value: f64 = number
                    .parse()
                    .map_err(|_| format!("malformed duration '{text}'"))?;
                number.clear();
                let unit_secs = match ch {
                    's' => 1.0,
                    'm' => 60.0,
                    'h' => 3600.0,
                    'd' => 86400.0,
                    other => return Err(format!("unknown duration unit '{other}' in '{text}'")),
                };
                total += Duration::from_secs_f64(value * unit_secs);
            }
        }
        if !number.trim().is_empty() {
            return Err(format!("malformed duration '{text}'"));
        }
        Ok(total)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PriorityRepr {
    Int(i64),
    Named(String),
}

impl PriorityRepr {
    fn resolve(&self) -> Result<i64, GooError> {
        match self {
            PriorityRepr::Int(i) => Ok(*i),
            PriorityRepr::Named(name) => match name.to_ascii_lowercase().as_str() {
                "default" => Ok(priority::DEFAULT),
                "canary" => Ok(priority::CANARY),
                "pin" => Ok(priority::PIN),
                "rollback" => Ok(priority::ROLLBACK),
                other => Err(GooError::new(
                    ErrorKind::Config,
                    format!("unknown priority band '{other}'"),
                )),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoEntry {
    pub name: SmolStr,
    pub url: String,
    #[serde(default)]
    pub useoauth: bool,
    #[serde(default)]
    priority: Option<PriorityRepr>,
}

impl RepoEntry {
    pub fn priority(&self) -> Result<i64, GooError> {
        match &self.priority {
            Some(p) => p.resolve(),
            None => Ok(priority::DEFAULT),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RepoDocument {
    One(RepoEntry),
    Many(Vec<RepoEntry>),
}

fn is_safe_url(url: &str, allow_unsafe: bool) -> bool {
    if allow_unsafe {
        return true;
    }
    url.starts_with("https://") || url.starts_with("gs://")
}

/// Reads every `<root>/repos/*.repo` file into an ordered `url -> priority`
/// source list, applying the `oauth-` URL prefix convention when
/// `useoauth: true` (spec §6).
pub fn load_repo_sources(paths: &Paths, allow_unsafe: bool) -> Result<Vec<(String, i64)>, GooError> {
    let mut sources = Vec::new();
    let entries = match std::fs::read_dir(&paths.repos_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sources),
        Err(e) => return Err(GooError::wrap(ErrorKind::Config, "failed to read repos dir", e.into())),
    };

    let mut repo_files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("repo"))
        .collect();
    repo_files.sort();

    for file in repo_files {
        let text = std::fs::read_to_string(&file)
            .map_err(|e| GooError::wrap(ErrorKind::Config, format!("failed to read {}", file.display()), e.into()))?;
        let doc: RepoDocument = serde_yaml_ng::from_str(&text)
            .map_err(|e| GooError::wrap(ErrorKind::Config, format!("malformed repo file {}", file.display()), e.into()))?;
        let entries = match doc {
            RepoDocument::One(entry) => vec![entry],
            RepoDocument::Many(entries) => entries,
        };
        for entry in entries {
            if !is_safe_url(&entry.url, allow_unsafe) {
                log::warn!("dropping unsafe repo url '{}' from {}", entry.url, file.display());
                continue;
            }
            let priority = entry.priority()?;
            let url = if entry.useoauth {
                format!("{OAUTH_PREFIX}{}", entry.url)
            } else {
                entry.url.clone()
            };
            sources.push((url, priority));
        }
    }
    Ok(sources)
}

#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    pub repos_dir: PathBuf,
    pub db_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub config_path: PathBuf,
}

impl Paths {
    pub fn new(root: PathBuf) -> Self {
        Paths {
            cache_dir: root.join("cache"),
            repos_dir: root.join("repos"),
            db_path: root.join("googet.db"),
            lock_path: root.join("googet.lock"),
            log_path: root.join("googet.log"),
            config_path: root.join("googet.conf"),
            root,
        }
    }
}

/// Resolves `<root>` from the `-root` flag override or the `GooGetRoot`
/// environment variable (spec §6).
pub fn resolve_root(root_flag: Option<PathBuf>) -> Result<PathBuf, GooError> {
    if let Some(root) = root_flag {
        return Ok(root);
    }
    std::env::var_os(ROOT_ENV)
        .map(PathBuf::from)
        .ok_or_else(|| GooError::new(ErrorKind::Config, format!("{ROOT_ENV} is not set and -root was not given")))
}

pub struct LoadedConfig {
    pub config: Config,
    pub paths: Paths,
}

pub fn load_config(root_flag: Option<PathBuf>) -> Result<LoadedConfig, GooError> {
    let root = resolve_root(root_flag)?;
    let paths = Paths::new(root);

    let config: Config = match std::fs::File::open(&paths.config_path) {
        Ok(file) => serde_yaml_ng::from_reader(file)
            .map_err(|e| GooError::wrap(ErrorKind::Config, "malformed googet.conf", e.into()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(GooError::wrap(ErrorKind::Config, "failed to read googet.conf", e.into())),
    };

    Ok(LoadedConfig { config, paths })
}

/// Default architectures to probe when a package request leaves `arch`
/// empty and `googet.conf` doesn't name any (falls back to the host's own
/// native arch via the platform driver in the CLI layer).
pub fn default_archs() -> Vec<String> {
    vec!["noarch".to_string()]
}

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Thin `reqwest` wrapper carrying the optional proxy and a fixed timeout
/// budget; retries once on transport error with no backoff.
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(proxy: Option<&str>) -> Result<Self, GooError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(DIAL_TIMEOUT)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .tcp_keepalive(DIAL_TIMEOUT);

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| GooError::wrap(ErrorKind::Config, "invalid proxy url", e.into()))?;
            builder = builder.proxy(proxy);
        }

        let inner = builder
            .build()
            .map_err(|e| GooError::wrap(ErrorKind::Network, "failed to build http client", e.into()))?;
        Ok(HttpClient { inner })
    }

    /// GETs `url`, retrying once (no backoff) on transport-level failure.
    pub async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, GooError> {
        self.get_with_retry_bearer(url, None).await
    }

    /// Same as `get_with_retry`, optionally attaching a bearer token to both
    /// the initial request and the retry.
    pub async fn get_with_retry_bearer(&self, url: &str, bearer: Option<&str>) -> Result<reqwest::Response, GooError> {
        let build = || {
            let req = self.inner.get(url);
            match bearer {
                Some(token) => req.bearer_auth(token),
                None => req,
            }
        };
        match build().send().await {
            Ok(resp) => Ok(resp),
            Err(first_err) => {
                log::warn!("transport error fetching '{url}', retrying once: {first_err}");
                build()
                    .send()
                    .await
                    .map_err(|e| GooError::wrap(ErrorKind::Network, format!("failed to fetch '{url}'"), e.into()))
            }
        }
    }
}

/// Strips the `oauth-` cache-keying prefix and returns `(bearer_token, url)`.
/// The token itself comes from the `GooGetOAuthToken` environment variable
/// rather than an OS credential store, since the ambient stack has no
/// keychain integration.
pub fn strip_oauth_prefix(url: &str) -> (Option<String>, &str) {
    match url.strip_prefix(OAUTH_PREFIX) {
        Some(rest) => (std::env::var("GooGetOAuthToken").ok(), rest),
        None => (None, url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_prefix_is_stripped_for_fetch_and_cache_key() {
        let (token, url) = strip_oauth_prefix("oauth-https://example.test/repo");
        assert_eq!(url, "https://example.test/repo");
        let _ = token;
    }

    #[test]
    fn unsafe_url_dropped_unless_allowed() {
        assert!(!is_safe_url("http://example.test", false));
        assert!(is_safe_url("http://example.test", true));
        assert!(is_safe_url("https://example.test", false));
        assert!(is_safe_url("gs://bucket/prefix", false));
    }

    #[test]
    fn go_duration_parses() {
        let d = humantime_duration_opt::parse_go_duration("1h30m").unwrap();
        assert_eq!(d, Duration::from_secs(5400));
    }
}
