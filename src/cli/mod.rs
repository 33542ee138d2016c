//! CLI surface: one `clap::Command` per subcommand, each exposing a paired
//! `command()` builder and `run()` dispatcher, assembled into a single
//! `GooGetApp`.

pub mod cmd;

use std::path::PathBuf;

use crate::config::{load_config, HttpClient, Paths};
use crate::error::{ErrorKind, GooError};
use crate::platform::PlatformDriver;
use crate::repo::RepoMap;
use crate::state_db::StateDb;

/// Shared handles every subcommand's `run()` receives. Built once in `main`.
pub struct Context {
    pub paths: Paths,
    pub archs: Vec<String>,
    pub allow_unsafe_url: bool,
    pub cache_life: std::time::Duration,
    pub lock_max_age: std::time::Duration,
    pub http: HttpClient,
    pub db: StateDb,
    pub driver: Box<dyn PlatformDriver>,
}

impl Context {
    pub fn load(root_flag: Option<PathBuf>) -> Result<Self, GooError> {
        let loaded = load_config(root_flag)?;
        let archs = if loaded.config.archs.is_empty() {
            crate::config::default_archs()
        } else {
            loaded.config.archs.clone()
        };
        let http = HttpClient::new(loaded.config.proxyserver.as_deref())?;
        let db = StateDb::new(&loaded.paths.db_path)?;
        let driver = crate::platform::default_driver();
        Ok(Context {
            cache_life: loaded.config.cache_life(),
            lock_max_age: loaded.config.lock_max_age(),
            allow_unsafe_url: loaded.config.allowunsafeurl,
            paths: loaded.paths,
            archs,
            http,
            db,
            driver,
        })
    }

    /// Loads the combined repo index (spec §4.3), fetching/caching every
    /// configured source.
    pub async fn load_repo_map(&self) -> Result<RepoMap, GooError> {
        let sources = crate::config::load_repo_sources(&self.paths, self.allow_unsafe_url)?;
        Ok(crate::repo::available_versions(&self.http, &sources, &self.paths.cache_dir, self.cache_life).await)
    }
}

pub struct GooGetApp {
    cmd: clap::Command,
}

impl GooGetApp {
    pub fn new() -> Self {
        GooGetApp {
            cmd: clap::Command::new("googet")
                .about("GooGet package manager")
                .version("0.1.0")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .arg(
                    clap::Arg::new("root")
                        .long("root")
                        .help("Override the GooGetRoot directory")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    clap::Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(clap::ArgAction::SetTrue)
                        .help("Enable debug-level logging"),
                )
                .subcommand(cmd::install::command())
                .subcommand(cmd::remove::command())
                .subcommand(cmd::update::command())
                .subcommand(cmd::reinstall::command())
                .subcommand(cmd::verify::command())
                .subcommand(cmd::installed::command())
                .subcommand(cmd::available::command())
                .subcommand(cmd::listrepos::command())
                .subcommand(cmd::addrepo::command())
                .subcommand(cmd::rmrepo::command())
                .subcommand(cmd::clean::command())
                .subcommand(cmd::download::command()),
        }
    }

    /// Parses argv, returning the matched root/verbose flags plus the
    /// selected subcommand's name and its own `ArgMatches`.
    pub fn get_matches(self) -> clap::ArgMatches {
        self.cmd.get_matches()
    }
}

impl Default for GooGetApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a subcommand invocation mutates installed state and therefore
/// needs the lock held around it (spec §5: read-only commands run
/// lock-free). `verify` is only mutating when invoked as `verify -reinstall`.
pub fn is_mutating(subcmd: &str, args: &clap::ArgMatches) -> bool {
    match subcmd {
        cmd::install::CMD | cmd::remove::CMD | cmd::update::CMD | cmd::reinstall::CMD | cmd::addrepo::CMD | cmd::rmrepo::CMD | cmd::clean::CMD => true,
        cmd::verify::CMD => cmd::verify::is_mutating(args),
        _ => false,
    }
}

pub async fn dispatch(ctx: &Context, subcmd: &str, args: &clap::ArgMatches) -> Result<(), GooError> {
    match subcmd {
        cmd::install::CMD => cmd::install::run(ctx, args).await,
        cmd::remove::CMD => cmd::remove::run(ctx, args).await,
        cmd::update::CMD => cmd::update::run(ctx, args).await,
        cmd::reinstall::CMD => cmd::reinstall::run(ctx, args).await,
        cmd::verify::CMD => cmd::verify::run(ctx, args).await,
        cmd::installed::CMD => cmd::installed::run(ctx, args),
        cmd::available::CMD => cmd::available::run(ctx, args).await,
        cmd::listrepos::CMD => cmd::listrepos::run(ctx),
        cmd::addrepo::CMD => cmd::addrepo::run(ctx, args),
        cmd::rmrepo::CMD => cmd::rmrepo::run(ctx, args),
        cmd::clean::CMD => cmd::clean::run(ctx),
        cmd::download::CMD => cmd::download::run(ctx, args).await,
        other => Err(GooError::new(ErrorKind::Usage, format!("unknown subcommand '{other}'"))),
    }
}

/// Parses `name[.arch][@ver]` as accepted on the command line for package
/// identifiers (spec §5's CLI argument grammar).
pub fn parse_pkg_arg(raw: &str) -> crate::archive::PackageInfo {
    let (name_arch, ver) = match raw.split_once('@') {
        Some((n, v)) => (n, v),
        None => (raw, ""),
    };
    let (name, arch) = match name_arch.split_once('.') {
        Some((n, a)) => (n, a),
        None => (name_arch, ""),
    };
    crate::archive::PackageInfo::new(name, arch, ver)
}
