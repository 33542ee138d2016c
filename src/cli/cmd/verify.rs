use crate::archive::PackageInfo;
use crate::cli::Context;
use crate::error::{ErrorKind, GooError};
use crate::installer;

pub const CMD: &str = "verify";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("Verify installed package(s) against their tracked file manifest")
        .arg(clap::Arg::new("package").help("Optional package; verifies everything installed if omitted"))
        .arg(
            clap::Arg::new("reinstall")
                .long("reinstall")
                .action(clap::ArgAction::SetTrue)
                .help("Reinstall each target instead of just checking its manifest"),
        )
        .arg(
            clap::Arg::new("redownload")
                .long("redownload")
                .action(clap::ArgAction::SetTrue)
                .help("With -reinstall, force a fresh download even if a matching cached archive exists"),
        )
}

/// True when this invocation mutates installed state (`-reinstall`), used by
/// `cli::is_mutating` to decide whether the lock needs to be held.
pub fn is_mutating(args: &clap::ArgMatches) -> bool {
    args.get_flag("reinstall")
}

pub async fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let reinstall = args.get_flag("reinstall");
    let redownload = args.get_flag("redownload");
    if redownload && !reinstall {
        return Err(GooError::new(ErrorKind::Usage, "-redownload requires -reinstall"));
    }

    let targets: Vec<PackageInfo> = match args.get_one::<String>("package") {
        Some(raw) => vec![crate::cli::parse_pkg_arg(raw)],
        None => ctx
            .db
            .fetch_all(None)?
            .into_iter()
            .map(|row| PackageInfo::new(row.name().clone(), row.arch().clone(), row.version().clone()))
            .collect(),
    };

    if reinstall {
        return run_reinstall(ctx, &targets, redownload).await;
    }

    let mut failures = 0;
    for pi in &targets {
        match installer::verify(pi, &ctx.paths, ctx.driver.as_ref(), &ctx.db).await {
            Ok(()) => println!("{pi}: OK"),
            Err(e) => {
                println!("{pi}: FAILED ({e})");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(GooError::invariant(format!("{failures} package(s) failed verification")));
    }
    Ok(())
}

async fn run_reinstall(ctx: &Context, targets: &[PackageInfo], redownload: bool) -> Result<(), GooError> {
    let repo_map = ctx.load_repo_map().await?;
    for pi in targets {
        if redownload {
            let cache_path = installer::cache_archive_path(&ctx.paths, pi);
            match std::fs::remove_file(&cache_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(GooError::wrap(
                        ErrorKind::Filesystem,
                        format!("failed to remove cached archive '{}'", cache_path.display()),
                        e.into(),
                    ))
                }
            }
        }
        installer::reinstall(pi, &repo_map, &ctx.paths, &ctx.http, ctx.driver.as_ref(), &ctx.db).await?;
        println!("reinstalled {pi}");
    }
    Ok(())
}
