use crate::archive::PackageInfo;
use crate::cli::Context;
use crate::error::GooError;
use crate::{installer, repo, resolver};

pub const CMD: &str = "update";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("Update installed packages to their best available version")
        .arg(
            clap::Arg::new("package")
                .num_args(0..)
                .help("Packages to update; updates everything installed if omitted"),
        )
}

pub async fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let repo_map = ctx.load_repo_map().await?;
    let requested: Vec<String> = args
        .get_many::<String>("package")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();

    let targets: Vec<PackageInfo> = if requested.is_empty() {
        ctx.db
            .fetch_all(None)?
            .into_iter()
            .map(|row| PackageInfo::new(row.name().clone(), row.arch().clone(), row.version().clone()))
            .collect()
    } else {
        requested.iter().map(|r| crate::cli::parse_pkg_arg(r)).collect()
    };

    let mut updated = 0;
    for pi in targets {
        let (ver, repo_url, arch) = match repo::find_repo_latest(&pi, &repo_map, &ctx.archs) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("skipping {pi}: {e}");
                continue;
            }
        };
        let target_pi = PackageInfo::new(pi.name.clone(), arch, ver.as_str());
        if !resolver::needs_installation(&target_pi, &ctx.db)? {
            continue;
        }

        let repo = repo_map
            .get(repo_url)
            .ok_or_else(|| GooError::resolve("repo vanished from index between lookup and update"))?;
        let repo_spec = repo::find_repo_spec(&target_pi, repo)?;
        let plan = resolver::resolve_install(&repo_spec.spec, &repo_map, &ctx.archs, &ctx.db)?;
        installer::execute_plan(&plan, &repo_map, &ctx.paths, &ctx.http, ctx.driver.as_ref(), &ctx.db).await?;
        println!("updated {target_pi}");
        updated += 1;
    }

    if updated == 0 {
        println!("nothing to update");
    }
    Ok(())
}
