use std::path::Path;

use crate::archive::PackageInfo;
use crate::cli::Context;
use crate::error::GooError;
use crate::{installer, repo, resolver};

pub const CMD: &str = "install";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("Install a package, or a local .goo archive")
        .arg(super::pkg_arg())
}

pub async fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let raw = args.get_one::<String>("package").unwrap();

    if raw.ends_with(".goo") && Path::new(raw).is_file() {
        installer::install_from_local_file(Path::new(raw), &ctx.paths, ctx.driver.as_ref(), &ctx.db).await?;
        println!("installed from {raw}");
        return Ok(());
    }

    let pi = crate::cli::parse_pkg_arg(raw);
    let repo_map = ctx.load_repo_map().await?;

    let (target_pi, repo_url) = if pi.ver.is_empty() {
        let (ver, repo_url, arch) = repo::find_repo_latest(&pi, &repo_map, &ctx.archs)?;
        (PackageInfo::new(pi.name.clone(), arch, ver.as_str()), repo_url.to_string())
    } else {
        (pi.clone(), repo::what_repo(&pi, &repo_map)?)
    };

    if !resolver::needs_installation(&target_pi, &ctx.db)? {
        println!("{target_pi} is already installed");
        return Ok(());
    }

    let repo = repo_map
        .get(&repo_url)
        .ok_or_else(|| GooError::resolve("repo vanished from index between lookup and install"))?;
    let repo_spec = repo::find_repo_spec(&target_pi, repo)?;

    let plan = resolver::resolve_install(&repo_spec.spec, &repo_map, &ctx.archs, &ctx.db)?;
    installer::execute_plan(&plan, &repo_map, &ctx.paths, &ctx.http, ctx.driver.as_ref(), &ctx.db).await?;
    println!("installed {target_pi}");
    Ok(())
}
