use crate::cli::Context;
use crate::error::GooError;

pub const CMD: &str = "available";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("List a package's versions across every configured repo")
        .arg(super::pkg_arg())
}

pub async fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let pi = crate::cli::parse_pkg_arg(args.get_one::<String>("package").unwrap());
    let repo_map = ctx.load_repo_map().await?;

    let mut rows: Vec<(String, String, i64)> = Vec::new();
    for repo in repo_map.values() {
        for spec in &repo.specs {
            if spec.spec.identity.name == pi.name {
                rows.push((spec.spec.identity.arch.to_string(), spec.spec.identity.ver.to_string(), repo.priority));
            }
        }
    }

    if rows.is_empty() {
        return Err(GooError::resolve(format!("no versions of {} found in any repo", pi.name)));
    }

    rows.sort();
    for (arch, ver, priority) in rows {
        println!("{}.{arch} {ver} (priority {priority})", pi.name);
    }
    Ok(())
}
