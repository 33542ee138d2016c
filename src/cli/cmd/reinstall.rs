use crate::cli::Context;
use crate::error::GooError;
use crate::installer;

pub const CMD: &str = "reinstall";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("Reinstall the currently recorded version of a package")
        .arg(super::pkg_arg())
}

pub async fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let pi = crate::cli::parse_pkg_arg(args.get_one::<String>("package").unwrap());
    let repo_map = ctx.load_repo_map().await?;
    installer::reinstall(&pi, &repo_map, &ctx.paths, &ctx.http, ctx.driver.as_ref(), &ctx.db).await?;
    println!("reinstalled {pi}");
    Ok(())
}
