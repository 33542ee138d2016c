use crate::cli::Context;
use crate::error::GooError;
use crate::{installer, resolver};

pub const CMD: &str = "remove";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("Remove an installed package and anything that depends on it")
        .arg(super::pkg_arg())
}

pub async fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let pi = crate::cli::parse_pkg_arg(args.get_one::<String>("package").unwrap());
    let (_, order) = resolver::enumerate_deps(&pi, &ctx.db)?;
    for p in &order {
        installer::remove(p, &ctx.paths, ctx.driver.as_ref(), &ctx.db).await?;
        println!("removed {p}");
    }
    Ok(())
}
