use crate::cli::Context;
use crate::error::GooError;

pub const CMD: &str = "installed";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("List installed packages")
        .arg(clap::Arg::new("filter").help("Optional name filter (SQL LIKE pattern, e.g. 'foo%')"))
}

pub fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let filter = args.get_one::<String>("filter").map(|s| s.as_str());
    for row in ctx.db.fetch_all(filter)? {
        println!("{}.{} {}", row.name(), row.arch(), row.version());
    }
    Ok(())
}
