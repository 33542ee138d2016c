use crate::cli::Context;
use crate::error::{ErrorKind, GooError};

pub const CMD: &str = "rmrepo";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("Remove a repo source")
        .arg(clap::Arg::new("name").required(true))
}

pub fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let name = args.get_one::<String>("name").unwrap();
    let path = ctx.paths.repos_dir.join(format!("{name}.repo"));
    match std::fs::remove_file(&path) {
        Ok(()) => {
            println!("removed repo '{name}'");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(GooError::resolve(format!("no repo named '{name}'"))),
        Err(e) => Err(GooError::wrap(ErrorKind::Filesystem, "failed to remove repo file", e.into())),
    }
}
