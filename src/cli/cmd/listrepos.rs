use crate::cli::Context;
use crate::config;
use crate::error::GooError;

pub const CMD: &str = "listrepos";

pub fn command() -> clap::Command {
    clap::Command::new(CMD).about("List configured repo sources")
}

pub fn run(ctx: &Context) -> Result<(), GooError> {
    for (url, priority) in config::load_repo_sources(&ctx.paths, ctx.allow_unsafe_url)? {
        println!("{url} (priority {priority})");
    }
    Ok(())
}
