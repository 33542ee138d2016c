use crate::cli::Context;
use crate::error::{ErrorKind, GooError};

pub const CMD: &str = "addrepo";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("Add a repo source as <root>/repos/<name>.repo")
        .arg(clap::Arg::new("name").required(true))
        .arg(clap::Arg::new("url").required(true))
        .arg(clap::Arg::new("priority").long("priority").help("Priority band name (default/canary/pin/rollback) or integer"))
        .arg(
            clap::Arg::new("oauth")
                .long("oauth")
                .action(clap::ArgAction::SetTrue)
                .help("Fetch this repo's index with an OAuth bearer token"),
        )
}

pub fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let name = args.get_one::<String>("name").unwrap();
    let url = args.get_one::<String>("url").unwrap();
    let priority = args.get_one::<String>("priority");
    let oauth = args.get_flag("oauth");

    std::fs::create_dir_all(&ctx.paths.repos_dir)
        .map_err(|e| GooError::wrap(ErrorKind::Filesystem, "failed to create repos dir", e.into()))?;

    let mut doc = format!("name: {name}\nurl: {url}\n");
    if oauth {
        doc.push_str("useoauth: true\n");
    }
    if let Some(priority) = priority {
        doc.push_str(&format!("priority: {priority}\n"));
    }

    let path = ctx.paths.repos_dir.join(format!("{name}.repo"));
    std::fs::write(&path, doc).map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to write '{}'", path.display()), e.into()))?;
    println!("added repo '{name}' -> {url}");
    Ok(())
}
