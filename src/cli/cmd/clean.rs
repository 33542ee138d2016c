use std::collections::HashSet;

use crate::cli::Context;
use crate::error::GooError;

pub const CMD: &str = "clean";

pub fn command() -> clap::Command {
    clap::Command::new(CMD).about("Remove cached archives and unpack directories with no installed package")
}

pub fn run(ctx: &Context) -> Result<(), GooError> {
    let live: HashSet<(String, String)> = ctx
        .db
        .fetch_all(None)?
        .into_iter()
        .map(|row| (row.name().to_string(), row.arch().to_string()))
        .collect();

    let mut removed = 0;

    if let Ok(entries) = std::fs::read_dir(&ctx.paths.cache_dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let mut parts = stem.splitn(3, '.');
            let (Some(name), Some(arch)) = (parts.next(), parts.next()) else { continue };
            if !live.contains(&(name.to_string(), arch.to_string())) {
                let _ = std::fs::remove_file(&path);
                removed += 1;
            }
        }
    }

    let unpack_root = ctx.paths.cache_dir.join("unpack");
    if let Ok(entries) = std::fs::read_dir(&unpack_root) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(stem) = path.file_name().and_then(|s| s.to_str()) else { continue };
            let Some((name, arch)) = stem.split_once('.') else { continue };
            if !live.contains(&(name.to_string(), arch.to_string())) {
                let _ = std::fs::remove_dir_all(&path);
                removed += 1;
            }
        }
    }

    println!("removed {removed} stale cache entr{}", if removed == 1 { "y" } else { "ies" });
    Ok(())
}
