use crate::archive::{self, PackageInfo};
use crate::cli::Context;
use crate::error::{ErrorKind, GooError};
use crate::repo;

pub const CMD: &str = "download";

pub fn command() -> clap::Command {
    clap::Command::new(CMD)
        .about("Download a package archive without installing it")
        .arg(super::pkg_arg())
        .arg(clap::Arg::new("dest").required(true).help("Destination file path"))
}

pub async fn run(ctx: &Context, args: &clap::ArgMatches) -> Result<(), GooError> {
    let pi = crate::cli::parse_pkg_arg(args.get_one::<String>("package").unwrap());
    let dest = args.get_one::<String>("dest").unwrap();
    let repo_map = ctx.load_repo_map().await?;

    let (target_pi, repo_url) = if pi.ver.is_empty() {
        let (ver, repo_url, arch) = repo::find_repo_latest(&pi, &repo_map, &ctx.archs)?;
        (PackageInfo::new(pi.name.clone(), arch, ver.as_str()), repo_url.to_string())
    } else {
        (pi.clone(), repo::what_repo(&pi, &repo_map)?)
    };

    let repo = repo_map
        .get(&repo_url)
        .ok_or_else(|| GooError::resolve("repo vanished from index between lookup and download"))?;
    let repo_spec = repo::find_repo_spec(&target_pi, repo)?;
    let url = repo::download_url(&repo_url, &repo_spec.source);

    let response = ctx.http.get_with_retry(&url).await?;
    if !response.status().is_success() {
        return Err(GooError::new(ErrorKind::Network, format!("failed to download '{url}': HTTP {}", response.status())));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GooError::wrap(ErrorKind::Network, "failed to read archive body", e.into()))?;

    let actual = archive::checksum_bytes(&bytes);
    if actual != repo_spec.checksum.as_str() {
        return Err(GooError::checksum(format!(
            "checksum mismatch for {target_pi}: expected {}, got {actual}",
            repo_spec.checksum
        )));
    }

    std::fs::write(dest, &bytes).map_err(|e| GooError::wrap(ErrorKind::Filesystem, format!("failed to write '{dest}'"), e.into()))?;
    println!("downloaded {target_pi} -> {dest}");
    Ok(())
}
