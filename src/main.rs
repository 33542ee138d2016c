use std::path::PathBuf;

use anyhow::Context as _;
use googet::cli::{self, Context, GooGetApp};
use googet::error::ErrorKind;
use googet::GooError;
use log::LevelFilter;

/// Rotates `<root>/googet.log` to `.old` once it crosses 10 MiB.
fn rotate_log_if_large(log_path: &std::path::Path) {
    let Ok(meta) = std::fs::metadata(log_path) else { return };
    if meta.len() > 10 * 1024 * 1024 {
        let _ = std::fs::rename(log_path, log_path.with_extension("log.old"));
    }
}

/// Every non-success exit is flat code `1` (usage error or operational
/// failure alike); `ErrorKind` is used for logging, not for exit status.
fn exit_code_for(_kind: ErrorKind) -> i32 {
    1
}

fn main() {
    let matches = GooGetApp::new().get_matches();
    let verbose = matches.get_flag("verbose");
    let root_flag = matches.get_one::<PathBuf>("root").cloned();

    stderrlog::new()
        .module(module_path!())
        .verbosity(if verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init()
        .expect("failed to initialize logger");

    let r = (|| -> anyhow::Result<()> {
        let ctx = Context::load(root_flag)?;
        rotate_log_if_large(&ctx.paths.log_path);

        ctrlc::set_handler(move || {
            googet::set_cancelled();
        })
        .context("failed to set Ctrl-C handler")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        let (subcmd, args) = matches.subcommand().context("no subcommand given")?;
        let subcmd = subcmd.to_string();

        let outcome = runtime.block_on(googet::CancellableFuture::new(async {
            if cli::is_mutating(&subcmd, args) {
                let guard = googet::lock::obtain_lock(&ctx.paths.lock_path, ctx.lock_max_age)?;
                let result = cli::dispatch(&ctx, &subcmd, args).await;
                guard.release()?;
                result
            } else {
                cli::dispatch(&ctx, &subcmd, args).await
            }
        }));

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(anyhow::Error::new(e)),
            None => {
                log::info!("cancelled");
                Ok(())
            }
        }
    })();

    if let Err(e) = r {
        log::error!("{e}");
        let kind = e.downcast_ref::<GooError>().map(|g| g.kind()).unwrap_or_else(|| googet::error::classify(&e));
        std::process::exit(exit_code_for(kind));
    }
}
