//! One module per googet subcommand, each exposing `CMD`, `command()`, and
//! `run()`.

pub mod addrepo;
pub mod available;
pub mod clean;
pub mod download;
pub mod install;
pub mod installed;
pub mod listrepos;
pub mod reinstall;
pub mod remove;
pub mod rmrepo;
pub mod update;
pub mod verify;

pub fn pkg_arg() -> clap::Arg {
    clap::Arg::new("package")
        .required(true)
        .help("Package as name[.arch][@version]")
}
