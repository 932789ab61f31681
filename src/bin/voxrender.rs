//! `voxrender` binary entry point.

use std::process::ExitCode;

use clap::Parser;
use voxrender::cli::{run, CliArgs};

fn main() -> ExitCode {
    voxrender::logger::init();
    run(CliArgs::parse())
}
