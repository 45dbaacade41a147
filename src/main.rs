use clap::Parser;
use thales::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
