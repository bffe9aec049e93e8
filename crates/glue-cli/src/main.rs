mod cli;
mod filter;
mod run;

use std::process::ExitCode;

use anyhow::Result;

use crate::cli::Command;

fn main() -> Result<ExitCode> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Check(args) => run::check(args),
        Command::Render(args) => run::render(args),
    }
}
