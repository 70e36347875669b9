use clap::Parser;
use cobol_bridge::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    cobol_bridge::cli::run(Cli::parse()).await
}
