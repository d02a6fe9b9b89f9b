//! `grc-migrate` binary.

use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use grc_migrate::cli::{self, Cli};
use grc_migrate_core::MigrationError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_filter())).init();

    match cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Migration errors already carry their causes in their message.
            match e.downcast_ref::<MigrationError>() {
                Some(migration) => eprintln!("Error: {migration}"),
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
