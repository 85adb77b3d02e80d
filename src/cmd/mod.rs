//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`], [`validate`], or [`health`]. Each handler
//! lives in its own submodule.

pub mod health;
pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::TeeError;

pub async fn dispatch(cli: Cli) -> Result<(), TeeError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Validate(ref args)) => validate::execute(args),
        Some(Commands::Health(args)) => health::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  teeproxy v{version}: HTTP traffic-mirroring reverse proxy\n\n  \
         No command provided. To get started:\n\n    \
         teeproxy run -a localhost:8080 -b localhost:8081    Mirror :8888 to both backends\n    \
         teeproxy run -c teeproxy.yaml                       Start from a config file\n    \
         teeproxy validate teeproxy.yaml                     Check a config file\n    \
         teeproxy --help                                     See all commands and options\n"
    );
}
