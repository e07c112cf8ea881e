//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`], [`validate`], or [`health`]. Each
//! handler lives in its own submodule.

pub mod health;
pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::SwitchyardError;

pub async fn dispatch(cli: Cli) -> Result<(), SwitchyardError> {
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
        "\n  switchyard v{version}: host- and path-based ingress edge proxy\n\n  \
         No command provided. To get started:\n\n    \
         switchyard run -m ingresses.yaml     Route from a manifest file\n    \
         switchyard validate ingresses.yaml   Check a manifest and list its routes\n    \
         switchyard --help                    See all commands and options\n"
    );
}
