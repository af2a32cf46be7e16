//! wellsync CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use wellsync_core::{TracingConfig, init_tracing};

use wellsync_cli::cli::{Cli, Command, ConfigAction};
use wellsync_cli::commands::{self, Workspace};
use wellsync_cli::config::ClientConfig;
use wellsync_cli::error::{ClientError, ClientResult};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::cli(cli.debug)) {
        eprintln!("warning: logging disabled: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            e.exit_code()
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = if cli.config.is_some() {
        ClientConfig::load_from(&config_path)
    } else {
        ClientConfig::load()
    }
    .map_err(ClientError::Config)?;

    // Config commands run without building the connection.
    if let Command::Config { action } = cli.command {
        return match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config, &config_path),
        };
    }

    let workspace = Workspace::open(&config).await?;
    let result = match cli.command {
        Command::Connect { service } => commands::account::connect(&workspace, service).await,
        Command::Disconnect => commands::account::disconnect(&workspace),
        Command::Status { json } => commands::account::status(&workspace, json),
        Command::Calendars { select } => commands::account::calendars(&workspace, select).await,
        Command::Events { from, to, json } => {
            commands::calendar::events(&workspace, &config.display, from, to, json).await
        }
        Command::Push { provider } => commands::sync::push(&workspace, provider).await,
        Command::Pull { provider } => commands::sync::pull(&workspace, provider).await,
        Command::Check { provider } => commands::sync::check(&workspace, provider).await,
        Command::Save => commands::sync::save(&workspace).await,
        Command::Prefs {
            provider,
            mode,
            startup,
        } => commands::sync::prefs(&workspace, provider, mode, startup),
        Command::Config { .. } => Ok(()),
    };
    workspace.close().await;
    result
}
