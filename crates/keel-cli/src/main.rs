use std::path::PathBuf;

use clap::Parser;
use keel_client::{
    build_client_authentication, default_http_client, ClientOptions, RegistrationOptions,
    DEFAULT_HTTP_TIMEOUT,
};
use keel_keystore::{open_storage, StorageBackend, DEFAULT_KEYRING_SERVICE};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli_args;
mod commands;
mod config;

use crate::cli_args::{Cli, Command};
use crate::commands::{handle_login, handle_logout, handle_refresh, handle_status, CommandContext};
use crate::config::{default_storage_path, load_config, save_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let http = default_http_client(DEFAULT_HTTP_TIMEOUT, cli.insecure);
    let backend = if cli.keyring {
        StorageBackend::Keyring {
            service: DEFAULT_KEYRING_SERVICE.to_string(),
        }
    } else {
        let path = match cli.storage.as_deref() {
            Some(path) => PathBuf::from(path),
            None => default_storage_path()?,
        };
        StorageBackend::File(path)
    };
    debug!(event = "session_storage_selected", backend = ?backend);
    let auth = build_client_authentication(
        open_storage(&backend),
        http,
        ClientOptions {
            registration: RegistrationOptions {
                client_name: "keel-cli".to_string(),
                ..RegistrationOptions::default()
            },
        },
    );

    let mut config = load_config()?;
    let mut ctx = CommandContext {
        auth: &auth,
        allow_insecure: cli.insecure,
        config: &mut config,
    };
    match cli.command {
        Command::Login(args) => handle_login(args, &mut ctx).await?,
        Command::Refresh(args) => handle_refresh(args, &mut ctx).await?,
        Command::Status(args) => handle_status(args, &mut ctx).await?,
        Command::Logout(args) => handle_logout(args, &mut ctx).await?,
    }
    save_config(&config)?;
    Ok(())
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter)?)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
