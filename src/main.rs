// Entrypoint: load config, open the attachment registry, serve MCP over stdio.
mod config;
mod convert;
mod jgrants;
mod registry;
mod schemas;
mod tools;

use anyhow::{anyhow, Context, Result};
use config::Config;
use jgrants::JgrantsClient;
use registry::{FileRegistry, RegistryError};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::io::ErrorKind;
use std::sync::Arc;
use tools::JgrantsMcpServer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env();

    let registry = Arc::new(open_registry(&config).await?);
    let client = JgrantsClient::new(config.api_base_url.clone());
    let handler = JgrantsMcpServer::new(client, registry);

    info!("jgrants-mcp serving over stdio");
    let service = handler.serve(stdio()).await.inspect_err(|err| {
        error!("MCP server failed to start: {err}");
    })?;
    service.waiting().await?;
    Ok(())
}

// Stdout carries the MCP transport, so logs must go to stderr.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Opens the registry at the configured directory, falling back to a per-user
/// location when that directory is not writable.
async fn open_registry(config: &Config) -> Result<FileRegistry> {
    let primary = FileRegistry::new(&config.files_dir, config.max_attachment_bytes);
    match primary.load_from_disk().await {
        Ok(()) => return Ok(primary),
        Err(err) if is_permission_error(&err) => {
            warn!(
                dir = %config.files_dir.display(),
                "files directory is not writable, falling back to user directory: {err}"
            );
        }
        Err(err) => {
            return Err(anyhow!(err)).with_context(|| {
                format!(
                    "failed to load attachment index from {}",
                    config.files_dir.display()
                )
            });
        }
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot resolve home directory"))?;
    let fallback_dir = home.join(".jgrants-mcp").join("files");
    let fallback = FileRegistry::new(&fallback_dir, config.max_attachment_bytes);
    fallback.load_from_disk().await.with_context(|| {
        format!(
            "failed to load attachment index from fallback {}",
            fallback_dir.display()
        )
    })?;
    Ok(fallback)
}

fn is_permission_error(err: &RegistryError) -> bool {
    match err {
        RegistryError::Io(err) => matches!(
            err.kind(),
            ErrorKind::PermissionDenied | ErrorKind::NotADirectory | ErrorKind::ReadOnlyFilesystem
        ),
        _ => false,
    }
}
