//! The `devserve` command.

use crate::cli::Cli;
use crate::config;
use crate::error::Result;
use tokio::signal;

/// Load the configuration, start the server and run until Ctrl+C.
///
/// # Errors
///
/// Returns errors for unreadable configuration files, invalid options and
/// servers that fail to start.
pub async fn execute(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let source = config::load(cli.config_path().map(|p| p.as_path()), &cwd)?;

    let server = devserve::serve(source, cli.to_flags()).await?;
    tracing::debug!(url = %server.url(), "server started");

    signal::ctrl_c().await?;
    server.close().await;
    Ok(())
}
