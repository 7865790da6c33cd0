pub mod config;
pub mod connect;
pub mod profile;
pub mod scp;

use anyhow::{Context, Result};
use myssh_core::{ClientConfig, ResolvedConnection};
use myssh_db::Database;
use tracing::error;

use crate::ConnectionArgs;

pub async fn open_database(config: &ClientConfig) -> Result<Database> {
    Database::new(&config.database_path)
        .await
        .with_context(|| format!("Failed to open profile database {}", config.database_path.display()))
}

/// Turn `--profile` plus explicit flags into a complete connection target.
///
/// Failures are reported in the session error taxonomy, so a missing
/// credential surfaces as an authentication error.
pub async fn resolve_connection(
    config: &ClientConfig,
    args: &ConnectionArgs,
) -> myssh_ssh::Result<ResolvedConnection> {
    let resolved = match &args.profile {
        Some(name) => {
            let db = Database::new(&config.database_path).await?;
            db.resolve(Some(name.as_str()), args.overrides()).await?
        }
        None => args.overrides().resolve(None)?,
    };
    Ok(resolved)
}

/// Print a session or transfer failure as `<Kind>: <message>` and return the exit code.
pub fn report_failure(operation: &str, err: &myssh_ssh::Error) -> i32 {
    error!(
        event = "command_failed",
        operation = %operation,
        kind = %err.kind(),
        error = %err,
        "Command failed"
    );
    eprintln!("{}", failure_line(err));
    1
}

fn failure_line(err: &myssh_ssh::Error) -> String {
    format!("{}: {}", err.kind(), err)
}
