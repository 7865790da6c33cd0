use anyhow::Result;
use myssh_core::ClientConfig;
use myssh_ssh::{ExitStatus, SecureSession, SessionOptions, ShellOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{report_failure, resolve_connection};
use crate::ConnectionArgs;

/// Exit code used when the remote shell reports no status, as OpenSSH does
const NO_STATUS_EXIT_CODE: i32 = 255;

/// Run an interactive shell and return the remote exit code.
pub async fn run(config: &ClientConfig, args: &ConnectionArgs) -> Result<i32> {
    match shell(config, args).await {
        Ok(status) => Ok(exit_code(status.code())),
        Err(e) => Ok(report_failure("connect", &e)),
    }
}

async fn shell(config: &ClientConfig, args: &ConnectionArgs) -> myssh_ssh::Result<ExitStatus> {
    let connection = resolve_connection(config, args).await?;
    let session = SecureSession::connect(&connection, &SessionOptions::from(&config.ssh)).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, closing shell");
            interrupt.cancel();
        }
    });

    let result = session
        .run_shell(&ShellOptions::with_term(config.ssh.term.clone()), cancel)
        .await;
    watcher.abort();

    if let Err(e) = session.close().await {
        debug!(error = %e, "Failed to close session cleanly");
    }
    result
}

fn exit_code(status: Option<u32>) -> i32 {
    status
        .map(|code| i32::try_from(code).unwrap_or(NO_STATUS_EXIT_CODE))
        .unwrap_or(NO_STATUS_EXIT_CODE)
}
