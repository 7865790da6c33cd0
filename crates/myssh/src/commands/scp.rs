use anyhow::Result;
use myssh_core::{ClientConfig, Direction, TransferRequest};
use myssh_ssh::{ScpTransfer, SessionOptions, TransferOptions, TransferReport, copy_file};
use tracing::warn;

use super::{report_failure, resolve_connection};
use crate::{ConnectionArgs, ScpCommands};

/// Run one transfer and return the process exit code.
pub async fn handle(config: &ClientConfig, command: ScpCommands) -> Result<i32> {
    let (connection, request) = match command {
        ScpCommands::Upload {
            connection,
            local,
            remote,
        } => (connection, TransferRequest::upload(local, remote)),
        ScpCommands::Download {
            connection,
            remote,
            local,
        } => (connection, TransferRequest::download(remote, local)),
    };

    match transfer(config, &connection, &request).await {
        Ok(report) => {
            println!("{}", summary(&report));
            Ok(0)
        }
        Err(e) => Ok(report_failure(&request.direction.to_string(), &e)),
    }
}

async fn transfer(
    config: &ClientConfig,
    connection: &ConnectionArgs,
    request: &TransferRequest,
) -> myssh_ssh::Result<TransferReport> {
    let target = resolve_connection(config, connection).await?;
    let transfer = ScpTransfer::new(TransferOptions::try_from(&config.transfer)?);

    let cancel = transfer.cancellation_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling transfer");
            cancel.cancel();
        }
    });

    let result = copy_file(&target, &SessionOptions::from(&config.ssh), &transfer, request).await;
    watcher.abort();
    result
}

fn summary(report: &TransferReport) -> String {
    let verb = match report.direction {
        Direction::Upload => "Uploaded",
        Direction::Download => "Downloaded",
    };
    format!("{} {} ({} bytes)", verb, report.header.name, report.bytes)
}
