//! Single-file copies with the legacy SCP protocol

pub mod engine;
pub mod protocol;

pub use engine::{DEFAULT_FILE_MODE, ScpTransfer, TransferOptions, TransferReport};
pub use protocol::{FileHeader, RemoteCommand, RemoteMode};

use myssh_core::{ResolvedConnection, TransferRequest};
use tracing::debug;

use crate::channel::CommandChannel;
use crate::error::Result;
use crate::session::{SecureSession, SessionOptions};

/// Connect, run one transfer and tear everything down again.
///
/// The channel and the session are closed whether or not the transfer
/// succeeded.
pub async fn copy_file(
    connection: &ResolvedConnection,
    session_options: &SessionOptions,
    transfer: &ScpTransfer,
    request: &TransferRequest,
) -> Result<TransferReport> {
    let cancel = transfer.cancellation_token();
    let session = engine::cancellable(&cancel, SecureSession::connect(connection, session_options)).await?;

    let result = run_on_session(&session, transfer, request).await;

    if let Err(e) = session.close().await {
        debug!(error = %e, "Failed to close session cleanly");
    }
    result
}

async fn run_on_session(
    session: &SecureSession,
    transfer: &ScpTransfer,
    request: &TransferRequest,
) -> Result<TransferReport> {
    let mut channel = session.open_command_channel().await?;
    let result = transfer.run(&mut channel, request).await;

    if let Err(e) = channel.close().await {
        debug!(error = %e, "Failed to close channel cleanly");
    }
    result
}
