//! Interactive remote shell relay

use russh::{ChannelMsg, Pty};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::ExitStatus;
use crate::error::{Error, Result};
use crate::session::SecureSession;

const TERMINAL_SPEED: u32 = 14400;

#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            cols: 80,
            rows: 40,
        }
    }
}

impl ShellOptions {
    pub fn with_term(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Default::default()
        }
    }
}

impl SecureSession {
    /// Run a login shell on a pseudo-terminal, relaying the local standard
    /// streams until the remote side closes the channel.
    pub async fn run_shell(&self, options: &ShellOptions, cancel: CancellationToken) -> Result<ExitStatus> {
        let mut channel = self.handle.channel_open_session().await?;

        channel
            .request_pty(
                false,
                &options.term,
                options.cols,
                options.rows,
                0,
                0,
                &[
                    (Pty::ECHO, 1),
                    (Pty::TTY_OP_ISPEED, TERMINAL_SPEED),
                    (Pty::TTY_OP_OSPEED, TERMINAL_SPEED),
                ],
            )
            .await?;
        channel.request_shell(false).await?;

        info!(
            event = "shell_started",
            target = %self.target(),
            term = %options.term,
            "Interactive shell started"
        );

        let mut stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();
        let mut buf = vec![0u8; 4096];
        let mut stdin_open = true;
        let mut exit_status = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Shell cancelled locally");
                    channel.close().await?;
                    break;
                }
                read = stdin.read(&mut buf), if stdin_open => match read {
                    Ok(0) | Err(_) => {
                        stdin_open = false;
                        channel.eof().await?;
                    }
                    Ok(n) => channel.data(&buf[..n]).await?,
                },
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.write_all(&data).await.map_err(terminal("<stdout>"))?;
                        stdout.flush().await.map_err(terminal("<stdout>"))?;
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                        stderr.write_all(&data).await.map_err(terminal("<stderr>"))?;
                        stderr.flush().await.map_err(terminal("<stderr>"))?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: code }) => exit_status = Some(code),
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                },
            }
        }

        let status = ExitStatus(exit_status);
        info!(event = "shell_finished", exit_status = %status, "Interactive shell finished");
        Ok(status)
    }
}

fn terminal(name: &'static str) -> impl Fn(std::io::Error) -> Error {
    move |e| Error::local(std::path::Path::new(name), e)
}
