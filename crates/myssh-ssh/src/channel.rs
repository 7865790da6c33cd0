//! Byte-stream view of a remote command
//!
//! The transfer engine never touches SSH types directly. It asks a
//! [`CommandChannel`] to start a command and gets back a writer for the
//! command's stdin and a reader for its stdout.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Remote command stdin. Shutting it down delivers end-of-input to the command.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Remote command stdout
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;

pub struct RemoteStreams {
    pub writer: RemoteWriter,
    pub reader: RemoteReader,
}

/// Exit status reported by a remote command, if it reported one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitStatus(pub Option<u32>);

impl ExitStatus {
    pub fn code(&self) -> Option<u32> {
        self.0
    }

    pub fn success(&self) -> bool {
        self.0 == Some(0)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(code) => write!(f, "{}", code),
            None => write!(f, "unknown"),
        }
    }
}

/// A channel able to run exactly one remote command
#[async_trait]
pub trait CommandChannel: Send {
    /// Start `command` on the remote host and return its stdin/stdout.
    async fn exec(&mut self, command: &str) -> Result<RemoteStreams>;

    /// Wait for the command to finish and return its exit status.
    ///
    /// Data the command still writes to stdout after the reader was dropped
    /// is discarded.
    async fn wait(&mut self) -> Result<ExitStatus>;

    async fn close(&mut self) -> Result<()>;
}
