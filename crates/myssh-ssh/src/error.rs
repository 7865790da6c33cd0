//! Error types for sessions and SCP transfers
//!
//! Every variant maps to one entry of the transfer error taxonomy through
//! [`Error::kind`], which is what the CLI reports to the user.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for session and transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Session and transfer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Dial failure, broken channel, or a stream that closed early
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation exceeded its time limit
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// No usable credential, unreadable key, or the server refused us
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The server's host key failed the configured verification policy
    #[error("Host key verification failed for {host}: {reason}")]
    HostKey { host: String, reason: String },

    /// Malformed header, unexpected control byte, or size mismatch
    #[error("SCP protocol error: {0}")]
    Protocol(String),

    /// The remote side answered a synchronization point with a non-zero byte
    #[error("Remote rejected transfer (code {code}){}", remote_message(.message))]
    RemoteRejected { code: u8, message: String },

    /// The local file could not be opened, created, read or written
    #[error("Local I/O error on {}: {source}", .path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote command finished with a non-zero or missing exit status
    #[error("Remote command {}", exit_description(*.0))]
    RemoteExit(Option<u32>),

    /// A remote path that cannot be passed to the remote shell safely
    #[error("Invalid remote path: {0}")]
    InvalidPath(String),

    /// Cancellation was requested before the transfer finished
    #[error("Transfer cancelled")]
    Cancelled,

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn remote_message(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {}", message)
    }
}

fn exit_description(code: Option<u32>) -> String {
    match code {
        Some(code) => format!("exited with status {}", code),
        None => "ended without reporting an exit status".to_string(),
    }
}

/// Stable names for the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Auth,
    Protocol,
    RemoteRejected,
    LocalIo,
    RemoteExit,
    Cancelled,
    InvalidInput,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Transport => "TransportError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::RemoteRejected => "RemoteRejected",
            ErrorKind::LocalIo => "LocalIOError",
            ErrorKind::RemoteExit => "RemoteExitError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::InvalidInput => "InvalidInput",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) | Error::Timeout(_) => ErrorKind::Transport,
            Error::Authentication(_) | Error::HostKey { .. } => ErrorKind::Auth,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            Error::LocalIo { .. } => ErrorKind::LocalIo,
            Error::RemoteExit(_) => ErrorKind::RemoteExit,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidPath(_) | Error::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// Check if a fresh transfer could succeed where this one failed
    ///
    /// The protocol has no resume capability, so a retry always starts over.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }

    /// Map an I/O error on the remote streams.
    pub fn stream(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::Transport("remote stream closed unexpectedly".to_string())
            }
            std::io::ErrorKind::BrokenPipe => {
                Error::Transport("remote stream is no longer accepting data".to_string())
            }
            _ => Error::Transport(err.to_string()),
        }
    }

    /// Attach the local path to an I/O error on the local file.
    pub fn local(path: &Path, source: std::io::Error) -> Self {
        Error::LocalIo {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn timeout(context: impl Into<String>) -> Self {
        Error::Timeout(context.into())
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<russh::keys::Error> for Error {
    fn from(err: russh::keys::Error) -> Self {
        Error::Authentication(err.to_string())
    }
}

impl From<myssh_core::MysshError> for Error {
    fn from(err: myssh_core::MysshError) -> Self {
        match err {
            myssh_core::MysshError::NoCredential(_) => Error::Authentication(err.to_string()),
            other => Error::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Transport("x".into()).kind(), ErrorKind::Transport);
        assert_eq!(Error::timeout("x").kind(), ErrorKind::Transport);
        assert_eq!(Error::Authentication("x".into()).kind(), ErrorKind::Auth);
        assert_eq!(
            Error::HostKey {
                host: "h".into(),
                reason: "r".into()
            }
            .kind(),
            ErrorKind::Auth
        );
        assert_eq!(Error::Protocol("x".into()).kind(), ErrorKind::Protocol);
        assert_eq!(
            Error::RemoteRejected {
                code: 1,
                message: String::new()
            }
            .kind(),
            ErrorKind::RemoteRejected
        );
        assert_eq!(Error::RemoteExit(Some(1)).kind(), ErrorKind::RemoteExit);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(Error::InvalidPath("x".into()).kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_resolver_errors_map_to_taxonomy() {
        use myssh_core::MysshError;

        let err = Error::from(MysshError::NoCredential("alice@example.com".into()));
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().contains("alice@example.com"));

        let err = Error::from(MysshError::ProfileNotFound("prod".into()));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("prod"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Transport.to_string(), "TransportError");
        assert_eq!(ErrorKind::LocalIo.to_string(), "LocalIOError");
        assert_eq!(ErrorKind::RemoteExit.to_string(), "RemoteExitError");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Transport("x".into()).is_recoverable());
        assert!(Error::timeout("x").is_recoverable());
        assert!(!Error::Protocol("x".into()).is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
        assert!(!Error::RemoteExit(Some(1)).is_recoverable());
    }

    #[test]
    fn test_short_read_is_transport() {
        let err = Error::stream(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_display_messages() {
        let err = Error::RemoteRejected {
            code: 1,
            message: "scp: /nope: No such file or directory".into(),
        };
        assert_eq!(
            err.to_string(),
            "Remote rejected transfer (code 1): scp: /nope: No such file or directory"
        );

        let err = Error::RemoteRejected {
            code: 7,
            message: String::new(),
        };
        assert_eq!(err.to_string(), "Remote rejected transfer (code 7)");

        assert_eq!(
            Error::RemoteExit(Some(1)).to_string(),
            "Remote command exited with status 1"
        );
        assert_eq!(
            Error::RemoteExit(None).to_string(),
            "Remote command ended without reporting an exit status"
        );
    }
}
