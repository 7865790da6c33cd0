//! SSH sessions, interactive shells and SCP file transfers for myssh

pub mod channel;
pub mod error;
pub mod scp;
pub mod session;
pub mod shell;

pub use channel::{CommandChannel, ExitStatus, RemoteReader, RemoteStreams, RemoteWriter};
pub use error::{Error, ErrorKind, Result};
pub use scp::{ScpTransfer, TransferOptions, TransferReport, copy_file};
pub use session::{SecureSession, SessionOptions, SshCommandChannel};
pub use shell::ShellOptions;
