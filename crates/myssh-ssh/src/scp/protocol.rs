//! SCP wire format
//!
//! The legacy protocol is line oriented. Control records end in `\n`, every
//! control record and every payload is answered by a one-byte
//! acknowledgement, and the file body is sent raw with no framing.
//!
//! ```text
//! client                               remote `scp -t <path>`
//!   C0644 5 a.txt\n          ---->
//!                            <----     \0
//!   <5 payload bytes>        ---->
//!   \0                       ---->
//!                            <----     \0
//! ```
//!
//! Reads here go byte by byte on purpose: a buffered reader would swallow
//! payload bytes that follow a control line.

use bytes::{BufMut, BytesMut};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Positive acknowledgement
pub const ACK_OK: u8 = 0;
/// Non-fatal error, followed by a message line
pub const ACK_WARNING: u8 = 1;
/// Fatal error, followed by a message line
pub const ACK_FATAL: u8 = 2;
/// Sent by the file's sender after the payload
pub const EOF_MARKER: u8 = 0;

/// Upper bound on a control or message line
pub const MAX_LINE_LEN: usize = 64 * 1024;

const MAX_MODE: u32 = 0o7777;

/// Which side of the copy the remote `scp` plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// `-t`: the remote receives (upload)
    Sink,
    /// `-f`: the remote sends (download)
    Source,
}

impl RemoteMode {
    fn flag(&self) -> &'static str {
        match self {
            RemoteMode::Sink => "-t",
            RemoteMode::Source => "-f",
        }
    }
}

/// Builder for the remote `scp` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand<'a> {
    pub mode: RemoteMode,
    pub path: &'a str,
}

impl<'a> RemoteCommand<'a> {
    pub fn sink(path: &'a str) -> Self {
        Self {
            mode: RemoteMode::Sink,
            path,
        }
    }

    pub fn source(path: &'a str) -> Self {
        Self {
            mode: RemoteMode::Source,
            path,
        }
    }

    /// Render the command line, quoting the path for the remote shell.
    pub fn command_line(&self) -> Result<String> {
        Ok(format!("scp {} {}", self.mode.flag(), shell_quote(self.path)?))
    }
}

fn is_shell_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"/._-+:,@%=".contains(&b)
}

/// Quote a path for a POSIX shell.
///
/// Paths made only of safe characters pass through untouched. Everything
/// else is wrapped in single quotes, with embedded quotes written as `'\''`.
/// A leading `~/` or `~user/` stays unquoted so the remote shell still
/// expands it.
pub fn shell_quote(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(Error::InvalidPath("remote path is empty".to_string()));
    }
    if path.contains('\0') || path.contains('\n') {
        return Err(Error::InvalidPath(format!(
            "{:?} contains a NUL or newline character",
            path
        )));
    }

    match home_prefix(path) {
        Some((prefix, None)) => Ok(prefix.to_string()),
        Some((prefix, Some(rest))) => Ok(format!("{}/{}", prefix, quote_word(rest))),
        None => Ok(quote_word(path)),
    }
}

/// Split `~` or `~user` off a path, returning the prefix and what follows
/// the first `/`, if there is one.
fn home_prefix(path: &str) -> Option<(&str, Option<&str>)> {
    let (prefix, rest) = match path.split_once('/') {
        Some((prefix, rest)) => (prefix, Some(rest)),
        None => (path, None),
    };
    let user = prefix.strip_prefix('~')?;
    let user_ok = user
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"._-".contains(&b));
    user_ok.then_some((prefix, rest))
}

fn quote_word(word: &str) -> String {
    if word.bytes().all(is_shell_safe) {
        return word.to_string();
    }

    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for c in word.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// A `C` record announcing a single regular file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub mode: u32,
    pub size: u64,
    pub name: String,
}

impl FileHeader {
    pub fn new(mode: u32, size: u64, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name).map_err(Error::Protocol)?;
        if mode > MAX_MODE {
            return Err(Error::Protocol(format!("file mode {:o} out of range", mode)));
        }
        Ok(Self { mode, size, name })
    }

    /// Wire form, including the leading `C` and the trailing newline
    pub fn encode(&self) -> BytesMut {
        let line = format!("C{:04o} {} {}\n", self.mode, self.size, self.name);
        let mut buf = BytesMut::with_capacity(line.len());
        buf.put_slice(line.as_bytes());
        buf
    }

    /// Parse the body of a `C` record: everything after the `C` and before `\n`.
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = |reason: &str| Error::Protocol(format!("malformed file header {:?}: {}", line, reason));

        let mut parts = line.splitn(3, ' ');
        let mode = parts.next().unwrap_or_default();
        let size = parts.next().ok_or_else(|| malformed("missing size"))?;
        let name = parts.next().ok_or_else(|| malformed("missing file name"))?;

        let mode_ok = (3..=4).contains(&mode.len()) && mode.bytes().all(|b| (b'0'..=b'7').contains(&b));
        if !mode_ok {
            return Err(malformed("mode is not octal"));
        }
        let mode = u32::from_str_radix(mode, 8).map_err(|_| malformed("mode is not octal"))?;

        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("size is not a decimal number"));
        }
        let size: u64 = size.parse().map_err(|_| malformed("size out of range"))?;

        Self::new(mode, size, name)
    }
}

impl std::fmt::Display for FileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{:04o} {} {}", self.mode, self.size, self.name)
    }
}

fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("file name is empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("file name {:?} is not a regular file name", name));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(format!("file name {:?} contains a path separator or control character", name));
    }
    if name.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(format!("file name {:?} contains whitespace", name));
    }
    Ok(())
}

/// Name announced when uploading `local` to `remote`.
///
/// The remote basename wins. A remote path ending in `/`, or a bare `~` or
/// `~user`, names a directory, so the local file name is used instead.
pub fn upload_name(remote: &str, local: &Path) -> Result<String> {
    let remote_base = remote.rsplit('/').next().unwrap_or_default();
    let is_home = matches!(home_prefix(remote), Some((_, None)));
    let name = if is_home || remote_base.is_empty() || remote_base == "." || remote_base == ".." {
        local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        remote_base.to_string()
    };

    validate_name(&name).map_err(Error::InvalidPath)?;
    Ok(name)
}

/// Read one acknowledgement byte and turn a non-zero code into an error.
pub async fn read_ack<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let code = reader.read_u8().await.map_err(Error::stream)?;
    check_ack(reader, code).await
}

/// Interpret an acknowledgement byte that was already read.
pub async fn check_ack<R>(reader: &mut R, code: u8) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match code {
        ACK_OK => Ok(()),
        ACK_WARNING | ACK_FATAL => {
            let message = read_message_line(reader).await?;
            Err(Error::RemoteRejected { code, message })
        }
        code => Err(Error::RemoteRejected {
            code,
            message: String::new(),
        }),
    }
}

/// Read the message attached to a warning or fatal acknowledgement.
///
/// The remote usually exits right after sending it, so a missing newline
/// is tolerated.
pub async fn read_message_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let (line, _) = read_line(reader).await?;
    Ok(String::from_utf8_lossy(&line).trim_end().to_string())
}

/// Read the next record sent by a remote source and return its file header.
pub async fn read_header<R>(reader: &mut R) -> Result<FileHeader>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let lead = reader.read_u8().await.map_err(Error::stream)?;
    match lead {
        ACK_WARNING | ACK_FATAL => {
            let message = read_message_line(reader).await?;
            Err(Error::RemoteRejected { code: lead, message })
        }
        b'C' => {
            let (line, terminated) = read_line(reader).await?;
            if !terminated {
                return Err(Error::stream(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            let line = String::from_utf8(line)
                .map_err(|_| Error::Protocol("file header is not valid UTF-8".to_string()))?;
            FileHeader::parse(&line)
        }
        b'D' | b'E' => Err(Error::Protocol(format!(
            "unexpected directory record '{}': only single regular files are supported",
            lead as char
        ))),
        b'T' => Err(Error::Protocol(
            "unexpected timestamp record 'T': time preservation is not supported".to_string(),
        )),
        other => Err(Error::Protocol(format!(
            "unexpected control byte 0x{:02x} where a file header was expected",
            other
        ))),
    }
}

/// Read up to and excluding `\n`. The flag reports whether the newline was seen.
async fn read_line<R>(reader: &mut R) -> Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await.map_err(Error::stream)?;
        if n == 0 {
            return Ok((line, false));
        }
        if byte[0] == b'\n' {
            return Ok((line, true));
        }
        if line.len() >= MAX_LINE_LEN {
            return Err(Error::Protocol(format!(
                "control line exceeds {} bytes",
                MAX_LINE_LEN
            )));
        }
        line.push(byte[0]);
    }
}
