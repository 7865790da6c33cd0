//! Scripted in-process SCP peer for engine tests
//!
//! `MockChannel` implements `CommandChannel` over `tokio::io::duplex` pipes.
//! The remote half is a small emulation of `scp -t` / `scp -f` whose
//! replies are driven by a `RemoteScript`.

#![allow(dead_code)]

use async_trait::async_trait;
use myssh_ssh::{CommandChannel, Error, ExitStatus, RemoteStreams, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// Files stored on the fake remote, keyed by the path given to `scp`
pub type RemoteFs = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// A reply the remote gives at a synchronization point
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    /// Non-zero code; codes 1 and 2 carry a message line
    Reject(u8, String),
    /// Never answer
    Hang,
}

impl Reply {
    fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Ok => vec![0],
            Reply::Reject(code, message) if *code == 1 || *code == 2 => {
                let mut out = vec![*code];
                out.extend_from_slice(message.as_bytes());
                out.push(b'\n');
                out
            }
            Reply::Reject(code, _) => vec![*code],
            Reply::Hang => Vec::new(),
        }
    }

    fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok)
    }
}

/// How the fake remote behaves
#[derive(Debug, Clone)]
pub struct RemoteScript {
    pub header_reply: Reply,
    pub payload_reply: Reply,
    /// Status `scp -f` sends after the payload
    pub trailing_reply: Reply,
    /// Replaces the header `scp -f` would send; bytes are sent verbatim
    pub raw_header: Option<Vec<u8>>,
    /// Stop after this many payload bytes, then close the stream
    pub truncate_payload: Option<usize>,
    /// Stop after this many payload bytes and never send the rest
    pub stall_payload: Option<usize>,
    pub exit_code: Option<u32>,
    pub mode: u32,
}

impl Default for RemoteScript {
    fn default() -> Self {
        Self {
            header_reply: Reply::Ok,
            payload_reply: Reply::Ok,
            trailing_reply: Reply::Ok,
            raw_header: None,
            truncate_payload: None,
            stall_payload: None,
            exit_code: Some(0),
            mode: 0o644,
        }
    }
}

/// Everything the client sent to the remote, in order
pub type Transcript = Arc<Mutex<Vec<u8>>>;

pub struct MockChannel {
    script: RemoteScript,
    fs: RemoteFs,
    pub commands: Vec<String>,
    pub transcript: Transcript,
    pub closed: bool,
    remote: Option<JoinHandle<Option<u32>>>,
    fail_exec: bool,
}

impl MockChannel {
    pub fn new(script: RemoteScript) -> Self {
        Self::with_fs(script, RemoteFs::default())
    }

    pub fn with_fs(script: RemoteScript, fs: RemoteFs) -> Self {
        Self {
            script,
            fs,
            commands: Vec::new(),
            transcript: Transcript::default(),
            closed: false,
            remote: None,
            fail_exec: false,
        }
    }

    /// A channel whose command never starts
    pub fn refusing() -> Self {
        let mut channel = Self::new(RemoteScript::default());
        channel.fail_exec = true;
        channel
    }

    pub fn sent(&self) -> Vec<u8> {
        self.transcript.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandChannel for MockChannel {
    async fn exec(&mut self, command: &str) -> Result<RemoteStreams> {
        self.commands.push(command.to_string());
        if self.fail_exec {
            return Err(Error::Transport("exec refused".to_string()));
        }

        let (client_writer, remote_input) = tokio::io::duplex(8 * 1024);
        let (remote_output, client_reader) = tokio::io::duplex(8 * 1024);

        let peer = Peer {
            script: self.script.clone(),
            fs: self.fs.clone(),
            transcript: self.transcript.clone(),
            input: remote_input,
            output: remote_output,
        };

        let path = command
            .split_whitespace()
            .nth(2)
            .unwrap_or_default()
            .trim_matches('\'')
            .to_string();
        self.remote = Some(if command.starts_with("scp -t ") {
            tokio::spawn(peer.sink(path))
        } else if command.starts_with("scp -f ") {
            tokio::spawn(peer.source(path))
        } else {
            tokio::spawn(async { Some(127) })
        });

        Ok(RemoteStreams {
            writer: Box::new(client_writer),
            reader: Box::new(client_reader),
        })
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let remote = self
            .remote
            .take()
            .ok_or_else(|| Error::Transport("nothing running".to_string()))?;
        let code = remote
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(ExitStatus(code))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(remote) = self.remote.take() {
            remote.abort();
        }
        self.closed = true;
        Ok(())
    }
}

struct Peer {
    script: RemoteScript,
    fs: RemoteFs,
    transcript: Transcript,
    input: DuplexStream,
    output: DuplexStream,
}

impl Peer {
    async fn read_byte(&mut self) -> Option<u8> {
        let byte = self.input.read_u8().await.ok()?;
        self.transcript.lock().unwrap().push(byte);
        Some(byte)
    }

    async fn read_line(&mut self) -> Option<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte().await? {
                b'\n' => return String::from_utf8(line).ok(),
                b => line.push(b),
            }
        }
    }

    async fn reply(&mut self, reply: &Reply) {
        if matches!(reply, Reply::Hang) {
            std::future::pending::<()>().await;
        }
        self.send(&reply.encode()).await;
    }

    async fn send(&mut self, data: &[u8]) {
        let _ = self.output.write_all(data).await;
    }

    /// Record whatever the client still sends until it closes its writer.
    async fn drain(&mut self) {
        while self.read_byte().await.is_some() {}
    }

    /// `scp -t <path>`
    async fn sink(mut self, path: String) -> Option<u32> {
        let Some(line) = self.read_line().await else {
            return Some(1);
        };
        let mut parts = line.trim_start_matches('C').splitn(3, ' ');
        let _mode = parts.next();
        let size: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);

        let reply = self.script.header_reply.clone();
        self.reply(&reply).await;
        if !reply.is_ok() {
            self.drain().await;
            return Some(1);
        }

        let mut content = Vec::with_capacity(size);
        for _ in 0..size {
            content.push(self.read_byte().await?);
        }
        let _marker = self.read_byte().await;

        let reply = self.script.payload_reply.clone();
        self.reply(&reply).await;
        if reply.is_ok() {
            self.fs.lock().unwrap().insert(path, content);
        }

        self.drain().await;
        if reply.is_ok() { self.script.exit_code } else { Some(1) }
    }

    /// `scp -f <path>`
    async fn source(mut self, path: String) -> Option<u32> {
        if self.read_byte().await != Some(0) {
            return Some(1);
        }

        let content = self.fs.lock().unwrap().get(&path).cloned();
        let raw_header = self.script.raw_header.clone();
        let header = match (raw_header, content.as_ref()) {
            (Some(raw), _) => raw,
            (None, Some(content)) => {
                let name = path.rsplit('/').next().unwrap_or_default();
                format!("C{:04o} {} {}\n", self.script.mode, content.len(), name).into_bytes()
            }
            (None, None) => {
                let message = format!("\x01scp: {}: No such file or directory\n", path);
                self.send(message.as_bytes()).await;
                self.drain().await;
                return Some(1);
            }
        };
        self.send(&header).await;

        if self.read_byte().await != Some(0) {
            self.drain().await;
            return Some(1);
        }

        let content = content.unwrap_or_default();
        if let Some(limit) = self.script.stall_payload {
            let limit = limit.min(content.len());
            self.send(&content[..limit]).await;
            std::future::pending::<()>().await;
        }
        match self.script.truncate_payload {
            Some(limit) => {
                let limit = limit.min(content.len());
                self.send(&content[..limit]).await;
                return Some(1);
            }
            None => self.send(&content).await,
        }
        let reply = self.script.trailing_reply.clone();
        self.reply(&reply).await;
        if !reply.is_ok() {
            self.drain().await;
            return Some(1);
        }

        let _final_ack = self.read_byte().await;
        self.drain().await;
        self.script.exit_code
    }
}

/// Write `content` to a fresh file under `dir` and return its path.
pub fn local_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Deterministic, non-repeating-looking payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
