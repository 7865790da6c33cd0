//! Authenticated SSH client sessions on russh

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use myssh_core::{Credentials, HostKeyPolicy, ResolvedConnection, SshSettings};
use russh::client::{self, Handle, Msg};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey, known_hosts};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{CommandChannel, ExitStatus, RemoteStreams};
use crate::error::{Error, Result};

/// In-memory pipe capacity between the channel pump and the engine
const PIPE_CAPACITY: usize = 64 * 1024;

/// Connection-level settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub inactivity_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SshSettings::default())
    }
}

impl From<&SshSettings> for SessionOptions {
    fn from(settings: &SshSettings) -> Self {
        Self {
            host_key_policy: settings.host_key_policy,
            known_hosts: settings.known_hosts.clone(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            inactivity_timeout: (settings.inactivity_timeout_secs > 0)
                .then(|| Duration::from_secs(settings.inactivity_timeout_secs)),
        }
    }
}

/// Verifies the server's host key according to the configured policy
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
}

impl ClientHandler {
    fn is_known(&self, key: &PublicKey) -> std::result::Result<bool, russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        }
    }

    fn learn(&self, key: &PublicKey) -> std::result::Result<(), russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => known_hosts::learn_known_hosts_path(&self.host, self.port, key, path),
            None => known_hosts::learn_known_hosts(&self.host, self.port, key),
        }
    }

    fn rejected(&self, reason: impl Into<String>) -> Error {
        Error::HostKey {
            host: format!("{}:{}", self.host, self.port),
            reason: reason.into(),
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);

        if self.policy == HostKeyPolicy::Insecure {
            warn!(
                host = %self.host,
                fingerprint = %fingerprint,
                "Host key verification disabled, accepting server key"
            );
            return Ok(true);
        }

        match self.is_known(server_public_key) {
            Ok(true) => {
                debug!(host = %self.host, fingerprint = %fingerprint, "Host key matches known_hosts");
                Ok(true)
            }
            Ok(false) if self.policy == HostKeyPolicy::AcceptNew => {
                self.learn(server_public_key)
                    .map_err(|e| self.rejected(format!("could not record host key: {}", e)))?;
                info!(
                    event = "host_key_learned",
                    host = %self.host,
                    port = self.port,
                    fingerprint = %fingerprint,
                    "Added new host key to known_hosts"
                );
                Ok(true)
            }
            Ok(false) => Err(self.rejected(format!(
                "no known_hosts entry (fingerprint {})",
                fingerprint
            ))),
            Err(e) => Err(self.rejected(format!("{} (fingerprint {})", e, fingerprint))),
        }
    }
}

/// An authenticated SSH connection
pub struct SecureSession {
    pub(crate) handle: Handle<ClientHandler>,
    target: String,
}

impl SecureSession {
    /// Dial `connection` and authenticate.
    ///
    /// A key file is offered before the password when both are present.
    pub async fn connect(connection: &ResolvedConnection, options: &SessionOptions) -> Result<Self> {
        if connection.credentials.is_empty() {
            return Err(Error::Authentication(format!(
                "no password or private key for {}",
                connection
            )));
        }

        let config = Arc::new(client::Config {
            inactivity_timeout: options.inactivity_timeout,
            ..Default::default()
        });
        let handler = ClientHandler {
            host: connection.host.clone(),
            port: connection.port,
            policy: options.host_key_policy,
            known_hosts: options.known_hosts.clone(),
        };

        debug!(target = %connection, policy = %options.host_key_policy, "Connecting");

        let mut handle = tokio::time::timeout(
            options.connect_timeout,
            client::connect(config, (connection.host.as_str(), connection.port), handler),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "connecting to {} took longer than {:?}",
                connection.address(),
                options.connect_timeout
            ))
        })??;

        authenticate(&mut handle, &connection.user, &connection.credentials).await?;

        info!(event = "session_established", target = %connection, "SSH session established");

        Ok(Self {
            handle,
            target: connection.to_string(),
        })
    }

    pub async fn open_command_channel(&self) -> Result<SshCommandChannel> {
        let channel = self.handle.channel_open_session().await?;
        debug!(target = %self.target, "Session channel opened");
        Ok(SshCommandChannel::new(channel))
    }

    pub async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        debug!(target = %self.target, "Session closed");
        Ok(())
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

async fn authenticate(handle: &mut Handle<ClientHandler>, user: &str, credentials: &Credentials) -> Result<()> {
    if let Some(key_path) = &credentials.key_path {
        match russh::keys::load_secret_key(key_path, None) {
            Ok(key) => {
                let hash = handle.best_supported_rsa_hash().await?.flatten();
                let result = handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
                    .await?;
                if result.success() {
                    debug!(user = %user, method = "publickey", "Authenticated");
                    return Ok(());
                }
                warn!(user = %user, key = %key_path.display(), "Server rejected public key");
            }
            Err(e) if credentials.password.is_none() => {
                return Err(Error::Authentication(format!(
                    "cannot load private key {}: {}",
                    key_path.display(),
                    e
                )));
            }
            Err(e) => {
                warn!(key = %key_path.display(), error = %e, "Cannot load private key, trying password");
            }
        }
    }

    if let Some(password) = &credentials.password {
        let result = handle.authenticate_password(user, password.as_str()).await?;
        if result.success() {
            debug!(user = %user, method = "password", "Authenticated");
            return Ok(());
        }
    }

    Err(Error::Authentication(format!(
        "server rejected every offered credential for {}",
        user
    )))
}

/// A russh session channel running one command
///
/// Once the command starts, a pump task owns the channel: it forwards what
/// the engine writes, feeds channel data back to the engine, sends EOF when
/// the engine shuts its writer down and yields the exit status.
pub struct SshCommandChannel {
    channel: Option<Channel<Msg>>,
    pump: Option<JoinHandle<Result<ExitStatus>>>,
}

impl SshCommandChannel {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel: Some(channel),
            pump: None,
        }
    }
}

#[async_trait]
impl CommandChannel for SshCommandChannel {
    async fn exec(&mut self, command: &str) -> Result<RemoteStreams> {
        let channel = self
            .channel
            .take()
            .ok_or_else(|| Error::Transport("channel already ran a command".to_string()))?;

        channel.exec(true, command).await?;
        debug!(command = %command, "Remote command started");

        let (engine_writer, pump_input) = tokio::io::duplex(PIPE_CAPACITY);
        let (pump_output, engine_reader) = tokio::io::duplex(PIPE_CAPACITY);
        self.pump = Some(tokio::spawn(pump(channel, pump_input, pump_output)));

        Ok(RemoteStreams {
            writer: Box::new(engine_writer),
            reader: Box::new(engine_reader),
        })
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let pump = self
            .pump
            .take()
            .ok_or_else(|| Error::Transport("no remote command is running".to_string()))?;

        pump.await
            .map_err(|e| Error::Transport(format!("channel task failed: {}", e)))?
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await?;
        }
        Ok(())
    }
}

impl Drop for SshCommandChannel {
    fn drop(&mut self) {
        if let Some(pump) = &self.pump {
            pump.abort();
        }
    }
}

async fn pump(
    mut channel: Channel<Msg>,
    mut from_engine: DuplexStream,
    mut to_engine: DuplexStream,
) -> Result<ExitStatus> {
    let mut buf = vec![0u8; PIPE_CAPACITY];
    let mut input_open = true;
    let mut output_open = true;
    let mut exit_status = None;

    loop {
        tokio::select! {
            read = from_engine.read(&mut buf), if input_open => match read {
                Ok(0) | Err(_) => {
                    input_open = false;
                    channel.eof().await?;
                }
                Ok(n) => channel.data(&buf[..n]).await?,
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if output_open && to_engine.write_all(&data).await.is_err() {
                        output_open = false;
                        debug!("Local reader gone, discarding remote output");
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    let text = String::from_utf8_lossy(&data);
                    debug!(stderr = %text.trim_end(), "Remote stderr");
                }
                Some(ChannelMsg::ExitStatus { exit_status: code }) => exit_status = Some(code),
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    warn!(signal = ?signal_name, "Remote command terminated by signal");
                }
                Some(ChannelMsg::Failure) => {
                    return Err(Error::Transport("remote refused to start the command".to_string()));
                }
                Some(ChannelMsg::Eof) => {
                    let _ = to_engine.shutdown().await;
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }

    let _ = to_engine.shutdown().await;
    debug!(exit_status = ?exit_status, "Channel closed");
    Ok(ExitStatus(exit_status))
}
