//! Single-file SCP transfers over a [`CommandChannel`]
//!
//! Every step of the handshake is a synchronization point: the first
//! failure aborts the transfer and nothing after it is sent.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use myssh_core::{Direction, TransferRequest, TransferSettings};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{self, ACK_OK, EOF_MARKER, FileHeader, RemoteCommand};
use crate::channel::{CommandChannel, RemoteReader, RemoteStreams, RemoteWriter};
use crate::error::{Error, Result};

const BUFFER_SIZE: usize = 64 * 1024;

/// Default permission bits announced for uploads
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Per-transfer knobs
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Mode announced in the upload header
    pub file_mode: u32,
    /// Upper bound on each acknowledgement or header read
    pub ack_timeout: Option<Duration>,
    /// Download into a `.part` sibling and rename it once the transfer succeeded
    pub atomic_download: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            file_mode: DEFAULT_FILE_MODE,
            ack_timeout: None,
            atomic_download: false,
        }
    }
}

impl TryFrom<&TransferSettings> for TransferOptions {
    type Error = Error;

    fn try_from(settings: &TransferSettings) -> Result<Self> {
        let file_mode = settings
            .mode()
            .map_err(|e| Error::Config(format!("transfer.file_mode: {}", e)))?;

        Ok(Self {
            file_mode,
            ack_timeout: settings.ack_timeout_secs.map(Duration::from_secs),
            atomic_download: settings.atomic_download,
        })
    }
}

/// Outcome of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub direction: Direction,
    pub header: FileHeader,
    pub bytes: u64,
}

/// Drives one SCP copy at a time
///
/// Holds no per-transfer state, so one instance can serve many transfers,
/// each over its own channel.
#[derive(Debug, Clone, Default)]
pub struct ScpTransfer {
    options: TransferOptions,
    cancel: CancellationToken,
}

impl ScpTransfer {
    pub fn new(options: TransferOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort transfers when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    pub async fn run<C>(&self, channel: &mut C, request: &TransferRequest) -> Result<TransferReport>
    where
        C: CommandChannel + ?Sized,
    {
        match request.direction {
            Direction::Upload => {
                self.upload(channel, &request.local_path, &request.remote_path)
                    .await
            }
            Direction::Download => {
                self.download(channel, &request.remote_path, &request.local_path)
                    .await
            }
        }
    }

    /// Push `local` to `remote` through a remote `scp -t`.
    pub async fn upload<C>(&self, channel: &mut C, local: &Path, remote: &str) -> Result<TransferReport>
    where
        C: CommandChannel + ?Sized,
    {
        self.check_cancelled()?;

        let mut file = File::open(local).await.map_err(|e| Error::local(local, e))?;
        let metadata = file.metadata().await.map_err(|e| Error::local(local, e))?;
        if !metadata.is_file() {
            return Err(Error::local(
                local,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let name = protocol::upload_name(remote, local)?;
        let header = FileHeader::new(self.options.file_mode, metadata.len(), name)?;
        let command = RemoteCommand::sink(remote).command_line()?;

        info!(
            event = "upload_started",
            local = %local.display(),
            remote = %remote,
            size = header.size,
            "Starting upload"
        );

        let streams = cancellable(&self.cancel, channel.exec(&command)).await?;
        let mut link = Link::new(streams, &self.cancel, self.options.ack_timeout);

        link.send(&header.encode()).await?;
        link.expect_ack("file header").await?;

        let bytes = link.send_payload(&mut file, local, header.size).await?;
        link.send(&[EOF_MARKER]).await?;
        link.expect_ack("file payload").await?;
        link.finish().await?;
        drop(file);

        self.wait_for_exit(channel).await?;

        info!(
            event = "upload_complete",
            remote = %remote,
            name = %header.name,
            bytes,
            "Upload complete"
        );

        Ok(TransferReport {
            direction: Direction::Upload,
            header,
            bytes,
        })
    }

    /// Pull `remote` into `local` through a remote `scp -f`.
    pub async fn download<C>(&self, channel: &mut C, remote: &str, local: &Path) -> Result<TransferReport>
    where
        C: CommandChannel + ?Sized,
    {
        self.check_cancelled()?;

        let command = RemoteCommand::source(remote).command_line()?;

        info!(
            event = "download_started",
            remote = %remote,
            local = %local.display(),
            "Starting download"
        );

        let streams = cancellable(&self.cancel, channel.exec(&command)).await?;
        let mut link = Link::new(streams, &self.cancel, self.options.ack_timeout);

        link.send(&[ACK_OK]).await?;
        let header = link.read_header().await?;
        debug!(header = %header, "Received file header");

        if local.file_name().is_some_and(|n| n.to_string_lossy() != header.name) {
            debug!(
                announced = %header.name,
                local = %local.display(),
                "Remote file name differs from the destination name"
            );
        }

        link.send(&[ACK_OK]).await?;

        let mut target = DownloadTarget::create(local, self.options.atomic_download).await?;
        match self.receive_into(channel, link, &mut target, &header).await {
            Ok(bytes) => {
                target.commit().await?;

                info!(
                    event = "download_complete",
                    remote = %remote,
                    local = %local.display(),
                    bytes,
                    "Download complete"
                );

                Ok(TransferReport {
                    direction: Direction::Download,
                    header,
                    bytes,
                })
            }
            Err(e) => {
                target.discard().await;
                Err(e)
            }
        }
    }

    async fn receive_into<C>(
        &self,
        channel: &mut C,
        mut link: Link<'_>,
        target: &mut DownloadTarget,
        header: &FileHeader,
    ) -> Result<u64>
    where
        C: CommandChannel + ?Sized,
    {
        let bytes = link.receive_payload(target, header.size).await?;
        link.expect_ack("trailing status").await?;
        link.send(&[ACK_OK]).await?;
        link.finish().await?;

        self.wait_for_exit(channel).await?;
        Ok(bytes)
    }

    async fn wait_for_exit<C>(&self, channel: &mut C) -> Result<()>
    where
        C: CommandChannel + ?Sized,
    {
        let status = cancellable(&self.cancel, channel.wait()).await?;
        debug!(exit_status = %status, "Remote scp finished");

        if !status.success() {
            return Err(Error::RemoteExit(status.code()));
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// The live streams of one transfer
struct Link<'a> {
    writer: RemoteWriter,
    reader: RemoteReader,
    cancel: &'a CancellationToken,
    ack_timeout: Option<Duration>,
}

impl<'a> Link<'a> {
    fn new(streams: RemoteStreams, cancel: &'a CancellationToken, ack_timeout: Option<Duration>) -> Self {
        Self {
            writer: streams.writer,
            reader: streams.reader,
            cancel,
            ack_timeout,
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let writer = &mut self.writer;
        cancellable(self.cancel, async move {
            writer.write_all(data).await.map_err(Error::stream)?;
            writer.flush().await.map_err(Error::stream)
        })
        .await
    }

    async fn expect_ack(&mut self, after: &str) -> Result<()> {
        let reader = &mut self.reader;
        let result = cancellable(
            self.cancel,
            bounded(self.ack_timeout, after, protocol::read_ack(reader)),
        )
        .await;

        match &result {
            Ok(()) => debug!(after = %after, "Acknowledged"),
            Err(e) => warn!(after = %after, error = %e, "Acknowledgement failed"),
        }
        result
    }

    async fn read_header(&mut self) -> Result<FileHeader> {
        let reader = &mut self.reader;
        cancellable(
            self.cancel,
            bounded(self.ack_timeout, "file header", protocol::read_header(reader)),
        )
        .await
    }

    /// Copy exactly `size` bytes of `file` to the remote.
    async fn send_payload<R>(&mut self, file: &mut R, path: &Path, size: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let writer = &mut self.writer;
        cancellable(self.cancel, async move {
            let mut buf = vec![0u8; BUFFER_SIZE];
            let mut sent: u64 = 0;

            while sent < size {
                let want = (size - sent).min(BUFFER_SIZE as u64) as usize;
                let n = file
                    .read(&mut buf[..want])
                    .await
                    .map_err(|e| Error::local(path, e))?;
                if n == 0 {
                    return Err(Error::Protocol(format!(
                        "{} ended after {} of {} declared bytes",
                        path.display(),
                        sent,
                        size
                    )));
                }
                writer.write_all(&buf[..n]).await.map_err(Error::stream)?;
                sent += n as u64;
            }

            writer.flush().await.map_err(Error::stream)?;
            Ok(sent)
        })
        .await
    }

    /// Copy exactly `size` bytes from the remote into `target`.
    async fn receive_payload(&mut self, target: &mut DownloadTarget, size: u64) -> Result<u64> {
        let mut limited = (&mut self.reader).take(size);
        cancellable(self.cancel, async move {
            let mut buf = vec![0u8; BUFFER_SIZE];
            let mut received: u64 = 0;

            loop {
                let n = limited.read(&mut buf).await.map_err(Error::stream)?;
                if n == 0 {
                    break;
                }
                target.write(&buf[..n]).await?;
                received += n as u64;
            }

            if received != size {
                return Err(Error::Transport(format!(
                    "remote stream closed after {} of {} bytes",
                    received, size
                )));
            }

            target.flush().await?;
            Ok(received)
        })
        .await
    }

    /// Signal end of input to the remote and let go of its output.
    async fn finish(mut self) -> Result<()> {
        let writer = &mut self.writer;
        cancellable(self.cancel, async move { writer.shutdown().await.map_err(Error::stream) }).await
    }
}

async fn bounded<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::timeout(format!("no {} acknowledgement within {:?}", what, limit)))?,
        None => fut.await,
    }
}

/// Local destination of a download
struct DownloadTarget {
    dest: PathBuf,
    write_path: PathBuf,
    file: Option<File>,
}

impl DownloadTarget {
    async fn create(dest: &Path, atomic: bool) -> Result<Self> {
        let write_path = if atomic {
            part_path(dest)
        } else {
            dest.to_path_buf()
        };

        let file = File::create(&write_path)
            .await
            .map_err(|e| Error::local(&write_path, e))?;

        Ok(Self {
            dest: dest.to_path_buf(),
            write_path,
            file: Some(file),
        })
    }

    fn is_atomic(&self) -> bool {
        self.write_path != self.dest
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => file
                .write_all(data)
                .await
                .map_err(|e| Error::local(&self.write_path, e)),
            None => Err(Error::local(
                &self.write_path,
                std::io::Error::other("file already closed"),
            )),
        }
    }

    /// Flush pending writes and release the handle.
    async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.file.take();
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()
                .await
                .map_err(|e| Error::local(&self.write_path, e))?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.close().await?;
        if self.is_atomic() {
            tokio::fs::rename(&self.write_path, &self.dest)
                .await
                .map_err(|e| Error::local(&self.dest, e))?;
        }
        Ok(())
    }

    async fn discard(&mut self) {
        if let Err(e) = self.close().await {
            debug!(error = %e, "Failed to flush partial download");
        }
        if self.is_atomic() {
            if let Err(e) = tokio::fs::remove_file(&self.write_path).await {
                warn!(path = %self.write_path.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
