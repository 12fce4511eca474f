//! Chunked file transfer over the Lua shell.
//!
//! Both directions install a temporary helper routine on the device, run
//! it, move the data and then remove the routine again. Teardown runs on
//! every exit path once the helper is installed; if both the transfer and
//! the teardown fail, both errors are reported.

use std::io::SeekFrom;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::commands::CommandHandler;
use crate::error::{Error, Result};
use crate::protocol::frame::percent;
use crate::protocol::{
    Command, DATA_END, FrameScanner, PROMPT, PacketPlan, Scan, UPLOAD_PACKET_SIZE,
};
use crate::transport::Transport;
use crate::types::{CancelToken, TransferStatus};

impl<T: Transport> CommandHandler<'_, T> {
    /// Downloads `name` from the device into `sink`.
    ///
    /// `size` is the expected file size, used only for progress. The token
    /// is polled once per received byte.
    pub async fn download<W, P>(
        &mut self,
        name: &str,
        size: u64,
        sink: &mut W,
        cancel: &CancelToken,
        mut progress: P,
    ) -> Result<TransferStatus>
    where
        W: AsyncWrite + Unpin,
        P: FnMut(u8),
    {
        self.clear_buffers();
        tracing::info!("receiving file {}", name);

        self.install_helper(Command::DownloadHelper, name, "error creating read helper function")
            .await?;

        let result = self
            .receive_frames(name, size, sink, cancel, &mut progress)
            .await;

        self.teardown(result, Command::DownloadEnd, "error deleting read helper function")
            .await
    }

    async fn receive_frames<W, P>(
        &mut self,
        name: &str,
        size: u64,
        sink: &mut W,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> Result<TransferStatus>
    where
        W: AsyncWrite + Unpin,
        P: FnMut(u8),
    {
        self.run(Command::DownloadStart, &[], "error start reading")
            .await?;

        let deadline = self.settings.timeout;
        let mut scanner = FrameScanner::new();
        let mut received: u64 = 0;

        loop {
            let Some(byte) = self.port.read_byte(deadline).await? else {
                let expected = if scanner.in_frame() {
                    DATA_END
                } else {
                    PROMPT.as_bytes()
                };
                return Err(Error::BadResponse {
                    expected: String::from_utf8_lossy(expected).into_owned(),
                    actual: String::from_utf8_lossy(scanner.buffered()).into_owned(),
                });
            };

            if cancel.is_cancelled() {
                tracing::warn!("cancel request reading file {}", name);
                sink.flush().await?;
                return Ok(TransferStatus::Cancelled);
            }

            match scanner.push(byte)? {
                Scan::Pending => {}
                Scan::Payload(chunk) => {
                    sink.write_all(&chunk).await?;
                    received += chunk.len() as u64;
                    tracing::debug!("{} of {} bytes received", received, size);
                    progress(percent(received, size));
                }
                Scan::Prompt => break,
            }
        }

        sink.flush().await?;
        Ok(TransferStatus::Completed)
    }

    /// Uploads `source` to the device as `name`, replacing any existing file.
    ///
    /// The total size is taken from the source's end position. The token is
    /// polled once per packet.
    pub async fn upload<R, P>(
        &mut self,
        source: &mut R,
        name: &str,
        cancel: &CancelToken,
        mut progress: P,
    ) -> Result<TransferStatus>
    where
        R: AsyncRead + AsyncSeek + Unpin,
        P: FnMut(u8),
    {
        self.clear_buffers();
        tracing::info!("transferring file {}", name);

        let size = source.seek(SeekFrom::End(0)).await?;
        source.seek(SeekFrom::Start(0)).await?;
        let plan = PacketPlan::new(usize::try_from(size).map_err(|_| {
            Error::communication("file too large for device", size.to_string())
        })?);
        tracing::debug!(
            "{} bytes in {} packets of {}, last packet {}",
            size,
            plan.count,
            plan.start_size,
            plan.remainder
        );

        self.run(Command::RemoveFile, &[&name], "error removing file")
            .await?;
        self.install_helper(Command::UploadHelper, name, "error creating write helper function")
            .await?;

        let result = self
            .send_packets(source, name, size, plan, cancel, &mut progress)
            .await;

        self.teardown(result, Command::UploadEnd, "error deleting write helper function")
            .await
    }

    async fn send_packets<R, P>(
        &mut self,
        source: &mut R,
        name: &str,
        size: u64,
        plan: PacketPlan,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> Result<TransferStatus>
    where
        R: AsyncRead + Unpin,
        P: FnMut(u8),
    {
        self.run(
            Command::UploadStart,
            &[&plan.count, &plan.start_size, &plan.remainder],
            "error start writing file",
        )
        .await?;

        let mut packet = [0u8; UPLOAD_PACKET_SIZE];
        let mut sent: u64 = 0;

        loop {
            let n = fill_packet(source, &mut packet).await?;
            if n == 0 {
                break;
            }

            if cancel.is_cancelled() {
                tracing::warn!("cancel request writing file {}", name);
                return Ok(TransferStatus::Cancelled);
            }

            self.port.write_all(&packet[..n]).await?;
            let ack = self.expect(PROMPT, None).await?;
            tracing::debug!("packet acknowledged: {}", ack.trim());

            sent += n as u64;
            progress(percent(sent, size));
        }

        Ok(TransferStatus::Completed)
    }

    /// Removes a helper routine and merges its outcome with the transfer's.
    async fn teardown<V>(
        &mut self,
        result: Result<V>,
        helper_end: Command,
        context: &str,
    ) -> Result<V> {
        let removed = self.run(helper_end, &[], context).await;

        match (result, removed) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => Err(e),
            (Err(source), Err(teardown)) => {
                tracing::warn!("helper teardown failed after transfer error: {}", teardown);
                Err(Error::Teardown {
                    source: Box::new(source),
                    teardown: Box::new(teardown),
                })
            }
        }
    }
}

/// Reads until `packet` is full or the source is exhausted.
///
/// The device counts packets by length, so short reads are coalesced.
async fn fill_packet<R>(source: &mut R, packet: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < packet.len() {
        let n = source.read(&mut packet[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
