//! Main [`NodeMcu`] client implementation.
//!
//! This module provides the high-level [`NodeMcu`] connection that combines
//! the transport, the unsolicited-data listener and the command handler into
//! a single operation surface.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_serial::SerialStream;

use crate::commands::{CommandHandler, Settings};
use crate::error::Result;
use crate::event::{Event, EventDispatcher, PortArbiter, Subscription};
use crate::transport::{Port, SerialConfig, Transport};
use crate::types::{CancelToken, ExchangeResult, FsInfo, NodeInfo, TransferStatus};

/// Capacity of the event channel.
const EVENT_CAPACITY: usize = 256;

/// Port and settings guarded by the single-flight lock.
struct Session<T: Transport> {
    arbiter: PortArbiter<T>,
    settings: Settings,
}

impl<T: Transport> Session<T> {
    /// Detaches the listener and returns a handler owning the port.
    async fn handler(&mut self) -> Result<CommandHandler<'_, T>> {
        let port = self.arbiter.acquire().await?;
        Ok(CommandHandler::new(port, &mut self.settings))
    }
}

/// Connection to a NodeMCU device.
///
/// Operations are serialized: each one waits for the previous to finish.
/// Run long operations (transfers, listings) on their own task to keep the
/// caller responsive; cancel transfers through their [`CancelToken`].
pub struct NodeMcu<T: Transport> {
    session: Mutex<Session<T>>,
    dispatcher: EventDispatcher,
}

impl NodeMcu<SerialStream> {
    /// Opens a serial port with default settings.
    pub async fn open(port: impl Into<String>) -> Result<Self> {
        Self::connect(&SerialConfig::new(port)).await
    }

    /// Opens a serial port with custom configuration.
    pub async fn connect(config: &SerialConfig) -> Result<Self> {
        let stream = config.open()?;
        Ok(Self::with_transport(stream, Settings::from(config)))
    }
}

impl<T: Transport> NodeMcu<T> {
    /// Creates a connection over an already open transport.
    ///
    /// Must be called within a Tokio runtime so the listener can start.
    pub fn with_transport(transport: T, settings: Settings) -> Self {
        let dispatcher = EventDispatcher::new(EVENT_CAPACITY);
        let arbiter = PortArbiter::new(Port::new(transport), dispatcher.clone());
        dispatcher.dispatch(Event::Connected);

        Self {
            session: Mutex::new(Session { arbiter, settings }),
            dispatcher,
        }
    }

    /// Closes the connection, discarding buffered data.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.arbiter.is_closed() {
            return Ok(());
        }

        let mut port = session.arbiter.release().await?;
        tracing::debug!("closing port");
        if let Err(e) = port.clear() {
            tracing::warn!("failed to clear buffers: {}", e);
        }
        drop(port);

        self.dispatcher.dispatch(Event::Disconnected);
        Ok(())
    }

    /// Returns true until the connection is closed.
    pub async fn is_connected(&self) -> bool {
        !self.session.lock().await.arbiter.is_closed()
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Calls `callback` with every chunk of unsolicited device output.
    ///
    /// The callback runs on its own task until the connection is dropped
    /// or the returned handle is aborted.
    pub fn on_data<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let Event::Data(data) = event {
                    callback(data);
                }
            }
        })
    }

    // ==================== Settings ====================

    /// Returns the current link settings.
    pub async fn settings(&self) -> Settings {
        self.session.lock().await.settings
    }

    /// Returns the default exchange timeout.
    pub async fn timeout(&self) -> Duration {
        self.settings().await.timeout
    }

    /// Returns the current baud rate.
    pub async fn baud_rate(&self) -> u32 {
        self.settings().await.baud_rate
    }

    /// Returns true if device echo is enabled.
    pub async fn is_echo_enabled(&self) -> bool {
        self.settings().await.echo
    }

    /// Sets the default exchange timeout.
    pub async fn set_timeout(&self, timeout: Duration) {
        tracing::info!("changing timeout to {:?}", timeout);
        self.session.lock().await.settings.timeout = timeout;
    }

    /// Switches the device and the local port to a new baud rate.
    pub async fn set_baud(&self, baud_rate: u32) -> Result<()> {
        let mut session = self.session.lock().await;
        session.handler().await?.set_baud(baud_rate).await
    }

    /// Turns device echo on or off.
    pub async fn set_echo(&self, echo: bool) -> Result<()> {
        let mut session = self.session.lock().await;
        session.handler().await?.set_echo(echo).await
    }

    // ==================== Device Control ====================

    /// Restarts the firmware.
    pub async fn soft_reset(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session.handler().await?.soft_reset().await
    }

    /// Resets the board through the DTR/RTS lines.
    pub async fn hard_reset(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session.handler().await?.hard_reset().await
    }

    /// Writes a raw line; the device's reply arrives as [`Event::Data`].
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        session.handler().await?.send_line(line).await
    }

    /// Sends a command and returns the reply up to the next prompt.
    pub async fn exchange(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExchangeResult> {
        let mut session = self.session.lock().await;
        session.handler().await?.exchange(command, timeout).await
    }

    // ==================== File System ====================

    /// Formats the file system.
    pub async fn format(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        session.handler().await?.format().await
    }

    /// Lists files and file system usage.
    pub async fn list_files(&self) -> Result<FsInfo> {
        let mut session = self.session.lock().await;
        session.handler().await?.list_files().await
    }

    /// Checks whether a file exists.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let mut session = self.session.lock().await;
        session.handler().await?.exists(name).await
    }

    /// Compiles a Lua file to bytecode.
    pub async fn compile(&self, name: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        session.handler().await?.compile(name).await
    }

    /// Renames a file.
    pub async fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        session.handler().await?.rename(name, new_name).await
    }

    /// Removes a file.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        session.handler().await?.remove(name).await
    }

    /// Prints a file's contents as the device's shell shows them.
    pub async fn print_file(&self, name: &str) -> Result<String> {
        let mut session = self.session.lock().await;
        session.handler().await?.print_file(name).await
    }

    /// Runs a Lua file and returns its output.
    pub async fn run_file(&self, name: &str) -> Result<String> {
        let mut session = self.session.lock().await;
        session.handler().await?.run_file(name).await
    }

    // ==================== Node ====================

    /// Reads firmware and flash details.
    pub async fn read_info(&self) -> Result<NodeInfo> {
        let mut session = self.session.lock().await;
        session.handler().await?.read_info().await
    }

    /// Reads the chip id.
    pub async fn chip_id(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        session.handler().await?.chip_id().await
    }

    /// Reads the free heap in bytes.
    pub async fn heap(&self) -> Result<u64> {
        let mut session = self.session.lock().await;
        session.handler().await?.heap().await
    }

    // ==================== Transfers ====================

    /// Downloads a file into `sink`, reporting progress in percent.
    pub async fn download<W, P>(
        &self,
        name: &str,
        size: u64,
        sink: &mut W,
        cancel: &CancelToken,
        progress: P,
    ) -> Result<TransferStatus>
    where
        W: AsyncWrite + Unpin,
        P: FnMut(u8),
    {
        let mut session = self.session.lock().await;
        session
            .handler()
            .await?
            .download(name, size, sink, cancel, progress)
            .await
    }

    /// Uploads `source` as `name`, reporting progress in percent.
    pub async fn upload<R, P>(
        &self,
        source: &mut R,
        name: &str,
        cancel: &CancelToken,
        progress: P,
    ) -> Result<TransferStatus>
    where
        R: AsyncRead + AsyncSeek + Unpin,
        P: FnMut(u8),
    {
        let mut session = self.session.lock().await;
        session
            .handler()
            .await?
            .upload(source, name, cancel, progress)
            .await
    }
}
