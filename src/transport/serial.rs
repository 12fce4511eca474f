//! Serial/USB transport implementation.
//!
//! This module provides serial port communication for NodeMCU boards
//! connected via a USB-UART bridge.

use std::time::Duration;

use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Default baud rate of the NodeMCU firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read/write deadline for a scripted exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read deadline applied to every exchange unless overridden.
    pub timeout: Duration,
    /// Whether the device echoes received command lines.
    pub echo: bool,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            echo: false,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the exchange timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether the device echoes commands.
    #[must_use]
    pub const fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Opens the configured port.
    ///
    /// Both control lines are de-asserted and pending buffers discarded so
    /// the board is not held in reset or bootloader mode.
    pub fn open(&self) -> Result<SerialStream> {
        tracing::info!(
            "opening port {} with {} baud",
            self.port,
            self.baud_rate
        );

        let mut stream = tokio_serial::new(&self.port, self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(Error::Serial)?;

        // Virtual ports (pty, some USB CDC bridges) reject modem-line ioctls.
        if let Err(e) = SerialPort::write_request_to_send(&mut stream, false) {
            tracing::warn!("failed to de-assert RTS: {}", e);
        }
        if let Err(e) = SerialPort::write_data_terminal_ready(&mut stream, false) {
            tracing::warn!("failed to de-assert DTR: {}", e);
        }
        if let Err(e) = Transport::clear_buffers(&mut stream) {
            tracing::warn!("failed to clear buffers: {}", e);
        }

        Ok(stream)
    }
}

impl Transport for SerialStream {
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        SerialPort::set_baud_rate(self, baud_rate).map_err(Error::Serial)
    }

    fn write_data_terminal_ready(&mut self, level: bool) -> Result<()> {
        SerialPort::write_data_terminal_ready(self, level).map_err(Error::Serial)
    }

    fn write_request_to_send(&mut self, level: bool) -> Result<()> {
        SerialPort::write_request_to_send(self, level).map_err(Error::Serial)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        SerialPort::clear(self, ClearBuffer::All).map_err(Error::Serial)
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
