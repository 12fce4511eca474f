//! Command handlers for NodeMCU operations.
//!
//! This module provides the request/response protocol with the Lua shell:
//! write a command line, read up to the next prompt, split off the echo and
//! check the reply for interpreter errors. File transfers live in
//! [`transfer`].

pub mod transfer;

use std::time::Duration;

use crate::error::{Error, Result};
use crate::event::PortGuard;
use crate::protocol::command::Arg;
use crate::protocol::frame::ends_with;
use crate::protocol::{
    Command, PROMPT, check_response, parse_bool, parse_file_list, parse_fsinfo, parse_integer,
    parse_nodeinfo, split_exchange,
};
use crate::transport::serial::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
use crate::transport::{SerialConfig, Transport};
use crate::types::{ExchangeResult, FsInfo, NodeInfo};

/// Read deadline for formatting the file system.
pub const FORMAT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the reset line is held asserted.
pub const HARD_RESET_HOLD: Duration = Duration::from_millis(100);

/// Time for a `uart.setup` line to leave the wire before reconfiguring.
pub const UART_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Link settings shared by every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Current baud rate.
    pub baud_rate: u32,
    /// Default read deadline.
    pub timeout: Duration,
    /// Whether the device echoes command lines.
    pub echo: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            echo: false,
        }
    }
}

impl From<&SerialConfig> for Settings {
    fn from(config: &SerialConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            timeout: config.timeout,
            echo: config.echo,
        }
    }
}

/// Command handler for NodeMCU operations.
///
/// Holds the port for its whole lifetime; dropping it hands the port back
/// to the listener.
pub struct CommandHandler<'a, T: Transport> {
    port: PortGuard<'a, T>,
    settings: &'a mut Settings,
}

impl<'a, T: Transport> CommandHandler<'a, T> {
    /// Creates a new command handler.
    pub fn new(port: PortGuard<'a, T>, settings: &'a mut Settings) -> Self {
        Self { port, settings }
    }

    /// Discards pending input and output, ignoring failures.
    fn clear_buffers(&mut self) {
        if let Err(e) = self.port.clear() {
            tracing::warn!("failed to clear buffers: {}", e);
        }
    }

    /// Reads until the captured text ends with `terminator`.
    ///
    /// `timeout` overrides the default read deadline for this call only.
    pub async fn expect(&mut self, terminator: &str, timeout: Option<Duration>) -> Result<String> {
        let deadline = timeout.unwrap_or(self.settings.timeout);
        let mut captured = Vec::with_capacity(1024);

        while !ends_with(&captured, terminator.as_bytes()) {
            match self.port.read_byte(deadline).await? {
                Some(byte) => captured.push(byte),
                None => break,
            }
        }

        let data = String::from_utf8_lossy(&captured).into_owned();
        tracing::debug!("expect returned: {:?}", data);

        if !ends_with(&captured, terminator.as_bytes()) {
            return Err(Error::BadResponse {
                expected: terminator.to_owned(),
                actual: data,
            });
        }
        Ok(data)
    }

    /// Sends a command line and reads the reply up to the prompt.
    pub async fn exchange(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExchangeResult> {
        self.port.write_line(command).await?;
        let captured = self.expect(PROMPT, timeout).await?;
        Ok(split_exchange(&captured, self.settings.echo))
    }

    /// Exchanges a rendered catalog command and checks for device errors.
    async fn run(
        &mut self,
        command: Command,
        args: &[Arg<'_>],
        context: &str,
    ) -> Result<ExchangeResult> {
        let result = self.exchange(&command.render(args), None).await?;
        check_response(context, &result)?;
        Ok(result)
    }

    /// Sends a multi-line helper routine line by line.
    async fn install_helper(
        &mut self,
        helper: Command,
        filename: &str,
        context: &str,
    ) -> Result<()> {
        for line in helper.render_lines(&[&filename]) {
            let result = self.exchange(&line, None).await?;
            check_response(context, &result)?;
        }
        Ok(())
    }

    /// Writes a raw line without waiting for a reply.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.port.write_line(line).await
    }

    // ==================== File System Commands ====================

    /// Formats the file system and returns the device's reply.
    pub async fn format(&mut self) -> Result<String> {
        self.clear_buffers();
        tracing::info!("formatting file system");

        let result = self
            .exchange(&Command::Format.render(&[]), Some(FORMAT_TIMEOUT))
            .await?;
        tracing::debug!("{}", result.response);
        Ok(result.response)
    }

    /// Checks whether a file exists.
    pub async fn exists(&mut self, name: &str) -> Result<bool> {
        self.clear_buffers();
        tracing::info!("checking file exists {}", name);

        let result = self
            .run(Command::FileExists, &[&name], "error checking file exists")
            .await?;
        parse_bool(&result.response)
    }

    /// Compiles a Lua file to bytecode.
    pub async fn compile(&mut self, name: &str) -> Result<()> {
        self.clear_buffers();
        tracing::info!("compiling file {}", name);

        self.run(Command::CompileFile, &[&name], "error compiling file")
            .await
            .map(drop)
    }

    /// Renames a file.
    pub async fn rename(&mut self, name: &str, new_name: &str) -> Result<()> {
        self.clear_buffers();
        tracing::info!("renaming file {} to {}", name, new_name);

        self.run(Command::RenameFile, &[&name, &new_name], "error renaming file")
            .await
            .map(drop)
    }

    /// Removes a file.
    pub async fn remove(&mut self, name: &str) -> Result<()> {
        self.clear_buffers();
        tracing::info!("removing file {}", name);

        self.run(Command::RemoveFile, &[&name], "error removing file")
            .await
            .map(drop)
    }

    /// Prints a file on the device and returns the captured listing.
    ///
    /// The contents are framed by `---Start of file <name>---` and
    /// `---End of file <name>---` lines.
    pub async fn print_file(&mut self, name: &str) -> Result<String> {
        self.clear_buffers();
        tracing::info!("printing file {}", name);

        let result = self
            .run(Command::PrintFile, &[&name], "error printing file")
            .await?;
        Ok(result.response)
    }

    /// Runs a Lua file and returns what it printed.
    pub async fn run_file(&mut self, name: &str) -> Result<String> {
        self.clear_buffers();
        tracing::info!("running file {}", name);

        let result = self
            .run(Command::DoFile, &[&name], "error running file")
            .await?;
        Ok(result.response)
    }

    /// Lists files together with file system usage.
    pub async fn list_files(&mut self) -> Result<FsInfo> {
        self.clear_buffers();
        tracing::info!("listing files");

        let result = self
            .run(Command::ListFiles, &[], "error reading file list")
            .await?;
        tracing::debug!("{}", result.response);
        let files = parse_file_list(&result.response)?;

        let result = self
            .run(Command::PrintFsInfo, &[], "error reading fs info")
            .await?;
        let info = parse_fsinfo(&result.response)?;

        Ok(FsInfo { files, ..info })
    }

    // ==================== Node Commands ====================

    /// Reads firmware and flash details.
    pub async fn read_info(&mut self) -> Result<NodeInfo> {
        self.clear_buffers();
        tracing::info!("reading info");

        let result = self
            .run(Command::PrintInfo, &[], "error reading info")
            .await?;
        tracing::debug!("{}", result.response);
        parse_nodeinfo(&result.response)
    }

    /// Reads the chip id.
    pub async fn chip_id(&mut self) -> Result<String> {
        self.clear_buffers();
        tracing::info!("reading chip id");

        let result = self
            .run(Command::PrintChipId, &[], "error reading chip id")
            .await?;
        let id = result.response.trim();
        if id.is_empty() {
            return Err(Error::communication("chip id response is empty", result.response));
        }
        Ok(id.to_owned())
    }

    /// Reads the free heap in bytes.
    pub async fn heap(&mut self) -> Result<u64> {
        self.clear_buffers();
        tracing::info!("reading heap");

        let result = self
            .run(Command::PrintHeap, &[], "error reading heap")
            .await?;
        parse_integer(&result.response)
    }

    // ==================== Device Control ====================

    /// Restarts the firmware with `node.restart()`.
    pub async fn soft_reset(&mut self) -> Result<()> {
        tracing::info!("soft reset");
        self.port.write_line(&Command::SoftRestart.render(&[])).await
    }

    /// Pulls the reset pin low through the DTR/RTS auto-reset circuit.
    ///
    /// Reset is `DTR=0, RTS=1`; both lines are released after
    /// [`HARD_RESET_HOLD`] and the boot noise buffered so far is discarded.
    pub async fn hard_reset(&mut self) -> Result<()> {
        tracing::info!("hard reset");
        let io = self.port.get_mut();
        io.write_data_terminal_ready(false)?;
        io.write_request_to_send(true)?;

        tokio::time::sleep(HARD_RESET_HOLD).await;

        let io = self.port.get_mut();
        io.write_data_terminal_ready(false)?;
        io.write_request_to_send(false)?;
        self.clear_buffers();
        Ok(())
    }

    /// Switches the device and then the local port to `baud_rate`.
    pub async fn set_baud(&mut self, baud_rate: u32) -> Result<()> {
        tracing::info!("changing communication to {} baud", baud_rate);
        let echo = u8::from(self.settings.echo);
        self.port
            .write_line(&Command::UartSetup.render(&[&baud_rate, &echo]))
            .await?;

        // The command must leave at the old rate.
        tokio::time::sleep(UART_SETTLE_DELAY).await;

        self.port.get_mut().set_baud_rate(baud_rate)?;
        self.settings.baud_rate = baud_rate;
        Ok(())
    }

    /// Turns device echo on or off.
    pub async fn set_echo(&mut self, echo: bool) -> Result<()> {
        tracing::info!("changing echo to {}", echo);
        let flag = u8::from(echo);
        self.port
            .write_line(&Command::UartSetup.render(&[&self.settings.baud_rate, &flag]))
            .await?;

        tokio::time::sleep(UART_SETTLE_DELAY).await;
        self.settings.echo = echo;
        Ok(())
    }
}
