//! # nodemcu
//!
//! A Rust client library for NodeMCU (ESP8266 Lua firmware) devices.
//!
//! This library drives the device's interactive Lua shell over a serial
//! port: it issues commands, parses replies and moves files in both
//! directions through temporary helper routines installed on the device.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Live terminal output forwarded as events between operations
//! - Chunked binary download and upload with progress and cancellation
//! - Hard reset through the DTR/RTS auto-reset circuit
//!
//! ## Quick Start
//!
//! ```no_run
//! use nodemcu::{CancelToken, NodeMcu, SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nodemcu::Error> {
//!     let config = SerialConfig::new("/dev/ttyUSB0").baud_rate(115_200);
//!     let device = NodeMcu::connect(&config).await?;
//!
//!     let fs = device.list_files().await?;
//!     for file in &fs.files {
//!         println!("{} ({} bytes)", file.name, file.size);
//!     }
//!
//!     let mut data = Vec::new();
//!     let cancel = CancelToken::new();
//!     device
//!         .download("init.lua", 120, &mut data, &cancel, |p| println!("{p}%"))
//!         .await?;
//!
//!     device.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Wire level pieces (command catalog, framing, parsing)
//! - [`types`] - Data structures (file listings, node info, transfer status)
//! - [`transport`] - Transport implementations (currently USB/Serial)
//! - [`event`] - Unsolicited output events and port arbitration
//! - [`commands`] - Command handler for device operations
//! - [`client`] - High-level [`NodeMcu`] connection

pub mod client;
pub mod commands;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::NodeMcu;
pub use commands::{CommandHandler, Settings};
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, Subscription};
pub use protocol::{Command, PacketPlan};
pub use transport::{SerialConfig, Transport, list_ports};
pub use types::{CancelToken, ExchangeResult, FileEntry, FsInfo, NodeInfo, TransferStatus};
