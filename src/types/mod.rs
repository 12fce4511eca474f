//! Data types for NodeMCU entities.
//!
//! This module contains the core data structures used throughout the library:
//! - Exchange results
//! - File system listings
//! - Node information
//! - Transfer cancellation and status

pub mod device;
pub mod exchange;
pub mod fs;
pub mod transfer;

pub use device::NodeInfo;
pub use exchange::ExchangeResult;
pub use fs::{FileEntry, FsInfo};
pub use transfer::{CancelToken, TransferStatus};
