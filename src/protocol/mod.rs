//! Protocol definitions for the NodeMCU Lua shell.
//!
//! This module contains the wire-level pieces:
//! - Command catalog and helper scripts
//! - Download framing and upload packet planning
//! - Response parsing

pub mod command;
pub mod frame;
pub mod parser;

pub use command::{CRLF, Command, PROMPT};
pub use frame::{
    DATA_END, DATA_START, DOWNLOAD_CHUNK_SIZE, FrameScanner, PacketPlan, SCAN_BUFFER_SIZE, Scan,
    UPLOAD_PACKET_SIZE, encode as encode_frame,
};
pub use parser::{
    check_response, parse_bool, parse_file_list, parse_fsinfo, parse_integer, parse_nodeinfo,
    split_exchange,
};
