//! Response parsing for the NodeMCU Lua shell.
//!
//! This module turns captured shell text into exchange results and typed
//! records.

use crate::error::{Error, Result};
use crate::protocol::command::CRLF;
use crate::types::{ExchangeResult, FileEntry, FsInfo, NodeInfo};

/// Substrings the Lua interpreter prints when a command fails.
const ERROR_MARKERS: [&str; 2] = ["unexpected", "stdin"];

/// Number of tab-separated fields printed by `node.info()`.
const NODE_INFO_FIELDS: usize = 8;

/// Number of tab-separated fields printed by `file.fsinfo()`.
const FS_INFO_FIELDS: usize = 3;

/// Splits device text into CRLF-separated lines, keeping empty lines.
#[must_use]
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split(CRLF).collect()
}

/// Splits the text captured up to the prompt into echo and response.
///
/// With echo enabled the first line is the echoed command. The last line is
/// the prompt and is dropped; everything in between is the response.
#[must_use]
pub fn split_exchange(captured: &str, echo: bool) -> ExchangeResult {
    let lines = split_lines(captured);
    let start = usize::from(echo);
    let end = lines.len().saturating_sub(1);

    ExchangeResult {
        echo: if echo {
            lines.first().map(|l| (*l).to_owned()).unwrap_or_default()
        } else {
            String::new()
        },
        response: lines.get(start..end).map(|l| l.join(CRLF)).unwrap_or_default(),
    }
}

/// Returns true if the text contains a Lua error marker.
#[must_use]
pub fn has_error_marker(response: &str) -> bool {
    ERROR_MARKERS.iter().any(|m| response.contains(m))
}

/// Fails with [`Error::Communication`] if the device reported an error.
pub fn check_response(context: &str, result: &ExchangeResult) -> Result<()> {
    if result.is_device_error() {
        tracing::error!("{}: {}", context, result.response);
        return Err(Error::communication(context, result.response.clone()));
    }
    Ok(())
}

/// Parses a Lua boolean printed by `print()`.
pub fn parse_bool(response: &str) -> Result<bool> {
    let value = response.trim();
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(Error::communication("expected a boolean", response))
    }
}

/// Parses an unsigned integer printed by `print()`.
pub fn parse_integer(response: &str) -> Result<u64> {
    response
        .trim()
        .parse()
        .map_err(|_| Error::communication("expected an integer", response))
}

/// Parses the `name\tsize` lines printed by the file list loop.
pub fn parse_file_list(response: &str) -> Result<Vec<FileEntry>> {
    if response.trim().is_empty() {
        return Ok(Vec::new());
    }

    split_lines(response)
        .into_iter()
        .map(|line| -> Result<FileEntry> {
            let mut parts = line.split('\t');
            let name = parts.next().unwrap_or_default().trim();
            let size = parts
                .next()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| Error::communication("malformed file list entry", line))?;
            Ok(FileEntry {
                name: name.to_owned(),
                size,
            })
        })
        .collect()
}

/// Parses `free\tused\ttotal` printed by `file.fsinfo()`.
///
/// The returned [`FsInfo`] has an empty file list.
pub fn parse_fsinfo(response: &str) -> Result<FsInfo> {
    let fields: Vec<&str> = response.split('\t').map(str::trim).collect();
    if fields.len() != FS_INFO_FIELDS {
        return Err(Error::communication(
            format!("expected {FS_INFO_FIELDS} fs info fields, got {}", fields.len()),
            response,
        ));
    }

    let value = |s: &str| -> Result<u64> {
        s.parse()
            .map_err(|_| Error::communication("malformed fs info", response))
    };

    Ok(FsInfo {
        files: Vec::new(),
        free_bytes: value(fields[0])?,
        used_bytes: value(fields[1])?,
        total_bytes: value(fields[2])?,
    })
}

/// Parses the 8 tab-separated fields printed by `node.info()`.
pub fn parse_nodeinfo(response: &str) -> Result<NodeInfo> {
    if response.trim().is_empty() {
        return Err(Error::communication("info response is empty", response));
    }

    let fields: Vec<String> = response.split('\t').map(|f| f.trim().to_owned()).collect();
    let Ok(
        [
            major_ver,
            minor_ver,
            dev_ver,
            chip_id,
            flash_id,
            flash_size,
            flash_mode,
            flash_speed,
        ],
    ) = <[String; NODE_INFO_FIELDS]>::try_from(fields)
    else {
        return Err(Error::communication("error parsing info", response));
    };

    Ok(NodeInfo {
        major_ver,
        minor_ver,
        dev_ver,
        chip_id,
        flash_id,
        flash_size,
        flash_mode,
        flash_speed,
    })
}
