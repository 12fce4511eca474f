//! Lua command catalog for the NodeMCU interactive shell.
//!
//! Every command the engine issues is a fixed template with positional
//! `{N}` placeholders. Templates are rendered with [`Command::render`] and
//! sent as one line, or line by line for the multi-line helper routines.

use std::fmt::{self, Display, Write};

/// Prompt emitted by the Lua interpreter when it is ready for input.
pub const PROMPT: &str = "> ";

/// Line separator used by the device.
pub const CRLF: &str = "\r\n";

/// A template argument. `Sync` keeps futures holding arguments `Send`.
pub type Arg<'a> = &'a (dyn Display + Sync);

/// Lua scripts understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Restart the board.
    SoftRestart,
    /// Reconfigure UART 0: `{0}` baud rate, `{1}` echo flag.
    UartSetup,
    /// Print the 8 `node.info()` fields.
    PrintInfo,
    /// Print free, used and total file system bytes.
    PrintFsInfo,
    /// Print the chip id.
    PrintChipId,
    /// Print the free heap.
    PrintHeap,
    /// Format the file system.
    Format,
    /// Print one `name\tsize` line per file.
    ListFiles,
    /// Print a file's contents between start and end banners.
    PrintFile,
    /// Run a Lua file.
    DoFile,
    /// Compile a Lua file to bytecode.
    CompileFile,
    /// Rename `{0}` to `{1}`.
    RenameFile,
    /// Remove a file.
    RemoveFile,
    /// Print whether a file exists.
    FileExists,
    /// Install the `_dl` routine streaming `{0}` in delimited chunks.
    DownloadHelper,
    /// Run the installed `_dl` routine.
    DownloadStart,
    /// Remove the `_dl` routine.
    DownloadEnd,
    /// Install the `_up` routine appending received chunks to `{0}`.
    UploadHelper,
    /// Run `_up` with packet count, packet size and last packet size.
    UploadStart,
    /// Remove the `_up` routine.
    UploadEnd,
}

impl Command {
    /// Returns the Lua template.
    #[must_use]
    pub const fn template(self) -> &'static str {
        match self {
            Self::SoftRestart => "node.restart()",
            Self::UartSetup => "uart.setup(0,{0},8,0,1,{1})",
            Self::PrintInfo => "print(node.info());",
            Self::PrintFsInfo => "print(file.fsinfo())",
            Self::PrintChipId => "print(node.chipid())",
            Self::PrintHeap => "print(node.heap())",
            Self::Format => "file.format()",
            Self::ListFiles => "for key,value in pairs(file.list()) do print(key,value) end",
            Self::PrintFile => concat!(
                "file.open(\"{0}\") print('---Start of file {0}---') ",
                "print(file.read()) file.close() print('---End of file {0}---')"
            ),
            Self::DoFile => "dofile(\"{0}\")",
            Self::CompileFile => "node.compile(\"{0}\")",
            Self::RenameFile => "file.rename(\"{0}\",\"{1}\")",
            Self::RemoveFile => "file.remove(\"{0}\")",
            Self::FileExists => "print(file.exists(\"{0}\"))",
            Self::DownloadHelper => DOWNLOAD_HELPER,
            Self::DownloadStart => "_dl()",
            Self::DownloadEnd => "_dl=nil",
            Self::UploadHelper => UPLOAD_HELPER,
            Self::UploadStart => "_up({0},{1},{2})",
            Self::UploadEnd => "_up=nil",
        }
    }

    /// Returns the number of arguments the template expects.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::SoftRestart
            | Self::PrintInfo
            | Self::PrintFsInfo
            | Self::PrintChipId
            | Self::PrintHeap
            | Self::Format
            | Self::ListFiles
            | Self::DownloadStart
            | Self::DownloadEnd
            | Self::UploadEnd => 0,
            Self::PrintFile
            | Self::DoFile
            | Self::CompileFile
            | Self::RemoveFile
            | Self::FileExists
            | Self::DownloadHelper
            | Self::UploadHelper => 1,
            Self::UartSetup | Self::RenameFile => 2,
            Self::UploadStart => 3,
        }
    }

    /// Renders the template with positional arguments.
    ///
    /// Placeholders are substituted in a single pass, so argument text that
    /// happens to contain `{N}` is copied verbatim.
    #[must_use]
    pub fn render(self, args: &[Arg<'_>]) -> String {
        debug_assert_eq!(args.len(), self.arity(), "wrong argument count for {self:?}");

        let template = self.template();
        let mut out = String::with_capacity(template.len() + 16);
        let mut chars = template.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if c == '{' {
                if let Some(arg) = placeholder(&template[i..]).and_then(|n| args.get(n)) {
                    let _ = write!(out, "{arg}");
                    // Skip the digit and closing brace.
                    chars.next();
                    chars.next();
                    continue;
                }
            }
            out.push(c);
        }

        out
    }

    /// Renders the template and splits it into lines to send one by one.
    #[must_use]
    pub fn render_lines(self, args: &[Arg<'_>]) -> Vec<String> {
        self.render(args).lines().map(str::to_owned).collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template())
    }
}

/// Parses a `{N}` placeholder at the start of `s`.
fn placeholder(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'{' && bytes[1].is_ascii_digit() && bytes[2] == b'}' {
        Some(usize::from(bytes[1] - b'0'))
    } else {
        None
    }
}

/// Streams the file in 1024-byte chunks wrapped in data markers. The
/// markers are split in the source so the echoed script never contains them.
const DOWNLOAD_HELPER: &str = "_dl=function()
  uart.write(0, '>'..' ')
  file.open(\"{0}\",\"r\")
  local buf
  repeat
    buf = file.read(1024)
    if buf ~= nil then
      buf='~~~'..'DATA-START~~~'..buf..'~~~'..'DATA-END~~~'
      uart.write(0,buf)
    end
    tmr.wdclr()
  until(buf == nil)
  file.close()
end";

/// Receives `n` chunks of `l` bytes, acknowledging each with `i,l> `, then
/// re-arms itself once for a final short chunk of `ll` bytes.
const UPLOAD_HELPER: &str = "_up=function(n, l, ll)
  local i = 0
  uart.on('data', l, function(b)
    i = i + 1
    file.open(\"{0}\",\"a+\")
    file.write(b)
    file.close()
    uart.write(0, i..','..l..'>'..' ')
    if i == n then
      uart.on('data')
    end
    if i == n-1 and ll>0 then
      _up(1,ll,ll)
    end
  end,0)
end";
