//! Scripted NodeMCU shell emulator for tests.
//!
//! Speaks the same text protocol as the firmware: optional echo, `> `
//! prompts, `>> ` continuation while a function is being defined, and the
//! behaviour of the download and upload helper routines.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

use crate::client::NodeMcu;
use crate::commands::Settings;
use crate::protocol::{CRLF, DOWNLOAD_CHUNK_SIZE, PROMPT, encode_frame};
use crate::transport::mock::{MockState, MockTransport};

/// Fields printed by `node.info()`.
pub(crate) const NODE_INFO: &str = "1\t5\t4\t10619037\t1458400\t4096\t0\t40000000";

/// Size of the emulated file system.
pub(crate) const TOTAL_BYTES: u64 = 3_372_406;

/// Continuation prompt while a multi-line statement is open.
const CONTINUATION: &str = ">> ";

/// Idle time after which a partial upload packet is treated as shell input.
const PACKET_IDLE: Duration = Duration::from_millis(200);

/// Installs a test subscriber honouring `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Settings matching a device created with [`FakeDevice::echo`].
pub(crate) fn settings(echo: bool) -> Settings {
    Settings {
        timeout: Duration::from_secs(1),
        echo,
        ..Settings::default()
    }
}

type Files = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// Builder for an emulated device.
#[derive(Default)]
pub(crate) struct FakeDevice {
    echo: bool,
    files: BTreeMap<String, Vec<u8>>,
    replies: HashMap<String, String>,
    hang_up_after_chunks: Option<usize>,
    hang_up_after_packets: Option<usize>,
}

impl FakeDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Echoes every received line.
    pub(crate) fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Stores a file.
    pub(crate) fn file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.to_owned(), data.into());
        self
    }

    /// Answers `line` with `body` instead of the emulated behaviour.
    pub(crate) fn reply(mut self, line: &str, body: &str) -> Self {
        self.replies.insert(line.to_owned(), body.to_owned());
        self
    }

    /// Drops the connection after sending `chunks` download frames.
    pub(crate) fn hang_up_after_chunks(mut self, chunks: usize) -> Self {
        self.hang_up_after_chunks = Some(chunks);
        self
    }

    /// Drops the connection after storing `packets` upload packets, without
    /// acknowledging the last one.
    pub(crate) fn hang_up_after_packets(mut self, packets: usize) -> Self {
        self.hang_up_after_packets = Some(packets);
        self
    }

    /// Starts the emulator and connects a client to it.
    pub(crate) fn connect(self) -> (NodeMcu<MockTransport>, DeviceHandle, Arc<Mutex<MockState>>) {
        init_tracing();

        let (transport, stream) = MockTransport::pair();
        let state = transport.state();
        let echo = self.echo;
        let handle = self.spawn(stream);
        let client = NodeMcu::with_transport(transport, settings(echo));
        (client, handle, state)
    }

    /// Runs the emulator on the device end of a pipe.
    pub(crate) fn spawn(self, stream: DuplexStream) -> DeviceHandle {
        let handle = DeviceHandle {
            log: Arc::new(Mutex::new(Vec::new())),
            files: Arc::new(Mutex::new(self.files)),
        };

        let emulator = Emulator {
            io: BufReader::new(stream),
            echo: self.echo,
            files: Arc::clone(&handle.files),
            replies: self.replies,
            hang_up_after_chunks: self.hang_up_after_chunks,
            hang_up_after_packets: self.hang_up_after_packets,
            log: Arc::clone(&handle.log),
            queued: VecDeque::new(),
            defining: None,
            download_target: None,
            upload_target: None,
        };
        tokio::spawn(emulator.run());

        handle
    }
}

/// Inspection handle on a running emulator.
pub(crate) struct DeviceHandle {
    log: Arc<Mutex<Vec<String>>>,
    files: Files,
}

impl DeviceHandle {
    /// Every line received so far.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// How many times `line` was received.
    pub(crate) fn count(&self, line: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|l| *l == line).count()
    }

    /// Polls until `line` has been received.
    pub(crate) async fn wait_for(&self, line: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.count(line) > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    /// Contents of a stored file.
    pub(crate) fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).cloned()
    }
}

struct Emulator {
    io: BufReader<DuplexStream>,
    echo: bool,
    files: Files,
    replies: HashMap<String, String>,
    hang_up_after_chunks: Option<usize>,
    hang_up_after_packets: Option<usize>,
    log: Arc<Mutex<Vec<String>>>,
    /// Lines recovered from an abandoned upload.
    queued: VecDeque<String>,
    defining: Option<Vec<String>>,
    download_target: Option<String>,
    upload_target: Option<String>,
}

impl Emulator {
    async fn run(mut self) {
        let mut raw = Vec::new();
        loop {
            let line = if let Some(line) = self.queued.pop_front() {
                line
            } else {
                raw.clear();
                match self.io.read_until(b'\n', &mut raw).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => String::from_utf8_lossy(&raw)
                        .trim_end_matches(['\n', '\r'])
                        .to_owned(),
                }
            };

            match self.handle_line(&line).await {
                Ok(true) => {}
                Ok(false) | Err(_) => return,
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let io = self.io.get_mut();
        io.write_all(data).await?;
        io.flush().await
    }

    async fn respond(&mut self, body: &str) -> io::Result<()> {
        let mut out = String::new();
        if !body.is_empty() {
            out.push_str(body);
            out.push_str(CRLF);
        }
        out.push_str(PROMPT);
        self.write(out.as_bytes()).await
    }

    fn has_file(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }

    /// Handles one shell line. Returns `false` to hang up.
    async fn handle_line(&mut self, line: &str) -> io::Result<bool> {
        self.log.lock().unwrap().push(line.to_owned());

        if self.echo {
            self.write(format!("{line}{CRLF}").as_bytes()).await?;
        }

        if let Some(mut body) = self.defining.take() {
            body.push(line.to_owned());
            if line == "end" {
                self.define(&body);
                self.write(PROMPT.as_bytes()).await?;
            } else {
                self.defining = Some(body);
                self.write(CONTINUATION.as_bytes()).await?;
            }
            return Ok(true);
        }

        if let Some(body) = self.replies.get(line).cloned() {
            self.respond(&body).await?;
            return Ok(true);
        }

        if line.starts_with("_dl=function") || line.starts_with("_up=function") {
            self.defining = Some(vec![line.to_owned()]);
            self.write(CONTINUATION.as_bytes()).await?;
            return Ok(true);
        }

        let args = quoted(line);
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();

        match line {
            "_dl()" => return self.download().await,
            "_dl=nil" | "_up=nil" => self.respond("").await?,
            "file.format()" => {
                self.files.lock().unwrap().clear();
                self.respond("format done.").await?;
            }
            "for key,value in pairs(file.list()) do print(key,value) end" => {
                let listing: Vec<String> = self
                    .files
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(name, data)| format!("{name}\t{}", data.len()))
                    .collect();
                self.respond(&listing.join(CRLF)).await?;
            }
            "print(file.fsinfo())" => {
                let used: u64 = self
                    .files
                    .lock()
                    .unwrap()
                    .values()
                    .map(|d| d.len() as u64)
                    .sum();
                self.respond(&format!("{}\t{used}\t{TOTAL_BYTES}", TOTAL_BYTES - used))
                    .await?;
            }
            "print(node.info());" => self.respond(NODE_INFO).await?,
            "print(node.chipid())" => self.respond("10619037").await?,
            "print(node.heap())" => self.respond("38120").await?,
            "node.restart()" => {
                self.write(b"\r\n ets Jan  8 2013,rst cause:2, boot mode:(3,6)\r\n")
                    .await?;
                self.respond("NodeMCU 1.5.4").await?;
            }
            _ if line.starts_with("_up(") => return self.upload(line).await,
            _ if line.starts_with("print(file.exists(") => {
                let exists = self.has_file(&arg(0));
                self.respond(&exists.to_string()).await?;
            }
            _ if line.starts_with("file.remove(") => {
                self.files.lock().unwrap().remove(&arg(0));
                self.respond("").await?;
            }
            _ if line.starts_with("file.rename(") => {
                {
                    let mut files = self.files.lock().unwrap();
                    if let Some(data) = files.remove(&arg(0)) {
                        files.insert(arg(1), data);
                    }
                }
                self.respond("").await?;
            }
            _ if line.starts_with("node.compile(") => {
                let name = arg(0);
                let compiled = self.files.lock().unwrap().get(&name).cloned();
                match compiled {
                    Some(data) => {
                        let lc = name.trim_end_matches(".lua").to_owned() + ".lc";
                        self.files.lock().unwrap().insert(lc, data);
                        self.respond("").await?;
                    }
                    None => {
                        self.respond("stdin:1: bad argument #1 to 'compile' (file not found)")
                            .await?;
                    }
                }
            }
            _ if line.starts_with("file.open(") && line.contains("print(file.read())") => {
                let name = arg(0);
                let contents = self.files.lock().unwrap().get(&name).cloned();
                let text = contents.map_or_else(
                    || "nil".to_owned(),
                    |data| String::from_utf8_lossy(&data).into_owned(),
                );
                self.respond(&format!(
                    "---Start of file {name}---{CRLF}{text}{CRLF}---End of file {name}---"
                ))
                .await?;
            }
            _ if line.starts_with("dofile(") => {
                let name = arg(0);
                if self.has_file(&name) {
                    self.respond(&format!("hello from {name}")).await?;
                } else {
                    self.respond(&format!("stdin:1: cannot open {name}")).await?;
                }
            }
            _ if line.starts_with("uart.setup(") => {
                self.echo = line.trim_end_matches(')').ends_with(",1");
                self.respond("").await?;
            }
            _ => {
                self.respond(&format!("stdin:1: unexpected symbol near '{line}'"))
                    .await?;
            }
        }

        Ok(true)
    }

    /// Records which file a completed helper definition works on.
    fn define(&mut self, body: &[String]) {
        let target = body
            .iter()
            .find(|l| l.contains("file.open("))
            .and_then(|l| quoted(l).into_iter().next());

        if body[0].starts_with("_dl=") {
            self.download_target = target;
        } else {
            self.upload_target = target;
        }
    }

    async fn download(&mut self) -> io::Result<bool> {
        let data = self
            .download_target
            .as_ref()
            .and_then(|name| self.files.lock().unwrap().get(name).cloned())
            .unwrap_or_default();

        // `uart.write(0, '>'..' ')` at the start of the helper.
        self.write(PROMPT.as_bytes()).await?;

        for (i, chunk) in data.chunks(DOWNLOAD_CHUNK_SIZE).enumerate() {
            if self.hang_up_after_chunks == Some(i) {
                return Ok(false);
            }
            self.write(&encode_frame(chunk)).await?;
        }

        self.write(PROMPT.as_bytes()).await?;
        Ok(true)
    }

    async fn upload(&mut self, line: &str) -> io::Result<bool> {
        let params: Vec<usize> = line
            .trim_start_matches("_up(")
            .trim_end_matches(')')
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect();
        let [mut n, mut l, ll] = params[..] else {
            self.respond("stdin:1: bad argument").await?;
            return Ok(true);
        };

        self.respond("").await?;
        if l == 0 {
            return Ok(true);
        }

        let target = self.upload_target.clone().unwrap_or_default();
        let mut i = 0;
        let mut stored = 0;
        loop {
            match self.read_packet(l).await? {
                Ok(packet) => {
                    i += 1;
                    stored += 1;
                    self.files
                        .lock()
                        .unwrap()
                        .entry(target.clone())
                        .or_default()
                        .extend_from_slice(&packet);
                    if self.hang_up_after_packets == Some(stored) {
                        return Ok(false);
                    }
                    self.write(format!("{i},{l}> ").as_bytes()).await?;

                    if i == n {
                        return Ok(true);
                    }
                    if i == n - 1 && ll > 0 {
                        n = 1;
                        l = ll;
                        i = 0;
                    }
                }
                Err(partial) => {
                    // The host stopped sending; whatever arrived is shell input.
                    let text = String::from_utf8_lossy(&partial).into_owned();
                    self.queued.extend(
                        text.lines()
                            .map(|l| l.trim_end_matches('\r').to_owned())
                            .filter(|l| !l.is_empty()),
                    );
                    return Ok(true);
                }
            }
        }
    }

    /// Reads exactly `len` bytes, or returns what arrived before going idle.
    async fn read_packet(&mut self, len: usize) -> io::Result<Result<Vec<u8>, Vec<u8>>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match tokio::time::timeout(PACKET_IDLE, self.io.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(e),
                Err(_) if filled == 0 => {}
                Err(_) => {
                    buf.truncate(filled);
                    return Ok(Err(buf));
                }
            }
        }
        Ok(Ok(buf))
    }
}

/// Extracts the double-quoted arguments of a Lua call.
fn quoted(line: &str) -> Vec<String> {
    line.split('"').skip(1).step_by(2).map(str::to_owned).collect()
}
