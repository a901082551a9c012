#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rkv_client::{lookup, ClientConfig, Encoding, PoolConfig, ServerConfig};

pub type Command = Vec<Vec<u8>>;

type Handler = dyn Fn(&Command, &mut Session) + Send + Sync;

/// Every command received, tagged with the index of the accepted socket.
type Log = Arc<Mutex<Vec<(usize, Command)>>>;

/// In-process server speaking the inline, bulk and multi-bulk request forms.
pub struct MockServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    log: Log,
}

impl MockServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Command, &mut Session) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let accepted_count = accepted.clone();
        let shared_log = log.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                let id = accepted_count.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                let log = shared_log.clone();
                thread::spawn(move || serve(id, stream, handler, log));
            }
        });

        MockServer { addr, accepted, log }
    }

    /// Server that answers PING, AUTH and SELECT and nothing else.
    pub fn standard() -> Self {
        Self::start(standard)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().unwrap().iter().map(|(_, cmd)| cmd.clone()).collect()
    }

    /// Commands received on the `id`-th accepted socket, counting from 0.
    pub fn commands_on(&self, id: usize) -> Vec<Command> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(conn, _)| *conn == id)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands().iter().map(name).collect()
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            timeout_ms: 1_000,
            ..ServerConfig::new("127.0.0.1", self.port())
        }
    }

    /// Small pool, no background sweep, validation on borrow.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            server: self.server_config(),
            pool: PoolConfig {
                max_total: 4,
                eviction_interval_ms: 0,
                ..Default::default()
            },
        }
    }
}

fn serve(id: usize, stream: TcpStream, handler: Arc<Handler>, log: Log) {
    let writer = stream.try_clone().expect("clone");
    let mut session = Session {
        reader: BufReader::new(stream),
        writer,
    };
    while let Some(cmd) = session.read_command() {
        log.lock().unwrap().push((id, cmd.clone()));
        handler(&cmd, &mut session);
    }
}

/// Replies PONG to PING and OK to AUTH / SELECT.
pub fn standard(cmd: &Command, session: &mut Session) {
    match name(cmd).as_str() {
        "PING" => session.simple("PONG"),
        "AUTH" | "SELECT" => session.simple("OK"),
        "SUBSCRIBE" | "UNSUBSCRIBE" => {}
        other => session.error(&format!("ERR unknown command '{}'", other)),
    }
}

pub fn name(cmd: &Command) -> String {
    cmd.first()
        .map(|arg| String::from_utf8_lossy(arg).to_ascii_uppercase())
        .unwrap_or_default()
}

pub fn arg(cmd: &Command, idx: usize) -> &[u8] {
    &cmd[idx]
}

/// Polls `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Server side of one client connection.
pub struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Session {
    pub fn write(&mut self, data: &[u8]) {
        let _ = self.writer.write_all(data);
        let _ = self.writer.flush();
    }

    pub fn simple(&mut self, msg: &str) {
        self.write(format!("+{}\r\n", msg).as_bytes());
    }

    pub fn error(&mut self, msg: &str) {
        self.write(format!("-{}\r\n", msg).as_bytes());
    }

    pub fn integer(&mut self, value: i64) {
        self.write(format!(":{}\r\n", value).as_bytes());
    }

    pub fn bulk(&mut self, data: &[u8]) {
        let mut out = format!("${}\r\n", data.len()).into_bytes();
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
        self.write(&out);
    }

    pub fn nil(&mut self) {
        self.write(b"$-1\r\n");
    }

    pub fn array(&mut self, items: &[&[u8]]) {
        let mut out = format!("*{}\r\n", items.len()).into_bytes();
        for item in items {
            out.extend_from_slice(format!("${}\r\n", item.len()).as_bytes());
            out.extend_from_slice(item);
            out.extend_from_slice(b"\r\n");
        }
        self.write(&out);
    }

    pub fn close(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }

    fn read_command(&mut self) -> Option<Command> {
        let line = self.read_line()?;
        if line.first() == Some(&b'*') {
            return self.read_multibulk(&line[1..]);
        }

        let mut tokens: Command = line
            .split(|&b| b == b' ')
            .map(|token| token.to_vec())
            .collect();
        let is_bulk = lookup(&name(&tokens))
            .map(|spec| spec.encoding == Encoding::Bulk)
            .unwrap_or(false);
        if is_bulk && tokens.len() >= 2 {
            let len: usize = String::from_utf8_lossy(tokens.last()?).parse().ok()?;
            let payload = self.read_payload(len)?;
            tokens.pop();
            tokens.push(payload);
        }
        Some(tokens)
    }

    fn read_multibulk(&mut self, count: &[u8]) -> Option<Command> {
        let count: usize = String::from_utf8_lossy(count).parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let header = self.read_line()?;
            if header.first() != Some(&b'$') {
                return None;
            }
            let len: usize = String::from_utf8_lossy(&header[1..]).parse().ok()?;
            args.push(self.read_payload(len)?);
        }
        Some(args)
    }

    fn read_payload(&mut self, len: usize) -> Option<Vec<u8>> {
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data).ok()?;
        let mut crlf = [0u8; 2];
        self.reader.read_exact(&mut crlf).ok()?;
        if crlf != *b"\r\n" {
            return None;
        }
        Some(data)
    }

    fn read_line(&mut self) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        let bytes = self.reader.read_until(b'\n', &mut buf).ok()?;
        if bytes == 0 || !buf.ends_with(b"\r\n") {
            return None;
        }
        buf.truncate(buf.len() - 2);
        Some(buf)
    }
}
