//! In-memory RESP server used by unit tests.
//!
//! `MemoryServer` holds the shared state; each `MemoryConnector::connect`
//! hands out a `MemoryStream` whose writes are parsed as commands and whose
//! reads return the replies.
//!
//! `capture_events` records the `tracing` events emitted by a closure.

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use rcache_common::ServerDescriptor;

use crate::transport::Connector;

#[derive(Default)]
struct ServerState {
    data: HashMap<Vec<u8>, Vec<u8>>,
    expiries: HashMap<Vec<u8>, i64>,
    commands: Vec<Vec<Vec<u8>>>,
    password: Option<Vec<u8>>,
    connect_failures: u32,
    connect_attempts: u32,
    broken: bool,
    scripted: VecDeque<Vec<u8>>,
}

#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        MemoryServer::default()
    }

    pub fn with_password(self, password: &str) -> Self {
        self.state.lock().password = Some(password.as_bytes().to_vec());
        self
    }

    /// Refuses the first `count` connection attempts.
    pub fn failing_connects(self, count: u32) -> Self {
        self.state.lock().connect_failures = count;
        self
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<Vec<Vec<u8>>> {
        self.state.lock().commands.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    /// When set, every write fails with `BrokenPipe`.
    pub fn set_broken(&self, broken: bool) {
        self.state.lock().broken = broken;
    }

    pub fn expiry(&self, key: &[u8]) -> Option<i64> {
        self.state.lock().expiries.get(key).copied()
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) {
        self.state.lock().data.insert(key.to_vec(), value.to_vec());
    }

    /// Answers the next command with `raw` bytes instead of executing it.
    pub fn reply_raw(&self, raw: &[u8]) {
        self.state.lock().scripted.push_back(raw.to_vec());
    }

    fn dispatch(&self, args: Vec<Vec<u8>>) -> Vec<u8> {
        let mut state = self.state.lock();
        state.commands.push(args.clone());
        if let Some(raw) = state.scripted.pop_front() {
            return raw;
        }

        let name = args[0].to_ascii_uppercase();
        match (name.as_slice(), &args[1..]) {
            (b"AUTH", [secret]) => match &state.password {
                Some(password) if password == secret => b"+OK\r\n".to_vec(),
                Some(_) => b"-ERR invalid password\r\n".to_vec(),
                None => b"-ERR Client sent AUTH, but no password is set\r\n".to_vec(),
            },
            (b"SELECT", [_]) => b"+OK\r\n".to_vec(),
            (b"PING", []) => b"+PONG\r\n".to_vec(),
            (b"GET", [key]) => bulk(state.data.get(key).map(Vec::as_slice)),
            (b"MGET", keys) if !keys.is_empty() => {
                let mut out = format!("*{}\r\n", keys.len()).into_bytes();
                for key in keys {
                    out.extend(bulk(state.data.get(key).map(Vec::as_slice)));
                }
                out
            }
            (b"SET", [key, value]) => {
                state.expiries.remove(key);
                state.data.insert(key.clone(), value.clone());
                b"+OK\r\n".to_vec()
            }
            (b"EXPIRE", [key, seconds]) => {
                let Some(seconds) = parse_int(seconds) else {
                    return b"-ERR value is not an integer or out of range\r\n".to_vec();
                };
                if state.data.contains_key(key) {
                    state.expiries.insert(key.clone(), seconds);
                    b":1\r\n".to_vec()
                } else {
                    b":0\r\n".to_vec()
                }
            }
            (b"DEL", keys) if !keys.is_empty() => {
                let removed = keys
                    .iter()
                    .filter(|key| state.data.remove(key.as_slice()).is_some())
                    .count();
                format!(":{}\r\n", removed).into_bytes()
            }
            (b"FLUSHDB", []) => {
                state.data.clear();
                state.expiries.clear();
                b"+OK\r\n".to_vec()
            }
            (b"INCR" | b"DECR", [key]) => {
                let current = match state.data.get(key) {
                    Some(raw) => match parse_int(raw) {
                        Some(value) => value,
                        None => return b"-ERR value is not an integer or out of range\r\n".to_vec(),
                    },
                    None => 0,
                };
                let next = if name == b"INCR" { current + 1 } else { current - 1 };
                state.data.insert(key.clone(), next.to_string().into_bytes());
                format!(":{}\r\n", next).into_bytes()
            }
            _ => b"-ERR unknown command\r\n".to_vec(),
        }
    }
}

fn bulk(value: Option<&[u8]>) -> Vec<u8> {
    match value {
        Some(data) => {
            let mut out = format!("${}\r\n", data.len()).into_bytes();
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
            out
        }
        None => b"$-1\r\n".to_vec(),
    }
}

fn parse_int(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Parses one complete command from the front of `buf`.
fn parse_command(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let (count, mut pos) = header(buf, 0, b'*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, start) = header(buf, pos, b'$')?;
        let end = start + len;
        if buf.len() < end + 2 {
            return None;
        }
        args.push(buf[start..end].to_vec());
        pos = end + 2;
    }
    Some((args, pos))
}

fn header(buf: &[u8], pos: usize, tag: u8) -> Option<(usize, usize)> {
    if buf.get(pos) != Some(&tag) {
        return None;
    }
    let rest = &buf[pos + 1..];
    let line_end = rest.windows(2).position(|w| w == b"\r\n")?;
    let value = std::str::from_utf8(&rest[..line_end]).ok()?.parse().ok()?;
    Some((value, pos + 1 + line_end + 2))
}

pub struct MemoryConnector {
    server: MemoryServer,
}

impl Connector for MemoryConnector {
    type Stream = MemoryStream;

    fn connect(&mut self, _server: &ServerDescriptor) -> io::Result<MemoryStream> {
        let mut state = self.server.state.lock();
        state.connect_attempts += 1;
        if state.connect_attempts <= state.connect_failures {
            return Err(io::Error::new(ErrorKind::ConnectionRefused, "connection refused"));
        }
        Ok(MemoryStream {
            server: self.server.clone(),
            pending: Vec::new(),
            output: VecDeque::new(),
        })
    }
}

pub struct MemoryStream {
    server: MemoryServer,
    pending: Vec<u8>,
    output: VecDeque<u8>,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.server.state.lock().broken {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"));
        }
        self.pending.extend_from_slice(buf);
        while let Some((args, used)) = parse_command(&self.pending) {
            self.pending.drain(..used);
            let reply = self.server.dispatch(args);
            self.output.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One `tracing` event seen by `capture_events`.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub target: String,
    pub level: Level,
}

struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        self.events.lock().push(CapturedEvent {
            target: metadata.target().to_string(),
            level: *metadata.level(),
        });
    }
}

/// Runs `f` with a thread-local subscriber and returns its result together
/// with every event it emitted.
pub fn capture_events<T>(f: impl FnOnce() -> T) -> (T, Vec<CapturedEvent>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        events: Arc::clone(&events),
    });
    let result = tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().clone();
    (result, captured)
}
