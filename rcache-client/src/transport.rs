//! # Stream Transport
//!
//! Purpose: Own one stream connection to the chosen server and move one
//! framed request out and one framed reply in, tolerating transient failures
//! with a bounded retry count.
//!
//! ## Design Principles
//! 1. **Bounded Retries**: Every step (connect, write, line read, payload
//!    read) gets `max_retries + 1` attempts. There is no backoff or jitter;
//!    the budget is a plain counter.
//! 2. **No Duplicate Bytes**: Writes and payload reads track an offset, so a
//!    retried attempt resumes where the last one stopped.
//! 3. **Optional Deadline**: When configured, one exchange must finish within
//!    the deadline; otherwise it fails with `DeadlineExceeded`.
//! 4. **Seam for Tests**: Sockets come from a `Connector`, so tests can
//!    script failures without a network.

use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use bytes::BytesMut;

use rcache_common::{io_detail, CacheError, CacheResult, ServerDescriptor, TransportProtocol};

use crate::resp::{encode_command, read_response, ReplySource, RespValue};

// Large enough to hold one full datagram when running over UDP.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Opens raw streams to a server.
pub trait Connector {
    type Stream: Read + Write;

    /// Makes one connection attempt.
    fn connect(&mut self, server: &ServerDescriptor) -> io::Result<Self::Stream>;
}

/// Connector backed by real sockets.
#[derive(Debug, Clone, Default)]
pub struct NetConnector {
    io_timeout: Option<Duration>,
}

impl NetConnector {
    pub fn new() -> Self {
        NetConnector::default()
    }

    /// Applies a read/write timeout to every socket so a stalled peer wakes
    /// the retry loop instead of blocking forever.
    pub fn with_io_timeout(io_timeout: Option<Duration>) -> Self {
        NetConnector {
            io_timeout: io_timeout.filter(|timeout| !timeout.is_zero()),
        }
    }
}

impl Connector for NetConnector {
    type Stream = NetStream;

    fn connect(&mut self, server: &ServerDescriptor) -> io::Result<NetStream> {
        match server.protocol {
            TransportProtocol::Tcp => {
                let stream = connect_tcp(server)?;
                // Disable Nagle to keep request latency low for small payloads.
                stream.set_nodelay(true)?;
                stream.set_read_timeout(self.io_timeout)?;
                stream.set_write_timeout(self.io_timeout)?;
                Ok(NetStream::Tcp(stream))
            }
            TransportProtocol::Udp => {
                let addr = resolve(server)?
                    .next()
                    .ok_or_else(|| no_address(server))?;
                let bind = if addr.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(bind)?;
                socket.connect(addr)?;
                let read_timeout = self.io_timeout.or_else(|| server.connect_timeout());
                socket.set_read_timeout(read_timeout)?;
                socket.set_write_timeout(self.io_timeout)?;
                Ok(NetStream::Udp(socket))
            }
        }
    }
}

/// Socket produced by `NetConnector`.
#[derive(Debug)]
pub enum NetStream {
    Tcp(TcpStream),
    /// Connected datagram socket; each read returns one datagram.
    Udp(UdpSocket),
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            NetStream::Tcp(stream) => stream.read(buf),
            NetStream::Udp(socket) => socket.recv(buf),
        }
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            NetStream::Tcp(stream) => stream.write(buf),
            NetStream::Udp(socket) => socket.send(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            NetStream::Tcp(stream) => stream.flush(),
            NetStream::Udp(_) => Ok(()),
        }
    }
}

fn resolve(server: &ServerDescriptor) -> io::Result<std::vec::IntoIter<SocketAddr>> {
    (server.host.as_str(), server.port).to_socket_addrs()
}

fn no_address(server: &ServerDescriptor) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidInput,
        format!("{} resolved to no address", server.address()),
    )
}

fn connect_tcp(server: &ServerDescriptor) -> io::Result<TcpStream> {
    let timeout = server.connect_timeout();
    let mut last_err = None;
    for addr in resolve(server)? {
        let result = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match result {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| no_address(server)))
}

/// One live connection with reusable buffers.
///
/// Not safe for concurrent use: one exchange must complete before the next
/// starts.
pub struct Transport<S> {
    reader: BufReader<S>,
    max_retries: u32,
    deadline: Option<Duration>,
    expires_at: Option<Instant>,
    write_buf: BytesMut,
    line_buf: Vec<u8>,
}

impl<S: Read + Write> Transport<S> {
    /// Connects with up to `server.max_retries()` extra attempts.
    pub fn connect<C>(
        connector: &mut C,
        server: &ServerDescriptor,
        deadline: Option<Duration>,
    ) -> CacheResult<Self>
    where
        C: Connector<Stream = S>,
    {
        let max_retries = server.max_retries();
        let attempts = max_retries + 1;
        let mut last_err: Option<io::Error> = None;

        for attempt in 1..=attempts {
            tracing::debug!(
                host = %server.host,
                port = server.port,
                protocol = %server.protocol,
                attempt,
                max_retries,
                "connecting"
            );
            match connector.connect(server) {
                Ok(stream) => {
                    if attempt > 1 {
                        tracing::info!(host = %server.host, port = server.port, attempt, "connected after retry");
                    }
                    return Ok(Transport::new(stream, max_retries, deadline));
                }
                Err(err) => {
                    tracing::warn!(
                        host = %server.host,
                        port = server.port,
                        attempt,
                        error = %err,
                        "connect attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        let (code, message) = last_err
            .as_ref()
            .map(io_detail)
            .unwrap_or_else(|| (0, "no connect attempt made".to_string()));
        Err(CacheError::Connection {
            host: server.host.clone(),
            port: server.port,
            protocol: server.protocol.to_string(),
            attempts,
            code,
            message,
        })
    }

    /// Wraps an already-open stream.
    pub fn new(stream: S, max_retries: u32, deadline: Option<Duration>) -> Self {
        Transport {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, stream),
            max_retries,
            deadline,
            expires_at: None,
            write_buf: BytesMut::with_capacity(256),
            line_buf: Vec::with_capacity(128),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Sends one command and decodes exactly one reply.
    pub fn exchange(&mut self, args: &[&[u8]]) -> CacheResult<RespValue> {
        self.expires_at = self.deadline.map(|deadline| Instant::now() + deadline);

        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        let frame = std::mem::take(&mut self.write_buf);
        let sent = self.send_frame(&frame);
        self.write_buf = frame;
        sent?;

        let mut line_buf = std::mem::take(&mut self.line_buf);
        let reply = read_response(&mut *self, &mut line_buf);
        self.line_buf = line_buf;
        self.expires_at = None;
        reply
    }

    /// Writes a fully encoded request.
    pub fn send_frame(&mut self, frame: &[u8]) -> CacheResult<()> {
        let attempts = self.max_retries + 1;
        let mut failures = 0;
        let mut written = 0;

        while written < frame.len() {
            self.check_deadline()?;
            let err = match self.reader.get_mut().write(&frame[written..]) {
                Ok(0) => io::Error::new(ErrorKind::WriteZero, "zero bytes written"),
                Ok(n) => {
                    written += n;
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => err,
            };

            failures += 1;
            tracing::debug!(attempt = failures, max_retries = self.max_retries, error = %err, "write attempt failed");
            if failures >= attempts {
                let (code, message) = io_detail(&err);
                return Err(CacheError::TransportWrite {
                    attempts,
                    code,
                    message,
                });
            }
        }

        self.reader.get_mut().flush()?;
        Ok(())
    }

    fn check_deadline(&self) -> CacheResult<()> {
        match (self.expires_at, self.deadline) {
            (Some(expires_at), Some(deadline)) if Instant::now() >= expires_at => {
                Err(CacheError::DeadlineExceeded(deadline))
            }
            _ => Ok(()),
        }
    }

    fn read_failed(&self, failures: u32, err: io::Error) -> CacheResult<()> {
        tracing::debug!(attempt = failures, max_retries = self.max_retries, error = %err, "read attempt failed");
        let attempts = self.max_retries + 1;
        if failures >= attempts {
            let (code, message) = io_detail(&err);
            return Err(CacheError::ProtocolRead {
                attempts,
                code,
                message,
            });
        }
        Ok(())
    }
}

impl<S: Read + Write> ReplySource for Transport<S> {
    fn read_line(&mut self, buf: &mut Vec<u8>) -> CacheResult<()> {
        buf.clear();
        let mut failures = 0;
        loop {
            self.check_deadline()?;
            // Bytes read before a failure stay in `buf`; the next attempt appends.
            let err = match self.reader.read_until(b'\n', buf) {
                Ok(_) if buf.last() == Some(&b'\n') => break,
                Ok(0) => io::Error::new(ErrorKind::UnexpectedEof, "connection closed by server"),
                Ok(_) => io::Error::new(ErrorKind::UnexpectedEof, "reply line truncated"),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => err,
            };
            failures += 1;
            self.read_failed(failures, err)?;
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(())
    }

    fn read_exact(&mut self, len: usize) -> CacheResult<Vec<u8>> {
        // Grows with the bytes actually received, never with the header alone.
        let mut data = Vec::with_capacity(len.min(READ_BUFFER_SIZE));
        let mut failures = 0;
        while data.len() < len {
            self.check_deadline()?;
            let err = match self.reader.fill_buf() {
                Ok([]) => io::Error::new(ErrorKind::UnexpectedEof, "reply payload truncated"),
                Ok(available) => {
                    let n = available.len().min(len - data.len());
                    data.extend_from_slice(&available[..n]);
                    self.reader.consume(n);
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => err,
            };
            failures += 1;
            self.read_failed(failures, err)?;
        }
        Ok(data)
    }
}
