//! Request/reply transport to the display driver
//!
//! The driver listens on a scalability-protocols REP socket. This module
//! implements the REQ side of that exchange over a Unix domain socket
//! (`ipc://`) or TCP (`tcp://`): an 8 byte protocol handshake, then length
//! prefixed frames whose body starts with a 4 byte request id that the
//! driver echoes back in its reply.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

/// Default driver endpoint
pub const DEFAULT_ADDRESS: &str = "ipc:///tmp/holoplay-driver.ipc";

/// Default receive timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// SP protocol ids
pub(crate) const PROTO_REQ0: u16 = 0x30;
pub(crate) const PROTO_REP0: u16 = 0x31;

/// Message type byte preceding every IPC frame
const IPC_MSG_USER: u8 = 0x01;

/// Frames larger than this indicate a corrupt stream
const MAX_FRAME_SIZE: u64 = 256 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection refused by driver at {0}")]
    ConnectionRefused(String),
    #[error("Connection to driver lost: {0}")]
    ConnectionLost(String),
    #[error("No reply from driver within {0:?}")]
    Timeout(Duration),
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Invalid driver address: {0}")]
    InvalidAddress(String),
    #[error("Handshake with driver failed: {0}")]
    Handshake(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed driver address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path
    Ipc(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl Endpoint {
    pub fn parse(address: &str) -> Result<Self, TransportError> {
        if let Some(path) = address.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(TransportError::InvalidAddress(address.to_string()));
            }
            Ok(Endpoint::Ipc(PathBuf::from(path)))
        } else if let Some(host) = address.strip_prefix("tcp://") {
            if !host.contains(':') {
                return Err(TransportError::InvalidAddress(address.to_string()));
            }
            Ok(Endpoint::Tcp(host.to_string()))
        } else {
            Err(TransportError::InvalidAddress(address.to_string()))
        }
    }

    fn framing(&self) -> Framing {
        match self {
            Endpoint::Ipc(_) => Framing::Ipc,
            Endpoint::Tcp(_) => Framing::Tcp,
        }
    }
}

/// Transport settings, overridable per service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub address: String,
    pub timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// Type byte + u64 length
    Ipc,
    /// u64 length
    Tcp,
}

impl Framing {
    pub(crate) fn header(self, body_len: u64) -> Vec<u8> {
        let mut header = Vec::with_capacity(9);
        if self == Framing::Ipc {
            header.push(IPC_MSG_USER);
        }
        header.extend_from_slice(&body_len.to_be_bytes());
        header
    }

    fn header_len(self) -> usize {
        match self {
            Framing::Ipc => 9,
            Framing::Tcp => 8,
        }
    }
}

/// Encode the SP handshake for a protocol id
pub(crate) fn handshake_bytes(protocol: u16) -> [u8; 8] {
    let [hi, lo] = protocol.to_be_bytes();
    [0x00, b'S', b'P', 0x00, hi, lo, 0x00, 0x00]
}

/// Decode a peer handshake, returning its protocol id
pub(crate) fn parse_handshake(data: &[u8; 8]) -> Option<u16> {
    if data[0] != 0x00 || data[1] != b'S' || data[2] != b'P' || data[3] != 0x00 {
        return None;
    }
    Some(u16::from_be_bytes([data[4], data[5]]))
}

/// Take one complete frame body off the front of `pending`
pub(crate) fn take_frame(pending: &mut Vec<u8>, framing: Framing) -> Result<Option<Vec<u8>>, TransportError> {
    let header_len = framing.header_len();
    if pending.len() < header_len {
        return Ok(None);
    }

    let len_start = header_len - 8;
    if framing == Framing::Ipc && pending[0] != IPC_MSG_USER {
        return Err(TransportError::ConnectionLost(format!(
            "unexpected message type {:#04x}",
            pending[0]
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&pending[len_start..header_len]);
    let body_len = u64::from_be_bytes(len_bytes);
    if body_len > MAX_FRAME_SIZE {
        return Err(TransportError::ConnectionLost(format!(
            "frame of {} bytes exceeds limit",
            body_len
        )));
    }

    let frame_end = header_len + body_len as usize;
    if pending.len() < frame_end {
        return Ok(None);
    }

    let body = pending[header_len..frame_end].to_vec();
    pending.drain(..frame_end);
    Ok(Some(body))
}

/// An established, handshaken byte stream
struct Connection {
    stream: Box<dyn Io>,
    framing: Framing,
    /// Bytes received but not yet consumed; keeps reads cancel-safe
    pending: Vec<u8>,
}

impl Connection {
    async fn handshake(&mut self) -> Result<(), TransportError> {
        self.stream.write_all(&handshake_bytes(PROTO_REQ0)).await?;
        self.stream.flush().await?;

        let mut peer = [0u8; 8];
        self.stream.read_exact(&mut peer).await.map_err(|e| {
            TransportError::Handshake(format!("no handshake from peer: {}", e))
        })?;

        match parse_handshake(&peer) {
            Some(PROTO_REP0) => Ok(()),
            Some(other) => Err(TransportError::Handshake(format!(
                "peer speaks protocol {:#06x}, expected REP0",
                other
            ))),
            None => Err(TransportError::Handshake("malformed handshake".to_string())),
        }
    }

    async fn send(&mut self, request_id: u32, payload: &[u8]) -> Result<(), TransportError> {
        let header = self.framing.header(4 + payload.len() as u64);
        self.stream.write_all(&header).await?;
        self.stream.write_all(&request_id.to_be_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(body) = take_frame(&mut self.pending, self.framing)? {
                return Ok(body);
            }
            self.pending.reserve(READ_CHUNK);
            let n = self.stream.read_buf(&mut self.pending).await?;
            if n == 0 {
                return Err(TransportError::ConnectionLost(
                    "driver closed the connection".to_string(),
                ));
            }
        }
    }

    /// Receive the reply for `request_id`, discarding stale replies left
    /// over from requests that timed out
    async fn recv_reply(&mut self, request_id: u32) -> Result<Vec<u8>, TransportError> {
        loop {
            let mut body = self.recv_frame().await?;
            if body.len() < 4 {
                return Err(TransportError::ConnectionLost(format!(
                    "reply of {} bytes has no request id",
                    body.len()
                )));
            }
            let reply_id = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            if reply_id != request_id {
                debug!(
                    expected = request_id,
                    got = reply_id,
                    "Discarding stale driver reply"
                );
                continue;
            }
            body.drain(..4);
            return Ok(body);
        }
    }
}

/// REQ-side connection to the display driver
///
/// One request may be outstanding at a time; `request` takes `&mut self` so
/// the borrow checker enforces the discipline.
pub struct DriverTransport {
    endpoint: Endpoint,
    address: String,
    timeout: Duration,
    connection: Option<Connection>,
    next_id: u32,
}

impl DriverTransport {
    /// Create a transport; nothing is dialed until [`connect`](Self::connect)
    pub fn new(options: &TransportOptions) -> Result<Self, TransportError> {
        let endpoint = Endpoint::parse(&options.address)?;
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);

        Ok(Self {
            endpoint,
            address: options.address.clone(),
            timeout: options.timeout,
            connection: None,
            next_id: seed & 0x7fff_ffff,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Next request id; the high bit marks the last backtrace hop
    fn next_request_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = (self.next_id + 1) & 0x7fff_ffff;
        id | 0x8000_0000
    }

    /// Dial the driver and perform the protocol handshake
    ///
    /// On failure the transport is left closed so `connect` can be retried.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connection.is_some() {
            debug!(address = %self.address, "Already connected to driver");
            return Ok(());
        }

        match timeout(self.timeout, self.open()).await {
            Ok(Ok(connection)) => {
                info!(address = %self.address, "Connected to driver");
                self.connection = Some(connection);
                Ok(())
            }
            Ok(Err(e)) => {
                self.connection = None;
                Err(e)
            }
            Err(_) => {
                self.connection = None;
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }

    async fn open(&self) -> Result<Connection, TransportError> {
        let stream: Box<dyn Io> = match &self.endpoint {
            Endpoint::Ipc(path) => dial_ipc(path, &self.address).await?,
            Endpoint::Tcp(host) => {
                let stream = TcpStream::connect(host)
                    .await
                    .map_err(|e| refused_or_io(e, &self.address))?;
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
        };

        let mut connection = Connection {
            stream,
            framing: self.endpoint.framing(),
            pending: Vec::new(),
        };
        connection.handshake().await?;
        Ok(connection)
    }

    /// Send one request and wait for its reply
    ///
    /// The payload is moved in so large quilt buffers are never copied here.
    pub async fn request(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let request_id = self.next_request_id();
        let limit = self.timeout;
        let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
        let deadline = Instant::now() + limit;

        trace!(id = request_id, size = payload.len(), "Sending driver request");

        // A partially written frame cannot be recovered
        match timeout_at(deadline, connection.send(request_id, &payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.connection = None;
                return Err(lost(e));
            }
            Err(_) => {
                warn!(address = %self.address, "Timed out sending request, dropping connection");
                self.connection = None;
                return Err(TransportError::Timeout(limit));
            }
        }
        drop(payload);

        match timeout_at(deadline, connection.recv_reply(request_id)).await {
            Ok(Ok(reply)) => {
                debug!(id = request_id, size = reply.len(), "Received driver reply");
                Ok(reply)
            }
            Ok(Err(e)) => {
                self.connection = None;
                Err(lost(e))
            }
            Err(_) => {
                warn!(address = %self.address, timeout = ?limit, "Driver did not reply in time");
                Err(TransportError::Timeout(limit))
            }
        }
    }

    /// Drop the connection; returns false if there was none
    pub fn disconnect(&mut self) -> bool {
        if self.connection.take().is_some() {
            info!(address = %self.address, "Closed connection to driver");
            true
        } else {
            debug!(address = %self.address, "There is no active driver connection");
            false
        }
    }

    /// Release the transport; safe to call any number of times
    pub fn close(&mut self) {
        if self.connection.take().is_some() {
            debug!(address = %self.address, "Transport closed");
        }
    }
}

impl Drop for DriverTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
async fn dial_ipc(path: &Path, address: &str) -> Result<Box<dyn Io>, TransportError> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| refused_or_io(e, address))?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn dial_ipc(_path: &Path, address: &str) -> Result<Box<dyn Io>, TransportError> {
    Err(TransportError::InvalidAddress(format!(
        "{} (ipc endpoints need Unix domain sockets)",
        address
    )))
}

fn refused_or_io(e: std::io::Error, address: &str) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
            TransportError::ConnectionRefused(address.to_string())
        }
        _ => TransportError::Io(e),
    }
}

/// I/O failures on an established connection mean the connection is gone
fn lost(e: TransportError) -> TransportError {
    match e {
        TransportError::Io(io) => TransportError::ConnectionLost(io.to_string()),
        other => other,
    }
}
