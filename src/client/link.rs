//! One client socket
//!
//! A link owns a connected, handshaken stream. Writes happen on the caller's
//! thread; a reader thread decodes incoming frames into a channel so that
//! several links can be waited on at once.

use std::io::{BufWriter, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::ClientOptions;
use crate::error::{Result, TesseraError};
use crate::network::{is_disconnect, Stream};
use crate::protocol::{
    decode_payload, encode_frame, Frame, FrameHeader, BINARY_HANDSHAKE, BINARY_HANDSHAKE_REPLY,
    HEADER_SIZE,
};

/// Which socket of a [`Connection`](super::Connection) something belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkId {
    /// The connection the client asked for
    Primary,
    /// A server reached through the cluster map, by position
    Cluster(usize),
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkId::Primary => write!(f, "primary"),
            LinkId::Cluster(i) => write!(f, "cluster#{}", i),
        }
    }
}

pub struct Link {
    id: LinkId,
    host: String,
    port: u16,
    writer: BufWriter<Stream>,
    frames: Receiver<Result<Frame>>,
    control: Stream,
    reader: Option<JoinHandle<()>>,
    debug_seq: u16,
    connected: bool,
}

impl Link {
    /// Connect, switch to binary and start the reader thread
    ///
    /// A host starting with `/` is the path of a local socket; the port is
    /// then ignored.
    pub fn connect(id: LinkId, host: &str, port: u16, options: &ClientOptions) -> Result<Self> {
        let mut stream = open_stream(host, port, options.connect_timeout)?;

        stream.write_all(format!("{}\r\n", BINARY_HANDSHAKE).as_bytes())?;
        stream.flush()?;

        stream.set_read_timeout(Some(options.connect_timeout))?;
        let mut reply = [0u8; BINARY_HANDSHAKE_REPLY.len()];
        stream.read_exact(&mut reply).map_err(|e| timeout_or(e, "binary handshake"))?;
        if reply != BINARY_HANDSHAKE_REPLY {
            return Err(TesseraError::Protocol(format!(
                "unexpected handshake reply {:?}",
                String::from_utf8_lossy(&reply)
            )));
        }
        stream.set_read_timeout(None)?;

        let (tx, rx) = channel::unbounded();
        let reader_stream = stream.try_clone()?;
        let payload_timeout = options.payload_timeout;
        let reader = thread::Builder::new()
            .name(format!("tessera-{}-reader", id))
            .spawn(move || run_reader(reader_stream, tx, payload_timeout))?;

        tracing::debug!("Connected {} link to {}:{}", id, host, port);

        Ok(Self {
            id,
            host: host.to_string(),
            port,
            control: stream.try_clone()?,
            writer: BufWriter::new(stream),
            frames: rx,
            reader: Some(reader),
            debug_seq: 0,
            connected: true,
        })
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Incoming frames (or the error that ended the reader)
    pub fn frames(&self) -> &Receiver<Result<Frame>> {
        &self.frames
    }

    /// Write one frame, stamping the link's debug sequence
    pub fn send(&mut self, frame: &mut Frame) -> Result<()> {
        if !self.connected {
            return Err(TesseraError::Network(format!("{} link is disconnected", self.id)));
        }
        frame.debug_seq = self.debug_seq;
        self.debug_seq = self.debug_seq.wrapping_add(1);

        let encoded = encode_frame(frame)?;
        let result = self
            .writer
            .write_all(&encoded)
            .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            self.connected = false;
            return Err(e.into());
        }
        Ok(())
    }

    /// Next frame from this link. `None` timeout waits forever.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        let received = match timeout {
            Some(timeout) => self.frames.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => {
                    TesseraError::Timeout(format!("no frame from {} link within {:?}", self.id, timeout))
                }
                RecvTimeoutError::Disconnected => self.gone(),
            })?,
            None => self.frames.recv().map_err(|_| self.gone())?,
        };
        // the reader stops after reporting any error
        if received.is_err() {
            self.connected = false;
        }
        received
    }

    fn gone(&self) -> TesseraError {
        TesseraError::Network(format!("{} link to {}:{} is closed", self.id, self.host, self.port))
    }

    /// Close the socket and stop the reader. Safe to call more than once.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.control.shutdown();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open_stream(host: &str, port: u16, timeout: Duration) -> Result<Stream> {
    #[cfg(unix)]
    if host.starts_with('/') {
        return Ok(Stream::Unix(UnixStream::connect(host)?));
    }

    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(Stream::Tcp(stream));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) => TesseraError::Network(format!("cannot connect to {}:{}: {}", host, port, e)),
        None => TesseraError::Network(format!("{} did not resolve to any address", host)),
    })
}

fn timeout_or(e: std::io::Error, what: &str) -> TesseraError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TesseraError::Timeout(format!("{} timed out", what)),
        _ => e.into(),
    }
}

fn run_reader(mut stream: Stream, tx: Sender<Result<Frame>>, payload_timeout: Duration) {
    loop {
        let result = read_one(&mut stream, payload_timeout);
        let failed = result.is_err();
        if let Err(TesseraError::Io(e)) = &result {
            if is_disconnect(e) {
                tracing::debug!("Server closed the connection");
            }
        }
        if tx.send(result).is_err() || failed {
            break;
        }
    }
}

/// Read one frame: wait for a header as long as it takes, then give the
/// payload at most `payload_timeout`
fn read_one(stream: &mut Stream, payload_timeout: Duration) -> Result<Frame> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header)?;
    let header = FrameHeader::parse(&header)?;

    stream.set_read_timeout(Some(payload_timeout))?;
    let mut payload = vec![0u8; header.payload_size as usize];
    let read = stream.read_exact(&mut payload);
    stream.set_read_timeout(None)?;
    read.map_err(|e| timeout_or(e, "frame payload"))?;

    let frame = decode_payload(&header, &payload)?;
    tracing::trace!("<- {}", frame);
    Ok(frame)
}
