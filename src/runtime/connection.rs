//! Connection handler.
//!
//! Owns one accepted connection end to end: read until a full request frame
//! has arrived, run it through the worker's processor, write the framed
//! response, and repeat until the peer closes or something fails. Requests
//! on one connection are strictly sequential; the next read only starts
//! once the previous response is fully written.

use crate::config::ConnectionSettings;
use crate::processor::{ProcessError, Processor};
use crate::protocol::{self, DELIMITER};
use crate::runtime::FrameBuffer;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::str::Utf8Error;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// An accepted client connection.
///
/// Moving it into the worker pool hands over the socket; nothing else keeps
/// a handle to it.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

/// Why a connection ended abnormally. None of these reach past the worker
/// that owns the connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("no data received within {0:?}")]
    ReadTimeout(Duration),
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("request is not valid UTF-8: {0}")]
    Decode(#[from] Utf8Error),
    #[error("request exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("processor failed: {0}")]
    Processor(#[from] ProcessError),
    #[error("processor panicked")]
    ProcessorPanic,
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::ReadTimeout(_))
    }
}

/// Counters for one connection, reported when it closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub requests: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Per-worker handler. The read buffer and frame buffer are reused across
/// the connections the worker serves.
pub struct ConnectionHandler {
    worker_id: usize,
    settings: ConnectionSettings,
    read_buf: Vec<u8>,
    frame: FrameBuffer,
}

impl ConnectionHandler {
    pub fn new(worker_id: usize, settings: ConnectionSettings) -> Self {
        Self {
            worker_id,
            settings,
            read_buf: vec![0u8; settings.chunk_size],
            frame: FrameBuffer::with_capacity(settings.chunk_size),
        }
    }

    /// Serve a connection until it ends, then close it.
    ///
    /// The socket is shut down and dropped on every exit path.
    pub fn handle<P>(
        &mut self,
        conn: Connection,
        processor: &mut P,
    ) -> Result<ConnectionStats, ConnectionError>
    where
        P: Processor + ?Sized,
    {
        let Connection { mut stream, peer } = conn;

        let result = stream
            .set_read_timeout(Some(self.settings.read_timeout))
            .map_err(ConnectionError::Read)
            .and_then(|()| self.serve(&mut stream, peer, processor));

        let _ = stream.shutdown(Shutdown::Both);
        result
    }

    /// The request/response loop over any byte stream.
    pub fn serve<S, P>(
        &mut self,
        stream: &mut S,
        peer: SocketAddr,
        processor: &mut P,
    ) -> Result<ConnectionStats, ConnectionError>
    where
        S: Read + Write,
        P: Processor + ?Sized,
    {
        let worker = self.worker_id;
        let mut stats = ConnectionStats::default();
        self.frame.clear();

        loop {
            let n = match stream.read(&mut self.read_buf) {
                Ok(0) => {
                    if !self.frame.is_empty() {
                        debug!(worker, peer = %peer, pending = self.frame.len(), "Peer closed mid-request");
                    }
                    trace!(worker, peer = %peer, "Connection closed by client");
                    return Ok(stats);
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // SO_RCVTIMEO surfaces as EAGAIN on Unix and ETIMEDOUT on Windows
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(ConnectionError::ReadTimeout(self.settings.read_timeout));
                }
                Err(e) => return Err(ConnectionError::Read(e)),
            };

            stats.bytes_read += n as u64;
            self.frame.extend(&self.read_buf[..n]);

            let limit = self.settings.max_frame_size;
            if !self.frame.has_frame() {
                // The tail may be the start of a delimiter still in flight.
                let pending = self.frame.len().saturating_sub(DELIMITER.len() - 1);
                if let Some(limit) = limit.filter(|&l| pending > l) {
                    return Err(ConnectionError::FrameTooLarge { limit });
                }
                continue;
            }
            let Some((frame, trailing)) = self.frame.split() else {
                continue;
            };
            if let Some(limit) = limit.filter(|&l| frame.len() > l) {
                return Err(ConnectionError::FrameTooLarge { limit });
            }

            let request = protocol::decode_request(frame)?;
            debug!(worker, peer = %peer, bytes = frame.len(), "Complete request received");

            let start = Instant::now();
            let response = panic::catch_unwind(AssertUnwindSafe(|| processor.process(request)))
                .map_err(|_| ConnectionError::ProcessorPanic)??;
            debug!(worker, peer = %peer, elapsed = ?start.elapsed(), "Request processed");

            if !trailing.is_empty() {
                debug!(worker, peer = %peer, discarded = trailing.len(), "Discarding bytes after delimiter");
            }
            self.frame.clear();

            let encoded = protocol::build_response(&response);
            for chunk in encoded.chunks(self.settings.chunk_size) {
                stream.write_all(chunk).map_err(ConnectionError::Write)?;
            }
            stream.flush().map_err(ConnectionError::Write)?;

            stats.requests += 1;
            stats.bytes_written += encoded.len() as u64;
            debug!(worker, peer = %peer, bytes = encoded.len(), "Response sent");
        }
    }
}
