//! TCP listener and length-framed stream types.
//!
//! A framed stream carries discrete wire units over TCP: a `u32`
//! big-endian length prefix followed by the payload. Reads and writes of
//! whole frames are the only operations exposed; nothing above this layer
//! touches raw byte streams.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::addr::parse_addr;
use crate::transport::{TransportError, TransportResult};
use crate::{LENGTH_PREFIX_SIZE, MAX_WIRE_FRAME};

/// A bound TCP listener accepting framed streams.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind a listener to a `tcp://host:port` address string.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` for malformed addresses and
    /// `TransportError::BindFailed` if the bind itself fails.
    pub async fn bind(addr: &str) -> TransportResult<Self> {
        let socket_addr = parse_addr(addr)?;
        let inner = TcpListener::bind(socket_addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!("listening on {}", inner.local_addr()?);
        Ok(Self { inner })
    }

    /// Accept one inbound connection.
    pub async fn accept(&self) -> TransportResult<(FramedStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        Ok((FramedStream::from_stream(stream)?, peer))
    }

    /// The locally bound address (useful with port 0).
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}

/// A connected TCP stream with length framing.
pub struct FramedStream {
    inner: TcpStream,
}

impl FramedStream {
    /// Connect to a `tcp://host:port` address string.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectFailed` if the dial fails.
    pub async fn connect(addr: &str) -> TransportResult<Self> {
        let socket_addr = parse_addr(addr)?;
        let stream = TcpStream::connect(socket_addr)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Self::from_stream(stream)
    }

    /// Wrap an accepted TCP stream.
    pub fn from_stream(stream: TcpStream) -> TransportResult<Self> {
        stream.set_nodelay(true)?;
        Ok(Self { inner: stream })
    }

    /// The remote peer's address.
    pub fn peer_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.inner.peer_addr()?)
    }

    /// Read one frame. Returns `None` on clean end-of-stream.
    pub async fn read_frame(&mut self) -> TransportResult<Option<Vec<u8>>> {
        read_frame_from(&mut self.inner).await
    }

    /// Write one frame.
    pub async fn write_frame(&mut self, payload: &[u8]) -> TransportResult<()> {
        write_frame_to(&mut self.inner, payload).await
    }

    /// Split into independently owned read and write halves.
    #[must_use]
    pub fn into_split(self) -> (FramedReader, FramedWriter) {
        let (read, write) = self.inner.into_split();
        (FramedReader { inner: read }, FramedWriter { inner: write })
    }
}

/// The read half of a split framed stream.
pub struct FramedReader {
    inner: OwnedReadHalf,
}

impl FramedReader {
    /// Read one frame. Returns `None` on clean end-of-stream.
    pub async fn read_frame(&mut self) -> TransportResult<Option<Vec<u8>>> {
        read_frame_from(&mut self.inner).await
    }
}

/// The write half of a split framed stream.
pub struct FramedWriter {
    inner: OwnedWriteHalf,
}

impl FramedWriter {
    /// Write one frame.
    pub async fn write_frame(&mut self, payload: &[u8]) -> TransportResult<()> {
        write_frame_to(&mut self.inner, payload).await
    }
}

async fn read_frame_from<R>(reader: &mut R) -> TransportResult<Option<Vec<u8>>>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_WIRE_FRAME {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_WIRE_FRAME,
        });
    }
    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(Some(payload)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_frame_to<W>(writer: &mut W, payload: &[u8]) -> TransportResult<()>
where
    W: AsyncWriteExt + Unpin,
{
    if payload.len() > MAX_WIRE_FRAME {
        return Err(TransportError::FrameTooLarge {
            len: payload.len(),
            max: MAX_WIRE_FRAME,
        });
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
