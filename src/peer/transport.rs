use super::error::PeerError;
use super::message::{Envelope, LENGTH_PREFIX_LEN};
use crate::constants::{MAX_BLOCK_PAYLOAD, MAX_FRAME_SIZE, READ_BUFFER_CAPACITY};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A framed connection to one peer.
///
/// Every read and write is bounded by `io_timeout`, so an unresponsive peer
/// turns into [`PeerError::Timeout`] instead of a hung task.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    io_timeout: Duration,
}

impl PeerTransport {
    pub fn new(stream: TcpStream, io_timeout: Duration) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            io_timeout,
        }
    }

    pub async fn connect(addr: SocketAddr, io_timeout: Duration) -> Result<Self, PeerError> {
        let stream = timeout(io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, io_timeout))
    }

    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), PeerError> {
        let data = envelope.encode()?;
        self.write_all(&data).await
    }

    /// Writes raw bytes (a block payload) after a `SEND_BLOCK` header.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), PeerError> {
        self.write_all(data).await
    }

    pub async fn receive_envelope(&mut self) -> Result<Envelope, PeerError> {
        self.fill(LENGTH_PREFIX_LEN).await?;

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length == 0 {
            return Err(PeerError::InvalidMessage("empty frame".into()));
        }
        if length > MAX_FRAME_SIZE {
            return Err(PeerError::MessageTooLarge(length as u64));
        }

        let total_len = LENGTH_PREFIX_LEN + length;
        self.fill(total_len).await?;

        let mut frame = self.read_buf.split_to(total_len);
        let body = frame.split_off(LENGTH_PREFIX_LEN);
        Envelope::decode(&body)
    }

    /// Reads exactly `len` raw bytes, looping over partial reads. Bytes that
    /// arrived together with the preceding envelope are consumed first.
    pub async fn receive_raw(&mut self, len: u64) -> Result<Bytes, PeerError> {
        if len > MAX_BLOCK_PAYLOAD {
            return Err(PeerError::MessageTooLarge(len));
        }
        let len = len as usize;

        self.fill(len).await?;
        Ok(self.read_buf.split_to(len).freeze())
    }

    /// Flushes and half-closes the write side.
    pub async fn finish(&mut self) -> Result<(), PeerError> {
        timeout(self.io_timeout, self.stream.shutdown())
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), PeerError> {
        timeout(self.io_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    async fn fill(&mut self, len: usize) -> Result<(), PeerError> {
        if self.read_buf.capacity() < len {
            self.read_buf.reserve(len - self.read_buf.len());
        }

        while self.read_buf.len() < len {
            let n = timeout(self.io_timeout, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;

            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }
}
