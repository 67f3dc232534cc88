//! TCP transport implementation
//!
//! The Polaris head exposes its control protocol on a TCP port over the
//! mount's own WiFi network. Frames are delimited by `#` rather than
//! newlines, so the reader buffers until the terminator.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{PolarisError, Result};
use crate::io::{ConnectionFactory, ConnectionPair, FrameReader, FrameWriter};

/// Frame reader over the read half of a TCP stream
pub struct TcpFrameReader {
    reader: BufReader<ReadHalf<TcpStream>>,
    buffer: Vec<u8>,
}

impl TcpFrameReader {
    pub fn new(reader: ReadHalf<TcpStream>) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::new(),
        }
    }
}

#[async_trait]
impl FrameReader for TcpFrameReader {
    async fn read_frame(&mut self) -> Result<Option<String>> {
        self.buffer.clear();
        match self.reader.read_until(b'#', &mut self.buffer).await {
            Ok(0) => Ok(None),
            Ok(_) => {
                let frame = String::from_utf8_lossy(&self.buffer).into_owned();
                debug!("Read frame: {}", frame.trim());
                Ok(Some(frame))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(PolarisError::Timeout("Frame read timed out".to_string()))
            }
            Err(e) => Err(PolarisError::Io(e)),
        }
    }
}

/// Frame writer over the write half of a TCP stream
pub struct TcpFrameWriter {
    writer: WriteHalf<TcpStream>,
}

impl TcpFrameWriter {
    pub fn new(writer: WriteHalf<TcpStream>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl FrameWriter for TcpFrameWriter {
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        debug!("Write frame: {}", frame);
        self.writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| PolarisError::SendError(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| PolarisError::SendError(e.to_string()))?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(PolarisError::Io)
    }
}

/// TCP implementation of [`ConnectionFactory`]
#[derive(Debug, Default, Clone)]
pub struct TcpConnectionFactory;

impl TcpConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<ConnectionPair> {
        debug!("Connecting to {} with timeout {:?}", addr, timeout);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PolarisError::Timeout(format!("Connection to {} timed out", addr)))?
            .map_err(|e| {
                PolarisError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        debug!("TCP connection established to {}", addr);

        let (reader, writer) = tokio::io::split(stream);

        Ok(ConnectionPair {
            reader: Box::new(TcpFrameReader::new(reader)),
            writer: Box::new(TcpFrameWriter::new(writer)),
        })
    }
}
