//! I/O traits for the mount transport
//!
//! The head is reached over a byte transport the host owns; the session only
//! consumes `#`-delimited frames through these traits. The seams enable
//! mockall-based testing without hardware, and let tests script entire
//! conversations.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Pair of reader and writer for a mount connection
pub struct ConnectionPair {
    /// Reader delivering one wire frame at a time
    pub reader: Box<dyn FrameReader>,
    /// Writer for request frames
    pub writer: Box<dyn FrameWriter>,
}

/// Trait for reading `#`-terminated frames from the transport
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait FrameReader: Send {
    /// Read the next frame, including its `#` terminator.
    ///
    /// Returns `Ok(Some(frame))` when a complete frame was read,
    /// `Ok(None)` when the connection was closed, or an error if reading
    /// failed. Individual reads are bounded by the transport's own timeout;
    /// this call never blocks indefinitely.
    async fn read_frame(&mut self) -> Result<Option<String>>;
}

/// Trait for writing request frames to the transport
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait FrameWriter: Send {
    /// Write one frame verbatim and flush it
    async fn write_frame(&mut self, frame: &str) -> Result<()>;

    /// Shut down the writer
    async fn shutdown(&mut self) -> Result<()>;
}

/// Trait for establishing mount connections
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionFactory: Send + Sync {
    /// Connect to the head at the given address
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<ConnectionPair>;
}
