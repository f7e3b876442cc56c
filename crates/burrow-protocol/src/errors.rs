//! Tunnel protocol error types.

use thiserror::Error;

/// Errors produced by the frame and envelope codecs.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The advertised frame length exceeds the configured maximum. The
    /// stream is considered corrupted; callers must drop the connection.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame payload did not decode as a known envelope. Not fatal to
    /// the connection; callers log and skip the frame.
    #[error("malformed envelope: {0}")]
    EnvelopeMalformed(String),

    /// Clean EOF on the length prefix.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
