//! Error types for the WebSocket session core

use std::fmt;
use std::io;

/// Result type alias for WebSocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// WebSocket error types
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying transport
    Io(io::Error),
    /// Protocol violation in a received frame
    Protocol(&'static str),
    /// Single frame exceeds the configured maximum
    FrameTooLarge,
    /// Assembled message exceeds the configured maximum
    MessageTooLarge,
    /// Upgrade request failed validation
    HandshakeFailed(&'static str),
    /// Connection closed by the peer
    ConnectionClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::FrameTooLarge => write!(f, "Frame too large"),
            Error::MessageTooLarge => write!(f, "Message too large"),
            Error::HandshakeFailed(msg) => write!(f, "Handshake failed: {}", msg),
            Error::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset => Error::ConnectionClosed,
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

/// Why a session ended
///
/// Delivered to [`WebSocketHandler::on_terminate`] exactly once per session
/// that completed its handshake.
///
/// [`WebSocketHandler::on_terminate`]: crate::handler::WebSocketHandler::on_terminate
#[derive(Debug)]
pub enum Terminate {
    /// The transport was closed by the peer without a close frame
    Closed,
    /// The peer sent a close frame
    Remote,
    /// The handler requested shutdown, or replied with a close frame
    Shutdown,
    /// The inactivity timeout elapsed
    Timeout,
    /// The transport failed
    Transport(io::Error),
    /// A handler callback panicked
    HandlerError,
    /// The peer sent a malformed or illegal frame
    BadFrame(&'static str),
}

impl Terminate {
    /// Returns true for orderly endings (close handshake, shutdown, timeout)
    pub fn is_normal(&self) -> bool {
        matches!(
            self,
            Terminate::Closed | Terminate::Remote | Terminate::Shutdown | Terminate::Timeout
        )
    }
}

impl fmt::Display for Terminate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminate::Closed => write!(f, "transport closed"),
            Terminate::Remote => write!(f, "close frame received"),
            Terminate::Shutdown => write!(f, "handler shutdown"),
            Terminate::Timeout => write!(f, "inactivity timeout"),
            Terminate::Transport(e) => write!(f, "transport error: {}", e),
            Terminate::HandlerError => write!(f, "handler error"),
            Terminate::BadFrame(msg) => write!(f, "bad frame: {}", msg),
        }
    }
}
