//! # Riptide-WS: server-side WebSocket protocol core
//!
//! A WebSocket session engine for servers, compatible with RFC 6455 and the
//! draft handshake versions 7 and 8. The crate takes an already-parsed
//! HTTP/1.1 upgrade request plus a byte transport, validates the handshake,
//! and then drives a user-supplied [`WebSocketHandler`] for the lifetime of
//! the connection:
//!
//! - Incremental frame decoding over partial reads
//! - Message assembly with control-frame interleaving
//! - Automatic pong replies and close acknowledgement
//! - Inactivity timeouts and a hibernate hint for idle connections
//! - External messages delivered to the handler through a [`SessionHandle`]
//!
//! ## Example
//!
//! ```ignore
//! use riptide_ws::{Init, Message, Reaction, Session, SessionConfig, WebSocketHandler};
//!
//! struct Echo;
//!
//! impl WebSocketHandler for Echo {
//!     type Info = ();
//!
//!     fn init(&mut self, _transport: &'static str, _request: &http::Request<()>) -> Init {
//!         Init::accept()
//!     }
//!
//!     fn on_message(&mut self, message: Message) -> Reaction {
//!         match message {
//!             Message::Text(_) | Message::Binary(_) => Reaction::reply(message),
//!             _ => Reaction::Continue,
//!         }
//!     }
//!
//!     fn on_info(&mut self, _info: ()) -> Reaction {
//!         Reaction::Continue
//!     }
//! }
//!
//! let (session, _handle) =
//!     Session::upgrade(stream, request, Echo, SessionConfig::default()).await?;
//! session.run().await;
//! ```

pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod mask;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{Error, Result, Terminate};
pub use frame::{encode_frame, Frame, FrameDecoder, OpCode};
pub use handler::{Init, Reaction, WebSocketHandler};
pub use protocol::{Message, MessageAssembler};
pub use session::{Session, SessionHandle};
pub use transport::Transport;

/// WebSocket GUID for the handshake accept token
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Maximum WebSocket frame header size for a server (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Largest payload encodable with a 7-bit length code
pub const SMALL_PAYLOAD_THRESHOLD: usize = 125;

/// Largest payload encodable with a 16-bit extended length
pub const MEDIUM_PAYLOAD_THRESHOLD: usize = 65535;

/// Maximum control-frame payload length (RFC 6455 section 5.5)
pub const CONTROL_MAX_PAYLOAD: usize = 125;

/// Default receive buffer capacity (64KB)
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for WebSocket sessions
///
/// Per-connection inactivity timeout and hibernate are not configured here;
/// they come from the handler's [`Init`] return value.
///
/// # Example
///
/// ```
/// use riptide_ws::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .max_frame_size(1024 * 1024)
///     .max_message_size(8 * 1024 * 1024)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum single-frame payload size (default: 16MB)
    pub max_frame_size: usize,
    /// Maximum assembled message size (default: 64MB)
    pub max_message_size: usize,
    /// Initial receive buffer capacity (default: 64KB)
    pub recv_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            recv_buffer_size: RECV_BUFFER_SIZE,
        }
    }
}

impl SessionConfig {
    /// Create a new config builder
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

/// Builder for session configuration
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    /// Set the maximum single-frame payload size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the maximum assembled message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the initial receive buffer capacity
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result, Terminate};
    pub use crate::frame::{Frame, OpCode};
    pub use crate::handler::{Init, Reaction, WebSocketHandler};
    pub use crate::protocol::Message;
    pub use crate::session::{Session, SessionHandle};
    pub use crate::SessionConfig;
}
