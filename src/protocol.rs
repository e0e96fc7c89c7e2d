//! Message assembly
//!
//! Collapses sequences of frames into application messages, honoring the
//! fragmentation rules and control-frame interleaving of RFC 6455.
//!
//! Text payloads are not UTF-8 validated here; [`Message::as_text`] is a
//! checked accessor for callers that want validation.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::frame::{Frame, OpCode};

/// A complete WebSocket message, possibly assembled from fragments
///
/// The same type describes outbound frames in handler replies: text, binary,
/// ping, pong, and close (bare or with a status code and reason).
#[derive(Debug, Clone)]
pub enum Message {
    /// Text message
    Text(Bytes),
    /// Binary message
    Binary(Bytes),
    /// Ping
    Ping(Bytes),
    /// Pong
    Pong(Bytes),
    /// Close, optionally carrying a 16-bit status code and reason bytes
    Close(Option<(u16, Bytes)>),
}

impl Message {
    /// Create a text message from a string
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(Bytes::from(s.into()))
    }

    /// Create a binary message
    #[inline]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Message::Binary(data.into())
    }

    /// Create a ping message
    #[inline]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Message::Ping(data.into())
    }

    /// Create a pong message
    #[inline]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Message::Pong(data.into())
    }

    /// Create a bare close message
    #[inline]
    pub fn close() -> Self {
        Message::Close(None)
    }

    /// Create a close message with a status code and reason
    #[inline]
    pub fn close_with(code: u16, reason: impl Into<Bytes>) -> Self {
        Message::Close(Some((code, reason.into())))
    }

    /// Check if this is a close message
    #[inline]
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Check if this is a control message
    #[inline]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Message::Ping(_) | Message::Pong(_) | Message::Close(_)
        )
    }

    /// Get the payload as a str, if it is a text message with valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get the message payload as bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(b) => b,
            Message::Binary(b) => b,
            Message::Ping(b) => b,
            Message::Pong(b) => b,
            Message::Close(Some((_, reason))) => reason,
            Message::Close(None) => &[],
        }
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(Bytes::from(s))
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(v))
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Message::Binary(b)
    }
}

/// Fragmentation state machine
///
/// Feeds on decoded frames and emits complete messages. A fragmented
/// message is open between the first frame (FIN=0, opcode text or binary)
/// and its final continuation; control frames pass straight through without
/// touching that state. The stored opcode is never `Continuation`.
pub struct MessageAssembler {
    /// Opcode of the open fragmented message
    fragment_opcode: Option<OpCode>,
    /// Accumulated fragment payload
    fragment_buf: BytesMut,
    /// Maximum assembled message size
    max_message_size: usize,
}

impl MessageAssembler {
    /// Create a new assembler
    pub fn new(max_message_size: usize) -> Self {
        Self {
            fragment_opcode: None,
            fragment_buf: BytesMut::new(),
            max_message_size,
        }
    }

    /// Check whether a fragmented message is currently open
    #[inline]
    pub fn is_assembling(&self) -> bool {
        self.fragment_opcode.is_some()
    }

    /// Feed one frame; returns a message when one completes.
    ///
    /// Control frames always produce a message immediately. Data frames
    /// produce one when FIN is set, either directly or by completing an
    /// open fragment sequence.
    pub fn assemble(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Continuation => self.continuation(frame),
            OpCode::Text | OpCode::Binary => self.data(frame),
            // Close payload is carried on the wire but not decoded here
            OpCode::Close => Ok(Some(Message::Close(None))),
            OpCode::Ping => Ok(Some(Message::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Message::Pong(frame.payload))),
        }
    }

    /// Handle a text or binary frame
    fn data(&mut self, frame: Frame) -> Result<Option<Message>> {
        if self.fragment_opcode.is_some() {
            return Err(Error::Protocol("expected continuation frame"));
        }

        if frame.fin {
            return Ok(Some(Self::finish(frame.opcode, frame.payload)));
        }

        // First fragment
        if frame.payload.len() > self.max_message_size {
            return Err(Error::MessageTooLarge);
        }
        self.fragment_opcode = Some(frame.opcode);
        self.fragment_buf.clear();
        self.fragment_buf.extend_from_slice(&frame.payload);
        Ok(None)
    }

    /// Handle a continuation frame
    fn continuation(&mut self, frame: Frame) -> Result<Option<Message>> {
        let opcode = self
            .fragment_opcode
            .ok_or(Error::Protocol("unexpected continuation frame"))?;

        if self.fragment_buf.len() + frame.payload.len() > self.max_message_size {
            return Err(Error::MessageTooLarge);
        }
        self.fragment_buf.extend_from_slice(&frame.payload);

        if frame.fin {
            self.fragment_opcode = None;
            let payload = self.fragment_buf.split().freeze();
            Ok(Some(Self::finish(opcode, payload)))
        } else {
            Ok(None)
        }
    }

    fn finish(opcode: OpCode, payload: Bytes) -> Message {
        match opcode {
            OpCode::Text => Message::Text(payload),
            _ => Message::Binary(payload),
        }
    }
}
