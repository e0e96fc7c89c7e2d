//! WebSocket frame decoding and serialization
//!
//! This module implements RFC 6455 frame handling for the server side:
//! inbound frames are always masked and are unmasked during decoding,
//! outbound frames are never masked.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::mask::apply_mask;
use crate::{CONTROL_MAX_PAYLOAD, MEDIUM_PAYLOAD_THRESHOLD, SMALL_PAYLOAD_THRESHOLD};

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }

    /// Check if this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        (*self as u8) <= 0x2
    }
}

/// A complete, decoded WebSocket frame
///
/// Reserved bits are validated to zero and the mask is consumed during
/// decoding, so neither appears here.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Payload, already unmasked
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(opcode: OpCode, payload: Bytes, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            payload,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }
}

/// Incremental frame decoder
///
/// Pulls complete frames out of a growable receive buffer. Nothing is
/// consumed until the whole frame (header, mask key, payload) is buffered,
/// so a short read leaves the buffer prefix intact and decoding can resume
/// when more bytes arrive.
pub struct FrameDecoder {
    /// Maximum payload size for a single frame
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Decode one frame from the buffer.
    ///
    /// Returns:
    /// - Ok(Some(frame)) if a complete frame was decoded and consumed
    /// - Ok(None) if more data is needed; the buffer is untouched
    /// - Err(e) on a protocol violation; the connection is unusable
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let fin = b0 & 0x80 != 0;
        if b0 & 0x70 != 0 {
            return Err(Error::Protocol("reserved bits must be 0"));
        }

        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(Error::Protocol("invalid opcode"))?;

        if opcode.is_control() && !fin {
            return Err(Error::Protocol("control frame must not be fragmented"));
        }

        if b1 & 0x80 == 0 {
            return Err(Error::Protocol("client frames must be masked"));
        }
        let len_byte = b1 & 0x7F;

        let (payload_len, ext_header) = match len_byte {
            0..=125 => (len_byte as u64, 2),
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
                if len < 126 {
                    return Err(Error::Protocol("payload length not minimal"));
                }
                (len, 4)
            }
            _ => {
                // len_byte == 127
                if buf.len() < 10 {
                    return Ok(None);
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                if len >> 63 != 0 {
                    return Err(Error::Protocol("payload length MSB must be 0"));
                }
                if len <= 0xFFFF {
                    return Err(Error::Protocol("payload length not minimal"));
                }
                (len, 10)
            }
        };

        if opcode.is_control() && payload_len > CONTROL_MAX_PAYLOAD as u64 {
            return Err(Error::Protocol("control frame too large"));
        }

        if payload_len > self.max_frame_size as u64 {
            return Err(Error::FrameTooLarge);
        }
        let payload_len = payload_len as usize;

        let total = ext_header + 4 + payload_len;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(ext_header);
        let mask = [buf[0], buf[1], buf[2], buf[3]];
        buf.advance(4);

        let mut payload = buf.split_to(payload_len);
        apply_mask(&mut payload, mask);

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

/// Encode a server frame into a buffer.
///
/// Server frames are never masked. Control frames are limited to 125
/// payload bytes and are refused before anything is written.
pub fn encode_frame(buf: &mut BytesMut, opcode: OpCode, payload: &[u8], fin: bool) -> Result<()> {
    let payload_len = payload.len();

    if opcode.is_control() && payload_len > CONTROL_MAX_PAYLOAD {
        return Err(Error::Protocol("control frame too large"));
    }

    let header_size = 2 + if payload_len > MEDIUM_PAYLOAD_THRESHOLD {
        8
    } else if payload_len > SMALL_PAYLOAD_THRESHOLD {
        2
    } else {
        0
    };
    buf.reserve(header_size + payload_len);

    let mut b0 = opcode as u8;
    if fin {
        b0 |= 0x80;
    }
    buf.put_u8(b0);

    if payload_len <= SMALL_PAYLOAD_THRESHOLD {
        buf.put_u8(payload_len as u8);
    } else if payload_len <= MEDIUM_PAYLOAD_THRESHOLD {
        buf.put_u8(126);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(127);
        buf.put_u64(payload_len as u64);
    }

    buf.put_slice(payload);
    Ok(())
}

/// Encode a close frame carrying a status code and reason.
///
/// The payload is the 16-bit status followed by the reason bytes, and the
/// whole payload is subject to the control-frame limit.
pub fn encode_close_frame(buf: &mut BytesMut, code: u16, reason: &[u8]) -> Result<()> {
    let mut payload = BytesMut::with_capacity(2 + reason.len());
    payload.put_u16(code);
    payload.put_slice(reason);
    encode_frame(buf, OpCode::Close, &payload, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked(opcode: u8, fin: bool, payload: &[u8], mask: [u8; 4]) -> BytesMut {
        let mut buf = BytesMut::new();
        let b0 = if fin { 0x80 | opcode } else { opcode };
        buf.put_u8(b0);
        if payload.len() <= 125 {
            buf.put_u8(0x80 | payload.len() as u8);
        } else if payload.len() <= 65535 {
            buf.put_u8(0x80 | 126);
            buf.put_u16(payload.len() as u16);
        } else {
            buf.put_u8(0x80 | 127);
            buf.put_u64(payload.len() as u64);
        }
        buf.put_slice(&mask);
        let mut body = payload.to_vec();
        apply_mask(&mut body, mask);
        buf.put_slice(&body);
        buf
    }

    #[test]
    fn test_opcode() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(OpCode::Text.is_data());
        assert!(OpCode::Binary.is_data());
        assert!(OpCode::Continuation.is_data());
        assert!(OpCode::from_u8(0x3).is_none());
        assert!(OpCode::from_u8(0xB).is_none());
    }

    #[test]
    fn test_decode_masked_hello() {
        // The RFC 6455 sample: masked "Hello"
        let mut decoder = FrameDecoder::new(1024 * 1024);
        let mut buf = BytesMut::from(
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58][..],
        );

        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload.as_ref(), b"Hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_byte_by_byte_matches_one_shot() {
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];

        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for byte in wire {
            buf.put_u8(byte);
            while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"Hello");

        let mut one_shot = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&wire[..]);
        let frame = one_shot.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload, frames[0].payload);
    }

    #[test]
    fn test_decode_need_more_retains_buffer() {
        let mut decoder = FrameDecoder::new(1024);
        let wire = masked(0x2, true, b"abcdef", [1, 2, 3, 4]);

        let mut buf = BytesMut::from(&wire[..7]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        // The prefix must be untouched so decoding can resume
        assert_eq!(&buf[..], &wire[..7]);

        buf.put_slice(&wire[7..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"abcdef");
    }

    #[test]
    fn test_decode_extended_16() {
        let payload = vec![0x42u8; 300];
        let mut decoder = FrameDecoder::new(1024 * 1024);
        let mut buf = masked(0x2, true, &payload, [9, 8, 7, 6]);

        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn test_decode_extended_64() {
        let payload = vec![0x42u8; 70000];
        let mut decoder = FrameDecoder::new(1024 * 1024);
        let mut buf = masked(0x2, true, &payload, [9, 8, 7, 6]);

        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 70000);
    }

    #[test]
    fn test_decode_length_not_minimal() {
        // 16-bit extended length used for a value under 126
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&[0x82, 0x80 | 126, 0x00, 0x05][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol("payload length not minimal"))
        ));

        // 64-bit extended length used for a value that fits 16 bits
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&[0x82, 0x80 | 127, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol("payload length not minimal"))
        ));
    }

    #[test]
    fn test_decode_length_msb_set() {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&[0x82, 0x80 | 127, 0x80, 0, 0, 0, 0, 0, 0, 1][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol("payload length MSB must be 0"))
        ));
    }

    #[test]
    fn test_decode_unmasked_rejected() {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&[0x81, 0x05, b'h', b'e', b'l', b'l', b'o'][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol("client frames must be masked"))
        ));
    }

    #[test]
    fn test_decode_reserved_bits_rejected() {
        for rsv in [0x40u8, 0x20, 0x10] {
            let mut decoder = FrameDecoder::new(1024);
            let mut buf = BytesMut::from(&[0x81 | rsv, 0x80][..]);
            assert!(matches!(
                decoder.decode(&mut buf),
                Err(Error::Protocol("reserved bits must be 0"))
            ));
        }
    }

    #[test]
    fn test_decode_invalid_opcode() {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&[0x83, 0x80][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol("invalid opcode"))
        ));
    }

    #[test]
    fn test_decode_fragmented_control_rejected() {
        // Ping without FIN
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&[0x09, 0x80][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol("control frame must not be fragmented"))
        ));
    }

    #[test]
    fn test_decode_oversize_control_rejected() {
        let payload = vec![0u8; 126];
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = masked(0x9, true, &payload, [0, 0, 0, 0]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(Error::Protocol("control frame too large"))
        ));
    }

    #[test]
    fn test_decode_frame_too_large() {
        let payload = vec![0u8; 200];
        let mut decoder = FrameDecoder::new(128);
        let mut buf = masked(0x2, true, &payload, [0, 0, 0, 0]);
        assert!(matches!(decoder.decode(&mut buf), Err(Error::FrameTooLarge)));
    }

    #[test]
    fn test_encode_small() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Text, b"hello", true).unwrap();

        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x05);
        assert_eq!(&buf[2..], b"hello");
    }

    #[test]
    fn test_encode_medium() {
        let payload = vec![0x42u8; 200];
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Binary, &payload, true).unwrap();

        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[1], 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 200);
        assert_eq!(buf.len(), 4 + 200);
    }

    #[test]
    fn test_encode_large() {
        let payload = vec![0x42u8; 70000];
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Binary, &payload, true).unwrap();

        assert_eq!(buf[1], 127);
        let len = u64::from_be_bytes([
            buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
        ]);
        assert_eq!(len, 70000);
    }

    #[test]
    fn test_encode_oversize_control_refused() {
        let payload = vec![0u8; 126];
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_frame(&mut buf, OpCode::Ping, &payload, true),
            Err(Error::Protocol("control frame too large"))
        ));
        // Nothing written
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_close_frame() {
        let mut buf = BytesMut::new();
        encode_close_frame(&mut buf, 1000, b"bye").unwrap();

        assert_eq!(buf[0], 0x88);
        assert_eq!(buf[1], 5);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 1000);
        assert_eq!(&buf[4..], b"bye");
    }

    #[test]
    fn test_decode_then_encode_round_trip() {
        // Decoding a masked frame and re-encoding it server-side yields the
        // same frame with the mask stripped
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = masked(0x1, true, b"round trip", [0xAA, 0xBB, 0xCC, 0xDD]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();

        let mut out = BytesMut::new();
        encode_frame(&mut out, frame.opcode, &frame.payload, frame.fin).unwrap();
        assert_eq!(&out[..], &[0x81, 10, b'r', b'o', b'u', b'n', b'd', b' ', b't', b'r', b'i', b'p']);
    }

    #[test]
    fn test_decode_multiple_frames_in_buffer() {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = masked(0x1, true, b"one", [1, 1, 1, 1]);
        buf.extend_from_slice(&masked(0x1, true, b"two", [2, 2, 2, 2]));

        let a = decoder.decode(&mut buf).unwrap().unwrap();
        let b = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(a.payload.as_ref(), b"one");
        assert_eq!(b.payload.as_ref(), b"two");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }
}
