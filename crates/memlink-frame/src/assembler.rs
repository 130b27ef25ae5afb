use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::codec::{CobsConfig, Decoder, Framed};
use crate::error::Result;

/// Default upper bound on a reassembled frame payload (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    AwaitingStart,
    InFrame,
}

/// Reassembles complete frame payloads from raw wire bytes.
///
/// Tracks whether the last boundary opened or closed a frame, so that a
/// boundary arriving while a frame is being collected completes it. Partial
/// frames are discarded when the decoder loses sync, when a delimiter cuts a
/// block short, or when the payload grows past the size limit.
///
/// A frame with an empty payload cannot be told apart from back-to-back
/// delimiters and is never reported.
#[derive(Debug)]
pub struct FrameAssembler {
    decoder: Decoder,
    position: Position,
    buf: BytesMut,
    max_frame_size: usize,
    dropped: u64,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::from_decoder(Decoder::default(), DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameAssembler {
    /// Create an assembler for `config`.
    pub fn new(config: CobsConfig, max_frame_size: usize) -> Result<Self> {
        Ok(Self::from_decoder(Decoder::new(config)?, max_frame_size))
    }

    fn from_decoder(decoder: Decoder, max_frame_size: usize) -> Self {
        Self {
            decoder,
            position: Position::AwaitingStart,
            buf: BytesMut::new(),
            max_frame_size,
            dropped: 0,
        }
    }

    /// Push one wire byte; returns a payload when it completes a frame.
    pub fn push(&mut self, byte: u8) -> Option<Bytes> {
        let mid_block = self.decoder.mid_block();
        let token = self.decoder.feed(byte);

        if self.position == Position::InFrame && !self.decoder.in_frame() {
            self.discard("lost sync");
            return None;
        }

        match token? {
            Framed::Boundary if mid_block && self.position == Position::InFrame => {
                // The delimiter still opens the next frame.
                self.discard("frame cut short");
                self.position = Position::InFrame;
                None
            }
            Framed::Boundary => match self.position {
                Position::AwaitingStart => {
                    self.buf.clear();
                    self.position = Position::InFrame;
                    None
                }
                Position::InFrame if self.buf.is_empty() => None,
                Position::InFrame => {
                    self.position = Position::AwaitingStart;
                    Some(self.buf.split().freeze())
                }
            },
            Framed::Data(_) if self.position == Position::AwaitingStart => None,
            Framed::Data(value) => {
                self.buf.extend_from_slice(&[value]);
                if self.buf.len() > self.max_frame_size {
                    self.discard("frame exceeds size limit");
                }
                None
            }
        }
    }

    /// Push a run of wire bytes, collecting every completed payload.
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        bytes.iter().filter_map(|&byte| self.push(byte)).collect()
    }

    /// Number of partial frames thrown away so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Whether a frame is currently being collected.
    pub fn in_frame(&self) -> bool {
        self.position == Position::InFrame
    }

    /// The underlying token decoder.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Forget any partial frame and wait for the next delimiter.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.buf.clear();
        self.position = Position::AwaitingStart;
    }

    fn discard(&mut self, reason: &'static str) {
        warn!(reason, partial = self.buf.len(), "discarding partial frame");
        self.buf.clear();
        self.position = Position::AwaitingStart;
        self.dropped += 1;
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::codec::encode_frame;

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_frame(payload, &CobsConfig::default(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn assembles_consecutive_frames() {
        let mut assembler = FrameAssembler::default();
        let frames = assembler.extend(&wire(&[b"one", b"t\0wo", b"three"]));
        assert_eq!(frames, vec![&b"one"[..], b"t\0wo", b"three"]);
        assert!(!assembler.in_frame());
    }

    #[test]
    fn extra_delimiters_are_harmless() {
        let mut bytes = vec![0x00, 0x00, 0x00];
        bytes.extend(wire(&[b"ok"]));
        bytes.extend([0x00, 0x00]);
        bytes.extend(wire(&[b"again"]));
        let mut assembler = FrameAssembler::default();
        assert_eq!(assembler.extend(&bytes), vec![&b"ok"[..], b"again"]);
        assert_eq!(assembler.dropped(), 0);
    }

    #[test]
    fn truncated_frame_is_dropped_and_next_survives() {
        let mut bytes = vec![0x00, 0x05, b'a', b'b'];
        bytes.extend(wire(&[b"good"]));
        let mut assembler = FrameAssembler::default();
        assert_eq!(assembler.extend(&bytes), vec![&b"good"[..]]);
        assert_eq!(assembler.dropped(), 1);
    }

    #[test]
    fn desync_drops_frame() {
        let config = CobsConfig::new(8, 16).unwrap();
        let mut assembler = FrameAssembler::new(config, DEFAULT_MAX_FRAME_SIZE).unwrap();
        let mut bytes = vec![0x00, 0x02, b'x', 0x40, b'y'];
        let mut good = BytesMut::new();
        encode_frame(b"fine", &config, &mut good).unwrap();
        bytes.extend_from_slice(&good);
        assert_eq!(assembler.extend(&bytes), vec![&b"fine"[..]]);
        assert_eq!(assembler.dropped(), 1);
        assert_eq!(assembler.decoder().desyncs(), 1);
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut assembler = FrameAssembler::new(CobsConfig::default(), 4).unwrap();
        let frames = assembler.extend(&wire(&[b"too long", b"ok"]));
        assert_eq!(frames, vec![&b"ok"[..]]);
        assert_eq!(assembler.dropped(), 1);
    }

    #[test]
    fn bytes_before_first_delimiter_are_ignored() {
        let mut bytes = vec![0x03, b'z', b'z'];
        bytes.extend(wire(&[b"hi"]));
        let mut assembler = FrameAssembler::default();
        assert_eq!(assembler.extend(&bytes), vec![&b"hi"[..]]);
    }
}
