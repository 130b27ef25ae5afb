use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::error::{FrameError, Result};

/// The reserved frame delimiter. Never appears inside an encoded frame.
pub const DELIMITER: u8 = 0x00;

/// Default maximum block size for 8-bit words.
pub const DEFAULT_MAX_BLOCK: u8 = 0xFF;

/// One unit of a framed byte stream: a boundary marker or a data byte.
///
/// The decoder emits a [`Framed::Boundary`] for every delimiter it sees, whether
/// it opens or closes a frame. The encoder treats boundaries as a toggle: the
/// first opens a frame, the next closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framed {
    Boundary,
    Data(u8),
}

/// Word width and block size of the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CobsConfig {
    /// Bits per symbol on the wire (2..=8). Default: 8.
    pub data_width: u8,
    /// Largest block length value, at most `2^data_width - 1`. Default: 255.
    pub max_block_size: u8,
}

impl Default for CobsConfig {
    fn default() -> Self {
        Self {
            data_width: 8,
            max_block_size: DEFAULT_MAX_BLOCK,
        }
    }
}

impl CobsConfig {
    /// Create a validated configuration.
    pub fn new(data_width: u8, max_block_size: u8) -> Result<Self> {
        let config = Self {
            data_width,
            max_block_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the width/block-size combination.
    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.data_width) {
            return Err(FrameError::InvalidConfig(format!(
                "data width must be 1..=8 bits, got {}",
                self.data_width
            )));
        }
        if self.max_block_size < 2 {
            return Err(FrameError::InvalidConfig(format!(
                "max block size must be at least 2, got {}",
                self.max_block_size
            )));
        }
        if self.max_block_size > self.max_symbol() {
            return Err(FrameError::InvalidConfig(format!(
                "max block size {} does not fit in {} bits",
                self.max_block_size, self.data_width
            )));
        }
        Ok(())
    }

    /// Largest symbol representable in `data_width` bits.
    pub fn max_symbol(&self) -> u8 {
        ((1u16 << self.data_width) - 1) as u8
    }

    /// Upper bound on the wire size of a payload, delimiters included.
    pub fn max_encoded_len(&self, payload_len: usize) -> usize {
        let run = usize::from(self.max_block_size) - 1;
        2 + payload_len + payload_len / run + 1
    }

    fn check_symbol(&self, value: u8) -> Result<()> {
        if value > self.max_symbol() {
            return Err(FrameError::SymbolOutOfRange {
                value,
                data_width: self.data_width,
            });
        }
        Ok(())
    }
}

/// Streaming COBS encoder.
///
/// Non-zero bytes are gathered into a run; a block is emitted when a zero
/// arrives (the zero becomes implicit), when the run reaches
/// `max_block_size - 1` bytes (a full block, no implied zero), or when the
/// frame closes.
#[derive(Debug)]
pub struct Encoder {
    config: CobsConfig,
    run: Vec<u8>,
    in_frame: bool,
    last_full: bool,
}

impl Encoder {
    /// Create an encoder for `config`.
    pub fn new(config: CobsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            run: Vec::with_capacity(usize::from(config.max_block_size)),
            in_frame: false,
            last_full: false,
        })
    }

    /// Whether a frame has been opened and not yet closed.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Feed one token, appending any completed output to `dst`.
    ///
    /// Data arriving outside a frame implicitly opens one.
    pub fn push(&mut self, token: Framed, dst: &mut BytesMut) -> Result<()> {
        match token {
            Framed::Boundary if self.in_frame => self.close(dst),
            Framed::Boundary => self.open(dst),
            Framed::Data(value) => {
                self.config.check_symbol(value)?;
                if !self.in_frame {
                    self.open(dst);
                }
                if value == DELIMITER {
                    // A zero right after a full block still needs its own
                    // (empty) block head.
                    self.flush_block(dst, false);
                } else {
                    self.run.push(value);
                    if self.run.len() == usize::from(self.config.max_block_size) - 1 {
                        self.flush_block(dst, true);
                    }
                }
            }
        }
        Ok(())
    }

    fn open(&mut self, dst: &mut BytesMut) {
        self.run.clear();
        self.last_full = false;
        self.in_frame = true;
        dst.put_u8(DELIMITER);
    }

    fn close(&mut self, dst: &mut BytesMut) {
        // A frame ending exactly on a full block has nothing left to say.
        if !(self.last_full && self.run.is_empty()) {
            self.flush_block(dst, false);
        }
        dst.put_u8(DELIMITER);
        self.in_frame = false;
        self.last_full = false;
    }

    fn flush_block(&mut self, dst: &mut BytesMut, full: bool) {
        let head = if full {
            self.config.max_block_size
        } else {
            self.run.len() as u8 + 1
        };
        dst.put_u8(head);
        dst.put_slice(&self.run);
        self.run.clear();
        self.last_full = full;
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            config: CobsConfig::default(),
            run: Vec::with_capacity(usize::from(DEFAULT_MAX_BLOCK)),
            in_frame: false,
            last_full: false,
        }
    }
}

/// Streaming, self-resynchronizing COBS decoder.
///
/// Emits a [`Framed::Boundary`] for every delimiter and [`Framed::Data`] for
/// every decoded byte. A block's implied zero is emitted lazily, when the next
/// block head arrives, so the final block's zero is dropped at the closing
/// delimiter. An oversized block head loses the frame until the next
/// delimiter.
#[derive(Debug)]
pub struct Decoder {
    config: CobsConfig,
    in_frame: bool,
    remaining: u8,
    pending_zero: bool,
    desyncs: u64,
}

impl Decoder {
    /// Create a decoder for `config`. It starts outside any frame.
    pub fn new(config: CobsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            in_frame: false,
            remaining: 0,
            pending_zero: false,
            desyncs: 0,
        })
    }

    /// Feed one received byte.
    pub fn feed(&mut self, byte: u8) -> Option<Framed> {
        if byte == DELIMITER {
            self.in_frame = true;
            self.remaining = 0;
            self.pending_zero = false;
            return Some(Framed::Boundary);
        }

        if !self.in_frame {
            return None;
        }

        if self.remaining == 0 {
            if byte > self.config.max_block_size {
                debug!(
                    value = byte,
                    max = self.config.max_block_size,
                    "bad block head, waiting for next delimiter"
                );
                self.in_frame = false;
                self.desyncs += 1;
                return None;
            }
            let zero = std::mem::replace(
                &mut self.pending_zero,
                byte != self.config.max_block_size,
            );
            self.remaining = byte - 1;
            return zero.then_some(Framed::Data(DELIMITER));
        }

        self.remaining -= 1;
        Some(Framed::Data(byte))
    }

    /// Feed one byte that the link may have flagged as damaged.
    ///
    /// A damaged byte is discarded and drops the current frame. This is for
    /// links that report framing or parity errors per byte, such as a UART
    /// receiver; the channels in `memlink-transport` only deliver good bytes
    /// and go through [`Decoder::feed`].
    pub fn feed_with_error(&mut self, byte: u8, error: bool) -> Option<Framed> {
        if error {
            self.in_frame = false;
            return None;
        }
        self.feed(byte)
    }

    /// Whether the decoder is synchronized inside a frame.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Whether the decoder is partway through a block's data.
    pub fn mid_block(&self) -> bool {
        self.in_frame && self.remaining > 0
    }

    /// Number of times a bad block head forced a resynchronization.
    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }

    /// Forget any partial frame.
    pub fn reset(&mut self) {
        self.in_frame = false;
        self.remaining = 0;
        self.pending_zero = false;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            config: CobsConfig::default(),
            in_frame: false,
            remaining: 0,
            pending_zero: false,
            desyncs: 0,
        }
    }
}

/// Encode a payload as one complete wire frame: `0x00 ∥ COBS(payload) ∥ 0x00`.
pub fn encode_frame(payload: &[u8], config: &CobsConfig, dst: &mut BytesMut) -> Result<()> {
    let mut encoder = Encoder::new(*config)?;
    dst.reserve(config.max_encoded_len(payload.len()));
    encoder.push(Framed::Boundary, dst)?;
    for &byte in payload {
        encoder.push(Framed::Data(byte), dst)?;
    }
    encoder.push(Framed::Boundary, dst)
}

/// Decode the bytes found between two delimiters.
pub fn decode_frame(encoded: &[u8], config: &CobsConfig) -> Result<Vec<u8>> {
    let mut decoder = Decoder::new(*config)?;
    decoder.feed(DELIMITER);

    let mut out = Vec::with_capacity(encoded.len());
    for (offset, &byte) in encoded.iter().enumerate() {
        let head = decoder.remaining == 0;
        if byte == DELIMITER || (head && byte > config.max_block_size) {
            return Err(FrameError::InvalidBlock {
                offset,
                value: byte,
                max: config.max_block_size,
            });
        }
        if let Some(Framed::Data(value)) = decoder.feed(byte) {
            out.push(value);
        }
    }

    if decoder.remaining > 0 {
        return Err(FrameError::Truncated {
            missing: usize::from(decoder.remaining),
        });
    }
    Ok(out)
}
