//! Self-resynchronizing COBS framing for lossy byte channels.
//!
//! Every frame on the wire is `0x00 ∥ COBS(payload) ∥ 0x00`:
//! - Consistent Overhead Byte Stuffing removes every zero from the payload,
//!   so the delimiter `0x00` can only ever mean "frame boundary"
//! - A corrupted or truncated frame is dropped at the next delimiter; at most
//!   one frame is lost per error
//!
//! The codec works on a stream of [`Framed`] tokens so the layers above can
//! process requests a byte at a time.

pub mod assembler;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use assembler::{FrameAssembler, DEFAULT_MAX_FRAME_SIZE};
pub use codec::{
    decode_frame, encode_frame, CobsConfig, Decoder, Encoder, Framed, DEFAULT_MAX_BLOCK, DELIMITER,
};
pub use error::{FrameError, Result};
pub use reader::{FrameConfig, FrameReader, DEFAULT_POLL_INTERVAL};
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::CobsCodec;
