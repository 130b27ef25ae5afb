use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec;

use crate::assembler::{FrameAssembler, DEFAULT_MAX_FRAME_SIZE};
use crate::codec::{encode_frame, CobsConfig};
use crate::error::{FrameError, Result};

/// `tokio_util` codec for COBS frames.
///
/// Decoding yields frame payloads; encoding wraps payloads in delimiters.
#[derive(Debug)]
pub struct CobsCodec {
    config: CobsConfig,
    assembler: FrameAssembler,
}

impl Default for CobsCodec {
    fn default() -> Self {
        Self {
            config: CobsConfig::default(),
            assembler: FrameAssembler::default(),
        }
    }
}

impl CobsCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CobsConfig, max_frame_size: usize) -> Result<Self> {
        Ok(Self {
            config,
            assembler: FrameAssembler::new(config, max_frame_size)?,
        })
    }

    /// Same as [`CobsCodec::with_config`] with the default 64 KiB limit.
    pub fn with_cobs(config: CobsConfig) -> Result<Self> {
        Self::with_config(config, DEFAULT_MAX_FRAME_SIZE)
    }
}

impl codec::Decoder for CobsCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        while src.has_remaining() {
            let byte = src.get_u8();
            if let Some(frame) = self.assembler.push(byte) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

impl codec::Encoder<Bytes> for CobsCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, &self.config, dst)
    }
}

impl<'a> codec::Encoder<&'a [u8]> for CobsCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &'a [u8], dst: &mut BytesMut) -> Result<()> {
        encode_frame(item, &self.config, dst)
    }
}
