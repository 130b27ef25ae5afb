use bytes::BytesMut;
use memlink_transport::RawChannel;
use tracing::trace;

use crate::codec::{encode_frame, CobsConfig};
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Encodes payloads and writes them to a [`RawChannel`] as complete frames.
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    config: CobsConfig,
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config: CobsConfig::default(),
        }
    }
}

impl FrameWriter {
    /// Create a writer with the default codec configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with an explicit codec configuration.
    pub fn with_config(config: CobsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        })
    }

    /// Encode `payload` and write it as one frame.
    pub fn write_frame<C: RawChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        payload: &[u8],
    ) -> Result<()> {
        self.buf.clear();
        encode_frame(payload, &self.config, &mut self.buf)?;
        trace!(len = payload.len(), wire = self.buf.len(), "frame sent");
        channel.write_all(&self.buf)?;
        Ok(())
    }

    /// Current codec configuration.
    pub fn config(&self) -> &CobsConfig {
        &self.config
    }
}
