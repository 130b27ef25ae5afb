use std::thread;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use memlink_transport::RawChannel;
use tracing::trace;

use crate::assembler::{FrameAssembler, DEFAULT_MAX_FRAME_SIZE};
use crate::codec::CobsConfig;
use crate::error::{FrameError, Result};

/// Default pause between polls of an idle channel.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for reading frames off a channel.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Codec word width and block size.
    pub cobs: CobsConfig,
    /// Sleep between polls when the channel has nothing to read. Default: 10 ms.
    pub poll_interval: Duration,
    /// Give up on a frame after this long. Default: wait forever.
    pub read_timeout: Option<Duration>,
    /// Maximum reassembled payload size in bytes. Default: 64 KiB.
    pub max_frame_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            cobs: CobsConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Pulls complete frames out of a [`RawChannel`].
///
/// Bytes read past the end of a frame are kept for the next call, so callers
/// always get whole frames in arrival order.
#[derive(Debug)]
pub struct FrameReader {
    assembler: FrameAssembler,
    pending: Bytes,
    config: FrameConfig,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self {
            assembler: FrameAssembler::default(),
            pending: Bytes::new(),
            config: FrameConfig::default(),
        }
    }
}

impl FrameReader {
    /// Create a reader with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reader with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Result<Self> {
        Ok(Self {
            assembler: FrameAssembler::new(config.cobs, config.max_frame_size)?,
            pending: Bytes::new(),
            config,
        })
    }

    /// Read the next complete frame payload (blocking).
    ///
    /// Polls the channel, sleeping `poll_interval` whenever it is idle.
    /// Returns `Err(FrameError::Timeout)` if `read_timeout` elapses first.
    pub fn read_frame<C: RawChannel + ?Sized>(&mut self, channel: &mut C) -> Result<Bytes> {
        let deadline = self
            .config
            .read_timeout
            .map(|timeout| (Instant::now() + timeout, timeout));

        loop {
            if let Some(frame) = self.drain_pending() {
                trace!(len = frame.len(), "frame received");
                return Ok(frame);
            }

            let chunk = channel.read_available()?;
            if !chunk.is_empty() {
                self.pending = chunk;
                continue;
            }

            if let Some((deadline, timeout)) = deadline {
                if Instant::now() >= deadline {
                    return Err(FrameError::Timeout(timeout));
                }
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    fn drain_pending(&mut self) -> Option<Bytes> {
        while self.pending.has_remaining() {
            let byte = self.pending.get_u8();
            if let Some(frame) = self.assembler.push(byte) {
                return Some(frame);
            }
        }
        None
    }

    /// Throw away buffered bytes and any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.assembler.reset();
    }

    /// Number of partial frames dropped so far.
    pub fn dropped(&self) -> u64 {
        self.assembler.dropped()
    }

    /// Update the read timeout for subsequent reads.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.config.read_timeout = timeout;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
