/// Errors that can occur while talking to a target.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A caller-supplied argument is unusable (alignment, range, size).
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The response did not echo what the request asked for.
    #[error("{field} mismatch in {command} response: expected {expected:#x}, got {actual:#x}")]
    Mismatch {
        command: &'static str,
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    /// The target answered with an ERROR frame.
    #[error("target reported an error")]
    TargetError,

    /// The response frame ended before all expected bytes arrived.
    #[error("short {command} response: expected {expected} bytes, got {actual}")]
    ShortResponse {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Framing or channel failure.
    #[error("frame error: {0}")]
    Frame(#[from] memlink_frame::FrameError),

    /// Ring buffer lookup or layout problem.
    #[error("rtt error: {0}")]
    Rtt(#[from] RttError),
}

impl BridgeError {
    /// Whether the target misbehaved at the protocol level, as opposed to the
    /// link or the caller.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Mismatch { .. } | Self::TargetError | Self::ShortResponse { .. }
        )
    }
}

/// Errors specific to RTT control blocks and channels.
#[derive(Debug, thiserror::Error)]
pub enum RttError {
    /// No control block magic in the scanned range.
    #[error("no RTT control block between {start:#010x} and {end:#010x}")]
    NotFound { start: u32, end: u64 },

    /// A channel index past the end of the channel array.
    #[error("{direction} channel {index} out of range ({count} channels)")]
    NoSuchChannel {
        direction: &'static str,
        index: usize,
        count: usize,
    },

    /// A channel slot with no buffer behind it.
    #[error("{direction} channel {index} is not allocated")]
    Unallocated {
        direction: &'static str,
        index: usize,
    },

    /// No channel carries the requested name.
    #[error("no up channel named {0:?}")]
    ChannelNotFound(String),

    /// Descriptor contents that cannot describe a real ring buffer.
    #[error("corrupt channel descriptor at {address:#010x}: {reason}")]
    BadDescriptor { address: u32, reason: String },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
