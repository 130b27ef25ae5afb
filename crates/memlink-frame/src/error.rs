/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A block length byte is larger than the configured maximum block size.
    #[error("invalid block length {value:#04x} at offset {offset} (max {max})")]
    InvalidBlock { offset: usize, value: u8, max: u8 },

    /// The encoded frame ended in the middle of a block.
    #[error("frame truncated ({missing} bytes missing from final block)")]
    Truncated { missing: usize },

    /// A data symbol does not fit in the configured word width.
    #[error("symbol {value:#04x} does not fit in {data_width} bits")]
    SymbolOutOfRange { value: u8, data_width: u8 },

    /// The codec configuration is not usable.
    #[error("invalid codec configuration: {0}")]
    InvalidConfig(String),

    /// No complete frame arrived before the read timeout.
    #[error("no frame received within {0:?}")]
    Timeout(std::time::Duration),

    /// The underlying channel failed.
    #[error("channel error: {0}")]
    Transport(#[from] memlink_transport::TransportError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
