//! Target memory access over a COBS-framed byte link.
//!
//! memlink talks to a small bridge core on the target: ping, reset, and
//! word-granular memory reads and writes, plus a reader for SEGGER-style RTT
//! ring buffers found in target RAM.
//!
//! # Crate Structure
//!
//! - [`transport`]: raw byte channels (serial port, simulator process, in-memory pair)
//! - [`frame`]: COBS framing with a delimiter byte and frame resynchronization
//! - [`bridge`]: the command protocol, host client, target responder and RTT

/// Re-export transport types.
pub mod transport {
    pub use memlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use memlink_frame::*;
}

/// Re-export bridge types.
pub mod bridge {
    pub use memlink_bridge::*;
}
