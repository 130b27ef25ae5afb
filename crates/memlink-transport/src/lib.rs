//! Raw duplex byte channels.
//!
//! The lowest layer of memlink. A [`RawChannel`] is an unframed, lossy byte
//! pipe to the target: reads never block and may return nothing, writes push
//! the whole buffer. Everything above (framing, commands, RTT) is built on it.
//!
//! Implementations:
//! - [`SerialPort`]: a tty in raw mode (Unix)
//! - [`ProcessChannel`]: the stdio of a spawned simulator process
//! - [`MemoryChannel`]: an in-process pair, for tests and loopback targets

pub mod error;
pub mod memory;
pub mod process;
pub mod traits;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use memory::MemoryChannel;
pub use process::ProcessChannel;
pub use traits::RawChannel;

#[cfg(unix)]
pub use serial::SerialPort;
