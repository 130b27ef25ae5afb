//! Host and target ends of the memlink command protocol.
//!
//! A [`Bridge`] talks to a target over any [`RawChannel`]: one request frame
//! out, one response frame back. On top of the raw memory commands it offers
//! chunked byte and word access and an [`rtt`] reader for SEGGER-style ring
//! buffers living in target RAM.
//!
//! The [`target`] module is the other end of the wire: a [`Responder`] that
//! turns request tokens into bus cycles and response tokens, and a [`Target`]
//! that wraps it in a codec so it can stand in for real hardware.
//!
//! [`RawChannel`]: memlink_transport::RawChannel

pub mod client;
pub mod command;
pub mod error;
pub mod rtt;
pub mod target;

pub use client::{Bridge, BridgeConfig};
pub use command::{Command, Request, ADDRESS_LEN, MAX_READ_WORDS, MAX_WRITE_WORDS};
pub use error::{BridgeError, Result, RttError};
pub use rtt::{
    find_control_block, Descriptor, Direction, RingSpan, RttChannel, RttConfig, RttControl, RttImage,
    RttMode, RTT_MAGIC,
};
pub use target::{AckPolicy, Bus, MemoryBus, Responder, ResponderConfig, Target};
