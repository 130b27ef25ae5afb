use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{BridgeError, Result};

/// Memory addresses travel as 4 bytes, least significant first.
pub const ADDRESS_LEN: usize = 4;

/// Most words a single READ can return (the count travels as `count - 1`).
pub const MAX_READ_WORDS: usize = 0x100;

/// Most words sent in one WRITE by the client.
pub const MAX_WRITE_WORDS: usize = 0xFF;

/// Command tags, the first byte of every request and response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Ping = 0,
    Error = 1,
    Reset = 2,
    Read = 3,
    Write = 4,
}

impl Command {
    /// Lower-case command name for logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Error => "error",
            Command::Reset => "reset",
            Command::Read => "read",
            Command::Write => "write",
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0 => Ok(Command::Ping),
            1 => Ok(Command::Error),
            2 => Ok(Command::Reset),
            3 => Ok(Command::Read),
            4 => Ok(Command::Write),
            other => Err(other),
        }
    }
}

/// A request body, minus its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Reset(bool),
    /// Read `count` words (1..=256) starting at `address`.
    Read { address: u32, count: usize },
    /// Write already word-packed `data` starting at `address`.
    Write { address: u32, data: Bytes },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Self::Ping => Command::Ping,
            Self::Reset(_) => Command::Reset,
            Self::Read { .. } => Command::Read,
            Self::Write { .. } => Command::Write,
        }
    }

    /// Append the request body (without the tag) to `dst`.
    pub fn encode_body(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Self::Ping => {}
            Self::Reset(hold) => dst.put_u8(u8::from(*hold)),
            Self::Read { address, count } => {
                if !(1..=MAX_READ_WORDS).contains(count) {
                    return Err(BridgeError::Argument(format!(
                        "read of {count} words (must be 1..={MAX_READ_WORDS})"
                    )));
                }
                dst.put_u32_le(*address);
                dst.put_u8((*count - 1) as u8);
            }
            Self::Write { address, data } => {
                dst.put_u32_le(*address);
                dst.put_slice(data);
            }
        }
        Ok(())
    }

    /// Number of response bytes after the tag, for a target with `word_size`.
    pub fn response_len(&self, word_size: usize) -> usize {
        match self {
            Self::Ping => 0,
            Self::Reset(_) => 1,
            Self::Read { count, .. } => ADDRESS_LEN + count * word_size,
            Self::Write { .. } => ADDRESS_LEN + 1,
        }
    }
}
