use std::collections::VecDeque;
use std::task::Poll;

use bytes::{Bytes, BytesMut};
use memlink_frame::{CobsConfig, Decoder, Encoder, Framed};
use memlink_transport::RawChannel;
use tracing::{debug, trace, warn};

use crate::command::{Command, ADDRESS_LEN};
use crate::error::{BridgeError, Result};

/// The target's memory bus, one word per cycle.
///
/// `Poll::Pending` means the bus has not acknowledged the cycle yet; the
/// responder will retry it under its [`AckPolicy`].
pub trait Bus {
    /// Read the word at the aligned byte `address` into `word`, LSB first.
    fn poll_read(&mut self, address: u32, word: &mut [u8]) -> Poll<()>;

    /// Write `word` (LSB first) to the aligned byte `address`.
    fn poll_write(&mut self, address: u32, word: &[u8]) -> Poll<()>;

    /// Drive the target's reset line.
    fn set_reset(&mut self, _asserted: bool) {}
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn poll_read(&mut self, address: u32, word: &mut [u8]) -> Poll<()> {
        (**self).poll_read(address, word)
    }

    fn poll_write(&mut self, address: u32, word: &[u8]) -> Poll<()> {
        (**self).poll_write(address, word)
    }

    fn set_reset(&mut self, asserted: bool) {
        (**self).set_reset(asserted)
    }
}

/// How long to wait for a bus acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Never give up. A pending cycle stalls the responder until a later
    /// [`Responder::poll`] sees it acknowledged.
    #[default]
    Forever,
    /// Give up after this many unacknowledged polls of one cycle, close the
    /// response early and skip the rest of the request.
    MaxPolls(u32),
}

/// Configuration for the target-side responder.
#[derive(Debug, Clone, Copy)]
pub struct ResponderConfig {
    /// Bus word size in bytes (1, 2, 4 or 8). Default: 4.
    pub word_size: usize,
    /// Bus acknowledgment wait. Default: forever.
    pub ack_policy: AckPolicy,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            word_size: 4,
            ack_policy: AckPolicy::Forever,
        }
    }
}

impl ResponderConfig {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.word_size, 1 | 2 | 4 | 8) {
            return Err(BridgeError::Argument(format!(
                "word size must be 1, 2, 4 or 8 bytes, got {}",
                self.word_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitStart,
    WaitEnd,
    Command,
    ResetSet,
    ReadAddress,
    ReadLength,
    ReadLoad,
    ReadOutput,
    WriteAddress,
    WriteData,
    WriteStore,
    WriteOutput,
    /// Skip the rest of an abandoned request, up to its closing boundary.
    Drain,
}

/// Target-side command state machine.
///
/// Consumes request tokens, drives the [`Bus`], and writes response tokens to
/// an output queue. Tokens that cannot be consumed yet (while a bus cycle is
/// outstanding) stay queued inside the responder.
#[derive(Debug)]
pub struct Responder {
    config: ResponderConfig,
    state: State,
    input: VecDeque<Framed>,
    address: u32,
    address_byte: usize,
    remaining: usize,
    word: Vec<u8>,
    fill: usize,
    written: usize,
    polls: u32,
    reset: bool,
}

impl Default for Responder {
    fn default() -> Self {
        Self::build(ResponderConfig::default())
    }
}

impl Responder {
    pub fn new(config: ResponderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ResponderConfig) -> Self {
        Self {
            config,
            state: State::WaitStart,
            input: VecDeque::new(),
            address: 0,
            address_byte: 0,
            remaining: 0,
            word: vec![0; config.word_size],
            fill: 0,
            written: 0,
            polls: 0,
            reset: false,
        }
    }

    /// Feed one request token and run as far as the bus allows.
    pub fn step<B: Bus + ?Sized>(&mut self, token: Framed, bus: &mut B, out: &mut Vec<Framed>) {
        self.input.push_back(token);
        self.poll(bus, out);
    }

    /// Run queued tokens and outstanding bus cycles as far as possible.
    pub fn poll<B: Bus + ?Sized>(&mut self, bus: &mut B, out: &mut Vec<Framed>) {
        loop {
            let progressed = match self.state {
                State::ReadLoad => self.read_load(bus, out),
                State::ReadOutput => {
                    self.read_output(out);
                    true
                }
                State::WriteStore => self.write_store(bus, out),
                State::WriteOutput => {
                    out.push(Framed::Data((self.written % 0x100) as u8));
                    self.state = State::WaitEnd;
                    true
                }
                _ => match self.input.pop_front() {
                    Some(token) => {
                        if let Some(unconsumed) = self.consume(token, bus, out) {
                            self.input.push_front(unconsumed);
                        }
                        true
                    }
                    None => false,
                },
            };
            if !progressed {
                return;
            }
        }
    }

    /// Whether the responder is between requests with nothing queued.
    pub fn is_idle(&self) -> bool {
        self.state == State::WaitStart && self.input.is_empty()
    }

    /// Last value written to the reset line.
    pub fn reset_asserted(&self) -> bool {
        self.reset
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    /// Handle one token in an input-driven state. Returns the token if the
    /// state changed without consuming it.
    fn consume<B: Bus + ?Sized>(
        &mut self,
        token: Framed,
        bus: &mut B,
        out: &mut Vec<Framed>,
    ) -> Option<Framed> {
        let value = match token {
            Framed::Boundary => return self.boundary(out),
            Framed::Data(value) => value,
        };

        match self.state {
            State::WaitStart | State::WaitEnd | State::Drain => {}
            State::Command => self.command(value, out),
            State::ResetSet => {
                let asserted = value != 0;
                out.push(Framed::Data(u8::from(asserted)));
                bus.set_reset(asserted);
                self.reset = asserted;
                debug!(asserted, "reset line");
                self.state = State::WaitEnd;
            }
            State::ReadAddress | State::WriteAddress => self.take_address_byte(value, out),
            State::ReadLength => {
                self.remaining = usize::from(value);
                self.polls = 0;
                self.state = State::ReadLoad;
            }
            State::WriteData => {
                self.word[self.fill] = value;
                self.fill += 1;
                if self.fill == self.config.word_size {
                    self.polls = 0;
                    self.state = State::WriteStore;
                }
            }
            State::ReadLoad | State::ReadOutput | State::WriteStore | State::WriteOutput => {
                return Some(token);
            }
        }
        None
    }

    fn boundary(&mut self, out: &mut Vec<Framed>) -> Option<Framed> {
        match self.state {
            State::WaitStart => {
                out.push(Framed::Boundary);
                self.state = State::Command;
                None
            }
            State::WriteData => {
                // End of write data; report the count, then close on the
                // same boundary from WaitEnd.
                self.state = State::WriteOutput;
                Some(Framed::Boundary)
            }
            State::Drain => {
                self.state = State::WaitStart;
                None
            }
            State::WaitEnd
            | State::Command
            | State::ResetSet
            | State::ReadAddress
            | State::ReadLength
            | State::WriteAddress => {
                if self.state != State::WaitEnd {
                    debug!(state = ?self.state, "request truncated");
                }
                out.push(Framed::Boundary);
                self.state = State::WaitStart;
                None
            }
            State::ReadLoad | State::ReadOutput | State::WriteStore | State::WriteOutput => {
                Some(Framed::Boundary)
            }
        }
    }

    fn command(&mut self, tag: u8, out: &mut Vec<Framed>) {
        let (response, next) = match Command::try_from(tag) {
            Ok(Command::Ping) => (Command::Ping, State::WaitEnd),
            Ok(Command::Reset) => (Command::Reset, State::ResetSet),
            Ok(Command::Read) => (Command::Read, State::ReadAddress),
            Ok(Command::Write) => (Command::Write, State::WriteAddress),
            Ok(Command::Error) | Err(_) => {
                debug!(tag, "unsupported command");
                (Command::Error, State::WaitEnd)
            }
        };
        trace!(command = response.name(), "command");
        out.push(Framed::Data(response.into()));
        self.address = 0;
        self.address_byte = 0;
        self.state = next;
    }

    fn take_address_byte(&mut self, value: u8, out: &mut Vec<Framed>) {
        let align = (self.config.word_size - 1) as u8;
        let echo = if self.address_byte == 0 {
            value & !align
        } else {
            value
        };
        out.push(Framed::Data(echo));
        self.address |= u32::from(value) << (8 * self.address_byte);
        self.address_byte += 1;

        if self.address_byte == ADDRESS_LEN {
            self.address &= !u32::from(align);
            if self.state == State::ReadAddress {
                self.state = State::ReadLength;
            } else {
                self.fill = 0;
                self.written = 0;
                self.state = State::WriteData;
            }
        }
    }

    fn read_load<B: Bus + ?Sized>(&mut self, bus: &mut B, out: &mut Vec<Framed>) -> bool {
        match bus.poll_read(self.address, &mut self.word) {
            Poll::Ready(()) => {
                self.state = State::ReadOutput;
                true
            }
            Poll::Pending => self.unacknowledged(out),
        }
    }

    fn read_output(&mut self, out: &mut Vec<Framed>) {
        out.extend(self.word.iter().map(|&b| Framed::Data(b)));
        self.address = self.address.wrapping_add(self.config.word_size as u32);
        if self.remaining == 0 {
            self.state = State::WaitEnd;
        } else {
            self.remaining -= 1;
            self.polls = 0;
            self.state = State::ReadLoad;
        }
    }

    fn write_store<B: Bus + ?Sized>(&mut self, bus: &mut B, out: &mut Vec<Framed>) -> bool {
        match bus.poll_write(self.address, &self.word) {
            Poll::Ready(()) => {
                self.address = self.address.wrapping_add(self.config.word_size as u32);
                self.written += 1;
                self.fill = 0;
                self.state = State::WriteData;
                true
            }
            Poll::Pending => self.unacknowledged(out),
        }
    }

    /// Account for one unacknowledged bus poll. Returns whether the state
    /// machine moved on.
    fn unacknowledged(&mut self, out: &mut Vec<Framed>) -> bool {
        self.polls = self.polls.saturating_add(1);
        match self.config.ack_policy {
            AckPolicy::Forever => false,
            AckPolicy::MaxPolls(max) if self.polls < max => true,
            AckPolicy::MaxPolls(_) => {
                warn!(
                    address = self.address,
                    polls = self.polls,
                    "bus cycle not acknowledged, abandoning request"
                );
                out.push(Framed::Boundary);
                self.state = State::Drain;
                true
            }
        }
    }
}

/// A flat, little-endian memory on the bus.
///
/// Cycles outside `base..base + size` are never acknowledged.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    base: u32,
    mem: Vec<u8>,
    reset: bool,
}

impl MemoryBus {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            mem: vec![0; size],
            reset: false,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    pub fn reset_asserted(&self) -> bool {
        self.reset
    }

    fn offset(&self, address: u32, len: usize) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        (offset.checked_add(len)? <= self.mem.len()).then_some(offset)
    }

    /// Copy `data` into memory at `address`.
    pub fn load(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let offset = self.offset(address, data.len()).ok_or_else(|| {
            BridgeError::Argument(format!(
                "{} bytes at {address:#010x} do not fit in memory at {:#010x}..{:#010x}",
                data.len(),
                self.base,
                u64::from(self.base) + self.mem.len() as u64
            ))
        })?;
        self.mem[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn slice(&self, address: u32, len: usize) -> Option<&[u8]> {
        let offset = self.offset(address, len)?;
        Some(&self.mem[offset..offset + len])
    }

    pub fn read_u32(&self, address: u32) -> Option<u32> {
        let bytes = self.slice(address, 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        self.load(address, &value.to_le_bytes())
    }
}

impl Bus for MemoryBus {
    fn poll_read(&mut self, address: u32, word: &mut [u8]) -> Poll<()> {
        match self.offset(address, word.len()) {
            Some(offset) => {
                word.copy_from_slice(&self.mem[offset..offset + word.len()]);
                Poll::Ready(())
            }
            None => Poll::Pending,
        }
    }

    fn poll_write(&mut self, address: u32, word: &[u8]) -> Poll<()> {
        match self.offset(address, word.len()) {
            Some(offset) => {
                self.mem[offset..offset + word.len()].copy_from_slice(word);
                Poll::Ready(())
            }
            None => Poll::Pending,
        }
    }

    fn set_reset(&mut self, asserted: bool) {
        self.reset = asserted;
    }
}

/// A complete target: wire decoder, responder, wire encoder and bus.
///
/// Implements [`RawChannel`], so a [`Bridge`](crate::Bridge) can talk to it
/// directly as an in-process loopback.
#[derive(Debug)]
pub struct Target<B> {
    decoder: Decoder,
    encoder: Encoder,
    responder: Responder,
    bus: B,
    tokens: Vec<Framed>,
    output: BytesMut,
}

impl<B: Bus> Target<B> {
    pub fn new(bus: B) -> Self {
        Self {
            decoder: Decoder::default(),
            encoder: Encoder::default(),
            responder: Responder::default(),
            bus,
            tokens: Vec::new(),
            output: BytesMut::new(),
        }
    }

    pub fn with_config(bus: B, responder: ResponderConfig, cobs: CobsConfig) -> Result<Self> {
        Ok(Self {
            decoder: Decoder::new(cobs)?,
            encoder: Encoder::new(cobs)?,
            responder: Responder::new(responder)?,
            bus,
            tokens: Vec::new(),
            output: BytesMut::new(),
        })
    }

    /// Feed received wire bytes and run the responder.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if let Some(token) = self.decoder.feed(byte) {
                self.responder.step(token, &mut self.bus, &mut self.tokens);
                self.flush_tokens();
            }
        }
    }

    /// Give a stalled bus cycle another chance.
    pub fn poll(&mut self) {
        self.responder.poll(&mut self.bus, &mut self.tokens);
        self.flush_tokens();
    }

    /// Take every response byte produced so far.
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    fn flush_tokens(&mut self) {
        for token in self.tokens.drain(..) {
            if let Err(err) = self.encoder.push(token, &mut self.output) {
                warn!(%err, "dropping response token");
            }
        }
    }
}

impl<B: Bus> RawChannel for Target<B> {
    fn read_available(&mut self) -> memlink_transport::Result<Bytes> {
        self.poll();
        Ok(self.take_output())
    }

    fn write_all(&mut self, data: &[u8]) -> memlink_transport::Result<()> {
        self.feed(data);
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "loopback"
    }
}
