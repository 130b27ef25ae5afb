//! SEGGER-style RTT ring buffers in target memory.
//!
//! Layout of a control block at `base`:
//!
//! | offset | contents |
//! |---|---|
//! | 0 | magic `"SEGGER RTT\0\0\0\0\0\0"` |
//! | 16 | up channel count |
//! | 20 | down channel count |
//! | 24 | up descriptors, then down descriptors (24 bytes each) |
//!
//! The target only ever advances an up channel's write index; the host only
//! advances its read index. Down channels are the other way round.

use std::ops::{ControlFlow, Range};
use std::thread;
use std::time::Duration;

use memlink_transport::RawChannel;
use tracing::{debug, trace};

use crate::client::Bridge;
use crate::error::{BridgeError, Result, RttError};

/// Control block identifier.
pub const RTT_MAGIC: &[u8; 16] = b"SEGGER RTT\0\0\0\0\0\0";

const HEADER_SIZE: u32 = 24;
const UP_COUNT_OFFSET: u32 = 16;

/// Size of one channel descriptor.
pub const DESCRIPTOR_SIZE: u32 = 24;

const NAME_PTR_OFFSET: u32 = 0;
const BUFFER_PTR_OFFSET: u32 = 4;
const SIZE_OFFSET: u32 = 8;
const WRITE_OFFSET: u32 = 12;
const READ_OFFSET: u32 = 16;
const FLAGS_OFFSET: u32 = 20;

const MODE_MASK: u32 = 0x3;

/// Host-side RTT settings.
#[derive(Debug, Clone)]
pub struct RttConfig {
    /// Sleep between polls while waiting for data. Default: 10 ms.
    pub poll_interval: Duration,
    /// Longest channel name read from the target. Default: 64 bytes.
    pub max_name_len: usize,
    /// Most channels accepted per direction. Default: 256.
    pub max_channels: usize,
}

impl Default for RttConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_name_len: 64,
            max_channels: 256,
        }
    }
}

/// Scan `[start, end)` for a control block and return its address.
///
/// The last `RTT_MAGIC.len() - 1` bytes of each chunk are carried into the
/// next, so a block straddling a chunk seam is still found.
pub fn find_control_block<C: RawChannel>(
    bridge: &mut Bridge<C>,
    start: u32,
    end: u64,
) -> Result<u32> {
    let word_size = bridge.word_size() as u64;
    let span = end.saturating_sub(u64::from(start));
    let len = usize::try_from(span - span % word_size).map_err(|_| {
        BridgeError::Argument(format!("scan range {start:#010x}..{end:#x} is too large"))
    })?;
    debug!(start, end, "scanning for RTT control block");

    let keep = RTT_MAGIC.len() - 1;
    let mut carry: Vec<u8> = Vec::with_capacity(keep);
    let mut found = None;
    bridge.for_each_read_chunk(start, len, |address, chunk| {
        let window_start = u64::from(address) - carry.len() as u64;
        carry.extend_from_slice(chunk);
        // Control blocks are word aligned; ignore stray unaligned copies.
        if let Some(index) = carry
            .windows(RTT_MAGIC.len())
            .enumerate()
            .position(|(i, window)| {
                window == RTT_MAGIC && (window_start + i as u64) % word_size == 0
            })
        {
            found = Some((window_start + index as u64) as u32);
            return ControlFlow::Break(());
        }
        let tail = carry.len().saturating_sub(keep);
        carry.drain(..tail);
        ControlFlow::Continue(())
    })?;

    match found {
        Some(address) => {
            debug!(address, "found RTT control block");
            Ok(address)
        }
        None => Err(RttError::NotFound { start, end }.into()),
    }
}

/// Producer behavior when an up buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RttMode {
    /// Drop the whole write.
    Skip,
    /// Write what fits.
    Trim,
    /// Wait for the host to make room.
    BlockIfFull,
    Reserved,
}

impl From<u32> for RttMode {
    fn from(flags: u32) -> Self {
        match flags & MODE_MASK {
            0 => RttMode::Skip,
            1 => RttMode::Trim,
            2 => RttMode::BlockIfFull,
            _ => RttMode::Reserved,
        }
    }
}

/// Which way a channel carries data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Target to host.
    Up,
    /// Host to target.
    Down,
}

impl Direction {
    pub fn name(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// Raw contents of a channel descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub name_ptr: u32,
    pub buffer_ptr: u32,
    pub size: u32,
    pub write: u32,
    pub read: u32,
    pub flags: u32,
}

impl Descriptor {
    /// Read the descriptor at `address`.
    pub fn load<C: RawChannel>(bridge: &mut Bridge<C>, address: u32) -> Result<Self> {
        let words = bridge.read_words(address, 6)?;
        Ok(Self {
            name_ptr: words[(NAME_PTR_OFFSET / 4) as usize],
            buffer_ptr: words[(BUFFER_PTR_OFFSET / 4) as usize],
            size: words[(SIZE_OFFSET / 4) as usize],
            write: words[(WRITE_OFFSET / 4) as usize],
            read: words[(READ_OFFSET / 4) as usize],
            flags: words[(FLAGS_OFFSET / 4) as usize],
        })
    }

    pub fn is_allocated(&self) -> bool {
        self.buffer_ptr != 0
    }

    pub fn mode(&self) -> RttMode {
        RttMode::from(self.flags)
    }

    /// The ring indices, checked for consistency.
    pub fn span(&self, address: u32) -> Result<RingSpan> {
        if self.size == 0 || self.write >= self.size || self.read >= self.size {
            return Err(RttError::BadDescriptor {
                address,
                reason: format!(
                    "size {} with write index {} and read index {}",
                    self.size, self.write, self.read
                ),
            }
            .into());
        }
        if u64::from(self.buffer_ptr) + u64::from(self.size) > 1 << 32 {
            return Err(RttError::BadDescriptor {
                address,
                reason: format!(
                    "buffer {:#010x} of {} bytes runs past the address space",
                    self.buffer_ptr, self.size
                ),
            }
            .into());
        }
        Ok(RingSpan {
            capacity: self.size,
            head: self.write,
            tail: self.read,
        })
    }
}

/// Occupied region of a ring buffer: `tail` is where the consumer reads
/// next, `head` where the producer writes next.
///
/// `head == tail` means empty, so at most `capacity - 1` bytes are ever
/// held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSpan {
    pub capacity: u32,
    pub head: u32,
    pub tail: u32,
}

impl RingSpan {
    /// Bytes waiting to be consumed.
    pub fn available(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        let capacity = u64::from(self.capacity);
        ((u64::from(self.head) + capacity - u64::from(self.tail) % capacity) % capacity) as u32
    }

    /// Bytes that can be produced without overwriting unread data.
    pub fn space(&self) -> u32 {
        self.capacity.saturating_sub(1) - self.available()
    }

    /// `index + n`, modulo the capacity.
    fn wrap(&self, index: u32, n: u32) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        ((u64::from(index) + u64::from(n)) % u64::from(self.capacity)) as u32
    }

    /// Buffer offsets of the next `n` bytes starting at `from`, split at the
    /// wrap point.
    fn ranges(&self, from: u32, n: u32) -> (Range<u32>, Range<u32>) {
        let first = n.min(self.capacity.saturating_sub(from));
        (from..from + first, 0..n - first)
    }

    /// Offsets of the next `n` readable bytes.
    pub fn read_ranges(&self, n: u32) -> (Range<u32>, Range<u32>) {
        self.ranges(self.tail, n.min(self.available()))
    }

    /// Offsets of the next `n` writable bytes.
    pub fn write_ranges(&self, n: u32) -> (Range<u32>, Range<u32>) {
        self.ranges(self.head, n.min(self.space()))
    }

    /// Copy the next `n` readable bytes out of a full buffer image.
    pub fn copy_out(&self, buffer: &[u8], n: u32) -> Vec<u8> {
        let (first, second) = self.read_ranges(n);
        let mut out = Vec::with_capacity(first.len() + second.len());
        out.extend_from_slice(&buffer[first.start as usize..first.end as usize]);
        out.extend_from_slice(&buffer[second.start as usize..second.end as usize]);
        out
    }

    /// Consume `n` bytes.
    pub fn advance_tail(&mut self, n: u32) {
        self.tail = self.wrap(self.tail, n);
    }

    /// Produce `n` bytes.
    pub fn advance_head(&mut self, n: u32) {
        self.head = self.wrap(self.head, n);
    }
}

/// A parsed control block.
#[derive(Debug, Clone)]
pub struct RttControl {
    address: u32,
    up_count: usize,
    down_count: usize,
    config: RttConfig,
}

impl RttControl {
    /// Read the control block header at `base`.
    pub fn parse<C: RawChannel>(bridge: &mut Bridge<C>, base: u32) -> Result<Self> {
        Self::parse_with_config(bridge, base, RttConfig::default())
    }

    pub fn parse_with_config<C: RawChannel>(
        bridge: &mut Bridge<C>,
        base: u32,
        config: RttConfig,
    ) -> Result<Self> {
        let header = bridge.read_bytes(base, HEADER_SIZE as usize)?;
        if &header[..RTT_MAGIC.len()] != RTT_MAGIC {
            return Err(RttError::NotFound {
                start: base,
                end: u64::from(base) + RTT_MAGIC.len() as u64,
            }
            .into());
        }
        let count = |offset: usize| {
            u32::from_le_bytes([
                header[offset],
                header[offset + 1],
                header[offset + 2],
                header[offset + 3],
            ]) as usize
        };
        let up_count = count(UP_COUNT_OFFSET as usize);
        let down_count = count(UP_COUNT_OFFSET as usize + 4);
        if up_count > config.max_channels || down_count > config.max_channels {
            return Err(RttError::BadDescriptor {
                address: base,
                reason: format!(
                    "{up_count} up and {down_count} down channels (at most {} each)",
                    config.max_channels
                ),
            }
            .into());
        }
        let end = u64::from(base)
            + u64::from(HEADER_SIZE)
            + (up_count as u64 + down_count as u64) * u64::from(DESCRIPTOR_SIZE);
        if end > 1 << 32 {
            return Err(RttError::BadDescriptor {
                address: base,
                reason: format!("channel array ends at {end:#x}, past the address space"),
            }
            .into());
        }
        let control = Self {
            address: base,
            up_count,
            down_count,
            config,
        };
        debug!(
            address = base,
            up = control.up_count,
            down = control.down_count,
            "parsed RTT control block"
        );
        Ok(control)
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn up_count(&self) -> usize {
        self.up_count
    }

    pub fn down_count(&self) -> usize {
        self.down_count
    }

    /// Address of descriptor `slot`, counting up channels first. `parse`
    /// has checked that the whole array fits in the address space.
    fn descriptor_address(&self, slot: usize) -> u32 {
        let offset = u64::from(HEADER_SIZE) + slot as u64 * u64::from(DESCRIPTOR_SIZE);
        (u64::from(self.address) + offset) as u32
    }

    fn channel<C: RawChannel>(
        &self,
        bridge: &mut Bridge<C>,
        direction: Direction,
        index: usize,
    ) -> Result<Option<RttChannel>> {
        let (first_slot, count) = match direction {
            Direction::Up => (0, self.up_count),
            Direction::Down => (self.up_count, self.down_count),
        };
        if index >= count {
            return Err(RttError::NoSuchChannel {
                direction: direction.name(),
                index,
                count,
            }
            .into());
        }
        let address = self.descriptor_address(first_slot + index);
        RttChannel::load(bridge, address, direction, index, self.config.clone())
    }

    fn allocated<C: RawChannel>(
        &self,
        bridge: &mut Bridge<C>,
        direction: Direction,
        index: usize,
    ) -> Result<RttChannel> {
        self.channel(bridge, direction, index)?.ok_or_else(|| {
            RttError::Unallocated {
                direction: direction.name(),
                index,
            }
            .into()
        })
    }

    /// Up channel `index`; fails if it has no buffer.
    pub fn up<C: RawChannel>(&self, bridge: &mut Bridge<C>, index: usize) -> Result<RttChannel> {
        self.allocated(bridge, Direction::Up, index)
    }

    /// Down channel `index`; fails if it has no buffer.
    pub fn down<C: RawChannel>(&self, bridge: &mut Bridge<C>, index: usize) -> Result<RttChannel> {
        self.allocated(bridge, Direction::Down, index)
    }

    /// Every allocated up channel.
    pub fn ups<C: RawChannel>(&self, bridge: &mut Bridge<C>) -> Result<Vec<RttChannel>> {
        let mut out = Vec::new();
        for index in 0..self.up_count {
            out.extend(self.channel(bridge, Direction::Up, index)?);
        }
        Ok(out)
    }

    /// Every allocated down channel.
    pub fn downs<C: RawChannel>(&self, bridge: &mut Bridge<C>) -> Result<Vec<RttChannel>> {
        let mut out = Vec::new();
        for index in 0..self.down_count {
            out.extend(self.channel(bridge, Direction::Down, index)?);
        }
        Ok(out)
    }

    /// The first allocated up channel called `name`.
    pub fn find_up<C: RawChannel>(&self, bridge: &mut Bridge<C>, name: &str) -> Result<RttChannel> {
        for index in 0..self.up_count {
            if let Some(channel) = self.channel(bridge, Direction::Up, index)? {
                if channel.name() == Some(name.as_bytes()) {
                    return Ok(channel);
                }
            }
        }
        Err(RttError::ChannelNotFound(name.to_string()).into())
    }
}

/// One ring buffer channel.
///
/// Holds the last descriptor snapshot; every operation reloads it first.
#[derive(Debug, Clone)]
pub struct RttChannel {
    address: u32,
    direction: Direction,
    index: usize,
    name: Option<Vec<u8>>,
    descriptor: Descriptor,
    config: RttConfig,
}

impl RttChannel {
    /// Load the descriptor at `address`. Returns `None` for an unallocated
    /// slot.
    pub fn load<C: RawChannel>(
        bridge: &mut Bridge<C>,
        address: u32,
        direction: Direction,
        index: usize,
        config: RttConfig,
    ) -> Result<Option<Self>> {
        let descriptor = Descriptor::load(bridge, address)?;
        if !descriptor.is_allocated() {
            return Ok(None);
        }
        let name = match descriptor.name_ptr {
            0 => None,
            ptr => Some(bridge.read_c_string(ptr, config.max_name_len)?),
        };
        Ok(Some(Self {
            address,
            direction,
            index,
            name,
            descriptor,
            config,
        }))
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> Option<&[u8]> {
        self.name.as_deref()
    }

    /// Name for display, with invalid UTF-8 replaced.
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .unwrap_or_default()
    }

    /// Descriptor as of the last reload.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Reload the descriptor and return the current ring indices.
    pub fn refresh<C: RawChannel>(&mut self, bridge: &mut Bridge<C>) -> Result<RingSpan> {
        self.descriptor = Descriptor::load(bridge, self.address)?;
        self.descriptor.span(self.address)
    }

    /// Bytes waiting to be read.
    pub fn available<C: RawChannel>(&mut self, bridge: &mut Bridge<C>) -> Result<usize> {
        Ok(self.refresh(bridge)?.available() as usize)
    }

    /// Bytes that can be written.
    pub fn space<C: RawChannel>(&mut self, bridge: &mut Bridge<C>) -> Result<usize> {
        Ok(self.refresh(bridge)?.space() as usize)
    }

    /// Read up to `wanted` bytes that are available now, without waiting.
    pub fn read<C: RawChannel>(&mut self, bridge: &mut Bridge<C>, wanted: usize) -> Result<Vec<u8>> {
        let mut span = self.refresh(bridge)?;
        let n = span.available().min(u32::try_from(wanted).unwrap_or(u32::MAX));
        if n == 0 {
            return Ok(Vec::new());
        }

        let (first, second) = span.read_ranges(n);
        let mut data = read_range(bridge, self.descriptor.buffer_ptr, first)?;
        data.extend(read_range(bridge, self.descriptor.buffer_ptr, second)?);

        span.advance_tail(n);
        write_field(bridge, self.address + READ_OFFSET, span.tail)?;
        self.descriptor.read = span.tail;
        trace!(channel = self.index, len = n, read = span.tail, "rtt read");
        Ok(data)
    }

    /// Read everything available now.
    pub fn read_all<C: RawChannel>(&mut self, bridge: &mut Bridge<C>) -> Result<Vec<u8>> {
        self.read(bridge, usize::MAX)
    }

    /// Read exactly `n` bytes, polling until they arrive.
    pub fn read_exact<C: RawChannel>(&mut self, bridge: &mut Bridge<C>, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let chunk = self.read(bridge, n - out.len())?;
            if chunk.is_empty() {
                thread::sleep(self.config.poll_interval);
            }
            out.extend(chunk);
        }
        Ok(out)
    }

    /// Read one byte. With `wait`, polls until one is available; without,
    /// returns `None` when the buffer is empty.
    pub fn read_byte<C: RawChannel>(
        &mut self,
        bridge: &mut Bridge<C>,
        wait: bool,
    ) -> Result<Option<u8>> {
        loop {
            if let Some(&byte) = self.read(bridge, 1)?.first() {
                return Ok(Some(byte));
            }
            if !wait {
                return Ok(None);
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Write as much of `data` as fits into a down channel. Returns the number
    /// of bytes written.
    pub fn write<C: RawChannel>(&mut self, bridge: &mut Bridge<C>, data: &[u8]) -> Result<usize> {
        if self.direction != Direction::Down {
            return Err(BridgeError::Argument(format!(
                "up channel {} is read-only",
                self.index
            )));
        }
        let mut span = self.refresh(bridge)?;
        let n = span.space().min(u32::try_from(data.len()).unwrap_or(u32::MAX));
        if n == 0 {
            return Ok(0);
        }

        let (first, second) = span.write_ranges(n);
        let split = first.len();
        write_range(bridge, self.descriptor.buffer_ptr, first, &data[..split])?;
        write_range(bridge, self.descriptor.buffer_ptr, second, &data[split..n as usize])?;

        span.advance_head(n);
        write_field(bridge, self.address + WRITE_OFFSET, span.head)?;
        self.descriptor.write = span.head;
        trace!(channel = self.index, len = n, write = span.head, "rtt write");
        Ok(n as usize)
    }
}

/// Read `range` of the buffer at `buffer`, widening the access to whole words.
fn read_range<C: RawChannel>(
    bridge: &mut Bridge<C>,
    buffer: u32,
    range: Range<u32>,
) -> Result<Vec<u8>> {
    if range.is_empty() {
        return Ok(Vec::new());
    }
    let (start, skip, len) = covering(bridge.word_size(), buffer + range.start, range.len());
    let bytes = bridge.read_bytes(start, len)?;
    Ok(bytes[skip..skip + range.len()].to_vec())
}

/// Write `data` over `range` of the buffer at `buffer`, merging with the
/// surrounding bytes of any partially covered word.
fn write_range<C: RawChannel>(
    bridge: &mut Bridge<C>,
    buffer: u32,
    range: Range<u32>,
    data: &[u8],
) -> Result<()> {
    if range.is_empty() {
        return Ok(());
    }
    let address = buffer + range.start;
    let (start, skip, len) = covering(bridge.word_size(), address, data.len());
    if skip == 0 && len == data.len() {
        return bridge.write_bytes(address, data);
    }
    let mut words = bridge.read_bytes(start, len)?;
    words[skip..skip + data.len()].copy_from_slice(data);
    bridge.write_bytes(start, &words)
}

fn write_field<C: RawChannel>(bridge: &mut Bridge<C>, address: u32, value: u32) -> Result<()> {
    let (start, skip, len) = covering(bridge.word_size(), address, 4);
    if skip == 0 && len == 4 {
        return bridge.write_u32(address, value);
    }
    let mut words = bridge.read_bytes(start, len)?;
    words[skip..skip + 4].copy_from_slice(&value.to_le_bytes());
    bridge.write_bytes(start, &words)
}

/// Aligned start, offset into it, and aligned length covering `len` bytes at
/// `address`.
fn covering(word_size: usize, address: u32, len: usize) -> (u32, usize, usize) {
    let start = address - address % word_size as u32;
    let skip = (address - start) as usize;
    let len = (skip + len).div_ceil(word_size) * word_size;
    (start, skip, len)
}

#[derive(Debug, Clone)]
struct ImageChannel {
    name: String,
    capacity: u32,
    contents: Vec<u8>,
    flags: u32,
}

/// Builds a control block and its buffers as a flat memory image.
///
/// Channel names and buffers follow the descriptors, word aligned. Each up
/// channel starts with its initial contents unread.
#[derive(Debug, Clone, Default)]
pub struct RttImage {
    ups: Vec<ImageChannel>,
    downs: Vec<ImageChannel>,
}

impl RttImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an up channel holding `contents` (at most `capacity - 1` bytes are
    /// kept).
    pub fn add_up(mut self, name: &str, capacity: u32, contents: &[u8]) -> Self {
        let keep = contents.len().min(capacity.saturating_sub(1) as usize);
        self.ups.push(ImageChannel {
            name: name.to_string(),
            capacity,
            contents: contents[..keep].to_vec(),
            flags: 0,
        });
        self
    }

    /// Add an empty down channel.
    pub fn add_down(mut self, name: &str, capacity: u32) -> Self {
        self.downs.push(ImageChannel {
            name: name.to_string(),
            capacity,
            contents: Vec::new(),
            flags: 0,
        });
        self
    }

    /// Total image size in bytes.
    pub fn size(&self) -> usize {
        let descriptors = (self.ups.len() + self.downs.len()) * DESCRIPTOR_SIZE as usize;
        let payload: usize = self
            .ups
            .iter()
            .chain(&self.downs)
            .map(|c| align4(c.name.len() + 1) + align4(c.capacity as usize))
            .sum();
        HEADER_SIZE as usize + descriptors + payload
    }

    /// Lay the image out for loading at `base`.
    pub fn build(&self, base: u32) -> Vec<u8> {
        let mut image = vec![0u8; self.size()];
        image[..RTT_MAGIC.len()].copy_from_slice(RTT_MAGIC);
        put_u32(&mut image, UP_COUNT_OFFSET as usize, self.ups.len() as u32);
        put_u32(&mut image, UP_COUNT_OFFSET as usize + 4, self.downs.len() as u32);

        let mut cursor =
            HEADER_SIZE as usize + (self.ups.len() + self.downs.len()) * DESCRIPTOR_SIZE as usize;
        for (slot, channel) in self.ups.iter().chain(&self.downs).enumerate() {
            let descriptor = HEADER_SIZE as usize + slot * DESCRIPTOR_SIZE as usize;

            let name_at = cursor;
            image[name_at..name_at + channel.name.len()].copy_from_slice(channel.name.as_bytes());
            cursor += align4(channel.name.len() + 1);

            let buffer_at = cursor;
            image[buffer_at..buffer_at + channel.contents.len()].copy_from_slice(&channel.contents);
            cursor += align4(channel.capacity as usize);

            let fields = [
                (NAME_PTR_OFFSET, base + name_at as u32),
                (BUFFER_PTR_OFFSET, base + buffer_at as u32),
                (SIZE_OFFSET, channel.capacity),
                (WRITE_OFFSET, channel.contents.len() as u32),
                (READ_OFFSET, 0),
                (FLAGS_OFFSET, channel.flags),
            ];
            for (offset, value) in fields {
                put_u32(&mut image, descriptor + offset as usize, value);
            }
        }
        image
    }
}

fn align4(n: usize) -> usize {
    n.div_ceil(4) * 4
}

fn put_u32(image: &mut [u8], at: usize, value: u32) {
    image[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use memlink_frame::FrameConfig;

    use super::*;
    use crate::client::BridgeConfig;
    use crate::target::{MemoryBus, Target};

    const BASE: u32 = 0x2000_0000;

    fn bridge_with(image: &RttImage, at: u32) -> Bridge<Target<MemoryBus>> {
        let mut bus = MemoryBus::new(BASE, 0x1000);
        bus.load(at, &image.build(at)).unwrap();
        Bridge::new(Target::new(bus))
    }

    fn bus(bridge: &mut Bridge<Target<MemoryBus>>) -> &mut MemoryBus {
        bridge.channel_mut().bus_mut()
    }

    fn terminal() -> RttImage {
        RttImage::new().add_up("Terminal", 16, b"")
    }

    #[test]
    fn ring_span_arithmetic() {
        let mut span = RingSpan {
            capacity: 16,
            head: 10,
            tail: 6,
        };
        assert_eq!(span.available(), 4);
        assert_eq!(span.space(), 11);
        assert_eq!(span.read_ranges(100), (6..10, 0..0));
        span.advance_tail(4);
        assert_eq!(span.tail, 10);

        let mut wrapped = RingSpan {
            capacity: 16,
            head: 2,
            tail: 14,
        };
        assert_eq!(wrapped.available(), 4);
        assert_eq!(wrapped.read_ranges(4), (14..16, 0..2));
        let buffer: Vec<u8> = (0..16).collect();
        assert_eq!(wrapped.copy_out(&buffer, 4), vec![14, 15, 0, 1]);
        wrapped.advance_tail(4);
        assert_eq!(wrapped.tail, 2);

        let full = RingSpan {
            capacity: 8,
            head: 3,
            tail: 4,
        };
        assert_eq!(full.available(), 7);
        assert_eq!(full.space(), 0);
    }

    #[test]
    fn ring_span_near_u32_limits() {
        let mut span = RingSpan {
            capacity: 0x9000_0000,
            head: 0x8000_0000,
            tail: 0,
        };
        assert_eq!(span.available(), 0x8000_0000);
        assert_eq!(span.space(), 0x0FFF_FFFF);
        span.advance_tail(0x8000_0000);
        assert_eq!(span.available(), 0);

        let mut wrapped = RingSpan {
            capacity: 0x9000_0000,
            head: 0x1000,
            tail: 0x8FFF_0000,
        };
        assert_eq!(wrapped.available(), 0x1_1000);
        assert_eq!(wrapped.read_ranges(u32::MAX), (0x8FFF_0000..0x9000_0000, 0..0x1000));
        wrapped.advance_tail(0x1_1000);
        assert_eq!(wrapped.tail, 0x1000);
        wrapped.advance_head(0x8FFF_FFFF);
        assert_eq!(wrapped.head, 0xFFF);
    }

    #[test]
    fn finds_block_across_chunk_seam() {
        // 1024-byte read chunks: put the magic astride the first seam.
        let at = BASE + 1024 - 8;
        let mut bridge = bridge_with(&terminal(), at);
        let found = find_control_block(&mut bridge, BASE, u64::from(BASE) + 0x1000).unwrap();
        assert_eq!(found, at);
    }

    #[test]
    fn finds_block_with_small_chunks() {
        let image = terminal();
        let mut bus = MemoryBus::new(BASE, 0x400);
        bus.load(BASE + 0x104, &image.build(BASE + 0x104)).unwrap();
        // Unaligned copy of the magic, e.g. inside a string table.
        bus.load(BASE + 0x11, RTT_MAGIC).unwrap();
        let config = BridgeConfig {
            read_chunk_words: 3,
            ..BridgeConfig::default()
        };
        let mut bridge = Bridge::with_config(Target::new(bus), config).unwrap();
        let found = find_control_block(&mut bridge, BASE, u64::from(BASE) + 0x400).unwrap();
        assert_eq!(found, BASE + 0x104);
    }

    #[test]
    fn missing_block_is_not_found() {
        let mut bridge = Bridge::new(Target::new(MemoryBus::new(BASE, 0x200)));
        let err = find_control_block(&mut bridge, BASE, u64::from(BASE) + 0x200).unwrap_err();
        assert!(matches!(err, BridgeError::Rtt(RttError::NotFound { .. })));
    }

    #[test]
    fn parse_lists_channels() {
        let image = RttImage::new()
            .add_up("Terminal", 64, b"hello")
            .add_up("Trace", 32, b"")
            .add_down("Terminal", 16);
        let mut bridge = bridge_with(&image, BASE + 0x40);
        let control = RttControl::parse(&mut bridge, BASE + 0x40).unwrap();
        assert_eq!(control.up_count(), 2);
        assert_eq!(control.down_count(), 1);

        let names: Vec<String> = control
            .ups(&mut bridge)
            .unwrap()
            .iter()
            .map(RttChannel::display_name)
            .collect();
        assert_eq!(names, vec!["Terminal", "Trace"]);

        let downs = control.downs(&mut bridge).unwrap();
        assert_eq!(downs.len(), 1);
        assert_eq!(downs[0].direction(), Direction::Down);

        let mut up = control.find_up(&mut bridge, "Terminal").unwrap();
        assert_eq!(up.available(&mut bridge).unwrap(), 5);
        assert_eq!(up.read_all(&mut bridge).unwrap(), b"hello");
        assert_eq!(up.available(&mut bridge).unwrap(), 0);
    }

    #[test]
    fn parse_rejects_wrong_magic() {
        let mut bridge = Bridge::new(Target::new(MemoryBus::new(BASE, 0x100)));
        let err = RttControl::parse(&mut bridge, BASE).unwrap_err();
        assert!(matches!(err, BridgeError::Rtt(RttError::NotFound { .. })));
    }

    #[test]
    fn parse_rejects_absurd_channel_counts() {
        let mut bridge = bridge_with(&terminal(), BASE);
        bus(&mut bridge).write_u32(BASE + UP_COUNT_OFFSET, 0x0C00_0000).unwrap();
        bus(&mut bridge).write_u32(BASE + UP_COUNT_OFFSET + 4, 1).unwrap();
        assert!(matches!(
            RttControl::parse(&mut bridge, BASE),
            Err(BridgeError::Rtt(RttError::BadDescriptor { .. }))
        ));

        // Even without a count limit the array must fit in the address space.
        let unlimited = RttConfig {
            max_channels: usize::MAX,
            ..RttConfig::default()
        };
        assert!(matches!(
            RttControl::parse_with_config(&mut bridge, BASE, unlimited),
            Err(BridgeError::Rtt(RttError::BadDescriptor { .. }))
        ));
    }

    #[test]
    fn unallocated_channels_skipped_and_rejected() {
        let image = RttImage::new()
            .add_up("Terminal", 16, b"")
            .add_up("Spare", 16, b"");
        let mut bridge = bridge_with(&image, BASE);
        let spare = BASE + HEADER_SIZE + DESCRIPTOR_SIZE;
        bus(&mut bridge).write_u32(spare + BUFFER_PTR_OFFSET, 0).unwrap();

        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        assert_eq!(control.ups(&mut bridge).unwrap().len(), 1);
        assert!(matches!(
            control.up(&mut bridge, 1),
            Err(BridgeError::Rtt(RttError::Unallocated { index: 1, .. }))
        ));
        assert!(matches!(
            control.up(&mut bridge, 2),
            Err(BridgeError::Rtt(RttError::NoSuchChannel { index: 2, count: 2, .. }))
        ));
        assert!(matches!(
            control.find_up(&mut bridge, "Spare"),
            Err(BridgeError::Rtt(RttError::ChannelNotFound(_)))
        ));
    }

    /// Set up channel 0's indices and buffer contents directly in memory.
    fn stage(bridge: &mut Bridge<Target<MemoryBus>>, write: u32, read: u32) -> u32 {
        let descriptor = BASE + HEADER_SIZE;
        let bus = bus(bridge);
        let buffer = bus.read_u32(descriptor + BUFFER_PTR_OFFSET).unwrap();
        let pattern: Vec<u8> = (0..16).map(|i| b'a' + i).collect();
        bus.load(buffer, &pattern).unwrap();
        bus.write_u32(descriptor + WRITE_OFFSET, write).unwrap();
        bus.write_u32(descriptor + READ_OFFSET, read).unwrap();
        descriptor
    }

    #[test]
    fn read_without_wrap_writes_back_read_index() {
        let mut bridge = bridge_with(&terminal(), BASE);
        let descriptor = stage(&mut bridge, 10, 6);
        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        let mut up = control.up(&mut bridge, 0).unwrap();

        assert_eq!(up.read_all(&mut bridge).unwrap(), b"ghij");
        assert_eq!(bus(&mut bridge).read_u32(descriptor + READ_OFFSET), Some(10));
        assert!(up.read_all(&mut bridge).unwrap().is_empty());
    }

    #[test]
    fn read_across_wrap() {
        let mut bridge = bridge_with(&terminal(), BASE);
        let descriptor = stage(&mut bridge, 2, 14);
        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        let mut up = control.up(&mut bridge, 0).unwrap();

        assert_eq!(up.read(&mut bridge, 100).unwrap(), b"opab");
        assert_eq!(bus(&mut bridge).read_u32(descriptor + READ_OFFSET), Some(2));
    }

    #[test]
    fn partial_read_and_single_bytes() {
        let mut bridge = bridge_with(&terminal(), BASE);
        stage(&mut bridge, 5, 1);
        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        let mut up = control.up(&mut bridge, 0).unwrap();

        assert_eq!(up.read(&mut bridge, 2).unwrap(), b"bc");
        assert_eq!(up.read_byte(&mut bridge, false).unwrap(), Some(b'd'));
        assert_eq!(up.read_exact(&mut bridge, 1).unwrap(), b"e");
        assert_eq!(up.read_byte(&mut bridge, false).unwrap(), None);
        assert_eq!(up.descriptor().read, 5);
    }

    #[test]
    fn target_writes_are_picked_up() {
        let mut bridge = bridge_with(&terminal(), BASE);
        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        let mut up = control.find_up(&mut bridge, "Terminal").unwrap();
        assert_eq!(up.space(&mut bridge).unwrap(), 15);

        let buffer = up.descriptor().buffer_ptr;
        let descriptor = up.address();
        let bus = bus(&mut bridge);
        bus.load(buffer, b"hi!").unwrap();
        bus.write_u32(descriptor + WRITE_OFFSET, 3).unwrap();

        assert_eq!(up.read_all(&mut bridge).unwrap(), b"hi!");
        assert_eq!(up.space(&mut bridge).unwrap(), 15);
    }

    /// A target that a producer thread can update while the bridge polls it.
    #[derive(Clone)]
    struct Shared(Arc<Mutex<Target<MemoryBus>>>);

    impl RawChannel for Shared {
        fn read_available(&mut self) -> memlink_transport::Result<bytes::Bytes> {
            self.0.lock().unwrap().read_available()
        }

        fn write_all(&mut self, data: &[u8]) -> memlink_transport::Result<()> {
            self.0.lock().unwrap().write_all(data)
        }

        fn transport_name(&self) -> &'static str {
            "shared"
        }
    }

    #[test]
    fn blocking_reads_wait_for_producer() {
        let mut memory = MemoryBus::new(BASE, 0x1000);
        memory.load(BASE, &terminal().build(BASE)).unwrap();
        let shared = Shared(Arc::new(Mutex::new(Target::new(memory))));
        let config = BridgeConfig {
            frame: FrameConfig {
                poll_interval: Duration::from_millis(1),
                ..FrameConfig::default()
            },
            ..BridgeConfig::default()
        };
        let mut bridge = Bridge::with_config(shared.clone(), config).unwrap();
        let rtt = RttConfig {
            poll_interval: Duration::from_millis(1),
            ..RttConfig::default()
        };
        let control = RttControl::parse_with_config(&mut bridge, BASE, rtt).unwrap();
        let mut up = control.up(&mut bridge, 0).unwrap();
        let buffer = up.descriptor().buffer_ptr;
        let descriptor = up.address();
        assert_eq!(up.read_byte(&mut bridge, false).unwrap(), None);

        let producer = thread::spawn({
            let shared = shared.clone();
            move || {
                for (offset, &byte) in b"ok!".iter().enumerate() {
                    thread::sleep(Duration::from_millis(20));
                    let mut target = shared.0.lock().unwrap();
                    let memory = target.bus_mut();
                    memory.load(buffer + offset as u32, &[byte]).unwrap();
                    memory
                        .write_u32(descriptor + WRITE_OFFSET, offset as u32 + 1)
                        .unwrap();
                }
            }
        });

        assert_eq!(up.read_byte(&mut bridge, true).unwrap(), Some(b'o'));
        assert_eq!(up.read_exact(&mut bridge, 2).unwrap(), b"k!");
        producer.join().unwrap();

        let target = shared.0.lock().unwrap();
        assert_eq!(target.bus().read_u32(descriptor + READ_OFFSET), Some(3));
    }

    #[test]
    fn down_channel_write_wraps() {
        let image = RttImage::new().add_up("Terminal", 16, b"").add_down("Terminal", 8);
        let mut bridge = bridge_with(&image, BASE);
        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        let mut down = control.down(&mut bridge, 0).unwrap();
        let buffer = down.descriptor().buffer_ptr;
        let descriptor = down.address();

        // Pretend the target consumed 6 bytes already.
        bus(&mut bridge).write_u32(descriptor + WRITE_OFFSET, 6).unwrap();
        bus(&mut bridge).write_u32(descriptor + READ_OFFSET, 5).unwrap();

        assert_eq!(down.space(&mut bridge).unwrap(), 6);
        assert_eq!(down.write(&mut bridge, b"uvwxyz!").unwrap(), 6);
        assert_eq!(bus(&mut bridge).read_u32(descriptor + WRITE_OFFSET), Some(4));
        assert_eq!(bus(&mut bridge).slice(buffer, 8).unwrap(), b"wxyz\0\0uv");
        assert_eq!(down.space(&mut bridge).unwrap(), 0);
        assert_eq!(down.write(&mut bridge, b"more").unwrap(), 0);
    }

    #[test]
    fn up_channels_are_read_only() {
        let mut bridge = bridge_with(&terminal(), BASE);
        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        let mut up = control.up(&mut bridge, 0).unwrap();
        assert!(matches!(
            up.write(&mut bridge, b"x"),
            Err(BridgeError::Argument(_))
        ));
    }

    #[test]
    fn corrupt_indices_rejected() {
        let mut bridge = bridge_with(&terminal(), BASE);
        stage(&mut bridge, 16, 0);
        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        let mut up = control.up(&mut bridge, 0).unwrap();
        assert!(matches!(
            up.read_all(&mut bridge),
            Err(BridgeError::Rtt(RttError::BadDescriptor { .. }))
        ));
    }

    #[test]
    fn unaligned_buffer_reads() {
        let mut bridge = bridge_with(&terminal(), BASE);
        let descriptor = BASE + HEADER_SIZE;
        let bus = bus(&mut bridge);
        bus.load(BASE + 0x201, b"xyz").unwrap();
        bus.write_u32(descriptor + BUFFER_PTR_OFFSET, BASE + 0x201).unwrap();
        bus.write_u32(descriptor + WRITE_OFFSET, 3).unwrap();

        let control = RttControl::parse(&mut bridge, BASE).unwrap();
        let mut up = control.up(&mut bridge, 0).unwrap();
        assert_eq!(up.read_all(&mut bridge).unwrap(), b"xyz");
    }
}
