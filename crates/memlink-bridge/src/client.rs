use std::ops::ControlFlow;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use memlink_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use memlink_transport::RawChannel;
use tracing::{debug, trace};

use crate::command::{Command, Request, MAX_READ_WORDS, MAX_WRITE_WORDS};
use crate::error::{BridgeError, Result};

/// Largest piece fetched at a time by [`Bridge::read_c_string`].
const STRING_CHUNK: usize = 64;

/// Configuration for a [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Target bus word size in bytes (1, 2, 4 or 8). Default: 4.
    pub word_size: usize,
    /// Words per READ request (1..=256). Default: 256.
    pub read_chunk_words: usize,
    /// Words per WRITE request (1..=255). Default: 255.
    pub write_chunk_words: usize,
    /// Framing and polling behavior.
    pub frame: FrameConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            word_size: 4,
            read_chunk_words: MAX_READ_WORDS,
            write_chunk_words: MAX_WRITE_WORDS,
            frame: FrameConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.word_size, 1 | 2 | 4 | 8) {
            return Err(BridgeError::Argument(format!(
                "word size must be 1, 2, 4 or 8 bytes, got {}",
                self.word_size
            )));
        }
        if !(1..=MAX_READ_WORDS).contains(&self.read_chunk_words) {
            return Err(BridgeError::Argument(format!(
                "read chunk must be 1..={MAX_READ_WORDS} words, got {}",
                self.read_chunk_words
            )));
        }
        if !(1..=MAX_WRITE_WORDS).contains(&self.write_chunk_words) {
            return Err(BridgeError::Argument(format!(
                "write chunk must be 1..={MAX_WRITE_WORDS} words, got {}",
                self.write_chunk_words
            )));
        }
        Ok(())
    }
}

/// Host end of the link: issues commands and checks every response.
///
/// Owns the channel and all protocol state. Calls are strictly sequential;
/// each one writes one request frame and waits for one response frame.
/// Arguments are validated before anything is sent. After a failed read the
/// next call resynchronizes first, so a late response is never mistaken for
/// the answer to a new request.
#[derive(Debug)]
pub struct Bridge<C> {
    channel: C,
    reader: FrameReader,
    writer: FrameWriter,
    config: BridgeConfig,
    stale: bool,
}

impl<C: RawChannel> Bridge<C> {
    /// Create a bridge with default configuration.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            reader: FrameReader::new(),
            writer: FrameWriter::new(),
            config: BridgeConfig::default(),
            stale: false,
        }
    }

    /// Create a bridge with explicit configuration.
    pub fn with_config(channel: C, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channel,
            reader: FrameReader::with_config(config.frame.clone())?,
            writer: FrameWriter::with_config(config.frame.cobs)?,
            config,
            stale: false,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn word_size(&self) -> usize {
        self.config.word_size
    }

    /// Borrow the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Mutably borrow the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Consume the bridge and return the channel.
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Discard everything the channel has buffered, along with any partial
    /// frame. Returns the number of bytes thrown away.
    pub fn resync(&mut self) -> Result<usize> {
        let mut discarded = 0;
        loop {
            let chunk = self
                .channel
                .read_available()
                .map_err(FrameError::from)?;
            if chunk.is_empty() {
                break;
            }
            discarded += chunk.len();
        }
        self.reader.clear();
        self.stale = false;
        debug!(discarded, "resynchronized");
        Ok(discarded)
    }

    /// Read the next response frame.
    ///
    /// Fails with [`BridgeError::TargetError`] if the target answered ERROR.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        let frame = match self.reader.read_frame(&mut self.channel) {
            Ok(frame) => frame,
            Err(err) => {
                self.stale = true;
                return Err(err.into());
            }
        };
        trace!(frame = ?frame.as_ref(), "<<<");
        if frame.first() == Some(&u8::from(Command::Error)) {
            return Err(BridgeError::TargetError);
        }
        Ok(frame)
    }

    /// Write one request frame.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        trace!(frame = ?payload, ">>>");
        self.writer.write_frame(&mut self.channel, payload)?;
        Ok(())
    }

    /// Send `[command] ∥ body` and return the response body after its tag.
    pub fn call(&mut self, command: Command, body: &[u8]) -> Result<Bytes> {
        debug!(command = command.name(), len = body.len(), "call");
        if self.stale {
            self.resync()?;
        }
        let mut request = BytesMut::with_capacity(1 + body.len());
        request.put_u8(command.into());
        request.put_slice(body);
        self.write_frame(&request)?;

        let mut response = self.read_frame()?;
        let Some(&tag) = response.first() else {
            return Err(BridgeError::ShortResponse {
                command: command.name(),
                expected: 1,
                actual: 0,
            });
        };
        if tag != u8::from(command) {
            return Err(BridgeError::Mismatch {
                command: command.name(),
                field: "tag",
                expected: u8::from(command).into(),
                actual: tag.into(),
            });
        }
        response.advance(1);
        Ok(response)
    }

    fn request(&mut self, request: &Request) -> Result<Bytes> {
        let mut body = BytesMut::new();
        request.encode_body(&mut body)?;
        let command = request.command();
        let response = self.call(command, &body)?;

        let expected = request.response_len(self.config.word_size);
        if response.len() != expected {
            return Err(BridgeError::ShortResponse {
                command: command.name(),
                expected,
                actual: response.len(),
            });
        }
        Ok(response)
    }

    /// Check that the target is there.
    pub fn ping(&mut self) -> Result<()> {
        self.request(&Request::Ping)?;
        Ok(())
    }

    /// Assert or release the target's reset line.
    pub fn reset(&mut self, asserted: bool) -> Result<()> {
        let response = self.request(&Request::Reset(asserted))?;
        let echoed = response[0];
        if echoed != u8::from(asserted) {
            return Err(BridgeError::Mismatch {
                command: Command::Reset.name(),
                field: "reset",
                expected: u8::from(asserted).into(),
                actual: echoed.into(),
            });
        }
        Ok(())
    }

    fn check_address(&self, address: u32) -> Result<()> {
        if address as usize % self.config.word_size != 0 {
            return Err(BridgeError::Argument(format!(
                "address {address:#010x} is not aligned to {} bytes",
                self.config.word_size
            )));
        }
        Ok(())
    }

    fn check_span(&self, address: u32, len: usize) -> Result<()> {
        self.check_address(address)?;
        if len % self.config.word_size != 0 {
            return Err(BridgeError::Argument(format!(
                "length {len} is not a multiple of {} bytes",
                self.config.word_size
            )));
        }
        if u64::from(address) + len as u64 > 1 << 32 {
            return Err(BridgeError::Argument(format!(
                "{len} bytes at {address:#010x} run past the end of the address space"
            )));
        }
        Ok(())
    }

    fn read_chunk(&mut self, address: u32, words: usize) -> Result<Bytes> {
        let mut response = self.request(&Request::Read {
            address,
            count: words,
        })?;
        let echoed = response.get_u32_le();
        if echoed != address {
            return Err(BridgeError::Mismatch {
                command: Command::Read.name(),
                field: "address",
                expected: address.into(),
                actual: echoed.into(),
            });
        }
        Ok(response)
    }

    fn write_chunk(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let words = data.len() / self.config.word_size;
        let mut response = self.request(&Request::Write {
            address,
            data: Bytes::copy_from_slice(data),
        })?;
        let echoed = response.get_u32_le();
        if echoed != address {
            return Err(BridgeError::Mismatch {
                command: Command::Write.name(),
                field: "address",
                expected: address.into(),
                actual: echoed.into(),
            });
        }
        let count = response.get_u8();
        if usize::from(count) != words % 0x100 {
            return Err(BridgeError::Mismatch {
                command: Command::Write.name(),
                field: "count",
                expected: (words % 0x100) as u64,
                actual: count.into(),
            });
        }
        Ok(())
    }

    /// Read `len` bytes from `address`, handing each response chunk to `f`
    /// along with its address. Stops early when `f` breaks.
    pub fn for_each_read_chunk<F>(&mut self, address: u32, len: usize, mut f: F) -> Result<()>
    where
        F: FnMut(u32, &[u8]) -> ControlFlow<()>,
    {
        self.check_span(address, len)?;
        let word_size = self.config.word_size;
        let mut address = address;
        let mut words = len / word_size;

        while words > 0 {
            let count = words.min(self.config.read_chunk_words);
            let data = self.read_chunk(address, count)?;
            if f(address, &data).is_break() {
                break;
            }
            address = address.wrapping_add((count * word_size) as u32);
            words -= count;
        }
        Ok(())
    }

    /// Read `len` bytes starting at `address`.
    pub fn read_bytes(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        self.for_each_read_chunk(address, len, |_, chunk| {
            out.extend_from_slice(chunk);
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }

    /// Read `count` little-endian 32-bit values starting at `address`.
    pub fn read_words(&mut self, address: u32, count: usize) -> Result<Vec<u32>> {
        let bytes = self.read_bytes(address, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }

    pub fn read_u32(&mut self, address: u32) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write `data`, whose length must be a whole number of words.
    pub fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.check_span(address, data.len())?;
        let step = self.config.write_chunk_words * self.config.word_size;
        let mut address = address;
        for chunk in data.chunks(step) {
            self.write_chunk(address, chunk)?;
            address = address.wrapping_add(chunk.len() as u32);
        }
        Ok(())
    }

    /// Write `data`, zero-padding a trailing partial word.
    pub fn write_padded(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let partial = data.len() % self.config.word_size;
        if partial == 0 {
            return self.write_bytes(address, data);
        }
        let mut padded = Vec::with_capacity(data.len() + self.config.word_size - partial);
        padded.extend_from_slice(data);
        padded.resize(data.len() + self.config.word_size - partial, 0);
        self.write_bytes(address, &padded)
    }

    /// Write little-endian 32-bit values starting at `address`.
    pub fn write_words(&mut self, address: u32, words: &[u32]) -> Result<()> {
        let mut bytes = BytesMut::with_capacity(words.len() * 4);
        for &word in words {
            bytes.put_u32_le(word);
        }
        self.write_bytes(address, &bytes)
    }

    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    ///
    /// `address` may be unaligned; the string is returned without its NUL.
    pub fn read_c_string(&mut self, address: u32, max: usize) -> Result<Vec<u8>> {
        let word_size = self.config.word_size;
        let mut cursor = address - address % word_size as u32;
        let mut skip = (address - cursor) as usize;
        let mut out = Vec::new();

        while out.len() < max {
            let wanted = (max - out.len() + skip).min(STRING_CHUNK);
            let len = wanted.div_ceil(word_size) * word_size;
            let chunk = self.read_bytes(cursor, len)?;
            let text = &chunk[skip..];
            if let Some(end) = text.iter().position(|&b| b == 0) {
                out.extend_from_slice(&text[..end]);
                out.truncate(max);
                return Ok(out);
            }
            out.extend_from_slice(text);
            cursor = cursor.wrapping_add(len as u32);
            skip = 0;
        }
        out.truncate(max);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use memlink_frame::{encode_frame, CobsConfig, FrameAssembler};
    use memlink_transport::{MemoryChannel, TransportError};

    use super::*;
    use crate::target::{AckPolicy, MemoryBus, ResponderConfig, Target};

    const BASE: u32 = 0x2000_0000;

    /// Records every byte the bridge sends.
    struct Recording<C> {
        inner: C,
        sent: Vec<u8>,
    }

    impl<C: RawChannel> Recording<C> {
        fn new(inner: C) -> Self {
            Self {
                inner,
                sent: Vec::new(),
            }
        }

        fn requests(&self) -> Vec<Bytes> {
            FrameAssembler::default().extend(&self.sent)
        }
    }

    impl<C: RawChannel> RawChannel for Recording<C> {
        fn read_available(&mut self) -> memlink_transport::Result<Bytes> {
            self.inner.read_available()
        }

        fn write_all(&mut self, data: &[u8]) -> memlink_transport::Result<()> {
            self.sent.extend_from_slice(data);
            self.inner.write_all(data)
        }

        fn transport_name(&self) -> &'static str {
            "recording"
        }
    }

    fn loopback(size: usize) -> Bridge<Target<MemoryBus>> {
        Bridge::new(Target::new(MemoryBus::new(BASE, size)))
    }

    fn canned(responses: &[&[u8]]) -> Bridge<MemoryChannel> {
        let (host, mut target) = MemoryChannel::pair();
        let mut wire = BytesMut::new();
        for response in responses {
            encode_frame(response, &CobsConfig::default(), &mut wire).unwrap();
        }
        target.write_all(&wire).unwrap();
        // Keep the far end open so reads wait instead of failing.
        std::mem::forget(target);
        Bridge::new(host)
    }

    #[test]
    fn ping_and_reset() {
        let mut bridge = loopback(64);
        bridge.ping().unwrap();
        bridge.reset(true).unwrap();
        assert!(bridge.channel().bus().reset_asserted());
        bridge.reset(false).unwrap();
        assert!(!bridge.channel().bus().reset_asserted());
    }

    #[test]
    fn write_then_read_back() {
        let mut bridge = loopback(0x2000);
        let data: Vec<u8> = (0..0x1800u32).map(|i| (i * 7 % 251) as u8).collect();
        bridge.write_bytes(BASE + 0x100, &data).unwrap();
        assert_eq!(bridge.read_bytes(BASE + 0x100, data.len()).unwrap(), data);
        assert_eq!(
            bridge.channel().bus().slice(BASE + 0x100, data.len()).unwrap(),
            data.as_slice()
        );
    }

    #[test]
    fn words_round_trip() {
        let mut bridge = loopback(64);
        bridge.write_words(BASE, &[1, 0xDEAD_BEEF, 3]).unwrap();
        assert_eq!(bridge.read_words(BASE, 3).unwrap(), vec![1, 0xDEAD_BEEF, 3]);
        bridge.write_u32(BASE + 12, 0x0102_0304).unwrap();
        assert_eq!(bridge.read_u32(BASE + 12).unwrap(), 0x0102_0304);
        assert_eq!(bridge.channel().bus().read_u32(BASE + 4), Some(0xDEAD_BEEF));
    }

    #[test]
    fn large_read_is_split_into_contiguous_chunks() {
        let target = Target::new(MemoryBus::new(BASE, 4000));
        let mut bridge = Bridge::new(Recording::new(target));
        let words = bridge.read_words(BASE, 1000).unwrap();
        assert_eq!(words.len(), 1000);

        let requests = bridge.channel().requests();
        assert_eq!(requests.len(), 4);
        let mut expected_address = BASE;
        let mut total = 0;
        for request in &requests {
            assert_eq!(request[0], u8::from(Command::Read));
            let address = u32::from_le_bytes([request[1], request[2], request[3], request[4]]);
            assert_eq!(address, expected_address);
            let count = usize::from(request[5]) + 1;
            expected_address += (count * 4) as u32;
            total += count;
        }
        assert_eq!(total, 1000);
        assert_eq!(requests[3][5], 231);
    }

    #[test]
    fn large_write_is_split() {
        let target = Target::new(MemoryBus::new(BASE, 0x1000));
        let mut bridge = Bridge::new(Recording::new(target));
        bridge.write_bytes(BASE, &[0xA5; 2048]).unwrap();
        let requests = bridge.channel().requests();
        let sizes: Vec<usize> = requests.iter().map(|r| (r.len() - 5) / 4).collect();
        assert_eq!(sizes, vec![255, 255, 2]);
    }

    #[test]
    fn read_chunks_can_stop_early() {
        let target = Target::new(MemoryBus::new(BASE, 0x1000));
        let mut bridge = Bridge::new(Recording::new(target));
        let mut seen = Vec::new();
        bridge
            .for_each_read_chunk(BASE, 0x1000, |address, chunk| {
                seen.push((address, chunk.len()));
                ControlFlow::Break(())
            })
            .unwrap();
        assert_eq!(seen, vec![(BASE, 1024)]);
        assert_eq!(bridge.channel().requests().len(), 1);
    }

    #[test]
    fn misaligned_access_rejected_before_io() {
        for word_size in [2usize, 4, 8] {
            let config = BridgeConfig {
                word_size,
                ..BridgeConfig::default()
            };
            let (host, _target) = MemoryChannel::pair();
            let mut bridge = Bridge::with_config(Recording::new(host), config).unwrap();

            let odd = BASE + 1;
            let ws = word_size;
            let checks = [
                bridge.read_bytes(odd, ws).map(drop),
                bridge.read_bytes(BASE, ws + 1).map(drop),
                bridge.write_bytes(odd, &vec![0; ws]),
                bridge.write_bytes(BASE, &vec![0; ws + 1]),
                bridge.write_padded(odd, &[1]),
                bridge.for_each_read_chunk(odd, ws, |_, _| ControlFlow::Continue(())),
            ];
            for result in checks {
                assert!(
                    matches!(result, Err(BridgeError::Argument(_))),
                    "word size {word_size}: {result:?}"
                );
            }
            assert!(bridge.channel().sent.is_empty());
        }
    }

    #[test]
    fn address_space_overflow_rejected() {
        let (host, _target) = MemoryChannel::pair();
        let mut bridge = Bridge::new(Recording::new(host));
        let err = bridge.read_bytes(0xFFFF_FFFC, 8).unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));
        assert!(bridge.channel().sent.is_empty());
    }

    #[test]
    fn error_reply_to_ping() {
        let mut bridge = canned(&[&[1]]);
        let err = bridge.ping().unwrap_err();
        assert!(matches!(err, BridgeError::TargetError));
        assert!(err.is_protocol());
    }

    #[test]
    fn wrong_tag_is_mismatch() {
        let mut bridge = canned(&[&[2, 1]]);
        let err = bridge.ping().unwrap_err();
        assert!(matches!(err, BridgeError::Mismatch { field: "tag", .. }));
    }

    #[test]
    fn wrong_read_address_is_mismatch() {
        let mut bridge = canned(&[&[3, 4, 0, 0, 0x20, 1, 2, 3, 4]]);
        let err = bridge.read_u32(BASE).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Mismatch {
                field: "address",
                expected: 0x2000_0000,
                actual: 0x2000_0004,
                ..
            }
        ));
    }

    #[test]
    fn short_read_response() {
        let mut bridge = canned(&[&[3, 0, 0, 0, 0x20, 1, 2]]);
        let err = bridge.read_u32(BASE).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ShortResponse {
                expected: 8,
                actual: 6,
                ..
            }
        ));
    }

    #[test]
    fn wrong_write_count_is_mismatch() {
        let mut bridge = canned(&[&[4, 0, 0, 0, 0x20, 3]]);
        let err = bridge.write_words(BASE, &[1, 2]).unwrap_err();
        assert!(matches!(err, BridgeError::Mismatch { field: "count", .. }));
    }

    #[test]
    fn reset_echo_must_match() {
        let mut bridge = canned(&[&[2, 0]]);
        let err = bridge.reset(true).unwrap_err();
        assert!(matches!(err, BridgeError::Mismatch { field: "reset", .. }));
    }

    #[test]
    fn unacknowledged_bus_is_protocol_error() {
        let responder = ResponderConfig {
            ack_policy: AckPolicy::MaxPolls(4),
            ..ResponderConfig::default()
        };
        let target =
            Target::with_config(MemoryBus::new(BASE, 16), responder, CobsConfig::default())
                .unwrap();
        let mut bridge = Bridge::new(target);
        let err = bridge.read_bytes(BASE + 16, 4).unwrap_err();
        assert!(err.is_protocol(), "{err:?}");
        bridge.ping().unwrap();
    }

    #[test]
    fn padded_write_fills_final_word() {
        let mut bridge = loopback(16);
        bridge.write_u32(BASE + 4, 0xFFFF_FFFF).unwrap();
        bridge.write_padded(BASE, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(
            bridge.channel().bus().slice(BASE, 8).unwrap(),
            &[1, 2, 3, 4, 5, 6, 0, 0]
        );
    }

    #[test]
    fn c_string_from_unaligned_address() {
        let mut bridge = loopback(256);
        bridge
            .channel_mut()
            .bus_mut()
            .load(BASE + 0x41, b"Terminal\0junk")
            .unwrap();
        assert_eq!(bridge.read_c_string(BASE + 0x41, 64).unwrap(), b"Terminal");
        assert_eq!(bridge.read_c_string(BASE + 0x41, 4).unwrap(), b"Term");
    }

    #[test]
    fn long_c_string_spans_chunks() {
        let mut bridge = loopback(512);
        let mut text = vec![b'x'; 150];
        text.push(0);
        bridge.channel_mut().bus_mut().load(BASE + 2, &text).unwrap();
        assert_eq!(bridge.read_c_string(BASE + 2, 400).unwrap(), vec![b'x'; 150]);
    }

    #[test]
    fn invalid_config_rejected() {
        let (host, _target) = MemoryChannel::pair();
        let config = BridgeConfig {
            read_chunk_words: 257,
            ..BridgeConfig::default()
        };
        assert!(matches!(
            Bridge::with_config(host, config),
            Err(BridgeError::Argument(_))
        ));
    }

    #[test]
    fn closed_channel_surfaces_as_frame_error() {
        let (host, target) = MemoryChannel::pair();
        drop(target);
        let mut bridge = Bridge::new(host);
        let err = bridge.ping().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Frame(memlink_frame::FrameError::Transport(TransportError::Closed))
        ));
    }

    /// A target whose requests can be lost and whose replies can arrive late.
    struct Lossy {
        target: Target<MemoryBus>,
        drop_requests: bool,
        late: BytesMut,
    }

    impl RawChannel for Lossy {
        fn read_available(&mut self) -> memlink_transport::Result<Bytes> {
            if !self.late.is_empty() {
                return Ok(self.late.split().freeze());
            }
            self.target.read_available()
        }

        fn write_all(&mut self, data: &[u8]) -> memlink_transport::Result<()> {
            if self.drop_requests {
                return Ok(());
            }
            self.target.write_all(data)
        }

        fn transport_name(&self) -> &'static str {
            "lossy"
        }
    }

    #[test]
    fn late_reply_after_timeout_is_discarded() {
        let mut bus = MemoryBus::new(BASE, 16);
        bus.load(BASE, &0xBBBB_BBBBu32.to_le_bytes()).unwrap();
        let channel = Lossy {
            target: Target::new(bus),
            drop_requests: true,
            late: BytesMut::new(),
        };
        let config = BridgeConfig {
            frame: FrameConfig {
                poll_interval: Duration::from_millis(1),
                read_timeout: Some(Duration::from_millis(20)),
                ..FrameConfig::default()
            },
            ..BridgeConfig::default()
        };
        let mut bridge = Bridge::with_config(channel, config).unwrap();

        let err = bridge.read_u32(BASE).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Frame(memlink_frame::FrameError::Timeout(_))
        ));

        // The reply to the timed-out request shows up before the next one.
        let lossy = bridge.channel_mut();
        lossy.drop_requests = false;
        encode_frame(
            &[3, 0x00, 0x00, 0x00, 0x20, 0xAA, 0xAA, 0xAA, 0xAA],
            &CobsConfig::default(),
            &mut lossy.late,
        )
        .unwrap();

        assert_eq!(bridge.read_u32(BASE).unwrap(), 0xBBBB_BBBB);
    }

    #[test]
    fn resync_drops_buffered_bytes() {
        let mut bridge = canned(&[&[1], &[1]]);
        assert!(bridge.resync().unwrap() > 0);
        assert_eq!(bridge.resync().unwrap(), 0);
    }

    #[test]
    fn target_on_another_thread() {
        let (host, mut wire) = MemoryChannel::pair();
        let server = thread::spawn(move || {
            let mut target = Target::new(MemoryBus::new(BASE, 0x400));
            loop {
                match wire.read_available() {
                    Ok(bytes) if bytes.is_empty() => thread::sleep(Duration::from_millis(1)),
                    Ok(bytes) => {
                        target.feed(&bytes);
                        if wire.write_all(&target.take_output()).is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        });

        let config = BridgeConfig {
            frame: FrameConfig {
                poll_interval: Duration::from_millis(1),
                ..FrameConfig::default()
            },
            ..BridgeConfig::default()
        };
        let mut bridge = Bridge::with_config(host.with_max_read(7), config).unwrap();
        bridge.ping().unwrap();
        let data: Vec<u8> = (0..=255).collect();
        bridge.write_bytes(BASE + 0x100, &data).unwrap();
        assert_eq!(bridge.read_bytes(BASE + 0x100, 256).unwrap(), data);

        drop(bridge);
        server.join().unwrap();
    }
}
