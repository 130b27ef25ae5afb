use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::traits::RawChannel;

#[derive(Debug, Default)]
struct Pipe {
    queue: VecDeque<u8>,
    writer_closed: bool,
}

/// One end of an in-process duplex byte pipe.
///
/// Created in pairs by [`MemoryChannel::pair`]; bytes written to one end are
/// read from the other. Dropping an end closes its direction, after which the
/// peer drains what is left and then sees [`TransportError::Closed`].
#[derive(Debug)]
pub struct MemoryChannel {
    inbound: Arc<Mutex<Pipe>>,
    outbound: Arc<Mutex<Pipe>>,
    max_read: usize,
}

impl MemoryChannel {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(Pipe::default()));
        let b_to_a = Arc::new(Mutex::new(Pipe::default()));
        let a = Self {
            inbound: Arc::clone(&b_to_a),
            outbound: Arc::clone(&a_to_b),
            max_read: usize::MAX,
        };
        let b = Self {
            inbound: a_to_b,
            outbound: b_to_a,
            max_read: usize::MAX,
        };
        (a, b)
    }

    /// Deliver at most `max` bytes per [`RawChannel::read_available`] call.
    ///
    /// Useful for exercising reassembly of frames split across polls.
    pub fn with_max_read(mut self, max: usize) -> Self {
        self.max_read = max.max(1);
        self
    }

    /// Bytes waiting to be read on this end.
    pub fn pending(&self) -> usize {
        lock(&self.inbound).queue.len()
    }
}

fn lock(pipe: &Mutex<Pipe>) -> MutexGuard<'_, Pipe> {
    pipe.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RawChannel for MemoryChannel {
    fn read_available(&mut self) -> Result<Bytes> {
        let mut pipe = lock(&self.inbound);
        if pipe.queue.is_empty() {
            if pipe.writer_closed {
                return Err(TransportError::Closed);
            }
            return Ok(Bytes::new());
        }
        let n = pipe.queue.len().min(self.max_read);
        let data: Vec<u8> = pipe.queue.drain(..n).collect();
        Ok(Bytes::from(data))
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        // Only this end holds the outbound pipe once the peer is dropped.
        if Arc::strong_count(&self.outbound) == 1 {
            return Err(TransportError::Closed);
        }
        lock(&self.outbound).queue.extend(data.iter().copied());
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        lock(&self.outbound).writer_closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_cross_the_pair() {
        let (mut a, mut b) = MemoryChannel::pair();
        a.write_all(b"hello").unwrap();
        assert_eq!(b.pending(), 5);
        assert_eq!(b.read_available().unwrap().as_ref(), b"hello");
        assert!(b.read_available().unwrap().is_empty());

        b.write_all(b"back").unwrap();
        assert_eq!(a.read_available().unwrap().as_ref(), b"back");
    }

    #[test]
    fn max_read_splits_delivery() {
        let (mut a, b) = MemoryChannel::pair();
        let mut b = b.with_max_read(2);
        a.write_all(b"abcde").unwrap();

        assert_eq!(b.read_available().unwrap().as_ref(), b"ab");
        assert_eq!(b.read_available().unwrap().as_ref(), b"cd");
        assert_eq!(b.read_available().unwrap().as_ref(), b"e");
    }

    #[test]
    fn dropped_peer_drains_then_closes() {
        let (mut a, mut b) = MemoryChannel::pair();
        a.write_all(b"last").unwrap();
        drop(a);

        assert_eq!(b.read_available().unwrap().as_ref(), b"last");
        assert!(matches!(b.read_available(), Err(TransportError::Closed)));
        assert!(matches!(b.write_all(b"x"), Err(TransportError::Closed)));
    }
}
