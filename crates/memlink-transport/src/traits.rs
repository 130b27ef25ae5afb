use bytes::Bytes;

use crate::error::Result;

/// An unframed duplex byte stream to the target.
///
/// Bytes may be dropped or delayed by the link, but never altered.
pub trait RawChannel {
    /// Return whatever bytes have arrived since the last call.
    ///
    /// Never blocks. An empty result means "nothing yet", not end of stream;
    /// a channel whose far end is gone reports [`TransportError::Closed`].
    ///
    /// [`TransportError::Closed`]: crate::TransportError::Closed
    fn read_available(&mut self) -> Result<Bytes>;

    /// Write the whole buffer to the channel.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

impl<T: RawChannel + ?Sized> RawChannel for Box<T> {
    fn read_available(&mut self) -> Result<Bytes> {
        (**self).read_available()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data)
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}

impl<T: RawChannel + ?Sized> RawChannel for &mut T {
    fn read_available(&mut self) -> Result<Bytes> {
        (**self).read_available()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data)
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}
