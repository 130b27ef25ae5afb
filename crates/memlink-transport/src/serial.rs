use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::RawChannel;

const READ_CHUNK_SIZE: usize = 256;
const WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// A serial device (tty) in raw, non-blocking mode.
///
/// Configured for 8 data bits, no parity, one stop bit and no flow control.
pub struct SerialPort {
    file: File,
    path: PathBuf,
    baud: u32,
}

impl SerialPort {
    /// Default line rate of the target's UART bridge.
    pub const DEFAULT_BAUD: u32 = 1_000_000;

    /// Open and configure the device at `path`.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = speed_for(baud).ok_or(TransportError::UnsupportedBaud(baud))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        configure_raw(&file, speed).map_err(|source| TransportError::Open {
            path: path.clone(),
            source,
        })?;

        debug!(?path, baud, "opened serial port");
        Ok(Self { file, path, baud })
    }

    /// Device path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured line rate.
    pub fn baud(&self) -> u32 {
        self.baud
    }
}

fn configure_raw(file: &File, speed: libc::speed_t) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    let mut tio = std::mem::MaybeUninit::<libc::termios>::uninit();

    // SAFETY: `fd` is an open descriptor owned by `file`, and `tio` points to
    // writable storage for one `termios`.
    if unsafe { libc::tcgetattr(fd, tio.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: tcgetattr succeeded and initialized the struct.
    let mut tio = unsafe { tio.assume_init() };

    // SAFETY: `tio` is a valid, initialized termios for all calls below.
    unsafe {
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `fd` is open and `tio` is fully initialized.
    unsafe {
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // Stale bytes from before the open are not part of any exchange.
        libc::tcflush(fd, libc::TCIOFLUSH);
    }
    Ok(())
}

fn speed_for(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        #[cfg(target_os = "linux")]
        1_000_000 => libc::B1000000,
        #[cfg(target_os = "linux")]
        2_000_000 => libc::B2000000,
        #[cfg(target_os = "linux")]
        3_000_000 => libc::B3000000,
        _ => return None,
    };
    Some(speed)
}

impl RawChannel for SerialPort {
    fn read_available(&mut self) -> Result<Bytes> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        match self.file.read(&mut chunk) {
            Ok(n) => {
                if n > 0 {
                    trace!(n, "serial rx");
                }
                Ok(Bytes::copy_from_slice(&chunk[..n]))
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(Bytes::new())
            }
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < data.len() {
            match self.file.write(&data[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(WRITE_BACKOFF);
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        trace!(n = data.len(), "serial tx");
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "serial"
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_rates_are_supported() {
        for baud in [9_600, 57_600, 115_200] {
            assert!(speed_for(baud).is_some(), "{baud} should map to a termios speed");
        }
    }

    #[test]
    fn odd_rate_is_rejected_before_open() {
        let err = SerialPort::open("/dev/null", 12_345).unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedBaud(12_345)));
    }

    #[test]
    fn missing_device_is_open_error() {
        let err = SerialPort::open("/dev/memlink-does-not-exist", 115_200).unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[test]
    fn non_tty_fails_configuration() {
        // /dev/null opens fine but is not a terminal, so tcgetattr fails.
        let err = SerialPort::open("/dev/null", 115_200).unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }
}
