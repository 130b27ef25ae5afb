use std::ffi::OsStr;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::RawChannel;

const READ_CHUNK_SIZE: usize = 256;

/// A channel to a spawned process over its stdin/stdout.
///
/// Used to talk to simulators that speak the wire protocol on their standard
/// streams. A background thread drains the child's stdout so that
/// [`RawChannel::read_available`] never blocks. The child is killed when the
/// channel is dropped.
pub struct ProcessChannel {
    child: Child,
    stdin: ChildStdin,
    rx: Receiver<Bytes>,
    pump: Option<JoinHandle<()>>,
    program: String,
}

impl ProcessChannel {
    /// Spawn `program` with `args`, inheriting stderr.
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program_name = program.as_ref().to_string_lossy().into_owned();
        let mut child = Command::new(program.as_ref())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: program_name.clone(),
                source,
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransportError::Spawn {
                    program: program_name,
                    source: std::io::Error::other("child stdio was not captured"),
                });
            }
        };

        let (tx, rx) = mpsc::channel();
        let pump = std::thread::Builder::new()
            .name("memlink-process-stdout".to_string())
            .spawn(move || {
                let mut stdout = stdout;
                let mut chunk = [0u8; READ_CHUNK_SIZE];
                loop {
                    match stdout.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Bytes::copy_from_slice(&chunk[..n])).is_err() {
                                break;
                            }
                        }
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) => {
                            warn!(%err, "child stdout read failed");
                            break;
                        }
                    }
                }
            })?;

        debug!(program = %program_name, pid = child.id(), "spawned target process");

        Ok(Self {
            child,
            stdin,
            rx,
            pump: Some(pump),
            program: program_name,
        })
    }

    /// OS process id of the child.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Program this channel was spawned from.
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl RawChannel for ProcessChannel {
    fn read_available(&mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if buf.is_empty() {
                        return Err(TransportError::Closed);
                    }
                    break;
                }
            }
        }
        Ok(buf.freeze())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self.stdin.write_all(data).and_then(|()| self.stdin.flush()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::BrokenPipe => Err(TransportError::Closed),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn transport_name(&self) -> &'static str {
        "process"
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
        debug!(program = %self.program, "target process stopped");
    }
}

impl std::fmt::Debug for ProcessChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessChannel")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .finish()
    }
}
