use std::fs;
use std::io::{self, Read, Write};

use memlink::bridge::{AckPolicy, MemoryBus, ResponderConfig, RttImage, Target};
use memlink::frame::CobsConfig;
use tracing::{debug, info};

use crate::cmd::{LinkArgs, ServeArgs};
use crate::exit::{bridge_error, io_error, CliError, CliResult, SUCCESS, USAGE};

/// Smallest up buffer given to the seeded RTT channel.
const RTT_BUFFER: usize = 1024;

pub fn run(args: ServeArgs, link: &LinkArgs) -> CliResult<i32> {
    if args.size == 0 || u64::from(args.base) + args.size > 1 << 32 {
        return Err(CliError::new(
            USAGE,
            format!(
                "memory of {:#x} bytes at {:#010x} does not fit the address space",
                args.size, args.base
            ),
        ));
    }
    let size = usize::try_from(args.size)
        .map_err(|_| CliError::new(USAGE, "memory size does not fit on this host"))?;
    let mut bus = MemoryBus::new(args.base, size);

    if let Some(path) = &args.load {
        let image = fs::read(path)
            .map_err(|err| io_error(&format!("cannot read {}", path.display()), err))?;
        bus.load(args.base, &image)
            .map_err(|err| bridge_error("cannot load memory image", err))?;
        info!(path = %path.display(), len = image.len(), "memory image loaded");
    }

    if let Some(text) = &args.rtt {
        let middle = args.base + (args.size / 2) as u32;
        let at = args.rtt_address.unwrap_or(middle & !7);
        let capacity = (text.len() + 1).max(RTT_BUFFER) as u32;
        let image = RttImage::new()
            .add_up("Terminal", capacity, text.as_bytes())
            .add_down("Terminal", 16);
        bus.load(at, &image.build(at))
            .map_err(|err| bridge_error("cannot place RTT control block", err))?;
        info!(address = at, "RTT control block placed");
    }

    let responder = ResponderConfig {
        word_size: link.word_size,
        ack_policy: AckPolicy::MaxPolls(args.ack_polls.max(1)),
    };
    let mut target = Target::with_config(bus, responder, CobsConfig::default())
        .map_err(|err| bridge_error("invalid target settings", err))?;
    info!(base = args.base, size, "serving simulated target on stdio");

    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("stdin read failed", err)),
        };
        target.feed(&buf[..n]);
        let out = target.take_output();
        if !out.is_empty() {
            stdout
                .write_all(&out)
                .and_then(|()| stdout.flush())
                .map_err(|err| io_error("stdout write failed", err))?;
        }
    }

    debug!("stdin closed, stopping");
    Ok(SUCCESS)
}
