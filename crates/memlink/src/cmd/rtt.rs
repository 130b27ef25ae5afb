use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use memlink::bridge::{find_control_block, RttConfig, RttControl};
use tracing::info;

use crate::cmd::{connect, Link, LinkArgs, RttArgs};
use crate::exit::{bridge_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_raw, print_rtt, OutputFormat, RttChannelOutput, RttOutput};

pub fn run(args: RttArgs, link: &LinkArgs, format: Option<OutputFormat>) -> CliResult<i32> {
    let mut bridge = connect(link)?;

    let base = match args.address {
        Some(address) => address,
        None => find_control_block(&mut bridge, args.start, args.end)
            .map_err(|err| bridge_error("RTT scan failed", err))?,
    };
    let config = RttConfig::default();
    let control = RttControl::parse_with_config(&mut bridge, base, config.clone())
        .map_err(|err| bridge_error("cannot parse RTT control block", err))?;

    if args.list {
        let format = format.unwrap_or_else(OutputFormat::default_for_stdout);
        print_rtt(&describe(&mut bridge, &control)?, format);
        return Ok(SUCCESS);
    }

    let mut channel = control
        .find_up(&mut bridge, &args.channel)
        .map_err(|err| bridge_error("cannot open RTT channel", err))?;
    info!(
        address = base,
        channel = %args.channel,
        index = channel.index(),
        "following RTT channel"
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut remaining = args.count;
    while running.load(Ordering::SeqCst) {
        let wanted = match remaining {
            Some(0) => break,
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
            None => usize::MAX,
        };
        let data = channel
            .read(&mut bridge, wanted)
            .map_err(|err| bridge_error("RTT read failed", err))?;
        if data.is_empty() {
            thread::sleep(config.poll_interval);
            continue;
        }
        print_raw(&data).map_err(|err| io_error("output failed", err))?;
        if let Some(n) = remaining.as_mut() {
            *n = n.saturating_sub(data.len() as u64);
        }
    }

    Ok(SUCCESS)
}

fn describe(bridge: &mut Link, control: &RttControl) -> CliResult<RttOutput> {
    let mut found = control
        .ups(bridge)
        .map_err(|err| bridge_error("cannot list up channels", err))?;
    found.extend(
        control
            .downs(bridge)
            .map_err(|err| bridge_error("cannot list down channels", err))?,
    );

    let mut channels = Vec::with_capacity(found.len());
    for mut channel in found {
        let span = channel
            .refresh(bridge)
            .map_err(|err| bridge_error("cannot read RTT channel", err))?;
        let descriptor = *channel.descriptor();
        channels.push(RttChannelOutput {
            direction: channel.direction().name(),
            index: channel.index(),
            name: channel.display_name(),
            descriptor: channel.address(),
            buffer: descriptor.buffer_ptr,
            size: descriptor.size,
            mode: format!("{:?}", descriptor.mode()),
            available: span.available(),
        });
    }

    Ok(RttOutput {
        address: control.address(),
        up_count: control.up_count(),
        down_count: control.down_count(),
        channels,
    })
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
