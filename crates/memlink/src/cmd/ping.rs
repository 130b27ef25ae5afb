use std::time::Instant;

use serde::Serialize;

use crate::cmd::{connect, LinkArgs, PingArgs};
use crate::exit::{bridge_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct PingOutput {
    port: String,
    transport: &'static str,
    latency_ms: f64,
}

pub fn run(_args: PingArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let mut bridge = connect(link)?;

    let started = Instant::now();
    bridge
        .ping()
        .map_err(|err| bridge_error("ping failed", err))?;
    let latency_ms = (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;

    let out = PingOutput {
        port: link
            .port
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        transport: bridge.channel().transport_name(),
        latency_ms,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("pong from {} ({}) in {:.2}ms", out.port, out.transport, out.latency_ms);
        }
        OutputFormat::Raw => println!("pong"),
    }
    Ok(SUCCESS)
}
