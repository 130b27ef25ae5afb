use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::ops::ControlFlow;
use std::path::Path;

use serde::Serialize;

use crate::cmd::{connect, range_end, LinkArgs, ReadArgs};
use crate::exit::{bridge_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{hex_string, hexdump, hexdump_end, print_json, OutputFormat};

#[derive(Serialize)]
struct ReadOutput {
    address: u32,
    length: usize,
    data: String,
}

pub fn run(args: ReadArgs, link: &LinkArgs, format: Option<OutputFormat>) -> CliResult<i32> {
    let length = args.length.unwrap_or(link.word_size as u64);
    let end = range_end(args.start, args.end, length)?;
    let len = usize::try_from(end - u64::from(args.start))
        .map_err(|_| CliError::new(USAGE, "read length does not fit in memory"))?;
    let output = args.output.as_deref().filter(|path| *path != Path::new("-"));

    let mut bridge = connect(link)?;

    if format == Some(OutputFormat::Json) {
        let data = bridge
            .read_bytes(args.start, len)
            .map_err(|err| bridge_error("read failed", err))?;
        if let Some(path) = output {
            std::fs::write(path, &data)
                .map_err(|err| io_error(&format!("cannot write {}", path.display()), err))?;
        }
        print_json(&ReadOutput {
            address: args.start,
            length: data.len(),
            data: hex_string(&data),
        });
        return Ok(SUCCESS);
    }

    let hex = args.hex || (output.is_none() && io::stdout().is_terminal());
    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|err| {
            io_error(&format!("cannot create {}", path.display()), err)
        })?)),
        None => Box::new(io::stdout().lock()),
    };

    let mut failed = None;
    bridge
        .for_each_read_chunk(args.start, len, |address, chunk| {
            let written = if hex {
                hexdump(&mut sink, chunk, u64::from(address))
            } else {
                sink.write_all(chunk)
            };
            match written {
                Ok(()) => ControlFlow::Continue(()),
                Err(err) => {
                    failed = Some(err);
                    ControlFlow::Break(())
                }
            }
        })
        .map_err(|err| bridge_error("read failed", err))?;
    if let Some(err) = failed {
        return Err(io_error("output failed", err));
    }

    if hex {
        hexdump_end(&mut sink, end).map_err(|err| io_error("output failed", err))?;
    }
    sink.flush().map_err(|err| io_error("output failed", err))?;
    Ok(SUCCESS)
}
