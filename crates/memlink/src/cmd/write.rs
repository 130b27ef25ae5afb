use std::fs;
use std::io::{self, Read};
use std::path::Path;

use tracing::info;

use crate::cmd::{connect, LinkArgs, WriteArgs};
use crate::exit::{bridge_error, io_error, CliResult, SUCCESS};

pub fn run(args: WriteArgs, link: &LinkArgs) -> CliResult<i32> {
    let data = read_input(args.input.as_deref())?;
    let mut bridge = connect(link)?;

    if args.reset {
        bridge
            .reset(true)
            .map_err(|err| bridge_error("reset failed", err))?;
    }

    let written = bridge
        .write_padded(args.start, &data)
        .map_err(|err| bridge_error("write failed", err));

    // Release reset even if the write failed; report the write error first.
    if args.reset {
        let released = bridge
            .reset(false)
            .map_err(|err| bridge_error("release from reset failed", err));
        written?;
        released?;
    } else {
        written?;
    }

    info!(address = args.start, len = data.len(), "memory written");
    Ok(SUCCESS)
}

fn read_input(path: Option<&Path>) -> CliResult<Vec<u8>> {
    match path.filter(|path| *path != Path::new("-")) {
        Some(path) => {
            fs::read(path).map_err(|err| io_error(&format!("cannot read {}", path.display()), err))
        }
        None => {
            let mut data = Vec::new();
            io::stdin()
                .lock()
                .read_to_end(&mut data)
                .map_err(|err| io_error("cannot read stdin", err))?;
            Ok(data)
        }
    }
}
