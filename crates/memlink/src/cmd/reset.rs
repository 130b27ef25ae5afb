use tracing::info;

use crate::cmd::{connect, LinkArgs, ResetArgs};
use crate::exit::{bridge_error, CliResult, SUCCESS};

pub fn run(args: ResetArgs, link: &LinkArgs) -> CliResult<i32> {
    let mut bridge = connect(link)?;

    bridge
        .reset(true)
        .map_err(|err| bridge_error("reset failed", err))?;
    if !args.hold {
        bridge
            .reset(false)
            .map_err(|err| bridge_error("release from reset failed", err))?;
    }
    info!(held = args.hold, "target reset");
    Ok(SUCCESS)
}
