use crate::cmd::{connect, range_end, LinkArgs, PeekArgs};
use crate::exit::{bridge_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_words, OutputFormat, WordOutput};

pub fn run(args: PeekArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let mut bridge = connect(link)?;
    let word_size = bridge.word_size();

    let end = range_end(
        args.start,
        args.end,
        args.length.saturating_mul(word_size as u64),
    )?;
    // Round a partial trailing word up.
    let words = (end - u64::from(args.start)).div_ceil(word_size as u64);
    let len = usize::try_from(words * word_size as u64)
        .map_err(|_| CliError::new(USAGE, "peek range does not fit in memory"))?;

    let data = bridge
        .read_bytes(args.start, len)
        .map_err(|err| bridge_error("read failed", err))?;

    let words: Vec<WordOutput> = data
        .chunks_exact(word_size)
        .enumerate()
        .map(|(i, word)| WordOutput {
            address: args.start.wrapping_add((i * word_size) as u32),
            value: word
                .iter()
                .rev()
                .fold(0, |acc, &byte| (acc << 8) | u64::from(byte)),
        })
        .collect();

    print_words(&words, word_size, format);
    Ok(SUCCESS)
}
