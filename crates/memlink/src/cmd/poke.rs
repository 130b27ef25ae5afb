use tracing::info;

use crate::cmd::{connect, LinkArgs, PokeArgs};
use crate::exit::{bridge_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: PokeArgs, link: &LinkArgs) -> CliResult<i32> {
    let mut bridge = connect(link)?;
    let data = pack_words(&args.words, bridge.word_size())?;

    bridge
        .write_bytes(args.start, &data)
        .map_err(|err| bridge_error("write failed", err))?;
    info!(address = args.start, words = args.words.len(), "words written");
    Ok(SUCCESS)
}

/// Lay out `words` little-endian at `word_size` bytes each.
fn pack_words(words: &[u64], word_size: usize) -> CliResult<Vec<u8>> {
    let mut data = Vec::with_capacity(words.len() * word_size);
    for &word in words {
        if word_size < 8 && word >> (8 * word_size) != 0 {
            return Err(CliError::new(
                USAGE,
                format!("{word:#x} does not fit in a {word_size}-byte word"),
            ));
        }
        data.extend_from_slice(&word.to_le_bytes()[..word_size]);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_little_endian() {
        assert_eq!(
            pack_words(&[0x1122_3344, 0x5], 4).unwrap(),
            vec![0x44, 0x33, 0x22, 0x11, 0x05, 0, 0, 0]
        );
        assert_eq!(pack_words(&[0xABCD], 2).unwrap(), vec![0xCD, 0xAB]);
        assert_eq!(pack_words(&[u64::MAX], 8).unwrap(), vec![0xFF; 8]);
    }

    #[test]
    fn rejects_oversized_values() {
        let err = pack_words(&[0x100], 1).unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(pack_words(&[0x1_0000_0000], 4).is_err());
    }
}
