use std::time::Duration;

/// Parse an unsigned integer with an optional `0x`, `0o` or `0b` prefix.
/// Underscores between digits are ignored.
pub fn parse_u64(input: &str) -> Result<u64, String> {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|&c| c != '_')
        .collect::<String>()
        .to_ascii_lowercase();

    let (digits, radix) = if let Some(rest) = cleaned.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = cleaned.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = cleaned.strip_prefix("0b") {
        (rest, 2)
    } else {
        (cleaned.as_str(), 10)
    };

    if digits.is_empty() || digits.starts_with('+') {
        return Err(format!("invalid number: {input}"));
    }
    u64::from_str_radix(digits, radix).map_err(|err| format!("invalid number {input}: {err}"))
}

/// An address: at most 32 bits.
pub fn parse_u32(input: &str) -> Result<u32, String> {
    let value = parse_u64(input)?;
    u32::try_from(value).map_err(|_| format!("{input} does not fit in 32 bits"))
}

/// An exclusive end address: up to and including 2^32.
pub fn parse_end(input: &str) -> Result<u64, String> {
    let value = parse_u64(input)?;
    if value > 1 << 32 {
        return Err(format!("{input} is past the end of the 32-bit address space"));
    }
    Ok(value)
}

/// A duration such as `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn based_integers() {
        assert_eq!(parse_u64("42").unwrap(), 42);
        assert_eq!(parse_u64("0x2000_0000").unwrap(), 0x2000_0000);
        assert_eq!(parse_u64("0XfF").unwrap(), 0xFF);
        assert_eq!(parse_u64("0o755").unwrap(), 0o755);
        assert_eq!(parse_u64("0b1010_0101").unwrap(), 0b1010_0101);
        assert_eq!(parse_u64("1_000_000").unwrap(), 1_000_000);
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "0x", "0b102", "-1", "+5", "12abc", "0x+1"] {
            assert!(parse_u64(input).is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn address_limits() {
        assert_eq!(parse_u32("0xFFFF_FFFC").unwrap(), 0xFFFF_FFFC);
        assert!(parse_u32("0x1_0000_0000").is_err());
        assert_eq!(parse_end("0x1_0000_0000").unwrap(), 1 << 32);
        assert!(parse_end("0x1_0000_0001").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
    }
}
