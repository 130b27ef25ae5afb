use std::io::{self, IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

const HEXDUMP_LINE: usize = 16;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Write `data` as hex dump lines, labelled from address `start`.
///
/// Each line holds 16 bytes split into two groups of eight, followed by the
/// printable characters. The final address line is left to [`hexdump_end`] so
/// a long read can be dumped chunk by chunk.
pub fn hexdump<W: Write + ?Sized>(out: &mut W, data: &[u8], start: u64) -> io::Result<()> {
    for (i, line) in data.chunks(HEXDUMP_LINE).enumerate() {
        let mut text = format!("{:08x} ", start + (i * HEXDUMP_LINE) as u64);
        let mut printable = String::with_capacity(HEXDUMP_LINE);
        for column in 0..HEXDUMP_LINE {
            match line.get(column) {
                Some(&byte) => {
                    text.push_str(&format!(" {byte:02x}"));
                    printable.push(if (33..127).contains(&byte) {
                        byte as char
                    } else {
                        '.'
                    });
                }
                None => text.push_str("   "),
            }
            if column == HEXDUMP_LINE / 2 - 1 {
                text.push(' ');
            }
        }
        writeln!(out, "{text}  |{printable}|")?;
    }
    Ok(())
}

/// Close a hex dump with the address one past its last byte.
pub fn hexdump_end<W: Write + ?Sized>(out: &mut W, end: u64) -> io::Result<()> {
    writeln!(out, "{end:08x}")
}

pub fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Serialize)]
pub struct WordOutput {
    pub address: u32,
    pub value: u64,
}

pub fn print_words(words: &[WordOutput], word_size: usize, format: OutputFormat) {
    let width = word_size * 2;
    match format {
        OutputFormat::Json => print_json(&words),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "VALUE"]);
            for word in words {
                table.add_row(vec![
                    format!("{:08x}", word.address),
                    format!("0x{:0width$x}", word.value),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for word in words {
                println!("{:08x}: 0x{:0width$x}", word.address, word.value);
            }
        }
    }
}

#[derive(Serialize)]
pub struct RttChannelOutput {
    pub direction: &'static str,
    pub index: usize,
    pub name: String,
    pub descriptor: u32,
    pub buffer: u32,
    pub size: u32,
    pub mode: String,
    pub available: u32,
}

#[derive(Serialize)]
pub struct RttOutput {
    pub address: u32,
    pub up_count: usize,
    pub down_count: usize,
    pub channels: Vec<RttChannelOutput>,
}

pub fn print_rtt(out: &RttOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            println!(
                "RTT control block at 0x{:08x} ({} up, {} down)",
                out.address, out.up_count, out.down_count
            );
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "DIR", "INDEX", "NAME", "BUFFER", "SIZE", "MODE", "AVAILABLE",
                ]);
            for channel in &out.channels {
                table.add_row(vec![
                    channel.direction.to_string(),
                    channel.index.to_string(),
                    channel.name.clone(),
                    format!("0x{:08x}", channel.buffer),
                    channel.size.to_string(),
                    channel.mode.clone(),
                    channel.available.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for channel in &out.channels {
                println!(
                    "{} {} {:?} buffer=0x{:08x} size={} mode={} available={}",
                    channel.direction,
                    channel.index,
                    channel.name,
                    channel.buffer,
                    channel.size,
                    channel.mode,
                    channel.available
                );
            }
        }
    }
}

pub fn print_raw(data: &[u8]) -> io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(data)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(data: &[u8], start: u64) -> String {
        let mut out = Vec::new();
        hexdump(&mut out, data, start).unwrap();
        hexdump_end(&mut out, start + data.len() as u64).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn hexdump_full_line() {
        let data: Vec<u8> = (0x41..0x51).collect();
        assert_eq!(
            dump(&data, 0x2000_0000),
            "20000000  41 42 43 44 45 46 47 48  49 4a 4b 4c 4d 4e 4f 50  |ABCDEFGHIJKLMNOP|\n\
             20000010\n"
        );
    }

    #[test]
    fn hexdump_partial_line_and_unprintables() {
        let text = dump(b"hi \x00\xff", 0x10);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000010  68 69 20 00 ff "));
        assert!(lines[0].ends_with("  |hi...|"));
        // Padding keeps the text column aligned with full lines.
        assert_eq!(lines[0].len(), "00000000 ".len() + 16 * 3 + 1 + "  |".len() + 5 + 1);
        assert_eq!(lines[1], "00000015");
    }

    #[test]
    fn hex_strings() {
        assert_eq!(hex_string(&[0x00, 0xAB, 0x10]), "00ab10");
        assert_eq!(hex_string(&[]), "");
    }
}
