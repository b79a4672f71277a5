use chrono::{DateTime, Utc};
use std::fmt::Write;

const BYTES_PER_ROW: usize = 16;

/// Something worth telling the user about during a search session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent<'a> {
    /// Coverage of the initial random input.
    Baseline { total: usize, input: &'a [u8] },
    /// A mutation grew the global coverage and was accepted.
    NewCoverage {
        position: usize,
        attempts: u64,
        total: usize,
        input: &'a [u8],
    },
    /// The attempt cap for a position ran out without a hit.
    GaveUp { position: usize, attempts: u64 },
}

pub trait Monitor {
    fn on_event(&mut self, event: &SearchEvent<'_>);
}

/// Prints a banner and a hex dump of the input on every coverage change.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleMonitor;

impl ConsoleMonitor {
    pub fn new() -> Self {
        ConsoleMonitor
    }
}

impl Monitor for ConsoleMonitor {
    fn on_event(&mut self, event: &SearchEvent<'_>) {
        if let Some(report) = render_event(event, Utc::now()) {
            print!("{report}");
        }
    }
}

fn banner(kind: &str, at: DateTime<Utc>, total: usize) -> String {
    format!(
        "---------- {kind} coverage ({}, {total} traces) ----------\n",
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Text printed for an event, or `None` for events that only go to the log.
pub fn render_event(event: &SearchEvent<'_>, at: DateTime<Utc>) -> Option<String> {
    match event {
        SearchEvent::Baseline { total, input } => {
            Some(banner("Initial", at, *total) + &hexdump(input))
        }
        SearchEvent::NewCoverage { total, input, .. } => {
            Some(banner("New", at, *total) + &hexdump(input) + "\n")
        }
        SearchEvent::GaveUp { .. } => None,
    }
}

/// Classic 16-bytes-per-row dump: offset, hex bytes, printable ASCII.
///
/// ```
/// let dump = covclimb_core::monitor::hexdump(b"AB\x00");
/// assert!(dump.starts_with("00000000: 41 42 00 "));
/// assert!(dump.ends_with(&format!("AB.{}\n", " ".repeat(13))));
/// ```
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(BYTES_PER_ROW).enumerate() {
        let _ = write!(out, "{:08x}: ", row * BYTES_PER_ROW);
        for i in 0..BYTES_PER_ROW {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
        }
        for i in 0..BYTES_PER_ROW {
            out.push(match chunk.get(i) {
                Some(&byte) if (0x20..=0x7e).contains(&byte) => byte as char,
                Some(_) => '.',
                None => ' ',
            });
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hexdump_full_and_partial_rows() {
        let data: Vec<u8> = (0x41..0x41 + 18).collect();
        let dump = hexdump(&data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "00000000: 41 42 43 44 45 46 47 48 49 4a 4b 4c 4d 4e 4f 50 ABCDEFGHIJKLMNOP"
        );
        assert_eq!(
            lines[1],
            format!("00000010: 51 52 {}QR{}", "   ".repeat(14), " ".repeat(14))
        );
    }

    #[test]
    fn hexdump_masks_non_printable_bytes() {
        let dump = hexdump(&[0x1f, 0x20, 0x7e, 0x7f, 0xff]);
        assert!(dump.starts_with("00000000: 1f 20 7e 7f ff "));
        assert!(dump.contains(". ~.."));
    }

    #[test]
    fn hexdump_of_empty_input_is_empty() {
        assert_eq!(hexdump(&[]), "");
    }

    #[test]
    fn renders_banners_with_utc_timestamp() {
        let at = Utc.with_ymd_and_hms(2019, 5, 4, 13, 7, 9).unwrap();
        let input = [b'x'; 3];

        let baseline = render_event(
            &SearchEvent::Baseline {
                total: 12,
                input: &input,
            },
            at,
        )
        .unwrap();
        assert!(baseline.starts_with(
            "---------- Initial coverage (2019-05-04 13:07:09, 12 traces) ----------\n00000000: 78 78 78"
        ));

        let hit = render_event(
            &SearchEvent::NewCoverage {
                position: 0,
                attempts: 4,
                total: 13,
                input: &input,
            },
            at,
        )
        .unwrap();
        assert!(hit.starts_with("---------- New coverage (2019-05-04 13:07:09, 13 traces) ----------\n"));
        assert!(hit.ends_with("\n\n"));

        assert!(
            render_event(
                &SearchEvent::GaveUp {
                    position: 1,
                    attempts: 10
                },
                at
            )
            .is_none()
        );
    }
}
