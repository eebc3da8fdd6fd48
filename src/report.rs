//! Final statistics report (spec §6): the reporter collaborator, consuming
//! counters once the fault-context constraints have ended.

use std::io::Write;

use crate::stats::Stats;

/// Write the four-line report to `out` in the exact order and format spec
/// §6 requires.
///
/// # Errors
/// Propagates any I/O error writing to `out`.
pub fn write_report<W: Write>(mut out: W, entry_return: i32, stats: &Stats) -> std::io::Result<()> {
    writeln!(out, "User _start return value = {entry_return}")?;
    writeln!(out, "Total page faults: {}", stats.page_faults)?;
    writeln!(out, "Pages Allocated: {}", stats.pages_allocated)?;
    writeln!(
        out,
        "Total fragmentation (in KB): {:.4}KB",
        stats.fragmentation_kb()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_scenario_one_exactly() {
        let stats = Stats {
            page_faults: 1,
            pages_allocated: 1,
            fragmentation_bytes: 0,
        };
        let mut out = Vec::new();
        write_report(&mut out, 42, &stats).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "User _start return value = 42\n\
             Total page faults: 1\n\
             Pages Allocated: 1\n\
             Total fragmentation (in KB): 0.0000KB\n"
        );
    }

    #[test]
    fn formats_scenario_two_exactly() {
        let stats = Stats {
            page_faults: 2,
            pages_allocated: 2,
            fragmentation_bytes: 3192,
        };
        let mut out = Vec::new();
        write_report(&mut out, 7, &stats).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "User _start return value = 7\n\
             Total page faults: 2\n\
             Pages Allocated: 2\n\
             Total fragmentation (in KB): 3.1172KB\n"
        );
    }

    #[test]
    fn formats_negative_return_value() {
        let stats = Stats::default();
        let mut out = Vec::new();
        write_report(&mut out, -1, &stats).unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .starts_with("User _start return value = -1\n"));
    }
}
