//! Fault-context-safe diagnostic output.
//!
//! Everything here avoids heap allocation, locking, and locale-sensitive
//! formatting (spec §5, §9): it writes pre-rendered bytes straight to a file
//! descriptor with a raw `write(2)` call, so it is safe to call from inside
//! [`crate::fault_router`]'s signal handler.

use std::os::raw::c_int;

const STDERR: c_int = libc::STDERR_FILENO;

/// Write a fixed string followed by a newline.
pub fn eprint_line(msg: &str) {
    write_all(msg.as_bytes());
    write_all(b"\n");
}

/// Write a fixed string, a `0x`-prefixed hex number, and a trailing newline,
/// with no intermediate allocation.
pub fn eprint_hex_line(prefix: &str, value: u32) {
    write_all(prefix.as_bytes());
    write_all(b"0x");

    let mut buf = [0u8; 8];
    let mut i = buf.len();
    let mut v = value;
    loop {
        i -= 1;
        buf[i] = HEX_DIGITS[(v & 0xf) as usize];
        v >>= 4;
        if v == 0 {
            break;
        }
    }
    write_all(&buf[i..]);
    write_all(b"\n");
}

const HEX_DIGITS: [u8; 16] = *b"0123456789abcdef";

fn write_all(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: `bytes` is a valid, live slice for its own length; `write`
        // is async-signal-safe per signal-safety(7).
        let n = unsafe {
            libc::write(
                STDERR,
                bytes.as_ptr().cast::<std::os::raw::c_void>(),
                bytes.len(),
            )
        };
        if n <= 0 {
            return;
        }
        bytes = &bytes[n as usize..];
    }
}
