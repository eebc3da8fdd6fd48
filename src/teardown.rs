//! Releases every page frame the fault router materialized (spec §7's
//! "teardown collaborator"). Failures here are reported but never turn into
//! a non-zero exit code.

use std::os::raw::c_void;

use crate::config::PAGE_SIZE;
use crate::page_table::PageTable;

/// A single page that could not be released at teardown.
#[derive(Debug, Clone, Copy)]
pub struct TeardownError {
    pub page_vaddr: u32,
}

/// `munmap` every page recorded in `table`, draining it in the process.
/// Collects failures instead of stopping at the first one, so a single bad
/// unmap doesn't leak the rest of the address space.
pub fn release_all(table: &mut PageTable) -> Vec<TeardownError> {
    let mut failures = Vec::new();
    for page_vaddr in table.drain() {
        // SAFETY: `page_vaddr` was placed by the fault router with exactly
        // `PAGE_SIZE` bytes and is not referenced by anything else once the
        // entry function has returned.
        let rc = unsafe { libc::munmap(page_vaddr as *mut c_void, PAGE_SIZE as usize) };
        if rc != 0 {
            failures.push(TeardownError { page_vaddr });
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draining_an_empty_table_releases_nothing() {
        let mut table = PageTable::new();
        assert!(release_all(&mut table).is_empty());
    }
}
