//! The lazy segment pager. This is the core of the crate (spec §4.1): it
//! translates a faulting virtual address into a single materialized,
//! file-initialized page and returns so the faulting instruction retries.
//!
//! The module is split in two halves. [`plan_fault`] is a pure function over
//! an [`ElfImage`] and a faulting address — no I/O, no `unsafe`, fully unit
//! tested. [`install`]/[`segv_handler`] are the signal-context glue that
//! actually places and populates memory; they cannot be exercised by a unit
//! test, since doing so requires a real process taking a real fault, and are
//! kept as small as possible so that `plan_fault` carries the real logic.

use std::cell::UnsafeCell;
use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::config::PAGE_SIZE;
use crate::elf_image::{page_base, ElfImage};
use crate::page_table::PageTable;
use crate::sigsafe;
use crate::stats::Stats;

/// What [`plan_fault`] decided should happen for one faulting address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultPlan {
    /// Page-aligned address to map.
    pub page_vaddr: u32,
    /// Offset in the ELF file to read the page's content from.
    pub file_cursor: u32,
    /// Bytes to copy from the file; the remainder of the page stays zero.
    pub bytes_to_copy: u32,
    /// Bytes of this page that lie past the segment's declared end.
    pub overshoot: u32,
}

/// Why a fault could not be serviced. Each variant corresponds to a fatal
/// row in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// No loadable segment covers the faulting address: a true access violation.
    OutsideAnySegment(u32),
    /// The router was re-entered for a page it has already materialized.
    AlreadyMapped(u32),
}

/// Decide how to service a fault at `addr` against `image`, given what
/// `table` has already materialized. Pure: performs segment lookup, page
/// alignment, fragmentation accounting and file-cursor arithmetic (spec
/// §4.1 steps 2-4, 6), but places nothing and touches no I/O.
///
/// # Errors
/// Returns [`FaultError::OutsideAnySegment`] if no loadable segment covers
/// `addr`, or [`FaultError::AlreadyMapped`] if `addr`'s page was already
/// materialized (reentry, which spec §4.1 treats as fatal).
pub fn plan_fault(image: &ElfImage, table: &PageTable, addr: u32) -> Result<FaultPlan, FaultError> {
    let segment = image
        .segment_for(addr)
        .ok_or(FaultError::OutsideAnySegment(addr))?;

    let page_vaddr = page_base(addr);
    if table.contains(page_vaddr) {
        return Err(FaultError::AlreadyMapped(page_vaddr));
    }

    let overshoot = (page_vaddr.saturating_add(PAGE_SIZE)).saturating_sub(segment.end());

    let file_cursor = segment.offset + page_vaddr.saturating_sub(segment.vaddr);
    let filesz_end = segment.vaddr.saturating_add(segment.filesz);
    let bytes_to_copy = if page_vaddr >= filesz_end {
        0
    } else {
        (filesz_end - page_vaddr).min(PAGE_SIZE)
    };

    Ok(FaultPlan {
        page_vaddr,
        file_cursor,
        bytes_to_copy,
        overshoot,
    })
}

/// Everything the signal handler needs, bundled behind a single pointer so
/// it can live in a process-wide static for the duration of the run (spec
/// §9: "a single process-wide context is acceptable provided its lifecycle
/// is clearly bounded").
pub struct LoaderContext {
    pub image: ElfImage,
    pub table: PageTable,
    pub stats: Stats,
}

impl LoaderContext {
    #[must_use]
    pub fn new(image: ElfImage) -> Self {
        Self {
            image,
            table: PageTable::new(),
            stats: Stats::new(),
        }
    }
}

static CONTEXT: AtomicPtr<UnsafeCell<LoaderContext>> = AtomicPtr::new(std::ptr::null_mut());

/// Install the `SIGSEGV` handler and arm `context` as the process-wide
/// loader context. Must be called exactly once, before the entry symbol is
/// invoked.
///
/// # Safety
/// The caller must ensure `uninstall` runs before `context` (or anything
/// referencing it) is dropped, and that no other thread touches `context`
/// for the duration the handler is armed (spec §5: single-threaded target).
///
/// # Panics
/// Panics if the host refuses to install the handler.
pub unsafe fn install(context: LoaderContext) {
    let boxed = Box::new(UnsafeCell::new(context));
    let ptr = Box::into_raw(boxed);
    CONTEXT.store(ptr, Ordering::SeqCst);

    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = segv_handler as usize;
    action.sa_flags = libc::SA_SIGINFO;
    libc::sigemptyset(&mut action.sa_mask);

    let rc = libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut());
    assert!(rc == 0, "failed to install SIGSEGV handler");
}

/// Disarm the handler and hand back the context for reporting and teardown.
///
/// # Safety
/// Must only be called after the entry function has returned and no more
/// faults can occur.
pub unsafe fn uninstall() -> LoaderContext {
    let mut default: libc::sigaction = std::mem::zeroed();
    default.sa_sigaction = libc::SIG_DFL;
    libc::sigaction(libc::SIGSEGV, &default, std::ptr::null_mut());

    let ptr = CONTEXT.swap(std::ptr::null_mut(), Ordering::SeqCst);
    assert!(!ptr.is_null(), "uninstall called without a matching install");
    // SAFETY: `ptr` was produced by `Box::into_raw` in `install` and has not
    // been freed since.
    let cell = *Box::from_raw(ptr);
    cell.into_inner()
}

/// The actual `SIGSEGV` handler. Runs in an asynchronous fault context: it
/// may use only direct syscalls, integer arithmetic and the
/// [`sigsafe`] write helper (spec §5, §9). It is single-entry and is never
/// reentered for a page it has already serviced under correct operation; if
/// it is, [`plan_fault`] reports that as fatal.
extern "C" fn segv_handler(_sig: c_int, info: *mut libc::siginfo_t, _ucontext: *mut c_void) {
    let ptr = CONTEXT.load(Ordering::SeqCst);
    if ptr.is_null() {
        sigsafe::eprint_line("lazyload: fault handler invoked with no armed context");
        unsafe { libc::_exit(1) };
    }

    // SAFETY: the handler never runs concurrently with itself or with the
    // launcher (spec §5); `ptr` was armed by `install` and is valid until
    // `uninstall`.
    let context = unsafe { &mut *(*ptr).get() };
    context.stats.page_faults += 1;

    // SAFETY: `info` is the signal delivery record the kernel handed us.
    let addr = unsafe { (*info).si_addr() } as usize as u32;

    let plan = match plan_fault(&context.image, &context.table, addr) {
        Ok(plan) => plan,
        Err(FaultError::OutsideAnySegment(a)) => {
            sigsafe::eprint_hex_line("lazyload: access violation at ", a);
            unsafe { libc::_exit(1) }
        }
        Err(FaultError::AlreadyMapped(p)) => {
            sigsafe::eprint_hex_line("lazyload: fault router reentered for page ", p);
            unsafe { libc::_exit(1) }
        }
    };

    // SAFETY: `plan.page_vaddr` is page-aligned and not yet mapped; placing
    // a fixed anonymous mapping there is exactly what spec §4.1 step 5 asks.
    let mapped = unsafe {
        libc::mmap(
            plan.page_vaddr as *mut c_void,
            PAGE_SIZE as usize,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_FIXED | libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if mapped == libc::MAP_FAILED {
        sigsafe::eprint_hex_line("lazyload: mmap failed for page ", plan.page_vaddr);
        unsafe { libc::_exit(1) };
    }

    if plan.bytes_to_copy > 0 {
        // SAFETY: `mapped` is a freshly placed page of at least `PAGE_SIZE`
        // bytes; `bytes_to_copy <= PAGE_SIZE`.
        let n = unsafe {
            libc::pread(
                context.image.raw_fd(),
                mapped,
                plan.bytes_to_copy as usize,
                libc::off_t::from(plan.file_cursor),
            )
        };
        if n < 0 || n as u32 != plan.bytes_to_copy {
            sigsafe::eprint_hex_line("lazyload: short read populating page ", plan.page_vaddr);
            unsafe { libc::_exit(1) };
        }
    }

    context.table.record(plan.page_vaddr);
    context.stats.pages_allocated += 1;
    context.stats.fragmentation_bytes += u64::from(plan.overshoot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf_image::{Access, Segment};

    fn image_with(segments: Vec<Segment>, entry: u32) -> ElfImage {
        crate::elf_image::ElfImage::from_parts_for_test(entry, segments)
    }

    fn seg(vaddr: u32, memsz: u32, filesz: u32, offset: u32) -> Segment {
        Segment {
            vaddr,
            memsz,
            filesz,
            offset,
            flags: Access::READ | Access::EXECUTE,
        }
    }

    #[test]
    fn single_page_no_fragmentation() {
        let image = image_with(vec![seg(0x0804_8000, 4096, 4096, 0x1000)], 0x0804_8000);
        let table = PageTable::new();
        let plan = plan_fault(&image, &table, 0x0804_8000).unwrap();
        assert_eq!(plan.page_vaddr, 0x0804_8000);
        assert_eq!(plan.file_cursor, 0x1000);
        assert_eq!(plan.bytes_to_copy, 4096);
        assert_eq!(plan.overshoot, 0);
    }

    #[test]
    fn partial_last_page_fragments() {
        // memsz = 5000, entry at last byte of the segment: scenario 2 (spec §8).
        let image = image_with(vec![seg(0x0804_8000, 5000, 5000, 0x1000)], 0x0804_8000);
        let mut table = PageTable::new();
        table.record(0x0804_8000);
        let plan = plan_fault(&image, &table, 0x0804_8000 + 4999).unwrap();
        assert_eq!(plan.page_vaddr, 0x0804_9000);
        assert_eq!(plan.bytes_to_copy, 5000 - 4096);
        assert_eq!(plan.overshoot, 4096 - (5000 - 4096));
    }

    #[test]
    fn zero_filled_tail_copies_nothing() {
        // memsz=8192, filesz=4096: second page is pure BSS.
        let image = image_with(vec![seg(0x0804_8000, 8192, 4096, 0x1000)], 0x0804_8000);
        let mut table = PageTable::new();
        table.record(0x0804_8000);
        let plan = plan_fault(&image, &table, 0x0804_8000 + 4096).unwrap();
        assert_eq!(plan.bytes_to_copy, 0);
        assert_eq!(plan.overshoot, 0);
    }

    #[test]
    fn fault_outside_any_segment_is_an_error() {
        let image = image_with(vec![seg(0x0804_8000, 4096, 4096, 0x1000)], 0x0804_8000);
        let table = PageTable::new();
        let err = plan_fault(&image, &table, 0xDEAD_BEEF).unwrap_err();
        assert_eq!(err, FaultError::OutsideAnySegment(0xDEAD_BEEF));
    }

    #[test]
    fn reentry_on_mapped_page_is_fatal() {
        let image = image_with(vec![seg(0x0804_8000, 4096, 4096, 0x1000)], 0x0804_8000);
        let mut table = PageTable::new();
        table.record(0x0804_8000);
        let err = plan_fault(&image, &table, 0x0804_8000).unwrap_err();
        assert_eq!(err, FaultError::AlreadyMapped(0x0804_8000));
    }

    #[test]
    fn last_byte_of_page_aligned_segment_has_no_fragmentation() {
        let image = image_with(vec![seg(0x0804_8000, 4096, 4096, 0x1000)], 0x0804_8000);
        let table = PageTable::new();
        let plan = plan_fault(&image, &table, 0x0804_8000 + 4095).unwrap();
        assert_eq!(plan.overshoot, 0);
    }
}
