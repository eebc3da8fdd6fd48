//! Transfers control to the ELF entry point and captures its return value
//! (spec §4.4).

use crate::fault_router::LoaderContext;

/// A zero-argument, signed-32-bit-returning entry function, exactly the ABI
/// surface spec §1 allows.
type EntryFn = extern "C" fn() -> i32;

/// Arm the fault router over `context`, call the entry point, and return its
/// value together with the final context (for reporting and teardown).
///
/// # Safety
/// `context.image.entry()` must be a valid address inside one of
/// `context.image.segments()` (checked by [`crate::elf_image::ElfImage::load`]
/// at construction) and must designate code compatible with the `EntryFn`
/// ABI (spec §4.4's precondition: "self-contained, no external calls that
/// would demand loader-mediated symbol resolution"). The first instruction
/// fetch at `entry` is expected to fault; the armed router services it.
pub unsafe fn run(context: LoaderContext) -> (i32, LoaderContext) {
    let entry = context.image.entry();

    crate::fault_router::install(context);
    let entry_fn: EntryFn = std::mem::transmute(entry as usize);
    let ret = entry_fn();
    let context = crate::fault_router::uninstall();

    (ret, context)
}

#[cfg(test)]
mod tests {
    // `run` cannot be unit tested: it requires a real faulting entry point
    // in a real process, which is exactly what `fault_router::plan_fault`'s
    // tests exercise without the signal machinery.
}
