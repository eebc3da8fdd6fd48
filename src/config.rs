//! Runtime tunables. Bare constants, no builder: the core has no configurable
//! policy surface.

/// Page granularity the fault router materializes memory at.
pub const PAGE_SIZE: u32 = 4096;

/// Bound on the length of the path argument accepted on the command line.
pub const MAX_PATH: usize = 4096;
