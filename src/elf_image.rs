//! Parses and validates the target ELF file into the immutable descriptor the
//! fault router materializes pages from.

use std::fs::File;
use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use bitflags::bitflags;
use elf::abi::{EM_386, PT_LOAD};
use elf::endian::AnyEndian;
use elf::file::Class;
use elf::ElfBytes;

use crate::config::PAGE_SIZE;

bitflags! {
    /// Permission bits carried from the program header. Informational only:
    /// the core maps every page RWX regardless (spec §9).
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// One `PT_LOAD` program header, reduced to what the fault router needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Virtual base address the segment must occupy.
    pub vaddr: u32,
    /// Size the segment claims in memory; may exceed `filesz` (BSS tail).
    pub memsz: u32,
    /// Bytes backed by the file.
    pub filesz: u32,
    /// Byte offset of the segment within the ELF file.
    pub offset: u32,
    /// Read/write/execute bits, informational in the core.
    pub flags: Access,
}

impl Segment {
    /// Whether virtual address `addr` falls within this segment's memory range.
    #[must_use]
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.vaddr && addr < self.vaddr.saturating_add(self.memsz)
    }

    /// Address one past the last byte this segment claims in memory.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.vaddr.saturating_add(self.memsz)
    }
}

/// Error loading and validating the target ELF file.
#[derive(Debug)]
pub enum LoadError {
    /// The file could not be opened or read.
    Io(std::io::Error),
    /// The `elf` crate rejected the file as malformed.
    Malformed(elf::ParseError),
    /// The file is not a 32-bit ELF.
    NotElf32,
    /// The file is not built for the `EM_386` target architecture.
    UnsupportedArchitecture,
    /// The file has no loadable program headers at all.
    NoLoadableSegments,
    /// The entry address does not fall inside any loadable segment.
    EntryOutsideSegment,
    /// Two loadable segments claim overlapping virtual address ranges.
    OverlappingSegments,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read ELF file: {e}"),
            Self::Malformed(e) => write!(f, "malformed ELF file: {e}"),
            Self::NotElf32 => write!(f, "not a 32-bit ELF file"),
            Self::UnsupportedArchitecture => write!(f, "not an EM_386 ELF file"),
            Self::NoLoadableSegments => write!(f, "ELF file has no loadable segments"),
            Self::EntryOutsideSegment => {
                write!(f, "entry point does not lie within any loadable segment")
            }
            Self::OverlappingSegments => write!(f, "loadable segments overlap in virtual space"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<elf::ParseError> for LoadError {
    fn from(e: elf::ParseError) -> Self {
        Self::Malformed(e)
    }
}

/// Immutable, validated descriptor of the target executable: entry address,
/// ordered loadable segments, and the open file the router reads pages from.
///
/// `file` is owned exclusively by this image for the lifetime of the run;
/// the fault router is the only party allowed to read from it (spec §5).
pub struct ElfImage {
    entry: u32,
    segments: Vec<Segment>,
    file: File,
}

impl ElfImage {
    /// Parse, validate and open `path`.
    ///
    /// # Errors
    /// Returns a [`LoadError`] if the file cannot be opened, is not a valid
    /// 32-bit `EM_386` ELF, has no loadable segments, or if `entry` does not
    /// lie within one of them.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let elf = ElfBytes::<AnyEndian>::minimal_parse(&bytes)?;

        if elf.ehdr.class != Class::ELF32 {
            return Err(LoadError::NotElf32);
        }
        if elf.ehdr.e_machine != EM_386 {
            return Err(LoadError::UnsupportedArchitecture);
        }

        let mut segments = Vec::new();
        if let Some(phdrs) = elf.segments() {
            for phdr in phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
                let mut flags = Access::empty();
                if phdr.p_flags & elf::abi::PF_R != 0 {
                    flags |= Access::READ;
                }
                if phdr.p_flags & elf::abi::PF_W != 0 {
                    flags |= Access::WRITE;
                }
                if phdr.p_flags & elf::abi::PF_X != 0 {
                    flags |= Access::EXECUTE;
                }

                segments.push(Segment {
                    vaddr: phdr.p_vaddr as u32,
                    memsz: phdr.p_memsz as u32,
                    filesz: phdr.p_filesz as u32,
                    offset: phdr.p_offset as u32,
                    flags,
                });
            }
        }

        if segments.is_empty() {
            return Err(LoadError::NoLoadableSegments);
        }
        if segments_overlap(&segments) {
            return Err(LoadError::OverlappingSegments);
        }

        let entry = elf.ehdr.e_entry as u32;
        if !segments.iter().any(|s| s.contains(entry)) {
            return Err(LoadError::EntryOutsideSegment);
        }

        Ok(Self {
            entry,
            segments,
            file,
        })
    }

    /// Virtual address of the entry symbol.
    #[must_use]
    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Loadable segments in declaration order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Raw file descriptor the router reads pages from via `pread`.
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Find the unique loadable segment governing `addr`, in declaration order.
    #[must_use]
    pub fn segment_for(&self, addr: u32) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(addr))
    }
}

#[cfg(test)]
impl ElfImage {
    /// Build an `ElfImage` from already-validated parts, bypassing parsing.
    /// Used only by [`crate::fault_router`]'s unit tests, which exercise
    /// `plan_fault`'s pure arithmetic and never read from `file`.
    pub(crate) fn from_parts_for_test(entry: u32, segments: Vec<Segment>) -> Self {
        Self {
            entry,
            segments,
            file: File::open("/dev/null").expect("open /dev/null for test fixture"),
        }
    }
}

fn segments_overlap(segments: &[Segment]) -> bool {
    for (i, a) in segments.iter().enumerate() {
        for b in &segments[i + 1..] {
            if a.vaddr < b.end() && b.vaddr < a.end() {
                return true;
            }
        }
    }
    false
}

/// Align `addr` down to the nearest page boundary.
#[must_use]
pub fn page_base(addr: u32) -> u32 {
    addr & !(PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn contains_is_half_open() {
        let s = seg(0x1000, 0x1000, 0x1000, 0);
        assert!(s.contains(0x1000));
        assert!(s.contains(0x1fff));
        assert!(!s.contains(0x2000));
    }

    #[test]
    fn detects_overlap() {
        let a = seg(0x1000, 0x2000, 0x2000, 0);
        let b = seg(0x2000, 0x1000, 0x1000, 0);
        assert!(segments_overlap(&[a, b]));
    }

    #[test]
    fn rejects_non_overlap_adjacent() {
        let a = seg(0x1000, 0x1000, 0x1000, 0);
        let b = seg(0x2000, 0x1000, 0x1000, 0);
        assert!(!segments_overlap(&[a, b]));
    }

    #[test]
    fn page_base_aligns_down() {
        assert_eq!(page_base(0x08049123), 0x08049000);
        assert_eq!(page_base(0x08049000), 0x08049000);
    }
}
