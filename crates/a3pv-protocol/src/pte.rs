//! Page-table-entry encoding.
//!
//! The agent writes these words straight into the hardware page tables, so the layout has to match
//! the GPU's PTE format exactly:
//!
//! ```text
//!  63         36 35 34  32 31                     2   1       0
//! +-------------+--+------+------------------------+-----+-------+
//! |   memtype   |  |target|  phys >> 8 (frame)     | sys |present|
//! +-------------+--+------+------------------------+-----+-------+
//! ```

use bitflags::bitflags;

pub const PTE_PRESENT: u64 = 1 << 0;
pub const PTE_SYS_ACCESS: u64 = 1 << 1;
pub const PTE_TARGET_SHIFT: u32 = 32;
pub const PTE_MEMTYPE_SHIFT: u32 = 36;

/// Bits 2..=31 of the entry carry the frame; bits 0/1 are flags.
const PTE_FRAME_MASK: u64 = 0xffff_fffc;

pub mod target {
    //! Target-window selectors.

    /// Video memory (used for contiguous VRAM mappings).
    pub const VRAM: u32 = 0;
    /// System memory, snooped.
    pub const SYS_SNOOP: u32 = 5;
    /// System memory, non-snooped.
    pub const SYS_NOSNOOP: u32 = 7;
}

bitflags! {
    /// Access flags of a GPU virtual-memory area.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MemAccess: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Mapping must stay reachable from system (privileged) contexts.
        const SYS = 1 << 2;
        /// Scatter-gather pages are not snooped by the CPU caches.
        const NOSNOOP = 1 << 3;

        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Pack a physical address into a present PTE.
pub const fn encode_pte(phys: u64, sys_access: bool, memtype: u32, target: u32) -> u64 {
    let mut pte = phys >> 8;
    pte |= PTE_PRESENT;
    if sys_access {
        pte |= PTE_SYS_ACCESS;
    }
    pte |= (target as u64) << PTE_TARGET_SHIFT;
    pte |= (memtype as u64) << PTE_MEMTYPE_SHIFT;
    pte
}

/// Target window for scatter-gather pages with the given access flags.
pub fn sg_target(access: MemAccess) -> u32 {
    if access.contains(MemAccess::NOSNOOP) {
        target::SYS_NOSNOOP
    } else {
        target::SYS_SNOOP
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedPte {
    pub present: bool,
    pub sys_access: bool,
    pub target: u32,
    pub memtype: u32,
    /// Page-aligned physical address recovered from the frame bits.
    pub phys: u64,
}

pub const fn decode_pte(pte: u64) -> DecodedPte {
    DecodedPte {
        present: pte & PTE_PRESENT != 0,
        sys_access: pte & PTE_SYS_ACCESS != 0,
        target: ((pte >> PTE_TARGET_SHIFT) & 0xf) as u32,
        memtype: (pte >> PTE_MEMTYPE_SHIFT) as u32,
        phys: (pte & PTE_FRAME_MASK) << 8,
    }
}
