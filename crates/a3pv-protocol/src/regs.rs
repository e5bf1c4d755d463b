//! Register block exposed by the agent.
//!
//! The block is four 32-bit registers at the start of PCI BAR [`PV_REG_BAR`]. The pool address is
//! latched in two halves, low half first; the agent acts on the high-half write and reports the
//! outcome through [`mmio::STATUS`].

/// PCI BAR holding the register block.
pub const PV_REG_BAR: u8 = 4;

/// Marker written to the first 32-bit word of the slot pool before registration.
///
/// The agent checks it to validate that the registered address really points at a freshly
/// initialised pool.
pub const PV_POOL_MAGIC: u32 = 0xdead_beef;

/// Value of [`mmio::STATUS`] after an accepted registration (and while idle).
pub const PV_STATUS_OK: u32 = 0;

pub mod mmio {
    //! Byte offsets into the register window.

    pub const STATUS: u32 = 0x0;
    pub const POOL_ADDR_LO: u32 = 0x4;
    pub const POOL_ADDR_HI: u32 = 0x8;
    pub const INVOKE: u32 = 0xc;

    /// Minimum size of the register window.
    pub const WINDOW_BYTES: u32 = 0x10;
}

/// Split a 64-bit physical address into the `(lo, hi)` register values.
pub const fn split_addr(addr: u64) -> (u32, u32) {
    (addr as u32, (addr >> 32) as u32)
}

pub const fn join_addr(lo: u32, hi: u32) -> u64 {
    (hi as u64) << 32 | lo as u64
}
