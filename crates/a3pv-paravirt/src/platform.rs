//! Seam between the transport and whatever provides DMA memory and the register BAR.
//!
//! On real hardware the platform hands out physically contiguous kernel memory and an `ioremap`ed
//! BAR ([`MmioWindow`]). Host-side tests use [`crate::agent::SoftPlatform`] instead.

use std::ptr::NonNull;
use std::sync::{Arc, Mutex, Weak};

use crate::sync::lock;

/// 32-bit register access to the agent's register block.
///
/// Reads take `&mut self` because register reads may have side effects on the device.
pub trait RegisterWindow: Send {
    fn read32(&mut self, offset: u32) -> u32;
    fn write32(&mut self, offset: u32, value: u32);
}

/// Device bring-up services used by [`crate::PvDevice::init`].
pub trait PvPlatform {
    /// Zeroed, physically contiguous memory shared with the agent. `None` when exhausted.
    fn alloc_dma(&self, len: usize) -> Option<DmaRegion>;

    /// Map the register block living in PCI BAR `bar`. `None` when the BAR is absent or cannot be
    /// mapped.
    fn map_registers(&self, bar: u8) -> Option<Box<dyn RegisterWindow>>;
}

/// Backing bytes of a [`DmaRegion`].
#[derive(Debug)]
pub struct DmaMemory {
    bytes: Mutex<Box<[u8]>>,
}

impl DmaMemory {
    fn new_zeroed(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0u8; len].into_boxed_slice()),
        }
    }
}

/// Memory visible to both the driver (through this handle) and the agent (through its physical
/// address). Clones share the same bytes; the memory is freed with the last handle.
///
/// Accesses outside the region panic: every offset used by the transport is derived from the
/// validated slot geometry.
#[derive(Clone, Debug)]
pub struct DmaRegion {
    phys: u64,
    len: usize,
    mem: Arc<DmaMemory>,
}

impl DmaRegion {
    pub fn new_zeroed(phys: u64, len: usize) -> Self {
        Self {
            phys,
            len,
            mem: Arc::new(DmaMemory::new_zeroed(len)),
        }
    }

    pub fn phys_addr(&self) -> u64 {
        self.phys
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        let bytes = lock(&self.mem.bytes);
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
    }

    pub fn write(&self, offset: usize, buf: &[u8]) {
        let mut bytes = lock(&self.mem.bytes);
        bytes[offset..offset + buf.len()].copy_from_slice(buf);
    }

    pub fn fill(&self, value: u8) {
        lock(&self.mem.bytes).fill(value);
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        self.read(offset, &mut raw);
        u32::from_le_bytes(raw)
    }

    pub fn write_u32(&self, offset: usize, value: u32) {
        self.write(offset, &value.to_le_bytes());
    }

    pub(crate) fn downgrade(&self) -> Weak<DmaMemory> {
        Arc::downgrade(&self.mem)
    }

    pub(crate) fn from_weak(phys: u64, len: usize, mem: &Weak<DmaMemory>) -> Option<Self> {
        Some(Self {
            phys,
            len,
            mem: mem.upgrade()?,
        })
    }
}

/// Register window backed by a mapped device BAR.
///
/// Accesses are volatile and use native endianness, matching the agent's register block.
pub struct MmioWindow {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the window only performs volatile accesses through `&mut self`; the mapping itself is
// not tied to the thread that created it.
unsafe impl Send for MmioWindow {}

impl MmioWindow {
    /// # Safety
    ///
    /// `base` must point to a mapped register region of at least `len` bytes that stays mapped,
    /// and is not accessed through any other alias, for the lifetime of the returned window.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    fn reg_ptr(&self, offset: u32) -> *mut u32 {
        let offset = offset as usize;
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "register offset {offset:#x} outside a {:#x}-byte window",
            self.len
        );
        // SAFETY: bounds checked above; `new`'s contract guarantees the range is mapped.
        unsafe { self.base.as_ptr().add(offset).cast::<u32>() }
    }
}

impl RegisterWindow for MmioWindow {
    fn read32(&mut self, offset: u32) -> u32 {
        let ptr = self.reg_ptr(offset);
        // SAFETY: `ptr` is in bounds, 4-byte aligned relative to the mapped base.
        unsafe { ptr.read_volatile() }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        let ptr = self.reg_ptr(offset);
        // SAFETY: as in `read32`.
        unsafe { ptr.write_volatile(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dma_region_clones_share_bytes() {
        let region = DmaRegion::new_zeroed(0x1000, 64);
        let alias = region.clone();
        region.write_u32(8, 0x1234_5678);
        assert_eq!(alias.read_u32(8), 0x1234_5678);

        let weak = region.downgrade();
        drop(region);
        assert!(DmaRegion::from_weak(0x1000, 64, &weak).is_some());
        drop(alias);
        assert!(DmaRegion::from_weak(0x1000, 64, &weak).is_none());
    }

    #[test]
    fn mmio_window_uses_volatile_register_slots() {
        let mut regs = Box::new([0u32; 4]);
        let base = NonNull::new(regs.as_mut_ptr().cast::<u8>()).unwrap();
        {
            // SAFETY: `regs` outlives the window and is not touched while the window is alive.
            let mut window = unsafe { MmioWindow::new(base, 16) };
            window.write32(0x4, 0xdead_0000);
            window.write32(0xc, 7);
            assert_eq!(window.read32(0x4), 0xdead_0000);
        }
        assert_eq!(regs[1], 0xdead_0000);
        assert_eq!(regs[3], 7);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn mmio_window_rejects_out_of_range_offsets() {
        let mut regs = [0u32; 4];
        let base = NonNull::new(regs.as_mut_ptr().cast::<u8>()).unwrap();
        // SAFETY: `regs` outlives the window.
        let mut window = unsafe { MmioWindow::new(base, 16) };
        window.write32(0x10, 1);
    }
}
