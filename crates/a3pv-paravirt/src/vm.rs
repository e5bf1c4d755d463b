//! GPU address-space glue on top of the operation library.
//!
//! A [`PvVm`] owns references to the page directories that make up one address space and turns
//! the VM manager's requests (map a contiguous range, map a scatter-gather list, unmap, flush)
//! into encoded page-table operations.

use std::sync::{Arc, Mutex};

use a3pv_protocol::{encode_pte, pte::target, sg_target, MemAccess};

use crate::error::{PvError, Result};
use crate::mem::PvMem;
use crate::ops::ParaVirt;
use crate::sync::lock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmKind {
    /// Per-channel address space.
    Channel,
    Bar1,
    Bar3,
}

impl VmKind {
    /// Engine mask passed to `vm_flush`.
    pub fn engine_mask(self) -> u32 {
        match self {
            VmKind::Channel => 1,
            VmKind::Bar1 | VmKind::Bar3 => 1 | 4,
        }
    }
}

/// Encoding attributes of one virtual-memory area.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmaAttrs {
    pub access: MemAccess,
    pub memtype: u32,
}

impl VmaAttrs {
    fn encode(&self, phys: u64, target: u32) -> u64 {
        encode_pte(
            phys,
            self.access.contains(MemAccess::SYS),
            self.memtype,
            target,
        )
    }
}

pub struct PvVm {
    pv: Arc<ParaVirt>,
    kind: VmKind,
    pgds: Mutex<Vec<PvMem>>,
}

impl PvVm {
    pub fn new(pv: Arc<ParaVirt>, kind: VmKind) -> Self {
        Self {
            pv,
            kind,
            pgds: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> VmKind {
        self.kind
    }

    /// Take a reference on `pgd` and include it in flushes and channel binds.
    pub fn add_pgd(&self, pgd: &PvMem) {
        lock(&self.pgds).push(pgd.add_reference());
    }

    /// Drop the VM's reference on `pgd`. Returns whether it was attached.
    pub fn remove_pgd(&self, pgd: &PvMem) -> bool {
        let removed = {
            let mut pgds = lock(&self.pgds);
            pgds.iter()
                .position(|held| held.id() == pgd.id())
                .map(|pos| pgds.remove(pos))
        };
        removed.is_some()
    }

    pub fn pgd_ids(&self) -> Vec<u32> {
        lock(&self.pgds).iter().map(PvMem::id).collect()
    }

    /// Install the (small, large) page-table pair at directory entry `index` of every page
    /// directory. Stops at the first failure.
    pub fn map_pgt(&self, index: u32, pgt: [Option<&PvMem>; 2]) -> Result<()> {
        let ids = pgt.map(|table| table.map_or(0, PvMem::id));
        for pgd in lock(&self.pgds).iter() {
            self.pv.map_pgt(pgd.id(), ids, index)?;
        }
        Ok(())
    }

    /// Map `count` pages of contiguous VRAM starting at `phys`.
    pub fn map(
        &self,
        pgt: &PvMem,
        pte: u32,
        count: u32,
        phys: u64,
        page_shift: u32,
        attrs: VmaAttrs,
    ) -> Result<()> {
        if !(8..40).contains(&page_shift) {
            return Err(PvError::InvalidArgument(format!(
                "unsupported page shift {page_shift}"
            )));
        }
        let next = 1u32 << (page_shift - 8);
        let first = attrs.encode(phys, target::VRAM);
        self.pv.map_batch(pgt.id(), pte, first, next, count)
    }

    /// Map one system-memory page per entry of `addrs`.
    pub fn map_sg(&self, pgt: &PvMem, pte: u32, addrs: &[u64], attrs: VmaAttrs) -> Result<()> {
        let target = sg_target(attrs.access);
        let ptes: Vec<u64> = addrs.iter().map(|&addr| attrs.encode(addr, target)).collect();
        self.pv.map_sg_batch(pgt.id(), pte, &ptes)
    }

    pub fn unmap(&self, pgt: &PvMem, pte: u32, count: u32) -> Result<()> {
        self.pv.unmap_batch(pgt.id(), pte, count)
    }

    /// Flush every page directory of the VM. Callers must have waited for the map/unmap calls
    /// they want covered.
    pub fn flush(&self) -> Result<()> {
        let engine = self.kind.engine_mask();
        for pgd in lock(&self.pgds).iter() {
            self.pv.vm_flush(pgd.id(), engine)?;
        }
        Ok(())
    }

    /// Attach the VM to `channel` by binding each page directory to it.
    pub fn bind_channel(&self, channel: u32) -> Result<()> {
        for pgd in lock(&self.pgds).iter() {
            self.pv.set_pgd(pgd.id(), channel)?;
        }
        Ok(())
    }
}
