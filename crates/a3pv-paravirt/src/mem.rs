//! Reference-counted handle on a remote memory object (page directory, page table, instance
//! block).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::ops::ParaVirt;

struct PvMemInner {
    pv: Arc<ParaVirt>,
    id: u32,
    size: u32,
    freed: AtomicBool,
}

impl PvMemInner {
    /// Issue `mem_free` at most once per object.
    fn free_remote(&self) -> Result<()> {
        if self.freed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pv.mem_free(self.id)
    }
}

impl Drop for PvMemInner {
    fn drop(&mut self) {
        if let Err(err) = self.free_remote() {
            tracing::warn!(id = self.id, %err, "failed to free remote memory object");
        }
    }
}

/// Shared handle on a remote memory object.
///
/// Cloning (or [`PvMem::add_reference`]) adds a reference; the remote object is freed with
/// `mem_free` when the last reference goes away. Use [`PvMem::release_reference`] to observe the
/// result of that free; plain drops only log it.
#[derive(Clone)]
pub struct PvMem {
    inner: Arc<PvMemInner>,
}

impl PvMem {
    /// Allocate a `size`-byte object on the agent.
    ///
    /// If the agent refuses, no handle is created and no free is sent.
    pub fn allocate(pv: &Arc<ParaVirt>, size: u32) -> Result<Self> {
        let id = pv.mem_alloc(size)?;
        tracing::debug!(id, size, "allocated remote memory object");
        Ok(Self {
            inner: Arc::new(PvMemInner {
                pv: Arc::clone(pv),
                id,
                size,
                freed: AtomicBool::new(false),
            }),
        })
    }

    /// Remote object id as assigned by the agent.
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn size(&self) -> u32 {
        self.inner.size
    }

    pub fn add_reference(&self) -> Self {
        self.clone()
    }

    /// Drop this reference. Returns `Ok(true)` if it was the last one and the remote object was
    /// freed.
    pub fn release_reference(self) -> Result<bool> {
        match Arc::into_inner(self.inner) {
            Some(inner) => inner.free_remote().map(|()| true),
            None => Ok(false),
        }
    }

    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for PvMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PvMem")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .field("refs", &self.reference_count())
            .finish()
    }
}
