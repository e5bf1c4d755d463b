//! Page-table operations.
//!
//! Each operation is one (or, for long scatter-gather lists and on revisions without batch
//! opcodes, several) round trips through the [`HypercallTransport`]. A nonzero agent status is
//! returned as [`PvError::RemoteOperationFailed`] with the status untouched. Nothing here retries
//! or flushes implicitly.

use std::borrow::Cow;

use a3pv_protocol::{layout, ProtocolVersion, PvOp, PvRequest};

use crate::error::{PvError, Result};
use crate::transport::HypercallTransport;

/// Driver-side handle on an initialised para-virt channel.
pub struct ParaVirt {
    transport: HypercallTransport,
}

impl ParaVirt {
    pub fn new(transport: HypercallTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &HypercallTransport {
        &self.transport
    }

    pub fn version(&self) -> ProtocolVersion {
        self.transport.version()
    }

    fn call(&self, request: PvRequest<'_>) -> Result<u32> {
        let op = request.op();
        let reply = self.transport.call(&request)?;
        if !reply.is_ok() {
            tracing::warn!(%op, status = reply.status, "agent reported failure");
            return Err(PvError::RemoteOperationFailed {
                op,
                status: reply.status,
            });
        }
        Ok(reply.value)
    }

    /// Allocate a remote memory object and return the id the agent assigned to it.
    pub fn mem_alloc(&self, size: u32) -> Result<u32> {
        self.call(PvRequest::MemAlloc { size })
    }

    pub fn mem_free(&self, id: u32) -> Result<()> {
        self.call(PvRequest::MemFree { id }).map(drop)
    }

    /// Bind page directory `pgd` to `channel`.
    pub fn set_pgd(&self, pgd: u32, channel: u32) -> Result<()> {
        self.call(PvRequest::SetPgd { pgd, channel }).map(drop)
    }

    /// Install the (small, large) page-table pair at directory entry `index`. A `0` id leaves
    /// that half empty.
    pub fn map_pgt(&self, pgd: u32, pgt: [u32; 2], index: u32) -> Result<()> {
        self.call(PvRequest::MapPgt { pgd, pgt, index }).map(drop)
    }

    pub fn map(&self, pgt: u32, index: u32, pte: u64) -> Result<()> {
        self.call(PvRequest::Map { pgt, index, pte }).map(drop)
    }

    /// Map `count` contiguous entries starting at `index`; entry `i` receives `pte + i * next`.
    pub fn map_batch(&self, pgt: u32, index: u32, pte: u64, next: u32, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.version().supports(PvOp::MapBatch) {
            return self
                .call(PvRequest::MapBatch {
                    pgt,
                    index,
                    next,
                    count,
                    pte,
                })
                .map(drop);
        }

        for i in 0..count {
            let entry = pte.wrapping_add(u64::from(i) * u64::from(next));
            self.map(pgt, entry_index(index, i as usize)?, entry)?;
        }
        Ok(())
    }

    /// Map an arbitrary list of pre-encoded entries starting at `index`.
    ///
    /// The list goes out in chunks of [`layout::SG_BATCH_MAX`]. The first failing chunk ends the
    /// operation; chunks already accepted by the agent stay applied.
    pub fn map_sg_batch(&self, pgt: u32, index: u32, ptes: &[u64]) -> Result<()> {
        if !self.version().supports(PvOp::MapSgBatch) {
            for (i, &pte) in ptes.iter().enumerate() {
                self.map(pgt, entry_index(index, i)?, pte)?;
            }
            return Ok(());
        }

        for (n, chunk) in ptes.chunks(layout::SG_BATCH_MAX).enumerate() {
            let start = entry_index(index, n * layout::SG_BATCH_MAX)?;
            tracing::debug!(pgt, index = start, count = chunk.len(), "sg sub-batch");
            self.call(PvRequest::MapSgBatch {
                pgt,
                index: start,
                ptes: Cow::Borrowed(chunk),
            })?;
        }
        Ok(())
    }

    pub fn unmap_batch(&self, pgt: u32, index: u32, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.version().supports(PvOp::UnmapBatch) {
            return self
                .call(PvRequest::UnmapBatch { pgt, index, count })
                .map(drop);
        }

        for i in 0..count {
            self.map(pgt, entry_index(index, i as usize)?, 0)?;
        }
        Ok(())
    }

    pub fn vm_flush(&self, pgd: u32, engine: u32) -> Result<()> {
        self.call(PvRequest::VmFlush { pgd, engine }).map(drop)
    }

    /// Point the BAR window at page table `pgt`.
    pub fn bar_window_pgt(&self, pgt: u32) -> Result<()> {
        self.call(PvRequest::BarWindowPgt { pgt }).map(drop)
    }
}

fn entry_index(base: u32, offset: usize) -> Result<u32> {
    u32::try_from(offset)
        .ok()
        .and_then(|offset| base.checked_add(offset))
        .ok_or_else(|| {
            PvError::InvalidArgument(format!("page-table index {base} + {offset} overflows"))
        })
}
