//! Register-level hypercall transport.
//!
//! The register block is shared by every slot, so all accesses go through one lock. The lock is
//! independent of the slot pool's free-mask lock; a caller holds at most one of the two at a time
//! apart from the invoke path, which takes it while owning a slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use a3pv_protocol::{mmio, split_addr, ProtocolVersion, PvReply, PvRequest, SlotBuf, PV_STATUS_OK};

use crate::config::CompletionMode;
use crate::error::{PvError, Result};
use crate::platform::RegisterWindow;
use crate::pool::SlotPool;
use crate::sync::lock;

pub struct HypercallTransport {
    pool: SlotPool,
    regs: Mutex<Box<dyn RegisterWindow>>,
    version: ProtocolVersion,
    completion: CompletionMode,
    registered: AtomicBool,
}

impl HypercallTransport {
    pub fn new(
        pool: SlotPool,
        regs: Box<dyn RegisterWindow>,
        version: ProtocolVersion,
        completion: CompletionMode,
    ) -> Self {
        Self {
            pool,
            regs: Mutex::new(regs),
            version,
            completion,
            registered: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Announce the pool's physical address to the agent: low half, then high half, then read
    /// the status register. Any nonzero status means the agent refused the pool.
    pub fn register_pool(&self) -> Result<()> {
        let (lo, hi) = split_addr(self.pool.phys_addr());
        let status = {
            let mut regs = lock(&self.regs);
            regs.write32(mmio::POOL_ADDR_LO, lo);
            regs.write32(mmio::POOL_ADDR_HI, hi);
            regs.read32(mmio::STATUS)
        };
        if status != PV_STATUS_OK {
            tracing::warn!(
                pool = format_args!("{:#x}", self.pool.phys_addr()),
                status,
                "agent rejected slot pool registration"
            );
            return Err(PvError::DeviceRejected {
                reason: format!("status register reads {status:#x} after pool registration"),
            });
        }
        self.registered.store(true, Ordering::Release);
        Ok(())
    }

    /// Signal the agent that slot `slot` holds a request, then wait for completion according to
    /// the configured [`CompletionMode`].
    pub fn invoke(&self, slot: u32) -> Result<()> {
        if !self.is_registered() {
            return Err(PvError::NotRegistered);
        }
        lock(&self.regs).write32(mmio::INVOKE, slot);

        match self.completion {
            CompletionMode::Synchronous => Ok(()),
            CompletionMode::PollReady { timeout_us } => self.poll_ready(slot, timeout_us),
        }
    }

    fn poll_ready(&self, slot: u32, timeout_us: u64) -> Result<()> {
        let timeout = Duration::from_micros(timeout_us);
        let start = Instant::now();
        loop {
            if lock(&self.regs).read32(mmio::STATUS) == PV_STATUS_OK {
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(PvError::CompletionTimeout { slot, waited });
            }
            std::thread::yield_now();
        }
    }

    /// Run one request through a pooled slot and return the agent's raw reply.
    ///
    /// The slot is checked back in on every path, including encode failures and timeouts.
    pub fn call(&self, request: &PvRequest<'_>) -> Result<PvReply> {
        let slot = self.pool.acquire();
        let mut buf = SlotBuf::new(self.pool.geometry().slot_size);
        request.encode(self.version, &mut buf)?;
        slot.store(&buf);

        tracing::debug!(op = %request.op(), slot = slot.index(), "hypercall");
        self.invoke(slot.index())?;

        slot.load(&mut buf);
        Ok(PvReply::read_from(&buf))
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::platform::DmaRegion;
    use a3pv_protocol::SlotGeometry;
    use std::sync::Arc;

    /// Register window that records writes and answers status reads from a script.
    #[derive(Clone, Default)]
    struct ScriptedRegs {
        writes: Arc<Mutex<Vec<(u32, u32)>>>,
        status: Arc<Mutex<Vec<u32>>>,
    }

    impl RegisterWindow for ScriptedRegs {
        fn read32(&mut self, offset: u32) -> u32 {
            assert_eq!(offset, mmio::STATUS);
            let mut status = lock(&self.status);
            if status.len() > 1 {
                status.remove(0)
            } else {
                status.first().copied().unwrap_or(0)
            }
        }

        fn write32(&mut self, offset: u32, value: u32) {
            lock(&self.writes).push((offset, value));
        }
    }

    fn transport(regs: &ScriptedRegs, completion: CompletionMode) -> HypercallTransport {
        let geometry = SlotGeometry {
            slot_size: 256,
            slot_count: 4,
        };
        let pool = SlotPool::new(
            DmaRegion::new_zeroed(0x1_2345_6000, geometry.pool_bytes()),
            geometry,
        )
        .unwrap();
        HypercallTransport::new(pool, Box::new(regs.clone()), ProtocolVersion::V1, completion)
    }

    #[test]
    fn registration_writes_low_then_high() {
        let regs = ScriptedRegs::default();
        let transport = transport(&regs, CompletionMode::Synchronous);
        transport.register_pool().unwrap();
        assert!(transport.is_registered());
        assert_eq!(
            *lock(&regs.writes),
            vec![(mmio::POOL_ADDR_LO, 0x2345_6000), (mmio::POOL_ADDR_HI, 0x1)]
        );
    }

    #[test]
    fn nonzero_status_rejects_registration() {
        let regs = ScriptedRegs::default();
        lock(&regs.status).push(3);
        let transport = transport(&regs, CompletionMode::Synchronous);
        assert!(matches!(
            transport.register_pool(),
            Err(PvError::DeviceRejected { .. })
        ));
        assert!(!transport.is_registered());
    }

    #[test]
    fn invoke_requires_registration() {
        let regs = ScriptedRegs::default();
        let transport = transport(&regs, CompletionMode::Synchronous);
        assert!(matches!(transport.invoke(0), Err(PvError::NotRegistered)));
        assert!(lock(&regs.writes).is_empty());

        let err = transport
            .call(&PvRequest::MemFree { id: 1 })
            .unwrap_err();
        assert!(matches!(err, PvError::NotRegistered));
        assert_eq!(transport.pool().free_slots(), 4);
    }

    #[test]
    fn invoke_writes_slot_index() {
        let regs = ScriptedRegs::default();
        let transport = transport(&regs, CompletionMode::Synchronous);
        transport.register_pool().unwrap();
        let reply = transport.call(&PvRequest::MemAlloc { size: 0x1000 }).unwrap();
        // Nothing answered the slot, so the opcode byte is still in word 0.
        assert_eq!(reply.status, 1);
        assert_eq!(lock(&regs.writes).last(), Some(&(mmio::INVOKE, 3)));
    }

    #[test]
    fn poll_ready_waits_for_zero_status() {
        let regs = ScriptedRegs::default();
        let transport = transport(
            &regs,
            CompletionMode::PollReady {
                timeout_us: 1_000_000,
            },
        );
        transport.register_pool().unwrap();
        lock(&regs.status).extend([1, 1, 0]);
        transport.invoke(2).unwrap();
        assert!(lock(&regs.status).len() == 1);
    }

    #[test]
    fn poll_ready_times_out_and_releases_slot() {
        let regs = ScriptedRegs::default();
        let transport = transport(&regs, CompletionMode::PollReady { timeout_us: 200 });
        transport.register_pool().unwrap();
        lock(&regs.status).push(1);

        let err = transport.call(&PvRequest::MemFree { id: 9 }).unwrap_err();
        assert!(matches!(err, PvError::CompletionTimeout { slot: 3, .. }));
        assert_eq!(transport.pool().free_slots(), 4);
    }

    #[test]
    fn encode_failure_releases_slot() {
        let regs = ScriptedRegs::default();
        let transport = transport(&regs, CompletionMode::Synchronous);
        transport.register_pool().unwrap();
        let err = transport
            .call(&PvRequest::UnmapBatch {
                pgt: 1,
                index: 0,
                count: 1,
            })
            .unwrap_err();
        assert!(matches!(err, PvError::Protocol(_)));
        assert_eq!(transport.pool().free_slots(), 4);
    }
}
