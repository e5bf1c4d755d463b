use std::fmt;
use std::sync::Arc;

use crate::config::PvConfig;
use crate::error::{PvError, Result};
use crate::mem::PvMem;
use crate::ops::ParaVirt;
use crate::platform::PvPlatform;
use crate::pool::SlotPool;
use crate::transport::HypercallTransport;
use crate::vm::{PvVm, VmKind};

/// Para-virt state of one attached GPU.
///
/// Created by [`PvDevice::init`] during attach and torn down by [`PvDevice::takedown`] (or drop)
/// during detach. Memory handles and VMs created through the device hold their own reference to
/// the channel, so they stay usable until they are dropped even if the device detaches first.
pub struct PvDevice {
    inner: Option<Arc<ParaVirt>>,
}

impl PvDevice {
    /// Allocate the slot pool, map the register window and register the pool with the agent.
    pub fn init(platform: &dyn PvPlatform, config: &PvConfig) -> Result<Self> {
        config.validate()?;
        let geometry = config.geometry();

        let storage = platform
            .alloc_dma(geometry.pool_bytes())
            .ok_or(PvError::ResourceExhausted {
                len: geometry.pool_bytes(),
            })?;
        let pool = SlotPool::new(storage, geometry)?;

        let regs = platform
            .map_registers(config.register_bar)
            .ok_or_else(|| PvError::DeviceRejected {
                reason: format!("register window in BAR {} unavailable", config.register_bar),
            })?;

        let transport = HypercallTransport::new(pool, regs, config.version, config.completion);
        transport.register_pool()?;

        tracing::info!(
            pool = format_args!("{:#x}", transport.pool().phys_addr()),
            slots = geometry.slot_count,
            slot_size = geometry.slot_size,
            version = %config.version,
            "para-virt channel up"
        );
        Ok(Self {
            inner: Some(Arc::new(ParaVirt::new(transport))),
        })
    }

    /// Release the device's reference on the channel. Safe to call more than once.
    pub fn takedown(&mut self) {
        if let Some(pv) = self.inner.take() {
            tracing::info!(
                outstanding = Arc::strong_count(&pv) - 1,
                "para-virt channel down"
            );
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    pub fn pv(&self) -> Result<&Arc<ParaVirt>> {
        self.inner.as_ref().ok_or(PvError::Detached)
    }

    pub fn alloc(&self, size: u32) -> Result<PvMem> {
        PvMem::allocate(self.pv()?, size)
    }

    pub fn new_vm(&self, kind: VmKind) -> Result<PvVm> {
        Ok(PvVm::new(Arc::clone(self.pv()?), kind))
    }
}

impl Drop for PvDevice {
    fn drop(&mut self) {
        self.takedown();
    }
}

impl fmt::Debug for PvDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PvDevice")
            .field("initialised", &self.inner.is_some())
            .finish_non_exhaustive()
    }
}
