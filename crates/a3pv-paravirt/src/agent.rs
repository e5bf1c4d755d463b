//! In-process model of the privileged agent and of the bring-up platform.
//!
//! [`SoftPlatform`] hands out DMA regions at synthetic physical addresses and maps a register
//! window that talks to a [`SoftAgent`]. The agent implements the register protocol (pool
//! registration, synchronous slot execution) over a small page-table model, logs every call and
//! can be told to fail specific calls, refuse registration, or stall.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use a3pv_protocol::pte::PTE_PRESENT;
use a3pv_protocol::{
    join_addr, mmio, ProtocolVersion, PvOp, PvReply, PvRequest, SlotBuf, PV_MAX_SLOTS,
    PV_POOL_MAGIC, PV_REG_BAR, PV_STATUS_OK,
};

use crate::platform::{DmaMemory, DmaRegion, PvPlatform, RegisterWindow};
use crate::sync::lock;

/// Failure codes the model agent reports in the status word.
pub mod status {
    /// Unknown object id.
    pub const ENOENT: i32 = -2;
    /// Malformed request.
    pub const EINVAL: i32 = -22;
}

/// Value the status register holds while the agent refuses a pool or is busy.
const STATUS_BUSY: u32 = 1;

const DMA_BASE: u64 = 0x1_0000_0000;
const DMA_ALIGN: u64 = 0x1000;

/// One executed slot, as seen by the agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentCall {
    pub slot: u32,
    pub op: PvOp,
    pub request: PvRequest<'static>,
    pub status: i32,
}

#[derive(Default)]
struct DmaBus {
    next: u64,
    regions: BTreeMap<u64, (usize, Weak<DmaMemory>)>,
}

impl DmaBus {
    fn alloc(&mut self, len: usize) -> DmaRegion {
        if self.next == 0 {
            self.next = DMA_BASE;
        }
        let phys = self.next;
        let span = (len as u64).max(1).div_ceil(DMA_ALIGN) * DMA_ALIGN;
        self.next += span;

        let region = DmaRegion::new_zeroed(phys, len);
        self.regions.retain(|_, (_, mem)| mem.strong_count() > 0);
        self.regions.insert(phys, (len, region.downgrade()));
        region
    }

    fn resolve(&self, phys: u64) -> Option<DmaRegion> {
        let (len, mem) = self.regions.get(&phys)?;
        DmaRegion::from_weak(phys, *len, mem)
    }

    fn live(&self) -> usize {
        self.regions
            .values()
            .filter(|(_, mem)| mem.strong_count() > 0)
            .count()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PgdState {
    channel: Option<u32>,
    tables: BTreeMap<u32, [u32; 2]>,
}

struct Fault {
    op: PvOp,
    remaining: u32,
    status: i32,
}

#[derive(Default)]
struct AgentState {
    latched_lo: u32,
    pool: Option<u64>,
    status: u32,
    stalled: bool,
    reject: bool,
    next_id: u32,
    objects: BTreeMap<u32, u32>,
    pgds: BTreeMap<u32, PgdState>,
    ptes: BTreeMap<u32, BTreeMap<u32, u64>>,
    bar_pgt: Option<u32>,
    flushes: Vec<(u32, u32)>,
    calls: Vec<AgentCall>,
    unlogged: bool,
    faults: Vec<Fault>,
}

impl AgentState {
    fn check(&self, id: u32) -> Result<(), i32> {
        if self.objects.contains_key(&id) {
            Ok(())
        } else {
            Err(status::ENOENT)
        }
    }

    fn injected_fault(&mut self, op: PvOp) -> Option<i32> {
        let mut hit = None;
        self.faults.retain_mut(|fault| {
            if fault.op != op || hit.is_some() {
                return true;
            }
            fault.remaining -= 1;
            if fault.remaining == 0 {
                hit = Some(fault.status);
                return false;
            }
            true
        });
        hit
    }

    fn set_pte(&mut self, pgt: u32, index: u32, pte: u64) {
        let table = self.ptes.entry(pgt).or_default();
        if pte & PTE_PRESENT == 0 {
            table.remove(&index);
        } else {
            table.insert(index, pte);
        }
    }

    /// Execute `request` against the model. Returns the reply value on success.
    fn execute(&mut self, request: &PvRequest<'_>) -> Result<u32, i32> {
        match request {
            PvRequest::MemAlloc { size } => {
                if *size == 0 {
                    return Err(status::EINVAL);
                }
                self.next_id += 1;
                let id = self.next_id;
                self.objects.insert(id, *size);
                Ok(id)
            }
            PvRequest::MemFree { id } => {
                self.objects.remove(id).ok_or(status::ENOENT)?;
                self.pgds.remove(id);
                self.ptes.remove(id);
                if self.bar_pgt == Some(*id) {
                    self.bar_pgt = None;
                }
                Ok(0)
            }
            PvRequest::SetPgd { pgd, channel } => {
                self.check(*pgd)?;
                self.pgds.entry(*pgd).or_default().channel = Some(*channel);
                Ok(0)
            }
            PvRequest::MapPgt { pgd, pgt, index } => {
                self.check(*pgd)?;
                for &table in pgt.iter().filter(|&&table| table != 0) {
                    self.check(table)?;
                }
                self.pgds.entry(*pgd).or_default().tables.insert(*index, *pgt);
                Ok(0)
            }
            PvRequest::Map { pgt, index, pte } => {
                self.check(*pgt)?;
                self.set_pte(*pgt, *index, *pte);
                Ok(0)
            }
            PvRequest::MapBatch {
                pgt,
                index,
                next,
                count,
                pte,
            } => {
                self.check(*pgt)?;
                for i in 0..*count {
                    let entry = pte.wrapping_add(u64::from(i) * u64::from(*next));
                    self.set_pte(*pgt, index.wrapping_add(i), entry);
                }
                Ok(0)
            }
            PvRequest::MapSgBatch { pgt, index, ptes } => {
                self.check(*pgt)?;
                for (i, &pte) in ptes.iter().enumerate() {
                    self.set_pte(*pgt, index.wrapping_add(i as u32), pte);
                }
                Ok(0)
            }
            PvRequest::UnmapBatch { pgt, index, count } => {
                self.check(*pgt)?;
                for i in 0..*count {
                    self.set_pte(*pgt, index.wrapping_add(i), 0);
                }
                Ok(0)
            }
            PvRequest::VmFlush { pgd, engine } => {
                self.check(*pgd)?;
                self.flushes.push((*pgd, *engine));
                Ok(0)
            }
            PvRequest::BarWindowPgt { pgt } => {
                self.check(*pgt)?;
                self.bar_pgt = Some(*pgt);
                Ok(0)
            }
        }
    }
}

pub struct SoftAgent {
    version: ProtocolVersion,
    bus: Mutex<DmaBus>,
    state: Mutex<AgentState>,
    windows: AtomicUsize,
}

impl SoftAgent {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            bus: Mutex::new(DmaBus::default()),
            state: Mutex::new(AgentState::default()),
            windows: AtomicUsize::new(0),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Allocate zeroed memory the agent can reach by physical address.
    pub fn alloc_dma(&self, len: usize) -> DmaRegion {
        lock(&self.bus).alloc(len)
    }

    /// DMA regions that still have a live handle somewhere.
    pub fn live_regions(&self) -> usize {
        lock(&self.bus).live()
    }

    pub fn read_reg(&self, offset: u32) -> u32 {
        let state = lock(&self.state);
        match offset {
            mmio::STATUS if state.stalled => STATUS_BUSY,
            mmio::STATUS => state.status,
            mmio::POOL_ADDR_LO => state.latched_lo,
            mmio::POOL_ADDR_HI => state.pool.map_or(0, |addr| (addr >> 32) as u32),
            _ => 0,
        }
    }

    pub fn write_reg(&self, offset: u32, value: u32) {
        match offset {
            mmio::POOL_ADDR_LO => lock(&self.state).latched_lo = value,
            mmio::POOL_ADDR_HI => self.register(value),
            mmio::INVOKE => self.invoke(value),
            _ => {}
        }
    }

    fn register(&self, hi: u32) {
        let mut state = lock(&self.state);
        let addr = join_addr(state.latched_lo, hi);
        match self.validate_pool(addr, state.reject) {
            Ok(()) => {
                state.pool = Some(addr);
                state.status = PV_STATUS_OK;
            }
            Err(reason) => {
                tracing::debug!(addr = format_args!("{addr:#x}"), reason, "refusing slot pool");
                state.pool = None;
                state.status = STATUS_BUSY;
            }
        }
    }

    fn validate_pool(&self, addr: u64, reject: bool) -> Result<(), &'static str> {
        if reject {
            return Err("registration disabled");
        }
        if addr % DMA_ALIGN != 0 {
            return Err("pool not page aligned");
        }
        let region = lock(&self.bus).resolve(addr).ok_or("unknown pool address")?;
        let slot_size = self.version.geometry().slot_size;
        if region.is_empty()
            || region.len() % slot_size != 0
            || region.len() > slot_size * PV_MAX_SLOTS as usize
        {
            return Err("pool size does not match slot geometry");
        }
        if region.read_u32(0) != PV_POOL_MAGIC {
            return Err("pool sentinel missing");
        }
        Ok(())
    }

    fn invoke(&self, slot: u32) {
        let mut state = lock(&self.state);
        if state.stalled {
            return;
        }
        let Some(pool) = state.pool.and_then(|addr| lock(&self.bus).resolve(addr)) else {
            tracing::debug!(slot, "invoke without a registered pool");
            return;
        };
        let slot_size = self.version.geometry().slot_size;
        let offset = slot as usize * slot_size;
        if offset + slot_size > pool.len() {
            tracing::debug!(slot, "invoke of a slot outside the pool");
            return;
        }

        let mut buf = SlotBuf::new(slot_size);
        pool.read(offset, buf.as_bytes_mut());

        let reply = match PvRequest::decode(self.version, &buf) {
            Ok(request) => {
                let op = request.op();
                let result = match state.injected_fault(op) {
                    Some(status) => Err(status),
                    None => state.execute(&request),
                };
                let reply = match result {
                    Ok(value) => PvReply { status: 0, value },
                    Err(status) => PvReply { status, value: 0 },
                };
                if !state.unlogged {
                    state.calls.push(AgentCall {
                        slot,
                        op,
                        request,
                        status: reply.status,
                    });
                }
                reply
            }
            Err(_) => PvReply {
                status: status::EINVAL,
                value: 0,
            },
        };

        reply.write_to(&mut buf);
        pool.write(offset, &buf.as_bytes()[..8]);
    }

    /// Make the `n`-th upcoming call of `op` (1-based) fail with `status`.
    pub fn fail_nth(&self, op: PvOp, n: u32, status: i32) {
        assert!(n > 0, "fail_nth counts calls from 1");
        lock(&self.state).faults.push(Fault {
            op,
            remaining: n,
            status,
        });
    }

    /// While stalled the status register reads busy and invokes are ignored.
    pub fn set_stalled(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
    }

    pub fn reject_registration(&self, reject: bool) {
        lock(&self.state).reject = reject;
    }

    pub fn registered_pool(&self) -> Option<u64> {
        lock(&self.state).pool
    }

    pub fn mapped_windows(&self) -> usize {
        self.windows.load(Ordering::Acquire)
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        lock(&self.state).calls.clone()
    }

    pub fn calls_of(&self, op: PvOp) -> Vec<AgentCall> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Turn the call log on or off (it is on by default).
    pub fn log_calls(&self, enabled: bool) {
        lock(&self.state).unlogged = !enabled;
    }

    /// Ids of the memory objects currently allocated.
    pub fn objects(&self) -> Vec<u32> {
        lock(&self.state).objects.keys().copied().collect()
    }

    pub fn pte(&self, pgt: u32, index: u32) -> Option<u64> {
        lock(&self.state).ptes.get(&pgt)?.get(&index).copied()
    }

    pub fn mapped_entries(&self, pgt: u32) -> usize {
        lock(&self.state).ptes.get(&pgt).map_or(0, BTreeMap::len)
    }

    pub fn pgd_channel(&self, pgd: u32) -> Option<u32> {
        lock(&self.state).pgds.get(&pgd)?.channel
    }

    pub fn pgd_tables(&self, pgd: u32, index: u32) -> Option<[u32; 2]> {
        lock(&self.state).pgds.get(&pgd)?.tables.get(&index).copied()
    }

    pub fn bar_window_pgt(&self) -> Option<u32> {
        lock(&self.state).bar_pgt
    }

    /// `(pgd, engine)` pairs in flush order.
    pub fn flushes(&self) -> Vec<(u32, u32)> {
        lock(&self.state).flushes.clone()
    }
}

/// Register window mapped by [`SoftPlatform`].
pub struct SoftAgentWindow {
    agent: Arc<SoftAgent>,
}

impl SoftAgentWindow {
    pub fn new(agent: Arc<SoftAgent>) -> Self {
        agent.windows.fetch_add(1, Ordering::AcqRel);
        Self { agent }
    }
}

impl Drop for SoftAgentWindow {
    fn drop(&mut self) {
        self.agent.windows.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RegisterWindow for SoftAgentWindow {
    fn read32(&mut self, offset: u32) -> u32 {
        self.agent.read_reg(offset)
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.agent.write_reg(offset, value);
    }
}

pub struct SoftPlatform {
    agent: Arc<SoftAgent>,
    fail_alloc: AtomicBool,
    fail_map: AtomicBool,
}

impl SoftPlatform {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            agent: Arc::new(SoftAgent::new(version)),
            fail_alloc: AtomicBool::new(false),
            fail_map: AtomicBool::new(false),
        }
    }

    pub fn agent(&self) -> &Arc<SoftAgent> {
        &self.agent
    }

    pub fn fail_alloc(&self, fail: bool) {
        self.fail_alloc.store(fail, Ordering::Release);
    }

    pub fn fail_map_registers(&self, fail: bool) {
        self.fail_map.store(fail, Ordering::Release);
    }
}

impl PvPlatform for SoftPlatform {
    fn alloc_dma(&self, len: usize) -> Option<DmaRegion> {
        if self.fail_alloc.load(Ordering::Acquire) {
            return None;
        }
        Some(self.agent.alloc_dma(len))
    }

    fn map_registers(&self, bar: u8) -> Option<Box<dyn RegisterWindow>> {
        if bar != PV_REG_BAR || self.fail_map.load(Ordering::Acquire) {
            return None;
        }
        Some(Box::new(SoftAgentWindow::new(Arc::clone(&self.agent))))
    }
}
