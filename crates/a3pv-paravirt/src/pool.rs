//! Bounded pool of command slots.
//!
//! Checkout is two-stage: a counting admission gate blocks callers while every slot is in flight,
//! then a short critical section picks a slot from the free mask. The gate is the only place a
//! caller ever sleeps; the mask lock is held for a constant-time scan/update.
//!
//! Invariant: `gate permits == free mask population` whenever neither lock is held by a
//! checkout/checkin in progress.

#[cfg(all(feature = "loom", test))]
use loom::sync::{Condvar, Mutex, MutexGuard};
#[cfg(not(all(feature = "loom", test)))]
use std::sync::{Condvar, Mutex, MutexGuard};

use a3pv_protocol::{SlotBuf, SlotGeometry, PV_MAX_SLOTS, PV_POOL_MAGIC};

use crate::error::{PvError, Result};
use crate::platform::DmaRegion;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Counting semaphore sized to the slot count.
struct AdmissionGate {
    permits: Mutex<u32>,
    available: Condvar,
}

impl AdmissionGate {
    fn new(permits: u32) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    fn enter(&self) {
        let mut permits = lock(&self.permits);
        while *permits == 0 {
            permits = match self.available.wait(permits) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *permits -= 1;
    }

    fn try_enter(&self) -> bool {
        let mut permits = lock(&self.permits);
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    fn leave(&self) {
        *lock(&self.permits) += 1;
        self.available.notify_one();
    }

    fn permits(&self) -> u32 {
        *lock(&self.permits)
    }
}

fn all_free(count: u32) -> u64 {
    if count >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

pub struct SlotPool {
    storage: DmaRegion,
    geometry: SlotGeometry,
    /// Bit `i` set = slot `i` free.
    free: Mutex<u64>,
    gate: AdmissionGate,
}

impl SlotPool {
    /// Take ownership of `storage`, zero it and stamp the pool sentinel into its first word.
    pub fn new(storage: DmaRegion, geometry: SlotGeometry) -> Result<Self> {
        if geometry.slot_count == 0 || geometry.slot_count > PV_MAX_SLOTS {
            return Err(PvError::InvalidConfig(format!(
                "slot pool needs 1..={PV_MAX_SLOTS} slots, got {}",
                geometry.slot_count
            )));
        }
        if geometry.slot_size < 8 {
            return Err(PvError::InvalidConfig(format!(
                "slot size {} cannot hold a request header",
                geometry.slot_size
            )));
        }
        if storage.len() < geometry.pool_bytes() {
            return Err(PvError::ResourceExhausted {
                len: geometry.pool_bytes(),
            });
        }

        storage.fill(0);
        storage.write_u32(0, PV_POOL_MAGIC);

        Ok(Self {
            storage,
            geometry,
            free: Mutex::new(all_free(geometry.slot_count)),
            gate: AdmissionGate::new(geometry.slot_count),
        })
    }

    pub fn phys_addr(&self) -> u64 {
        self.storage.phys_addr()
    }

    pub fn geometry(&self) -> SlotGeometry {
        self.geometry
    }

    pub fn capacity(&self) -> u32 {
        self.geometry.slot_count
    }

    /// Check out a slot, blocking while all of them are in flight.
    ///
    /// The highest-numbered free slot is handed out first. The slot returns to the pool when the
    /// guard is dropped.
    pub fn acquire(&self) -> SlotGuard<'_> {
        self.gate.enter();
        self.take_free_slot()
    }

    /// Non-blocking [`SlotPool::acquire`].
    pub fn try_acquire(&self) -> Option<SlotGuard<'_>> {
        if !self.gate.try_enter() {
            return None;
        }
        Some(self.take_free_slot())
    }

    fn take_free_slot(&self) -> SlotGuard<'_> {
        let mut free = lock(&self.free);
        if *free == 0 {
            panic!("slot pool free mask is empty although the admission gate granted entry");
        }
        let index = u64::BITS - 1 - free.leading_zeros();
        *free &= !(1u64 << index);
        SlotGuard { pool: self, index }
    }

    fn release(&self, index: u32) {
        {
            let mut free = lock(&self.free);
            let bit = 1u64 << index;
            if *free & bit != 0 {
                panic!("slot {index} released while already free");
            }
            *free |= bit;
        }
        self.gate.leave();
    }

    /// Slot index for a byte offset into the pool.
    pub fn index_of(&self, offset: usize) -> u32 {
        (offset / self.geometry.slot_size) as u32
    }

    pub fn free_slots(&self) -> u32 {
        lock(&self.free).count_ones()
    }

    pub fn in_flight(&self) -> u32 {
        self.capacity() - self.free_slots()
    }

    /// Admission permits currently available; equals [`SlotPool::free_slots`] when idle.
    pub fn available_permits(&self) -> u32 {
        self.gate.permits()
    }
}

/// Exclusive ownership of one slot. Dropping the guard checks the slot back in.
pub struct SlotGuard<'a> {
    pool: &'a SlotPool,
    index: u32,
}

impl SlotGuard<'_> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn offset(&self) -> usize {
        self.pool.geometry.slot_offset(self.index)
    }

    /// Copy `buf` into the shared slot. `buf` must be exactly one slot long.
    pub fn store(&self, buf: &SlotBuf) {
        debug_assert_eq!(buf.len(), self.pool.geometry.slot_size);
        self.pool.storage.write(self.offset(), buf.as_bytes());
    }

    /// Copy the shared slot into `buf`.
    pub fn load(&self, buf: &mut SlotBuf) {
        debug_assert_eq!(buf.len(), self.pool.geometry.slot_size);
        self.pool.storage.read(self.offset(), buf.as_bytes_mut());
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        debug_assert_eq!(self.pool.index_of(self.offset()), self.index);
        self.pool.release(self.index);
    }
}
