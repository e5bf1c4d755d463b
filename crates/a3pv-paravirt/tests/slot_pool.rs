use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use a3pv_paravirt::{DmaRegion, SlotPool};
use a3pv_protocol::{SlotBuf, SlotGeometry};

fn pool(slot_count: u32) -> SlotPool {
    let geometry = SlotGeometry {
        slot_size: 0x100,
        slot_count,
    };
    SlotPool::new(DmaRegion::new_zeroed(0x10_0000, geometry.pool_bytes()), geometry).unwrap()
}

#[test]
fn concurrent_checkouts_never_share_a_slot() {
    const CAPACITY: u32 = 4;
    let pool = pool(CAPACITY);
    let owned = AtomicU64::new(0);
    let in_flight = AtomicU32::new(0);
    let peak = AtomicU32::new(0);

    thread::scope(|s| {
        for worker in 0..8u32 {
            let (pool, owned, in_flight, peak) = (&pool, &owned, &in_flight, &peak);
            s.spawn(move || {
                let mut buf = SlotBuf::new(0x100);
                for round in 0..200u32 {
                    let slot = pool.acquire();
                    let bit = 1u64 << slot.index();
                    assert_eq!(
                        owned.fetch_or(bit, Ordering::SeqCst) & bit,
                        0,
                        "slot {} handed out twice",
                        slot.index()
                    );
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);

                    // Exclusive ownership means the slot still holds what this caller wrote.
                    buf.write_u32(1, worker << 16 | round);
                    slot.store(&buf);
                    thread::yield_now();
                    slot.load(&mut buf);
                    assert_eq!(buf.read_u32(1), worker << 16 | round);

                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    owned.fetch_and(!bit, Ordering::SeqCst);
                }
            });
        }
    });

    assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
    assert_eq!(pool.free_slots(), CAPACITY);
    assert_eq!(pool.available_permits(), CAPACITY);
}

#[test]
fn acquire_blocks_until_a_slot_is_released() {
    let pool = pool(2);
    let first = pool.acquire();
    let second = pool.acquire();
    assert!(pool.try_acquire().is_none());

    let (tx, rx) = mpsc::channel();
    thread::scope(|s| {
        let pool = &pool;
        s.spawn(move || {
            let slot = pool.acquire();
            tx.send(slot.index()).unwrap();
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "third checkout must wait while both slots are in flight"
        );
        let freed = second.index();
        drop(second);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), freed);
    });

    assert_eq!(first.index(), 1);
    drop(first);
    assert_eq!(pool.free_slots(), 2);
}

#[test]
fn release_order_does_not_matter() {
    let pool = pool(64);
    let mut guards: Vec<_> = (0..64).map(|_| pool.acquire()).collect();
    assert_eq!(pool.free_slots(), 0);

    // Release every other slot first, then the rest.
    let odd: Vec<_> = guards
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(i, _)| i)
        .collect();
    for i in odd.into_iter().rev() {
        guards.remove(i);
    }
    assert_eq!(pool.free_slots(), 32);
    assert_eq!(pool.available_permits(), 32);
    drop(guards);
    assert_eq!(pool.free_slots(), 64);
}
