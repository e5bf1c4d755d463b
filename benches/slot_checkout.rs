#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use a3pv::paravirt::agent::SoftPlatform;
#[cfg(not(target_arch = "wasm32"))]
use a3pv::paravirt::{DmaRegion, SlotPool};
#[cfg(not(target_arch = "wasm32"))]
use a3pv::protocol::SlotGeometry;
#[cfg(not(target_arch = "wasm32"))]
use a3pv::{ProtocolVersion, PvConfig, PvDevice};
#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("A3PV_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            .warm_up_time(Duration::from_millis(200))
            .measurement_time(Duration::from_secs(1))
            .sample_size(10),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(30),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_slot_checkout(c: &mut Criterion) {
    let geometry = ProtocolVersion::V2.geometry();
    let pool = SlotPool::new(DmaRegion::new_zeroed(0, geometry.pool_bytes()), geometry).unwrap();

    let mut group = c.benchmark_group("slot_checkout");
    group.throughput(Throughput::Elements(1));
    group.bench_function("uncontended", |b| {
        b.iter(|| {
            let slot = pool.acquire();
            black_box(slot.index())
        })
    });

    // Four threads hammering an eight-slot pool.
    let small = SlotGeometry {
        slot_size: geometry.slot_size,
        slot_count: 8,
    };
    let contended = SlotPool::new(DmaRegion::new_zeroed(0, small.pool_bytes()), small).unwrap();
    group.throughput(Throughput::Elements(4 * 256));
    group.bench_function("contended_4x256", |b| {
        b.iter(|| {
            std::thread::scope(|s| {
                for _ in 0..4 {
                    s.spawn(|| {
                        for _ in 0..256 {
                            let slot = contended.acquire();
                            black_box(slot.index());
                        }
                    });
                }
            })
        })
    });
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_round_trip(c: &mut Criterion) {
    let platform = SoftPlatform::new(ProtocolVersion::V2);
    platform.agent().log_calls(false);
    let device = PvDevice::init(&platform, &PvConfig::default()).unwrap();
    let pv = device.pv().unwrap();
    let pgt = pv.mem_alloc(0x10_0000).unwrap();
    let ptes: Vec<u64> = (0..512u64).map(|i| (i << 4) | 1).collect();

    let mut group = c.benchmark_group("round_trip");
    group.bench_function("map", |b| {
        b.iter(|| pv.map(pgt, black_box(7), 0x1001).unwrap())
    });
    group.throughput(Throughput::Elements(ptes.len() as u64));
    group.bench_function("map_sg_batch_512", |b| {
        b.iter(|| pv.map_sg_batch(pgt, 0, black_box(&ptes)).unwrap())
    });
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_slot_checkout, bench_round_trip
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
