//! Pins the wire contract shared with the agent. Any change here is an ABI break.

use a3pv_protocol::{
    layout, mmio, ProtocolVersion, PvOp, PvReply, PvRequest, SlotBuf, PV_POOL_MAGIC, PV_REG_BAR,
};
use pretty_assertions::assert_eq;

#[test]
fn register_block() {
    assert_eq!(PV_REG_BAR, 4);
    assert_eq!(mmio::STATUS, 0x0);
    assert_eq!(mmio::POOL_ADDR_LO, 0x4);
    assert_eq!(mmio::POOL_ADDR_HI, 0x8);
    assert_eq!(mmio::INVOKE, 0xc);
    assert_eq!(PV_POOL_MAGIC, 0xdead_beef);
}

#[test]
fn v1_opcode_table() {
    let table: Vec<(PvOp, Option<u8>)> = PvOp::ALL
        .iter()
        .map(|&op| (op, ProtocolVersion::V1.opcode(op)))
        .collect();
    assert_eq!(
        table,
        vec![
            (PvOp::MemAlloc, Some(1)),
            (PvOp::MemFree, Some(2)),
            (PvOp::SetPgd, Some(3)),
            (PvOp::MapPgt, Some(4)),
            (PvOp::Map, Some(5)),
            (PvOp::MapBatch, None),
            (PvOp::MapSgBatch, None),
            (PvOp::UnmapBatch, None),
            (PvOp::VmFlush, Some(6)),
            (PvOp::BarWindowPgt, Some(7)),
        ]
    );
}

#[test]
fn v2_opcode_table() {
    let codes: Vec<u8> = PvOp::ALL
        .iter()
        .filter_map(|&op| ProtocolVersion::V2.opcode(op))
        .collect();
    assert_eq!(codes, (1..=10).collect::<Vec<u8>>());
}

#[test]
fn single_map_layout() {
    let mut slot = SlotBuf::new(ProtocolVersion::V1.geometry().slot_size);
    PvRequest::Map {
        pgt: 0xabcd,
        index: 0x1ff,
        pte: 0x0000_0070_0012_3401,
    }
    .encode(ProtocolVersion::V1, &mut slot)
    .unwrap();

    let bytes = slot.as_bytes();
    assert_eq!(&bytes[0..4], &[0x05, 0, 0, 0]);
    assert_eq!(&bytes[4..8], &0xabcdu32.to_le_bytes());
    assert_eq!(&bytes[8..12], &0x1ffu32.to_le_bytes());
    assert_eq!(&bytes[16..24], &0x0000_0070_0012_3401u64.to_le_bytes());
}

#[test]
fn every_fixed_request_fits_the_smallest_slot() {
    let requests = [
        PvRequest::MemAlloc { size: 0x1000 },
        PvRequest::MemFree { id: 1 },
        PvRequest::SetPgd { pgd: 1, channel: 2 },
        PvRequest::MapPgt {
            pgd: 1,
            pgt: [2, 3],
            index: 4,
        },
        PvRequest::Map {
            pgt: 1,
            index: 2,
            pte: 3,
        },
        PvRequest::MapBatch {
            pgt: 1,
            index: 2,
            next: 3,
            count: 4,
            pte: 5,
        },
        PvRequest::UnmapBatch {
            pgt: 1,
            index: 2,
            count: 3,
        },
        PvRequest::VmFlush { pgd: 1, engine: 5 },
        PvRequest::BarWindowPgt { pgt: 9 },
    ];
    for request in requests {
        assert!(request.encoded_len() <= ProtocolVersion::V1.geometry().slot_size);

        let mut slot = SlotBuf::new(ProtocolVersion::V2.geometry().slot_size);
        request.encode(ProtocolVersion::V2, &mut slot).unwrap();
        assert_eq!(PvRequest::decode(ProtocolVersion::V2, &slot).unwrap(), request);
    }
}

#[test]
fn full_sg_batch_fits_final_revision_slot() {
    let needed = 8 * (layout::MAP_SG_FIRST_PTE_QWORD + layout::SG_BATCH_MAX);
    assert!(needed <= ProtocolVersion::V2.geometry().slot_size);
}

#[test]
fn alloc_reply_layout() {
    let mut slot = SlotBuf::new(256);
    slot.write_i32(0, 0);
    slot.write_u32(1, 0x55);
    assert_eq!(
        PvReply::read_from(&slot),
        PvReply {
            status: 0,
            value: 0x55
        }
    );
}
