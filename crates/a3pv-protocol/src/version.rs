//! Protocol revisions.
//!
//! The op-code numbering and the slot geometry changed between releases of the agent, so every
//! revision carries its own fixed table. Callers pick a revision once (via configuration) and all
//! encoding goes through [`ProtocolVersion::opcode`].

use core::fmt;

/// Upper bound on the slot count: the driver tracks free slots in a single 64-bit mask.
pub const PV_MAX_SLOTS: u32 = 64;

/// Page-table operations understood by the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PvOp {
    MemAlloc,
    MemFree,
    SetPgd,
    MapPgt,
    Map,
    MapBatch,
    MapSgBatch,
    UnmapBatch,
    VmFlush,
    BarWindowPgt,
}

impl PvOp {
    pub const ALL: [PvOp; 10] = [
        PvOp::MemAlloc,
        PvOp::MemFree,
        PvOp::SetPgd,
        PvOp::MapPgt,
        PvOp::Map,
        PvOp::MapBatch,
        PvOp::MapSgBatch,
        PvOp::UnmapBatch,
        PvOp::VmFlush,
        PvOp::BarWindowPgt,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            PvOp::MemAlloc => "mem_alloc",
            PvOp::MemFree => "mem_free",
            PvOp::SetPgd => "set_pgd",
            PvOp::MapPgt => "map_pgt",
            PvOp::Map => "map",
            PvOp::MapBatch => "map_batch",
            PvOp::MapSgBatch => "map_sg_batch",
            PvOp::UnmapBatch => "unmap_batch",
            PvOp::VmFlush => "vm_flush",
            PvOp::BarWindowPgt => "bar_window_pgt",
        }
    }
}

impl fmt::Display for PvOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size and count of the command slots in the shared pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotGeometry {
    pub slot_size: usize,
    pub slot_count: u32,
}

impl SlotGeometry {
    pub const fn pool_bytes(&self) -> usize {
        self.slot_size * self.slot_count as usize
    }

    /// Byte offset of slot `index` from the start of the pool.
    pub const fn slot_offset(&self, index: u32) -> usize {
        index as usize * self.slot_size
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ProtocolVersion {
    /// Early revision: 256-byte slots, single-entry mapping only.
    V1,
    /// Final revision: 4 KiB slots with batch map/unmap and scatter-gather mapping.
    #[default]
    V2,
}

const V1_OPCODES: &[(PvOp, u8)] = &[
    (PvOp::MemAlloc, 0x01),
    (PvOp::MemFree, 0x02),
    (PvOp::SetPgd, 0x03),
    (PvOp::MapPgt, 0x04),
    (PvOp::Map, 0x05),
    (PvOp::VmFlush, 0x06),
    (PvOp::BarWindowPgt, 0x07),
];

const V2_OPCODES: &[(PvOp, u8)] = &[
    (PvOp::MemAlloc, 0x01),
    (PvOp::MemFree, 0x02),
    (PvOp::SetPgd, 0x03),
    (PvOp::MapPgt, 0x04),
    (PvOp::Map, 0x05),
    (PvOp::MapBatch, 0x06),
    (PvOp::MapSgBatch, 0x07),
    (PvOp::UnmapBatch, 0x08),
    (PvOp::VmFlush, 0x09),
    (PvOp::BarWindowPgt, 0x0a),
];

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 2] = [ProtocolVersion::V1, ProtocolVersion::V2];

    pub const fn geometry(self) -> SlotGeometry {
        match self {
            ProtocolVersion::V1 => SlotGeometry {
                slot_size: 0x100,
                slot_count: PV_MAX_SLOTS,
            },
            ProtocolVersion::V2 => SlotGeometry {
                slot_size: 0x1000,
                slot_count: PV_MAX_SLOTS,
            },
        }
    }

    fn opcodes(self) -> &'static [(PvOp, u8)] {
        match self {
            ProtocolVersion::V1 => V1_OPCODES,
            ProtocolVersion::V2 => V2_OPCODES,
        }
    }

    pub fn opcode(self, op: PvOp) -> Option<u8> {
        self.opcodes()
            .iter()
            .find(|(candidate, _)| *candidate == op)
            .map(|&(_, code)| code)
    }

    pub fn op_for_opcode(self, code: u8) -> Option<PvOp> {
        self.opcodes()
            .iter()
            .find(|(_, candidate)| *candidate == code)
            .map(|&(op, _)| op)
    }

    pub fn supports(self, op: PvOp) -> bool {
        self.opcode(op).is_some()
    }

    /// Whether the revision has native batch map/unmap opcodes.
    pub fn has_batch_ops(self) -> bool {
        self.supports(PvOp::MapBatch)
            && self.supports(PvOp::MapSgBatch)
            && self.supports(PvOp::UnmapBatch)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("v1"),
            ProtocolVersion::V2 => f.write_str("v2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn opcode_tables_are_bijective() {
        for version in ProtocolVersion::ALL {
            let mut seen = HashSet::new();
            for op in PvOp::ALL {
                let Some(code) = version.opcode(op) else {
                    continue;
                };
                assert_ne!(code, 0, "{version}: {op} must not use opcode 0");
                assert!(seen.insert(code), "{version}: duplicate opcode {code:#x}");
                assert_eq!(version.op_for_opcode(code), Some(op));
            }
        }
    }

    #[test]
    fn only_final_revision_has_batch_ops() {
        assert!(!ProtocolVersion::V1.has_batch_ops());
        assert!(ProtocolVersion::V2.has_batch_ops());
        assert_eq!(ProtocolVersion::default(), ProtocolVersion::V2);
    }

    #[test]
    fn geometry_matches_revision() {
        let v1 = ProtocolVersion::V1.geometry();
        assert_eq!(v1.slot_size, 256);
        assert_eq!(v1.pool_bytes(), 256 * 64);

        let v2 = ProtocolVersion::V2.geometry();
        assert_eq!(v2.slot_size, 4096);
        assert_eq!(v2.slot_offset(3), 3 * 4096);
    }
}
