//! Typed requests and replies.
//!
//! Every request starts with its opcode in byte 0 followed by 32-bit arguments from word 1 on;
//! 64-bit PTE payloads sit at fixed doubleword indices chosen so they never overlap the argument
//! words. The agent answers in place: word 0 becomes the signed status and, for `mem_alloc`, word 1
//! the newly assigned object id.

use std::borrow::Cow;

use crate::error::{ProtocolError, Result};
use crate::slot::SlotBuf;
use crate::version::{ProtocolVersion, PvOp};

pub mod layout {
    //! Element indices inside a slot.

    pub const OPCODE_BYTE: usize = 0;
    pub const STATUS_WORD: usize = 0;
    /// Result word carrying the object id assigned by `mem_alloc`.
    pub const ALLOC_ID_WORD: usize = 1;

    pub const ARG0_WORD: usize = 1;
    pub const ARG1_WORD: usize = 2;
    pub const ARG2_WORD: usize = 3;
    pub const ARG3_WORD: usize = 4;

    pub const MAP_PTE_QWORD: usize = 2;
    pub const MAP_BATCH_PTE_QWORD: usize = 3;
    pub const MAP_SG_FIRST_PTE_QWORD: usize = 2;

    /// Entries carried by one `map_sg_batch` call.
    pub const SG_BATCH_MAX: usize = 128;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PvRequest<'a> {
    MemAlloc {
        size: u32,
    },
    MemFree {
        id: u32,
    },
    SetPgd {
        pgd: u32,
        channel: u32,
    },
    /// `pgt` ids of 0 mean "no table" for that half of the pair.
    MapPgt {
        pgd: u32,
        pgt: [u32; 2],
        index: u32,
    },
    Map {
        pgt: u32,
        index: u32,
        pte: u64,
    },
    /// The agent writes `pte`, `pte + next`, `pte + 2 * next`, ... into `count` entries.
    MapBatch {
        pgt: u32,
        index: u32,
        next: u32,
        count: u32,
        pte: u64,
    },
    MapSgBatch {
        pgt: u32,
        index: u32,
        ptes: Cow<'a, [u64]>,
    },
    UnmapBatch {
        pgt: u32,
        index: u32,
        count: u32,
    },
    VmFlush {
        pgd: u32,
        engine: u32,
    },
    BarWindowPgt {
        pgt: u32,
    },
}

impl PvRequest<'_> {
    pub fn op(&self) -> PvOp {
        match self {
            PvRequest::MemAlloc { .. } => PvOp::MemAlloc,
            PvRequest::MemFree { .. } => PvOp::MemFree,
            PvRequest::SetPgd { .. } => PvOp::SetPgd,
            PvRequest::MapPgt { .. } => PvOp::MapPgt,
            PvRequest::Map { .. } => PvOp::Map,
            PvRequest::MapBatch { .. } => PvOp::MapBatch,
            PvRequest::MapSgBatch { .. } => PvOp::MapSgBatch,
            PvRequest::UnmapBatch { .. } => PvOp::UnmapBatch,
            PvRequest::VmFlush { .. } => PvOp::VmFlush,
            PvRequest::BarWindowPgt { .. } => PvOp::BarWindowPgt,
        }
    }

    /// Bytes of the slot this request occupies.
    pub fn encoded_len(&self) -> usize {
        match self {
            PvRequest::MapSgBatch { ptes, .. } => sg_len(ptes.len()),
            _ => fixed_len(self.op()),
        }
    }

    /// Encode into `slot`, overwriting whatever the previous user left behind.
    pub fn encode(&self, version: ProtocolVersion, slot: &mut SlotBuf) -> Result<()> {
        let op = self.op();
        let opcode = version
            .opcode(op)
            .ok_or(ProtocolError::Unsupported { op, version })?;
        if let PvRequest::MapSgBatch { ptes, .. } = self {
            if ptes.len() > layout::SG_BATCH_MAX {
                return Err(ProtocolError::TooManyEntries {
                    count: ptes.len(),
                    max: layout::SG_BATCH_MAX,
                });
            }
        }
        let needed = self.encoded_len();
        if needed > slot.len() {
            return Err(ProtocolError::SlotTooSmall {
                op,
                needed,
                slot_size: slot.len(),
            });
        }

        slot.clear();
        slot.write_u8(layout::OPCODE_BYTE, opcode);
        match self {
            PvRequest::MemAlloc { size } => {
                slot.write_u32(layout::ARG0_WORD, *size);
            }
            PvRequest::MemFree { id } => {
                slot.write_u32(layout::ARG0_WORD, *id);
            }
            PvRequest::SetPgd { pgd, channel } => {
                slot.write_u32(layout::ARG0_WORD, *pgd);
                slot.write_u32(layout::ARG1_WORD, *channel);
            }
            PvRequest::MapPgt { pgd, pgt, index } => {
                slot.write_u32(layout::ARG0_WORD, *pgd);
                slot.write_u32(layout::ARG1_WORD, pgt[0]);
                slot.write_u32(layout::ARG2_WORD, pgt[1]);
                slot.write_u32(layout::ARG3_WORD, *index);
            }
            PvRequest::Map { pgt, index, pte } => {
                slot.write_u32(layout::ARG0_WORD, *pgt);
                slot.write_u32(layout::ARG1_WORD, *index);
                slot.write_u64(layout::MAP_PTE_QWORD, *pte);
            }
            PvRequest::MapBatch {
                pgt,
                index,
                next,
                count,
                pte,
            } => {
                slot.write_u32(layout::ARG0_WORD, *pgt);
                slot.write_u32(layout::ARG1_WORD, *index);
                slot.write_u32(layout::ARG2_WORD, *next);
                slot.write_u32(layout::ARG3_WORD, *count);
                slot.write_u64(layout::MAP_BATCH_PTE_QWORD, *pte);
            }
            PvRequest::MapSgBatch { pgt, index, ptes } => {
                slot.write_u32(layout::ARG0_WORD, *pgt);
                slot.write_u32(layout::ARG1_WORD, *index);
                slot.write_u32(layout::ARG2_WORD, ptes.len() as u32);
                for (i, pte) in ptes.iter().enumerate() {
                    slot.write_u64(layout::MAP_SG_FIRST_PTE_QWORD + i, *pte);
                }
            }
            PvRequest::UnmapBatch { pgt, index, count } => {
                slot.write_u32(layout::ARG0_WORD, *pgt);
                slot.write_u32(layout::ARG1_WORD, *index);
                slot.write_u32(layout::ARG2_WORD, *count);
            }
            PvRequest::VmFlush { pgd, engine } => {
                slot.write_u32(layout::ARG0_WORD, *pgd);
                slot.write_u32(layout::ARG1_WORD, *engine);
            }
            PvRequest::BarWindowPgt { pgt } => {
                slot.write_u32(layout::ARG0_WORD, *pgt);
            }
        }
        Ok(())
    }

    pub fn into_owned(self) -> PvRequest<'static> {
        match self {
            PvRequest::MapSgBatch { pgt, index, ptes } => PvRequest::MapSgBatch {
                pgt,
                index,
                ptes: Cow::Owned(ptes.into_owned()),
            },
            PvRequest::MemAlloc { size } => PvRequest::MemAlloc { size },
            PvRequest::MemFree { id } => PvRequest::MemFree { id },
            PvRequest::SetPgd { pgd, channel } => PvRequest::SetPgd { pgd, channel },
            PvRequest::MapPgt { pgd, pgt, index } => PvRequest::MapPgt { pgd, pgt, index },
            PvRequest::Map { pgt, index, pte } => PvRequest::Map { pgt, index, pte },
            PvRequest::MapBatch {
                pgt,
                index,
                next,
                count,
                pte,
            } => PvRequest::MapBatch {
                pgt,
                index,
                next,
                count,
                pte,
            },
            PvRequest::UnmapBatch { pgt, index, count } => {
                PvRequest::UnmapBatch { pgt, index, count }
            }
            PvRequest::VmFlush { pgd, engine } => PvRequest::VmFlush { pgd, engine },
            PvRequest::BarWindowPgt { pgt } => PvRequest::BarWindowPgt { pgt },
        }
    }
}

impl PvRequest<'static> {
    /// Agent-side decode of a slot written by [`PvRequest::encode`].
    pub fn decode(version: ProtocolVersion, slot: &SlotBuf) -> Result<Self> {
        if slot.is_empty() {
            return Err(ProtocolError::Truncated { needed: 1, len: 0 });
        }
        let opcode = slot.read_u8(layout::OPCODE_BYTE);
        let op = version
            .op_for_opcode(opcode)
            .ok_or(ProtocolError::UnknownOpcode(opcode))?;

        let fixed = fixed_len(op);
        if fixed > slot.len() {
            return Err(ProtocolError::Truncated {
                needed: fixed,
                len: slot.len(),
            });
        }

        let arg = |i: usize| slot.read_u32(layout::ARG0_WORD + i);
        let request = match op {
            PvOp::MemAlloc => PvRequest::MemAlloc { size: arg(0) },
            PvOp::MemFree => PvRequest::MemFree { id: arg(0) },
            PvOp::SetPgd => PvRequest::SetPgd {
                pgd: arg(0),
                channel: arg(1),
            },
            PvOp::MapPgt => PvRequest::MapPgt {
                pgd: arg(0),
                pgt: [arg(1), arg(2)],
                index: arg(3),
            },
            PvOp::Map => PvRequest::Map {
                pgt: arg(0),
                index: arg(1),
                pte: slot.read_u64(layout::MAP_PTE_QWORD),
            },
            PvOp::MapBatch => PvRequest::MapBatch {
                pgt: arg(0),
                index: arg(1),
                next: arg(2),
                count: arg(3),
                pte: slot.read_u64(layout::MAP_BATCH_PTE_QWORD),
            },
            PvOp::MapSgBatch => {
                let count = arg(2) as usize;
                if count > layout::SG_BATCH_MAX {
                    return Err(ProtocolError::TooManyEntries {
                        count,
                        max: layout::SG_BATCH_MAX,
                    });
                }
                let needed = sg_len(count);
                if needed > slot.len() {
                    return Err(ProtocolError::Truncated {
                        needed,
                        len: slot.len(),
                    });
                }
                let ptes = (0..count)
                    .map(|i| slot.read_u64(layout::MAP_SG_FIRST_PTE_QWORD + i))
                    .collect::<Vec<_>>();
                PvRequest::MapSgBatch {
                    pgt: arg(0),
                    index: arg(1),
                    ptes: Cow::Owned(ptes),
                }
            }
            PvOp::UnmapBatch => PvRequest::UnmapBatch {
                pgt: arg(0),
                index: arg(1),
                count: arg(2),
            },
            PvOp::VmFlush => PvRequest::VmFlush {
                pgd: arg(0),
                engine: arg(1),
            },
            PvOp::BarWindowPgt => PvRequest::BarWindowPgt { pgt: arg(0) },
        };
        Ok(request)
    }
}

fn fixed_len(op: PvOp) -> usize {
    match op {
        PvOp::MemAlloc | PvOp::MemFree | PvOp::BarWindowPgt => 8,
        PvOp::SetPgd | PvOp::VmFlush => 12,
        PvOp::UnmapBatch => 16,
        PvOp::MapSgBatch => sg_len(0),
        PvOp::MapPgt => 20,
        PvOp::Map => 8 * (layout::MAP_PTE_QWORD + 1),
        PvOp::MapBatch => 8 * (layout::MAP_BATCH_PTE_QWORD + 1),
    }
}

fn sg_len(count: usize) -> usize {
    8 * (layout::MAP_SG_FIRST_PTE_QWORD + count)
}

/// Agent answer, read back from the same slot after the call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PvReply {
    /// 0 on success; anything else is an agent-defined failure code.
    pub status: i32,
    /// Object id for `mem_alloc`; unspecified for other ops.
    pub value: u32,
}

impl PvReply {
    pub fn read_from(slot: &SlotBuf) -> Self {
        Self {
            status: slot.read_i32(layout::STATUS_WORD),
            value: slot.read_u32(layout::ALLOC_ID_WORD),
        }
    }

    pub fn write_to(&self, slot: &mut SlotBuf) {
        slot.write_i32(layout::STATUS_WORD, self.status);
        slot.write_u32(layout::ALLOC_ID_WORD, self.value);
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}
