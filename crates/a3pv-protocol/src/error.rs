use thiserror::Error;

use crate::version::{ProtocolVersion, PvOp};

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{op} is not part of protocol {version}")]
    Unsupported { op: PvOp, version: ProtocolVersion },

    #[error("{op} needs {needed} bytes but slots are only {slot_size} bytes")]
    SlotTooSmall {
        op: PvOp,
        needed: usize,
        slot_size: usize,
    },

    #[error("{count} entries exceed the per-call limit of {max}")]
    TooManyEntries { count: usize, max: usize },

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("slot holds {len} bytes but the request needs {needed}")]
    Truncated { needed: usize, len: usize },
}
