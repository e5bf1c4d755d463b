//! A3 paravirtual GPU page-table channel.
//!
//! Re-exports the wire ABI ([`protocol`]) and the driver-side core ([`paravirt`]) under one name.

pub use a3pv_paravirt as paravirt;
pub use a3pv_protocol as protocol;

pub use a3pv_paravirt::{
    CompletionMode, ParaVirt, PvConfig, PvDevice, PvError, PvMem, PvPlatform, PvVm, VmKind,
    VmaAttrs,
};
pub use a3pv_protocol::{MemAccess, ProtocolVersion, PvOp};
