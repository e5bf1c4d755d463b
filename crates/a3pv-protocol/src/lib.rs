//! Wire ABI for the A3 paravirtual page-table channel.
//!
//! The guest driver cannot touch GPU page tables directly. Instead it encodes page-table
//! operations into fixed-size command slots inside a shared pool, announces the pool once through
//! a small register block, and then invokes individual slots by index. This crate holds the parts
//! of that contract that both sides must agree on bit-for-bit:
//! - the register block layout ([`regs`]),
//! - protocol revisions, their op-code tables and slot geometry ([`version`]),
//! - the slot byte buffer and its width-specific accessors ([`slot`]),
//! - page-table-entry encoding ([`pte`]), and
//! - typed request/reply encoding ([`request`]).
//!
//! Nothing in here performs I/O or locking; see `a3pv-paravirt` for the driver-side transport.
#![forbid(unsafe_code)]

pub mod error;
pub mod pte;
pub mod regs;
pub mod request;
pub mod slot;
pub mod version;

pub use error::{ProtocolError, Result};
pub use pte::{decode_pte, encode_pte, sg_target, DecodedPte, MemAccess};
pub use regs::{join_addr, mmio, split_addr, PV_POOL_MAGIC, PV_REG_BAR, PV_STATUS_OK};
pub use request::{layout, PvReply, PvRequest};
pub use slot::SlotBuf;
pub use version::{ProtocolVersion, PvOp, SlotGeometry, PV_MAX_SLOTS};
