//! Driver-side core of the A3 paravirtual page-table channel.
//!
//! The guest GPU driver cannot program page tables itself. It hands page-table operations to the
//! privileged agent through a pool of fixed-size command slots:
//!
//! 1. [`PvDevice::init`] allocates the pool from the [`PvPlatform`], maps the agent's register
//!    block and registers the pool's physical address.
//! 2. Each operation on [`ParaVirt`] checks out a slot from the [`SlotPool`] (blocking while every
//!    slot is in flight), encodes its request, writes the slot index to the invoke register, and
//!    reads the status back from the same slot.
//! 3. [`PvMem`] handles own remote memory objects and free them with their last reference;
//!    [`PvVm`] layers the VM manager's map/unmap/flush requests on top.
//!
//! [`agent::SoftPlatform`] models the agent in-process for host-side tests.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod agent;
pub mod config;
pub mod device;
pub mod error;
pub mod mem;
pub mod ops;
pub mod platform;
pub mod pool;
mod sync;
pub mod transport;
pub mod vm;

pub use config::{CompletionMode, PvConfig};
pub use device::PvDevice;
pub use error::{PvError, Result};
pub use mem::PvMem;
pub use ops::ParaVirt;
pub use platform::{DmaRegion, MmioWindow, PvPlatform, RegisterWindow};
pub use pool::{SlotGuard, SlotPool};
pub use transport::HypercallTransport;
pub use vm::{PvVm, VmKind, VmaAttrs};
