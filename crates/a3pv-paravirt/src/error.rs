use std::time::Duration;

use a3pv_protocol::{ProtocolError, PvOp};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PvError>;

#[derive(Debug, Error)]
pub enum PvError {
    #[error("out of memory allocating {len} bytes of slot storage")]
    ResourceExhausted { len: usize },

    #[error("device rejected para-virt bring-up: {reason}")]
    DeviceRejected { reason: String },

    /// The agent executed the call and reported a nonzero status. The code is agent-defined and
    /// passed through untouched.
    #[error("{op} failed on the agent with status {status}")]
    RemoteOperationFailed { op: PvOp, status: i32 },

    #[error("agent did not complete slot {slot} within {waited:?}")]
    CompletionTimeout { slot: u32, waited: Duration },

    #[error("slot invoked before the pool was registered with the agent")]
    NotRegistered,

    #[error("para-virt device has been taken down")]
    Detached,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl PvError {
    /// Raw agent status for [`PvError::RemoteOperationFailed`].
    pub fn status(&self) -> Option<i32> {
        match self {
            PvError::RemoteOperationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PvError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}
