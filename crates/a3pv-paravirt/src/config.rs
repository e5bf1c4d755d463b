use a3pv_protocol::{ProtocolVersion, SlotGeometry, PV_MAX_SLOTS, PV_REG_BAR};
use serde::{Deserialize, Serialize};

use crate::error::{PvError, Result};

/// How the transport decides that the agent has finished with an invoked slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CompletionMode {
    /// The agent consumes the slot while the invoke register write is in progress; the write
    /// returning means the result is in the slot.
    #[default]
    Synchronous,
    /// After the invoke write, poll the status register until it reads zero. Gives up after
    /// `timeout_us` microseconds with [`PvError::CompletionTimeout`].
    PollReady { timeout_us: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PvConfig {
    pub version: ProtocolVersion,
    /// Overrides the revision's slot count (at most [`PV_MAX_SLOTS`]).
    pub slot_count: Option<u32>,
    /// PCI BAR holding the register block.
    pub register_bar: u8,
    pub completion: CompletionMode,
}

impl Default for PvConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::default(),
            slot_count: None,
            register_bar: PV_REG_BAR,
            completion: CompletionMode::Synchronous,
        }
    }
}

impl PvConfig {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON device config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn geometry(&self) -> SlotGeometry {
        let mut geometry = self.version.geometry();
        if let Some(count) = self.slot_count {
            geometry.slot_count = count;
        }
        geometry
    }

    pub fn validate(&self) -> Result<()> {
        let count = self.geometry().slot_count;
        if count == 0 || count > PV_MAX_SLOTS {
            return Err(PvError::InvalidConfig(format!(
                "slot_count must be in 1..={PV_MAX_SLOTS}, got {count}"
            )));
        }
        Ok(())
    }
}
