//! Micro-bolus gating status decided once per cycle.

use serde::Serialize;

/// Outcome of the parity / IOB-threshold gate that runs before the
/// regular SMB enablement rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SmbStatus {
    /// An aftercare boost is running; SMB held back.
    AimiB30,
    /// Gate not applicable; the regular enablement rules decide.
    #[default]
    Oref,
    /// Odd target or zero max IOB.
    Blocked,
    /// IOB above the configured share of max IOB.
    IobTh,
    /// Even temp target below 100 mg/dL: full power.
    FullLoop,
    /// Even target: SMB forced on.
    Enforced,
}

impl SmbStatus {
    /// Whether the gate itself turns micro-boluses on.
    pub const fn forces_smb(self) -> bool {
        matches!(self, Self::FullLoop | Self::Enforced)
    }
}
