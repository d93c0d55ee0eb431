//! Shared types for the charge arbiter
//!
//! Lifecycle phase, the direct-charge session state machine and the
//! snapshot published to observers.

use serde::{Deserialize, Serialize};

/// Arbiter lifecycle phase.
#[derive(Debug, Clone, PartialEq)]
pub enum ArbiterPhase {
    /// Discovery is still resolving configured sources
    Initializing,
    /// Default source attached, property traffic is accepted
    Ready,
    /// Discovery failed terminally
    Failed(String),
    /// Shutdown requested
    ShuttingDown,
}

impl ArbiterPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed(_) => "failed",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Direct-charge session state machine.
///
/// The order is meaningful: `state > Idle` means a session exists in some
/// form, and the stop ladder walks states downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DcState {
    /// Direct charge is off for the remainder of the battery session
    Disabled,
    /// No session, selection may open one
    Idle,
    /// Fixed-contract path, reserved
    Enable,
    /// Fixed-contract path, reserved
    Running,
    /// Session opened, waiting for a source to finish negotiating
    EnablePassthrough,
    /// Engine owns the charging path, arbiter supervises
    Passthrough,
}

impl DcState {
    /// Stable external code, used by the debug surface and snapshots.
    pub fn code(self) -> i32 {
        match self {
            Self::Disabled => -1,
            Self::Idle => 0,
            Self::Enable => 1,
            Self::Running => 2,
            Self::EnablePassthrough => 3,
            Self::Passthrough => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Disabled),
            0 => Some(Self::Idle),
            1 => Some(Self::Enable),
            2 => Some(Self::Running),
            3 => Some(Self::EnablePassthrough),
            4 => Some(Self::Passthrough),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Idle => "idle",
            Self::Enable => "enable",
            Self::Running => "running",
            Self::EnablePassthrough => "enable_passthrough",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Point-in-time view of the arbiter, published after every task pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArbiterSnapshot {
    /// RFC 3339 timestamp of the snapshot
    pub timestamp: String,
    /// Build version
    pub version: String,
    /// Lifecycle phase name
    pub phase: String,
    /// Session state code, see [`DcState::code`]
    pub dc_state: i32,
    /// Selection index code: -1 finished, 0 default, >0 direct charge
    pub selected_index: i32,
    /// Name of the source currently online, if any
    pub active_source: Option<String>,
    /// Port of the leading negotiation, if any
    pub pps_port: Option<String>,
    /// Stage code of the leading negotiation
    pub pps_stage: i32,
    /// Requested charge current from the upstream policy, microamps
    pub demand_cc_ua: i32,
    /// Requested float voltage from the upstream policy, microvolts
    pub demand_fv_uv: i32,
    /// Adapter operating point, microvolts
    pub out_uv: i32,
    /// Adapter operating point, microamps
    pub out_ua: i32,
    /// Ramp-down requested by the upstream policy
    pub taper: bool,
    /// Identifier of the open session, if any
    pub session_id: Option<String>,
    /// RFC 3339 start time of the open session, if any
    pub session_started: Option<String>,
    /// Sessions opened since first boot
    pub session_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_state_codes_round_trip() {
        for state in [
            DcState::Disabled,
            DcState::Idle,
            DcState::Enable,
            DcState::Running,
            DcState::EnablePassthrough,
            DcState::Passthrough,
        ] {
            assert_eq!(DcState::from_code(state.code()), Some(state));
        }
        assert_eq!(DcState::from_code(5), None);
        assert_eq!(DcState::from_code(-2), None);
    }

    #[test]
    fn test_dc_state_ordering() {
        assert!(DcState::Disabled < DcState::Idle);
        assert!(DcState::Idle < DcState::EnablePassthrough);
        assert!(DcState::EnablePassthrough < DcState::Passthrough);
        assert!(DcState::Passthrough > DcState::Idle);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = ArbiterSnapshot {
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
            phase: "ready".to_string(),
            dc_state: 4,
            active_source: Some("main-charger".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"dc_state\":4"));
        assert!(json.contains("main-charger"));
        let back: ArbiterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phase, "ready");
        assert_eq!(back.session_count, 0);
    }
}
