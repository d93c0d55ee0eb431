//! Charging source collaborator interfaces
//!
//! The arbiter never touches hardware directly. Every charger and every
//! programmable power source is reached through the [`ChargerDevice`] trait,
//! discovery goes through a [`DeviceCatalog`], and the direct-charge
//! conversion hardware is enabled through a [`ModeVote`] handle. Production
//! wires these to the platform power-supply layer; tests and bring-up use the
//! [`crate::sim`] implementations.

use crate::error::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Numeric properties a charging source publishes or accepts.
///
/// The vocabulary mirrors a power-supply class device: values are plain
/// integers, voltages in microvolts, currents in microamps unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Attach/contract level, see [`OnlineLevel`]; plain chargers use 0/1
    Online,
    /// Physical presence
    Present,
    /// Charge status code, see [`charge_status`]
    Status,
    /// Charge type code, see [`charge_type`]
    ChargeType,
    /// Measured voltage; on a programmable source a write is the request
    /// register and a read is the observed output
    VoltageNow,
    /// Advertised maximum voltage; on a charger the negotiated charge voltage
    VoltageMax,
    /// Measured current; request/observed pair on a programmable source
    CurrentNow,
    /// Advertised maximum current; on a charger the input current limit
    CurrentMax,
    /// Charge-current ceiling programmed into a charger
    ConstantChargeCurrentMax,
    /// Float-voltage ceiling programmed into a charger
    ConstantChargeVoltageMax,
    /// Non-zero enables charging; the passthrough watchdog re-writes the
    /// active programmable-source index here
    ChargingEnabled,
    /// Connector class self-report, see [`UsbType`]
    UsbType,
    /// Upstream policy signal that charging is tapering
    TaperControl,
    /// Upstream policy signal that charging is administratively off
    ChargeDisable,
}

/// Attach/contract level published through [`PropertyKey::Online`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OnlineLevel {
    /// Nothing attached
    Offline,
    /// Attached, default profile only
    Raw,
    /// Fixed contract negotiated
    Negotiated,
    /// Programmable contract granted; requests are honored
    Programmable,
}

impl OnlineLevel {
    /// Decode a published online value. Values above the known range read as
    /// programmable, negatives as offline.
    pub fn from_raw(value: i32) -> Self {
        match value {
            i32::MIN..=0 => OnlineLevel::Offline,
            1 => OnlineLevel::Raw,
            2 => OnlineLevel::Negotiated,
            _ => OnlineLevel::Programmable,
        }
    }

    /// Encode for a property write.
    pub fn as_raw(self) -> i32 {
        match self {
            OnlineLevel::Offline => 0,
            OnlineLevel::Raw => 1,
            OnlineLevel::Negotiated => 2,
            OnlineLevel::Programmable => 3,
        }
    }
}

/// Connector class self-report published through [`PropertyKey::UsbType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbType {
    /// Not yet known; detection keeps polling
    Unknown,
    /// Power-delivery source without a programmable profile
    Pd,
    /// Power-delivery source with a programmable profile
    PdPps,
}

impl UsbType {
    /// Decode a published connector class value.
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => UsbType::Pd,
            2 => UsbType::PdPps,
            _ => UsbType::Unknown,
        }
    }

    /// Encode for a property write.
    pub fn as_raw(self) -> i32 {
        match self {
            UsbType::Unknown => 0,
            UsbType::Pd => 1,
            UsbType::PdPps => 2,
        }
    }
}

/// Charge status codes published through [`PropertyKey::Status`].
pub mod charge_status {
    pub const UNKNOWN: i32 = 0;
    pub const CHARGING: i32 = 1;
    pub const DISCHARGING: i32 = 2;
    pub const NOT_CHARGING: i32 = 3;
    pub const FULL: i32 = 4;
}

/// Charge type codes published through [`PropertyKey::ChargeType`].
pub mod charge_type {
    pub const UNKNOWN: i32 = 0;
    pub const NONE: i32 = 1;
    pub const TRICKLE: i32 = 2;
    pub const FAST: i32 = 3;
    pub const TAPER: i32 = 4;
}

/// Change notification sent by a device to its subscribers.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    /// Published name of the device whose state changed
    pub name: String,
}

/// One charging source or programmable power source.
///
/// Calls are expected to return promptly or fail; nothing in the arbiter
/// tolerates a hanging collaborator. Implementations are shared behind an
/// `Arc` and must be internally synchronized.
#[async_trait::async_trait]
pub trait ChargerDevice: Send + Sync {
    /// Published device name
    fn name(&self) -> &str;

    /// Read one numeric property
    async fn get_property(&self, key: PropertyKey) -> Result<i32>;

    /// Write one numeric property
    async fn set_property(&self, key: PropertyKey, value: i32) -> Result<()>;

    /// Register a change-notification sender; the device sends its name on
    /// every published state change
    fn subscribe_change(&self, notify: mpsc::UnboundedSender<SourceEvent>);
}

/// Device discovery used by the start-up task.
///
/// Lookups fail with `NotFound` while a device has not appeared yet; start-up
/// retries on a bounded budget.
#[async_trait::async_trait]
pub trait DeviceCatalog: Send + Sync {
    /// Resolve a device by its published name
    async fn lookup(&self, name: &str) -> Result<Arc<dyn ChargerDevice>>;
}

/// Vote handle for the platform charger-mode election.
#[async_trait::async_trait]
pub trait ModeVote: Send + Sync {
    /// Cast or clear this arbiter's vote for direct-charge conversion
    /// hardware
    async fn vote_dc(&self, enable: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_level_round_trip() {
        for level in [
            OnlineLevel::Offline,
            OnlineLevel::Raw,
            OnlineLevel::Negotiated,
            OnlineLevel::Programmable,
        ] {
            assert_eq!(OnlineLevel::from_raw(level.as_raw()), level);
        }
    }

    #[test]
    fn online_level_saturates() {
        assert_eq!(OnlineLevel::from_raw(-5), OnlineLevel::Offline);
        assert_eq!(OnlineLevel::from_raw(17), OnlineLevel::Programmable);
    }

    #[test]
    fn usb_type_decodes() {
        assert_eq!(UsbType::from_raw(0), UsbType::Unknown);
        assert_eq!(UsbType::from_raw(1), UsbType::Pd);
        assert_eq!(UsbType::from_raw(2), UsbType::PdPps);
        assert_eq!(UsbType::from_raw(99), UsbType::Unknown);
    }
}
