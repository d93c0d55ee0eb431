//! Published charger-state word
//!
//! Downstream consumers (fuel gauge, health logging) read one packed word
//! describing the active charging path. The layout is a wire contract and
//! must stay bit-for-bit stable; inside the arbiter the named-field struct
//! is used and packing happens only at this boundary.

use crate::source::{ChargerDevice, PropertyKey, charge_status, charge_type};
use serde::{Deserialize, Serialize};

/// Flag bits carried in [`ChargerState::flags`].
pub mod flags {
    /// Charger power path is enabled
    pub const BUCK_EN: u8 = 1 << 0;
    /// Charge termination reached
    pub const DONE: u8 = 1 << 1;
    /// Constant-current phase
    pub const CC: u8 = 1 << 2;
    /// Constant-voltage phase
    pub const CV: u8 = 1 << 3;
    /// An input current limit is in force
    pub const ILIM: u8 = 1 << 4;
}

/// Aggregate charging-path state, packed for the published boundary.
///
/// Packed layout in the `u64`, least significant byte first:
/// byte 0 flags, byte 1 reserved (zero), byte 2 status code, byte 3 type
/// code, bytes 4-5 negotiated charge voltage in mV (little endian), bytes
/// 6-7 input current limit in mA (little endian).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargerState {
    /// Flag bits, see [`flags`]
    pub flags: u8,
    /// Charge status code, see [`crate::source::charge_status`]
    pub status: u8,
    /// Charge type code, see [`crate::source::charge_type`]
    pub chg_type: u8,
    /// Negotiated charge voltage in millivolts
    pub vchrg_mv: u16,
    /// Input current limit in milliamps
    pub icl_ma: u16,
}

impl ChargerState {
    /// Pack into the published wire word.
    pub fn pack(&self) -> u64 {
        u64::from(self.flags)
            | u64::from(self.status) << 16
            | u64::from(self.chg_type) << 24
            | u64::from(self.vchrg_mv) << 32
            | u64::from(self.icl_ma) << 48
    }

    /// Unpack a wire word. Reserved bits are dropped.
    pub fn unpack(v: u64) -> Self {
        Self {
            flags: (v & 0xff) as u8,
            status: ((v >> 16) & 0xff) as u8,
            chg_type: ((v >> 24) & 0xff) as u8,
            vchrg_mv: ((v >> 32) & 0xffff) as u16,
            icl_ma: ((v >> 48) & 0xffff) as u16,
        }
    }

    /// Synthesize flag bits from reported status and type codes.
    pub fn gen_flags(status: i32, chg_type: i32, icl_ma: u16) -> u8 {
        let mut out = 0u8;
        if status != charge_status::UNKNOWN && status != charge_status::DISCHARGING {
            out |= flags::BUCK_EN;
            if status == charge_status::FULL {
                out |= flags::DONE;
            }
            if chg_type == charge_type::FAST {
                out |= flags::CC;
            }
            if chg_type == charge_type::TAPER {
                out |= flags::CV;
            }
            if icl_ma > 0 {
                out |= flags::ILIM;
            }
        }
        out
    }
}

/// Assemble the published state from a device's reported properties.
///
/// A failing read degrades to the zeroed state rather than surfacing an
/// error; consumers treat all-zero as "nothing to report".
pub async fn read_charger_state(dev: &dyn ChargerDevice) -> ChargerState {
    let read = async {
        let status = dev.get_property(PropertyKey::Status).await?;
        let chg_type = dev.get_property(PropertyKey::ChargeType).await?;
        let vchrg_uv = dev.get_property(PropertyKey::VoltageMax).await.unwrap_or(0);
        let icl_ua = dev.get_property(PropertyKey::CurrentMax).await.unwrap_or(0);
        crate::error::Result::Ok((status, chg_type, vchrg_uv, icl_ua))
    };

    match read.await {
        Ok((status, chg_type, vchrg_uv, icl_ua)) => {
            let vchrg_mv = u16::try_from(vchrg_uv.max(0) / 1000).unwrap_or(u16::MAX);
            let icl_ma = u16::try_from(icl_ua.max(0) / 1000).unwrap_or(u16::MAX);
            ChargerState {
                flags: ChargerState::gen_flags(status, chg_type, icl_ma),
                status: status.clamp(0, 255) as u8,
                chg_type: chg_type.clamp(0, 255) as u8,
                vchrg_mv,
                icl_ma,
            }
        }
        Err(err) => {
            tracing::debug!(device = dev.name(), %err, "charger state read failed, reporting zeroes");
            ChargerState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_documented_layout() {
        let state = ChargerState {
            flags: flags::BUCK_EN | flags::CC,
            status: charge_status::CHARGING as u8,
            chg_type: charge_type::FAST as u8,
            vchrg_mv: 4400,
            icl_ma: 3000,
        };
        let v = state.pack();
        assert_eq!(v & 0xff, u64::from(flags::BUCK_EN | flags::CC));
        assert_eq!((v >> 8) & 0xff, 0, "reserved byte stays zero");
        assert_eq!((v >> 16) & 0xff, 1);
        assert_eq!((v >> 24) & 0xff, 3);
        assert_eq!((v >> 32) & 0xffff, 4400);
        assert_eq!((v >> 48) & 0xffff, 3000);
    }

    #[test]
    fn unpack_is_pack_inverse_modulo_reserved() {
        let v = 0x0BB8_1130_0403_55AAu64;
        let reparsed = ChargerState::unpack(v).pack();
        assert_eq!(reparsed, v & 0xFFFF_FFFF_FFFF_00FF);
    }

    #[test]
    fn flag_synthesis_follows_reported_codes() {
        let f = ChargerState::gen_flags(charge_status::CHARGING, charge_type::FAST, 500);
        assert_eq!(f, flags::BUCK_EN | flags::CC | flags::ILIM);

        let f = ChargerState::gen_flags(charge_status::FULL, charge_type::NONE, 0);
        assert_eq!(f, flags::BUCK_EN | flags::DONE);

        let f = ChargerState::gen_flags(charge_status::CHARGING, charge_type::TAPER, 0);
        assert_eq!(f, flags::BUCK_EN | flags::CV);

        assert_eq!(ChargerState::gen_flags(charge_status::DISCHARGING, charge_type::FAST, 500), 0);
        assert_eq!(ChargerState::gen_flags(charge_status::UNKNOWN, charge_type::FAST, 500), 0);
    }
}
