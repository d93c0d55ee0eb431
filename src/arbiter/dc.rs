//! Divider engine control
//!
//! Programming the engine limits, casting the charge-mode vote and walking
//! sources online and offline around a session.

use super::ArbiterState;
use super::types::DcState;
use crate::error::{HeliosError, Result};
use crate::registry::DEFAULT_INDEX;
use crate::selection::Selected;
use crate::source::PropertyKey;

impl super::ChargeArbiter {
    /// Program the engine, cast the mode vote, then bring the source online.
    /// A source must never go online before its limits are programmed and
    /// the vote is in.
    pub(crate) async fn dc_start(&self, st: &mut ArbiterState) -> Result<()> {
        let Selected::Dc(index) = st.selected else {
            return Err(HeliosError::validation(
                "selected",
                "no direct-charge source selected",
            ));
        };
        let device = st.registry.device(index)?;

        device
            .set_property(PropertyKey::ConstantChargeVoltageMax, st.demand.fv_uv)
            .await?;
        device
            .set_property(PropertyKey::ConstantChargeCurrentMax, st.demand.cc_max_ua)
            .await?;
        device
            .set_property(PropertyKey::CurrentMax, st.out_ua)
            .await?;

        self.vote.vote_dc(true).await?;
        st.registry.set_online(index).await?;

        self.logger.info(&format!(
            "engine started on source {}: fv={}uV cc={}uA limit={}uA",
            index, st.demand.fv_uv, st.demand.cc_max_ua, st.out_ua
        ));
        Ok(())
    }

    /// Unwind the engine and land in `final_state`. Re-entrant after a
    /// failed rung: the state records how far the ladder got, so a retry
    /// resumes instead of repeating completed rungs.
    pub(crate) async fn dc_stop(&self, st: &mut ArbiterState, final_state: DcState) -> Result<()> {
        match st.dc_state {
            DcState::Running | DcState::Passthrough => {
                self.vote.vote_dc(false).await?;
                st.dc_state = DcState::Enable;
                st.registry.set_online(DEFAULT_INDEX).await?;
            }
            DcState::Enable | DcState::EnablePassthrough => {
                st.registry.set_online(DEFAULT_INDEX).await?;
            }
            DcState::Disabled | DcState::Idle => {}
        }
        st.dc_state = final_state;
        Ok(())
    }

    /// First adapter request of a session: the divider engine runs from
    /// twice the battery voltage plus headroom, clamped to the adapter
    /// window and rounded down to the request granularity.
    pub(crate) async fn initial_operating_point(&self, st: &ArbiterState) -> (i32, i32) {
        let adapter = &self.config.adapter;

        let out_ua = if st.demand.cc_max_ua > 0 {
            st.demand.cc_max_ua.min(adapter.op_current_max_ua)
        } else {
            adapter.op_current_max_ua
        };

        let vbatt = match st.registry.get_default() {
            Ok(device) => device
                .get_property(PropertyKey::VoltageNow)
                .await
                .unwrap_or(0),
            Err(_) => 0,
        };
        // Fall back to the demanded float voltage when the fuel gauge read
        // fails; it overshoots slightly but stays inside the window.
        let vbatt = if vbatt > 0 { vbatt } else { st.demand.fv_uv.max(0) };

        let mut out_uv = 2 * vbatt + adapter.vbatt_headroom_uv;
        out_uv = out_uv.clamp(adapter.ta_vmin_uv, adapter.ta_vmax_uv);
        out_uv -= out_uv % adapter.voltage_step_uv;

        (out_uv, out_ua)
    }
}
