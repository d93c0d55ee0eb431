//! Debug and introspection surface
//!
//! Bench controls that bypass the normal transition guards. Meant for
//! bring-up and test benches, not production control.

use super::types::DcState;
use crate::error::{HeliosError, Result};
use crate::pps::PpsStage;

impl super::ChargeArbiter {
    /// Current selection as an index code: -1 finished, 0 default, >0
    /// direct charge.
    pub async fn debug_active_index(&self) -> i32 {
        self.state.lock().await.selected.index_code()
    }

    /// Pin selection to `index`; -1 returns control to the policy.
    pub async fn debug_force_active(&self, index: i32) -> Result<()> {
        let mut st = self.state.lock().await;
        if index == -1 {
            st.overrides.force_active = None;
        } else {
            let index = usize::try_from(index)
                .map_err(|_| HeliosError::out_of_range(format!("source index {index}")))?;
            if index >= st.registry.len() {
                return Err(HeliosError::out_of_range(format!("source index {index}")));
            }
            if !st.registry.slot(index).is_some_and(|s| s.is_attached()) {
                return Err(HeliosError::validation(
                    "force_active",
                    "source not discovered",
                ));
            }
            st.overrides.force_active = Some(index);
        }
        drop(st);
        self.select_timer.schedule_now();
        Ok(())
    }

    pub async fn debug_dc_state(&self) -> i32 {
        self.state.lock().await.dc_state.code()
    }

    /// Force the session state machine, bypassing transition guards.
    pub async fn debug_set_dc_state(&self, code: i32) -> Result<()> {
        let state = DcState::from_code(code)
            .ok_or_else(|| HeliosError::out_of_range(format!("dc_state code {code}")))?;
        let mut st = self.state.lock().await;
        st.dc_state = state;
        drop(st);
        self.select_timer.schedule_now();
        Ok(())
    }

    /// Stage of the leading negotiation, Disabled when none is running.
    pub async fn debug_pps_stage(&self) -> i32 {
        let st = self.state.lock().await;
        st.bank
            .selected()
            .and_then(|port| st.bank.stage(port))
            .unwrap_or(PpsStage::Disabled)
            .code()
    }

    /// Force the stage of the leading negotiation. NotSupported cannot be
    /// forced, it is a detection outcome.
    pub async fn debug_set_pps_stage(&self, code: i32) -> Result<()> {
        let stage = PpsStage::from_code(code)
            .filter(|s| *s != PpsStage::NotSupported)
            .ok_or_else(|| HeliosError::out_of_range(format!("pps stage code {code}")))?;
        let mut st = self.state.lock().await;
        let session = st
            .bank
            .selected_session_mut()
            .ok_or_else(|| HeliosError::not_found("no negotiation in progress"))?;
        session.set_stage(stage);
        drop(st);
        self.pps_timer.schedule_now();
        Ok(())
    }

    pub async fn debug_demand_limit(&self) -> i64 {
        self.state.lock().await.thresholds.demand_limit
    }

    /// Adjust the demand limit. Takes effect on the next demand update
    /// rather than immediately.
    pub async fn debug_set_demand_limit(&self, limit: i64) {
        let mut st = self.state.lock().await;
        if st.thresholds.demand_limit != limit {
            st.thresholds.demand_limit = limit;
            st.new_dc_limit = true;
        }
    }
}
