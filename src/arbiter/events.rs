//! Property bridge and source events
//!
//! The upstream charging policy talks to the arbiter as if it were a single
//! charger: demand keys are captured and re-run through selection, anything
//! else routes to whichever source is online. Change notifications from
//! tracked sources land here as well.

use super::ArbiterState;
use super::types::{ArbiterPhase, DcState};
use crate::error::{HeliosError, Result};
use crate::pps::PpsPort;
use crate::registry::DEFAULT_INDEX;
use crate::selection::{Demand, Selected};
use crate::source::{PropertyKey, UsbType};
use crate::status::read_charger_state;

impl super::ChargeArbiter {
    /// Fail fast until discovery attached the default source.
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        let phase = self.phase.borrow().clone();
        match phase {
            ArbiterPhase::Ready => Ok(()),
            ArbiterPhase::Initializing => {
                Err(HeliosError::not_ready("arbiter is still initializing"))
            }
            ArbiterPhase::Failed(msg) => Err(HeliosError::fatal(msg)),
            ArbiterPhase::ShuttingDown => Err(HeliosError::not_ready("arbiter is shutting down")),
        }
    }

    /// Property write from the upstream policy.
    ///
    /// Demand keys are stored and wake the selection task when they change;
    /// arbiter-internal keys stop here; everything else routes to the
    /// active source. Routing failures propagate to the caller.
    pub async fn set_property(&self, key: PropertyKey, value: i32) -> Result<()> {
        self.ensure_ready()?;

        let mut st = self.state.lock().await;
        let mut ta_check = false;
        let mut route = true;
        let mut routed_key = key;

        match key {
            PropertyKey::TaperControl => {
                let taper = value != 0;
                ta_check = taper != st.taper;
                st.taper = taper;
                route = false;
            }
            PropertyKey::ChargeDisable => {
                self.logger.info(&format!("ChargeDisable value={}", value));
                ta_check = true;
                if value != 0 {
                    self.reset_session_state(&mut st);
                }
            }
            PropertyKey::Online => ta_check = true,
            PropertyKey::VoltageMax => {
                // Legacy alias for the float voltage; routed under the
                // canonical key.
                routed_key = PropertyKey::ConstantChargeVoltageMax;
                ta_check = st.demand.fv_uv != value;
                st.demand.fv_uv = value;
            }
            PropertyKey::ConstantChargeVoltageMax => {
                ta_check = st.demand.fv_uv != value;
                st.demand.fv_uv = value;
            }
            PropertyKey::ConstantChargeCurrentMax => {
                ta_check = st.demand.cc_max_ua != value;
                st.demand.cc_max_ua = value;
            }
            _ => {}
        }

        // A debug change of the demand limit takes effect on the next
        // property write, whichever key it carries.
        if st.new_dc_limit {
            st.new_dc_limit = false;
            ta_check = true;
        }

        if st.dc_ready && ta_check {
            self.select_timer.schedule_now();
        }

        if !route {
            return Ok(());
        }

        let device = st
            .registry
            .get_active()
            .and_then(|index| st.registry.device(index).ok());
        match device {
            Some(device) => {
                if let Err(e) = device.set_property(routed_key, value).await {
                    self.logger.error(&format!(
                        "cannot route {:?} to '{}': {}",
                        routed_key,
                        device.name(),
                        e
                    ));
                    return Err(e);
                }
                Ok(())
            }
            None => {
                // Discovery can leave a window without an online source;
                // the demand is captured, the write itself has no target.
                self.logger
                    .warn(&format!("no active source for {:?}", routed_key));
                Ok(())
            }
        }
    }

    /// A disconnect clears per-session outcomes and re-arms direct charge
    /// for the next battery session. Detection verdicts are per-session,
    /// NotSupported included, so the bank resets here as well.
    fn reset_session_state(&self, st: &mut ArbiterState) {
        st.selected = Selected::Default;
        st.taper = false;
        st.demand = Demand::default();
        st.bank.reset_all();
        if st.dc_state == DcState::Disabled {
            st.dc_state = DcState::Idle;
        } else if st.dc_state > DcState::Idle {
            // An open session unwinds through the negotiation task.
            self.pps_timer.schedule_now();
        }
        st.session_started_at = None;
        st.session_started_utc = None;
        st.session_id = None;
    }

    /// Property read, routed to the active source.
    pub async fn get_property(&self, key: PropertyKey) -> Result<i32> {
        self.ensure_ready()?;
        let st = self.state.lock().await;
        let index = st
            .registry
            .get_active()
            .ok_or_else(|| HeliosError::not_found("no active source"))?;
        let device = st.registry.device(index)?;
        device.get_property(key).await
    }

    /// Packed charger state of the active source, layout per
    /// [`crate::status::ChargerState`].
    pub async fn charger_state(&self) -> Result<u64> {
        self.ensure_ready()?;
        let st = self.state.lock().await;
        let index = st
            .registry
            .get_active()
            .ok_or_else(|| HeliosError::not_found("no active source"))?;
        let device = st.registry.device(index)?;
        Ok(read_charger_state(device.as_ref()).await.pack())
    }

    /// Keys the upstream policy may write through the bridge.
    pub fn is_writable(key: PropertyKey) -> bool {
        matches!(
            key,
            PropertyKey::ConstantChargeCurrentMax
                | PropertyKey::VoltageMax
                | PropertyKey::ConstantChargeVoltageMax
                | PropertyKey::CurrentMax
                | PropertyKey::ChargeDisable
                | PropertyKey::TaperControl
        )
    }

    /// Read through to the supply leading the negotiation. Without one,
    /// connector-class reads answer Unknown and everything else reads 0.
    pub async fn pps_get_property(&self, key: PropertyKey) -> Result<i32> {
        self.ensure_ready()?;
        let st = self.state.lock().await;
        let session = st.bank.selected().and_then(|port| st.bank.session(port));
        match session {
            Some(session) => session.device().get_property(key).await,
            None => Ok(match key {
                PropertyKey::UsbType => UsbType::Unknown.as_raw(),
                _ => 0,
            }),
        }
    }

    /// Write through to the supply leading the negotiation.
    pub async fn pps_set_property(&self, key: PropertyKey, value: i32) -> Result<()> {
        self.ensure_ready()?;
        let st = self.state.lock().await;
        let session = st
            .bank
            .selected()
            .and_then(|port| st.bank.session(port))
            .ok_or_else(|| HeliosError::not_ready("no negotiation in progress"))?;
        session.device().set_property(key, value).await
    }

    /// Change notification from a tracked source.
    ///
    /// Events about the active or the default source re-run selection;
    /// events about a negotiating supply only tickle the negotiation task.
    /// Everything is dropped until some source is online.
    pub(crate) async fn handle_source_event(&self, name: &str) {
        let st = self.state.lock().await;
        let Some(active) = st.registry.get_active() else {
            return;
        };

        let is_active = st.registry.slot(active).is_some_and(|s| s.name() == name);
        let is_default = st
            .registry
            .slot(DEFAULT_INDEX)
            .is_some_and(|s| s.name() == name);
        let is_pps = PpsPort::ALL
            .iter()
            .any(|&port| st.bank.session(port).is_some_and(|s| s.name() == name));

        let check = if is_active {
            // Republish on behalf of the source observers actually watch.
            self.publish_snapshot(&st);
            true
        } else if is_default {
            true
        } else if is_pps {
            false
        } else {
            return;
        };
        let tickle = matches!(st.dc_state, DcState::Passthrough | DcState::Running);
        drop(st);

        if check {
            self.select_timer.schedule_now();
        }
        if tickle {
            self.pps_timer.schedule_now();
        }
    }
}
