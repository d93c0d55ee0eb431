//! Selection task
//!
//! Runs the selection policy over the current demand and battery voltage,
//! opens a direct-charge session when the policy picks the direct-charge
//! source, and signals the negotiation task to unwind one when the pick
//! moves away.

use tokio::time::{Duration, Instant};

use super::ArbiterState;
use super::types::DcState;
use crate::registry::DEFAULT_INDEX;
use crate::selection::{self, Choice, Selected};
use crate::source::PropertyKey;
use crate::storage::TAG_SESSION_COUNT;

impl super::ChargeArbiter {
    /// Evaluate the selection policy against live inputs.
    pub(crate) async fn current_choice(&self, st: &ArbiterState) -> Choice {
        let vbatt = if st.thresholds.voltage_configured() {
            match st.registry.get_default() {
                Ok(device) => device.get_property(PropertyKey::VoltageNow).await.ok(),
                Err(_) => None,
            }
        } else {
            None
        };

        selection::evaluate(
            &st.overrides,
            st.demand,
            vbatt,
            &st.thresholds,
            st.selected,
            st.dc_slot(),
            st.registry.len(),
        )
    }

    /// One pass of the selection task.
    pub(crate) async fn select_step(&self, st: &mut ArbiterState) {
        if !st.dc_ready {
            self.logger.debug("selection before discovery finished, skipped");
            return;
        }

        let timing = &self.config.timing;
        let mut dc_done = false;

        let choice = self.current_choice(st).await;
        let index = if st.taper {
            // Ramp-down in progress: the tail of the charge goes back to
            // the default path, and direct charge is finished for this
            // battery session.
            dc_done = true;
            DEFAULT_INDEX
        } else {
            match choice {
                Choice::Source(index) => index,
                Choice::RetryLater => {
                    self.logger.debug(&format!(
                        "selection not evaluable, retry in {}ms",
                        timing.select_retry_ms
                    ));
                    self.select_timer
                        .schedule_if_idle(Duration::from_millis(timing.select_retry_ms));
                    return;
                }
            }
        };

        let dc_ena = !st.taper
            && !st.bank.all_not_supported()
            && index != DEFAULT_INDEX
            && st.dc_slot() == Some(index);

        self.logger.debug(&format!(
            "select: index={} dc_ena={} dc_state={} selected={:?}",
            index,
            dc_ena,
            st.dc_state.as_str(),
            st.selected
        ));

        if !dc_ena {
            // The policy picked direct charge but no source can ever
            // negotiate; settle the question for this battery session.
            if index != DEFAULT_INDEX
                && st.dc_slot() == Some(index)
                && st.bank.all_not_supported()
                && st.dc_state == DcState::Idle
                && !st.taper
            {
                self.logger
                    .info("no programmable supply, direct charge off for this session");
                st.dc_state = DcState::Disabled;
            }

            if st.dc_state > DcState::Idle && st.selected.is_dc() {
                self.logger
                    .info(&format!("stop negotiation, was {:?}", st.selected));
                st.selected = if dc_done {
                    Selected::Done
                } else {
                    Selected::Default
                };
                self.pps_timer.schedule_now();
            }
        } else if st.dc_state == DcState::Disabled {
            self.logger.debug("direct charge disabled for this session");
        } else if st.dc_state == DcState::Idle {
            self.begin_session(st, index).await;
            self.pps_timer
                .schedule_in(Duration::from_millis(timing.enable_grace_ms));
        }
    }

    /// Open a direct-charge session: reset detection, compute the initial
    /// adapter operating point and arm the negotiation task.
    async fn begin_session(&self, st: &mut ArbiterState, index: usize) {
        st.bank.reset_all();

        let (out_uv, out_ua) = self.initial_operating_point(st).await;
        st.out_uv = out_uv;
        st.out_ua = out_ua;
        st.seed_bank();

        st.dc_state = DcState::EnablePassthrough;
        st.selected = Selected::Dc(index);
        st.wd_failures = 0;
        st.session_started_at = Some(Instant::now());
        st.session_started_utc = Some(chrono::Utc::now());
        st.session_id = Some(uuid::Uuid::new_v4());
        st.session_count += 1;
        self.persist_session_count(st.session_count).await;

        self.logger.info(&format!(
            "start negotiation for source {} at {}uV/{}uA, session {} (#{})",
            index,
            out_uv,
            out_ua,
            st.session_id.map(|id| id.to_string()).unwrap_or_default(),
            st.session_count
        ));
    }

    // Best-effort, a failed write only logs.
    async fn persist_session_count(&self, count: u64) {
        if let Err(e) = self
            .store
            .write_tag(TAG_SESSION_COUNT, &count.to_le_bytes())
            .await
        {
            self.logger
                .warn(&format!("session count not persisted: {}", e));
        }
    }
}
