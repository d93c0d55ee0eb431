//! Negotiation task
//!
//! Walks programmable-supply detection for an open session, hands the
//! charging path over to the divider engine once a source goes active,
//! supervises the engine afterwards and unwinds everything when selection
//! drops direct charge.

use tokio::time::Duration;

use super::ArbiterState;
use super::types::DcState;
use crate::pps::{BankVerdict, PpsPort};
use crate::registry::DEFAULT_INDEX;
use crate::selection::{Choice, Selected};
use crate::source::PropertyKey;

impl super::ChargeArbiter {
    /// One pass of the negotiation task. Returns the delay before the next
    /// pass, `None` when the task has nothing further to do.
    pub(crate) async fn negotiate_step(&self, st: &mut ArbiterState) -> Option<Duration> {
        if !st.dc_ready {
            return None;
        }

        let timing = &self.config.timing;
        let error_retry = Duration::from_millis(timing.error_retry_ms);
        let elap = st.session_elapsed_s();

        // Selection dropped direct charge: unwind and park.
        if !st.selected.is_dc() {
            if st.dc_state <= DcState::Idle {
                self.logger.warn(&format!(
                    "spurious negotiation wakeup, elap={} dc_state={}",
                    elap,
                    st.dc_state.as_str()
                ));
                return None;
            }

            if let Err(e) = self.dc_stop(st, DcState::Disabled).await {
                self.logger
                    .error(&format!("teardown failed, retry, elap={}: {}", elap, e));
                return Some(error_retry);
            }
            st.bank.offline_all().await;

            // Done keeps the session machine parked in Disabled until the
            // next battery session; Default re-arms it right away.
            if st.selected == Selected::Default {
                st.dc_state = DcState::Idle;
            }
            self.logger.info(&format!(
                "negotiation wound down, elap={} dc_state={}",
                elap,
                st.dc_state.as_str()
            ));
            return None;
        }

        if st.dc_state == DcState::Passthrough {
            return self.supervise_passthrough(st, elap).await;
        }

        // Detection: step every installed negotiation until one goes active.
        match st.bank.step_all(timing).await {
            BankVerdict::Unsupported => {
                // Sticky verdict, no detection window will change it.
                self.logger
                    .error(&format!("no programmable supply, elap={}", elap));
                st.selected = Selected::Done;
                Some(Duration::ZERO)
            }
            BankVerdict::Lost => {
                if elap < timing.prog_timeout_s {
                    st.bank.reset_retryable();
                    st.seed_bank();
                    return Some(Duration::from_millis(timing.prog_retry_ms));
                }
                self.logger.error(&format!(
                    "detection window expired, elap={} dc_state={}",
                    elap,
                    st.dc_state.as_str()
                ));
                st.selected = Selected::Done;
                Some(error_retry)
            }
            BankVerdict::Detecting => {
                if elap < timing.active_timeout_s {
                    return Some(Duration::from_millis(timing.active_retry_ms));
                }
                self.logger.error(&format!(
                    "no source went active, elap={} dc_state={}",
                    elap,
                    st.dc_state.as_str()
                ));
                st.selected = Selected::Done;
                Some(error_retry)
            }
            BankVerdict::Active(port) => match st.dc_state {
                DcState::EnablePassthrough => self.handover(st, port, elap).await,
                DcState::Enable | DcState::Running => {
                    // Fixed-contract path, reserved.
                    self.logger.info(&format!(
                        "STEADY port={} dc_state={} out={}uV/{}uA",
                        port.as_str(),
                        st.dc_state.as_str(),
                        st.out_uv,
                        st.out_ua
                    ));
                    Some(Duration::from_millis(timing.keep_alive_ms))
                }
                other => {
                    self.logger.warn(&format!(
                        "active source in unexpected dc_state={}",
                        other.as_str()
                    ));
                    None
                }
            },
        }
    }

    /// Hand the charging path from the active source to the engine: take
    /// the current path offline, program and start the engine.
    async fn handover(&self, st: &mut ArbiterState, port: PpsPort, elap: u64) -> Option<Duration> {
        let timing = &self.config.timing;

        let res = match st.registry.get_active() {
            Some(index) => st.registry.offline(index).await,
            None => Ok(()),
        };
        let res = match res {
            Ok(()) => self.dc_start(st).await,
            err => err,
        };

        match res {
            Ok(()) => {
                st.dc_state = DcState::Passthrough;
                st.wd_failures = 0;
                self.logger.info(&format!(
                    "handover to {} complete, elap={} out={}uV/{}uA",
                    port.as_str(),
                    elap,
                    st.out_uv,
                    st.out_ua
                ));
                Some(Duration::from_millis(timing.enable_grace_ms))
            }
            Err(e) => {
                self.logger
                    .error(&format!("handover failed, elap={}: {}", elap, e));
                Some(Duration::from_millis(timing.error_retry_ms))
            }
        }
    }

    /// Steady-state supervision while the engine owns the path.
    async fn supervise_passthrough(&self, st: &mut ArbiterState, elap: u64) -> Option<Duration> {
        let timing = &self.config.timing;
        let error_retry = Duration::from_millis(timing.error_retry_ms);

        // The supply must stay in programmable mode for the engine to run.
        if !st.bank.selected_online().await {
            self.logger.error(&format!(
                "supply dropped out of programmable mode, elap={}",
                elap
            ));
            st.selected = Selected::Default;
            return Some(error_retry);
        }

        let active_device = match st.registry.get_active() {
            Some(index) => match st.registry.device(index) {
                Ok(device) => device,
                Err(e) => {
                    self.logger
                        .error(&format!("no active source in passthrough: {}", e));
                    return Some(error_retry);
                }
            },
            None => {
                self.logger
                    .error(&format!("no active source in passthrough, elap={}", elap));
                return Some(error_retry);
            }
        };

        // Demand or the battery voltage may have crossed a limit since the
        // session opened; let selection rule on it.
        let choice = self.current_choice(st).await;
        let still_ours = matches!(choice, Choice::Source(index) if st.selected == Selected::Dc(index));
        if !still_ours {
            self.select_timer.schedule_now();
        }

        // Watchdog: the engine halts unless the port index is re-written
        // within its timeout.
        let port_code = st.bank.selected().map(|p| p.code()).unwrap_or(0);
        match active_device
            .set_property(PropertyKey::ChargingEnabled, port_code)
            .await
        {
            Ok(()) => {
                st.wd_failures = 0;
                st.registry.ping(DEFAULT_INDEX).await;
                Some(Duration::from_millis(timing.run_interval_ms))
            }
            Err(e) if e.is_retryable() && st.wd_failures < timing.watchdog_retry_budget => {
                st.wd_failures += 1;
                self.logger.warn(&format!(
                    "watchdog write failed ({}/{}): {}",
                    st.wd_failures, timing.watchdog_retry_budget, e
                ));
                Some(error_retry)
            }
            Err(e) => {
                self.logger.error(&format!(
                    "watchdog failed, falling back to the default path: {}",
                    e
                ));
                match st.registry.set_online(DEFAULT_INDEX).await {
                    Ok(()) => {
                        // Unwind through the normal teardown on the next
                        // pass, with the default path already carrying.
                        st.selected = Selected::Default;
                        Some(Duration::ZERO)
                    }
                    Err(e) => {
                        self.logger
                            .error(&format!("cannot bring the default path online: {}", e));
                        Some(error_retry)
                    }
                }
            }
        }
    }
}
