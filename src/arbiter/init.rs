//! Start-up discovery
//!
//! Resolves the configured sources from the device catalog on a bounded
//! retry budget. The arbiter goes [`ArbiterPhase::Ready`] as soon as the
//! default source attaches; missing auxiliary sources only delay full
//! discovery, and when the budget runs out the arbiter starts degraded
//! without them. A missing default source is terminal.

use tokio::time::{Duration, sleep};

use super::ArbiterState;
use super::types::{ArbiterPhase, DcState};
use crate::pps::{PpsPort, PpsSession};
use crate::registry::DEFAULT_INDEX;
use crate::storage::TAG_SESSION_COUNT;

impl super::ChargeArbiter {
    /// Discovery task, run once at start.
    pub(crate) async fn run_init(&self) {
        let timing = &self.config.timing;
        sleep(Duration::from_millis(timing.init_delay_ms)).await;

        self.restore_session_count().await;

        let mut retries = timing.init_retries;
        loop {
            let mut st = self.state.lock().await;
            let resolved = self.discover_once(&mut st).await;

            let default_attached = st
                .registry
                .slot(DEFAULT_INDEX)
                .is_some_and(|s| s.is_attached());
            if default_attached && self.phase() == ArbiterPhase::Initializing {
                self.logger.info("default source attached, arbiter ready");
                self.phase.send_replace(ArbiterPhase::Ready);
            }

            if resolved {
                self.default_path_online(&mut st).await;
                st.dc_ready = true;
                // Demand captured while discovery ran gets its selection
                // pass now.
                self.select_timer.schedule_now();
                self.logger.info(&format!(
                    "discovery complete: {} sources, wired_pps={} wireless_pps={}",
                    st.registry.len(),
                    st.bank.session(PpsPort::Wired).is_some(),
                    st.bank.session(PpsPort::Wireless).is_some()
                ));
                self.publish_snapshot(&st);
                return;
            }

            drop(st);
            if retries == 0 {
                break;
            }
            retries -= 1;
            sleep(Duration::from_millis(timing.init_retry_ms)).await;
        }

        self.finish_degraded().await;
    }

    /// One discovery pass. Returns true once every configured source has
    /// been resolved.
    async fn discover_once(&self, st: &mut ArbiterState) -> bool {
        for index in 0..st.registry.len() {
            let name = match st.registry.slot(index) {
                Some(slot) if !slot.is_attached() => slot.name().to_string(),
                _ => continue,
            };
            match self.catalog.lookup(&name).await {
                Ok(device) => {
                    device.subscribe_change(self.events_tx.clone());
                    match st.registry.attach(index, device) {
                        Ok(()) => self
                            .logger
                            .info(&format!("discovered source {}: '{}'", index, name)),
                        Err(e) => self
                            .logger
                            .warn(&format!("cannot attach source '{}': {}", name, e)),
                    }
                }
                Err(e) => self
                    .logger
                    .debug(&format!("source '{}' not up yet: {}", name, e)),
            }
        }

        for (port, configured) in [
            (PpsPort::Wired, self.config.sources.wired_pps.clone()),
            (PpsPort::Wireless, self.config.sources.wireless_pps.clone()),
        ] {
            let Some(name) = configured else { continue };
            if st.bank.session(port).is_some() {
                continue;
            }
            match self.catalog.lookup(&name).await {
                Ok(device) => {
                    device.subscribe_change(self.events_tx.clone());
                    st.bank.install(port, PpsSession::new(&name, device));
                    self.logger.info(&format!(
                        "programmable supply on {} port: '{}'",
                        port.as_str(),
                        name
                    ));
                }
                Err(e) => self.logger.debug(&format!(
                    "{} programmable supply '{}' not up yet: {}",
                    port.as_str(),
                    name,
                    e
                )),
            }
        }

        let chargers_done = st.registry.all_attached();
        let wired_done = self.config.sources.wired_pps.is_none()
            || st.bank.session(PpsPort::Wired).is_some();
        let wireless_done = self.config.sources.wireless_pps.is_none()
            || st.bank.session(PpsPort::Wireless).is_some();
        chargers_done && wired_done && wireless_done
    }

    /// Retry budget exhausted. Start without the missing auxiliaries, or
    /// fail terminally when the default source itself never appeared.
    async fn finish_degraded(&self) {
        let mut st = self.state.lock().await;

        let default_attached = st
            .registry
            .slot(DEFAULT_INDEX)
            .is_some_and(|s| s.is_attached());
        if !default_attached {
            self.logger
                .error("default source never appeared, arbiter disabled");
            st.dc_state = DcState::Disabled;
            self.phase
                .send_replace(ArbiterPhase::Failed("default source not found".to_string()));
            self.publish_snapshot(&st);
            return;
        }

        for index in 0..st.registry.len() {
            if let Some(slot) = st.registry.slot(index)
                && !slot.is_attached()
            {
                self.logger.warn(&format!(
                    "source '{}' not discovered, continuing without it",
                    slot.name()
                ));
            }
        }
        for (port, configured) in [
            (PpsPort::Wired, self.config.sources.wired_pps.as_deref()),
            (
                PpsPort::Wireless,
                self.config.sources.wireless_pps.as_deref(),
            ),
        ] {
            if let Some(name) = configured
                && st.bank.session(port).is_none()
            {
                self.logger.warn(&format!(
                    "{} programmable supply '{}' not discovered",
                    port.as_str(),
                    name
                ));
            }
        }

        self.default_path_online(&mut st).await;
        st.dc_ready = true;
        self.select_timer.schedule_now();
        self.logger.info("discovery finished degraded");
        self.publish_snapshot(&st);
    }

    /// The default path carries from boot until a session takes over.
    async fn default_path_online(&self, st: &mut ArbiterState) {
        if st.registry.get_active().is_some() {
            return;
        }
        if let Err(e) = st.registry.set_online(DEFAULT_INDEX).await {
            self.logger
                .warn(&format!("cannot bring the default path online: {}", e));
        }
    }

    /// The per-boot counter starts at 0; first boot has no persisted tag.
    async fn restore_session_count(&self) {
        let mut buf = [0u8; 8];
        match self.store.read_tag(TAG_SESSION_COUNT, &mut buf).await {
            Ok(()) => {
                let count = u64::from_le_bytes(buf);
                self.state.lock().await.session_count = count;
                self.logger
                    .debug(&format!("restored session count {}", count));
            }
            Err(e) => self
                .logger
                .debug(&format!("no persisted session count: {}", e)),
        }
    }
}
