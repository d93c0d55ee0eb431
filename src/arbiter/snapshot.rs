//! Snapshot publishing
//!
//! Observers get a typed view over a watch channel and a JSON line per
//! publish over a broadcast channel, suitable for streaming.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::ArbiterState;
use super::types::ArbiterSnapshot;
use crate::pps::PpsStage;

impl super::ChargeArbiter {
    /// Typed snapshots; the receiver always holds the latest one.
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<ArbiterSnapshot>> {
        self.snapshot_rx.clone()
    }

    /// JSON status lines, one per published snapshot. Slow consumers drop
    /// lines rather than pushing back on the arbiter.
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status_tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<ArbiterSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub(crate) fn build_snapshot(&self, st: &ArbiterState) -> ArbiterSnapshot {
        let active_source = st
            .registry
            .get_active()
            .and_then(|index| st.registry.slot(index))
            .map(|slot| slot.name().to_string());
        let pps_port = st.bank.selected().map(|port| port.as_str().to_string());
        let pps_stage = st
            .bank
            .selected()
            .and_then(|port| st.bank.stage(port))
            .unwrap_or(PpsStage::Disabled)
            .code();

        ArbiterSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: env!("APP_VERSION").to_string(),
            phase: self.phase().as_str().to_string(),
            dc_state: st.dc_state.code(),
            selected_index: st.selected.index_code(),
            active_source,
            pps_port,
            pps_stage,
            demand_cc_ua: st.demand.cc_max_ua,
            demand_fv_uv: st.demand.fv_uv,
            out_uv: st.out_uv,
            out_ua: st.out_ua,
            taper: st.taper,
            session_id: st.session_id.map(|id| id.to_string()),
            session_started: st.session_started_utc.map(|t| t.to_rfc3339()),
            session_count: st.session_count,
        }
    }

    /// Publish the current state to both observer channels. Send errors
    /// only mean nobody is listening.
    pub(crate) fn publish_snapshot(&self, st: &ArbiterState) {
        let snapshot = self.build_snapshot(st);
        if let Ok(line) = serde_json::to_string(&snapshot) {
            let _ = self.status_tx.send(line);
        }
        let _ = self.snapshot_tx.send(Arc::new(snapshot));
    }
}
