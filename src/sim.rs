//! Implements simulated chargers and collaborators for testing.
//!
//! The simulators speak the same trait surface as real devices, keep every
//! written property in a map, and let tests inject per-property failures or
//! programmable-supply behavior. They are exported so integration tests and
//! fuzz targets can drive the arbiter without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::error::{HeliosError, Result};
use crate::source::{ChargerDevice, DeviceCatalog, ModeVote, PropertyKey, SourceEvent};

#[derive(Default)]
struct SimState {
    props: HashMap<PropertyKey, i32>,
    fail_get: HashSet<PropertyKey>,
    fail_set: HashSet<PropertyKey>,
    fail_set_once: HashSet<PropertyKey>,
    writes: Vec<(PropertyKey, i32)>,
    pps_window: Option<(i32, i32)>,
    voltage_cap: Option<i32>,
    subscribers: Vec<mpsc::UnboundedSender<SourceEvent>>,
}

/// A simulated charger device.
///
/// Reads return what was last stored for a key; writes are recorded in
/// order. A configured PPS window makes the device publish its voltage and
/// current maximums once a caller raises `Online` to the programmable
/// level, mirroring how a real adapter answers a programmable-mode entry.
pub struct SimCharger {
    name: String,
    state: Mutex<SimState>,
}

impl SimCharger {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(SimState::default()),
        })
    }

    fn locked(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a property value directly, as if the hardware changed on its
    /// own. Does not count as a write.
    pub fn set_prop(&self, key: PropertyKey, value: i32) {
        self.locked().props.insert(key, value);
    }

    /// Peek a property value without going through the device trait.
    pub fn prop(&self, key: PropertyKey) -> Option<i32> {
        self.locked().props.get(&key).copied()
    }

    /// Make every `get_property` for `key` fail until cleared.
    pub fn fail_get(&self, key: PropertyKey) {
        self.locked().fail_get.insert(key);
    }

    /// Make every `set_property` for `key` fail until cleared.
    pub fn fail_set(&self, key: PropertyKey) {
        self.locked().fail_set.insert(key);
    }

    /// Make only the next `set_property` for `key` fail, then heal.
    pub fn fail_set_once(&self, key: PropertyKey) {
        self.locked().fail_set_once.insert(key);
    }

    pub fn clear_fail_get(&self, key: PropertyKey) {
        self.locked().fail_get.remove(&key);
    }

    pub fn clear_fail_set(&self, key: PropertyKey) {
        self.locked().fail_set.remove(&key);
    }

    /// Advertise a programmable window. After a caller writes the
    /// programmable online level the device reports these maximums.
    pub fn grant_pps_window(&self, max_uv: i32, max_ua: i32) {
        self.locked().pps_window = Some((max_uv, max_ua));
    }

    /// Cap the voltage the device reports back after a request, so the
    /// observed output stays below what was asked for.
    pub fn cap_voltage(&self, max_uv: i32) {
        self.locked().voltage_cap = Some(max_uv);
    }

    /// Ordered log of all writes accepted so far.
    pub fn writes(&self) -> Vec<(PropertyKey, i32)> {
        self.locked().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.locked().writes.len()
    }

    /// Notify subscribers that this source's published state changed.
    pub fn publish(&self) {
        let state = self.locked();
        for tx in &state.subscribers {
            let _ = tx.send(SourceEvent { name: self.name.clone() });
        }
    }
}

#[async_trait::async_trait]
impl ChargerDevice for SimCharger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_property(&self, key: PropertyKey) -> Result<i32> {
        let state = self.locked();
        if state.fail_get.contains(&key) {
            return Err(HeliosError::transient(format!(
                "{}: injected get failure for {key:?}",
                self.name
            )));
        }
        state.props.get(&key).copied().ok_or_else(|| {
            HeliosError::transient(format!("{}: no value for {key:?}", self.name))
        })
    }

    async fn set_property(&self, key: PropertyKey, value: i32) -> Result<()> {
        let mut state = self.locked();
        if state.fail_set_once.remove(&key) || state.fail_set.contains(&key) {
            return Err(HeliosError::transient(format!(
                "{}: injected set failure for {key:?}",
                self.name
            )));
        }
        state.writes.push((key, value));

        let stored = match key {
            PropertyKey::VoltageNow => {
                let cap = state.voltage_cap;
                cap.map_or(value, |cap| value.min(cap))
            }
            _ => value,
        };
        state.props.insert(key, stored);

        // Entering programmable mode surfaces the advertised window.
        if key == PropertyKey::Online && value >= 3 {
            if let Some((max_uv, max_ua)) = state.pps_window {
                state.props.insert(PropertyKey::VoltageMax, max_uv);
                state.props.insert(PropertyKey::CurrentMax, max_ua);
            }
        }
        Ok(())
    }

    fn subscribe_change(&self, notify: mpsc::UnboundedSender<SourceEvent>) {
        self.locked().subscribers.push(notify);
    }
}

/// A simulated device catalog. Devices registered here are found by name;
/// everything else reports `NotFound`, which exercises the discovery retry
/// path.
#[derive(Default)]
pub struct SimCatalog {
    devices: Mutex<HashMap<String, Arc<SimCharger>>>,
}

impl SimCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, device: Arc<SimCharger>) {
        let name = device.name().to_string();
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, device);
    }

    pub fn remove(&self, name: &str) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

#[async_trait::async_trait]
impl DeviceCatalog for SimCatalog {
    async fn lookup(&self, name: &str) -> Result<Arc<dyn ChargerDevice>> {
        let devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        devices
            .get(name)
            .map(|dev| dev.clone() as Arc<dyn ChargerDevice>)
            .ok_or_else(|| HeliosError::not_found(format!("no device '{name}'")))
    }
}

/// A simulated charger-mode vote sink that records every vote.
#[derive(Default)]
pub struct SimVote {
    votes: Mutex<Vec<bool>>,
    failing: AtomicBool,
}

impl SimVote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent votes fail until disabled again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<bool> {
        self.votes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last(&self) -> Option<bool> {
        self.votes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }
}

#[async_trait::async_trait]
impl ModeVote for SimVote {
    async fn vote_dc(&self, enable: bool) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HeliosError::transient("injected vote failure"));
        }
        self.votes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(enable);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_returns_properties() {
        let dev = SimCharger::new("sim");
        dev.set_property(PropertyKey::Online, 1).await.unwrap();
        assert_eq!(dev.get_property(PropertyKey::Online).await.unwrap(), 1);
        assert_eq!(dev.writes(), vec![(PropertyKey::Online, 1)]);
    }

    #[tokio::test]
    async fn injected_failures_are_per_key() {
        let dev = SimCharger::new("sim");
        dev.set_prop(PropertyKey::Status, 1);
        dev.fail_get(PropertyKey::VoltageNow);

        assert!(dev.get_property(PropertyKey::VoltageNow).await.is_err());
        assert_eq!(dev.get_property(PropertyKey::Status).await.unwrap(), 1);

        dev.clear_fail_get(PropertyKey::VoltageNow);
        dev.set_prop(PropertyKey::VoltageNow, 5);
        assert_eq!(dev.get_property(PropertyKey::VoltageNow).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn programmable_mode_reveals_window() {
        let dev = SimCharger::new("sim");
        dev.grant_pps_window(9_800_000, 5_000_000);
        assert!(dev.get_property(PropertyKey::VoltageMax).await.is_err());

        dev.set_property(PropertyKey::Online, 3).await.unwrap();
        assert_eq!(dev.get_property(PropertyKey::VoltageMax).await.unwrap(), 9_800_000);
        assert_eq!(dev.get_property(PropertyKey::CurrentMax).await.unwrap(), 5_000_000);
    }

    #[tokio::test]
    async fn voltage_cap_limits_observed_output() {
        let dev = SimCharger::new("sim");
        dev.cap_voltage(8_000_000);
        dev.set_property(PropertyKey::VoltageNow, 9_000_000).await.unwrap();
        assert_eq!(dev.get_property(PropertyKey::VoltageNow).await.unwrap(), 8_000_000);
    }

    #[tokio::test]
    async fn catalog_reports_missing_devices() {
        let catalog = SimCatalog::new();
        assert!(catalog.lookup("ghost").await.is_err());
        catalog.add(SimCharger::new("real"));
        assert!(catalog.lookup("real").await.is_ok());
    }

    #[tokio::test]
    async fn vote_history_is_recorded() {
        let vote = SimVote::new();
        vote.vote_dc(true).await.unwrap();
        vote.vote_dc(false).await.unwrap();
        assert_eq!(vote.history(), vec![true, false]);

        vote.set_failing(true);
        assert!(vote.vote_dc(true).await.is_err());
        assert_eq!(vote.last(), Some(false));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let dev = SimCharger::new("sim");
        let (tx, mut rx) = mpsc::unbounded_channel();
        dev.subscribe_change(tx);
        dev.publish();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "sim");
    }
}
