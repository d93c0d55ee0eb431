//! Charging source registry
//!
//! Tracks the fixed set of charger slots from the configuration, which of
//! them have been discovered, and which one currently owns the electrical
//! path. At most one source is ever online; switching ownership happens
//! only through [`SourceRegistry::set_online`].

use std::sync::Arc;

use crate::config::SourcesConfig;
use crate::error::{HeliosError, Result};
use crate::source::{ChargerDevice, PropertyKey};

/// Index of the default wired charger. Always present, never DC capable.
pub const DEFAULT_INDEX: usize = 0;

/// One configured charger slot. The device handle stays empty until
/// discovery succeeds for it.
pub struct SourceSlot {
    name: String,
    dc_capable: bool,
    device: Option<Arc<dyn ChargerDevice>>,
}

impl SourceSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dc_capable(&self) -> bool {
        self.dc_capable
    }

    pub fn is_attached(&self) -> bool {
        self.device.is_some()
    }
}

/// Registry of charging sources and the single online-path owner.
pub struct SourceRegistry {
    slots: Vec<SourceSlot>,
    active: Option<usize>,
}

impl SourceRegistry {
    pub fn new(config: &SourcesConfig) -> Self {
        let slots = config
            .chargers
            .iter()
            .map(|entry| SourceSlot {
                name: entry.name.clone(),
                dc_capable: entry.dc_capable,
                device: None,
            })
            .collect();
        Self { slots, active: None }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&SourceSlot> {
        self.slots.get(index)
    }

    /// Index of the DC-capable slot, if one is configured.
    pub fn dc_index(&self) -> Option<usize> {
        self.slots.iter().position(SourceSlot::is_dc_capable)
    }

    /// True once every configured slot has a discovered device.
    pub fn all_attached(&self) -> bool {
        self.slots.iter().all(SourceSlot::is_attached)
    }

    /// Attach a discovered device to its slot.
    pub fn attach(&mut self, index: usize, device: Arc<dyn ChargerDevice>) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| HeliosError::out_of_range(format!("source index {index} out of range")))?;
        slot.device = Some(device);
        Ok(())
    }

    /// Device handle for a slot. `NotFound` while discovery has not
    /// delivered it yet.
    pub fn device(&self, index: usize) -> Result<Arc<dyn ChargerDevice>> {
        let slot = self
            .slots
            .get(index)
            .ok_or_else(|| HeliosError::out_of_range(format!("source index {index} out of range")))?;
        slot.device.clone().ok_or_else(|| {
            HeliosError::not_found(format!("charger '{}' not discovered", slot.name))
        })
    }

    /// The index-0 default charger.
    pub fn get_default(&self) -> Result<Arc<dyn ChargerDevice>> {
        self.device(DEFAULT_INDEX)
    }

    /// Currently online source index, if any.
    pub fn get_active(&self) -> Option<usize> {
        self.active
    }

    /// Take a slot offline: stop charging first, then drop the online
    /// claim. The active marker is cleared only once both writes stuck,
    /// so a half-offlined source stays visible to the caller for retry.
    pub async fn offline(&mut self, index: usize) -> Result<()> {
        if index >= self.slots.len() {
            return Err(HeliosError::out_of_range(format!(
                "source index {index} out of range"
            )));
        }
        let Ok(dev) = self.device(index) else {
            // Nothing discovered on this slot, nothing to offline.
            return Ok(());
        };

        dev.set_property(PropertyKey::ChargingEnabled, 0).await?;
        dev.set_property(PropertyKey::Online, 0).await?;
        if self.active == Some(index) {
            self.active = None;
        }
        tracing::debug!(source = dev.name(), index, "source offlined");
        Ok(())
    }

    /// Make `index` the online path. The previously active source is
    /// offlined first. On partial failure no source is left online; the
    /// registry then reports no active source until a later attempt
    /// succeeds.
    pub async fn set_online(&mut self, index: usize) -> Result<()> {
        if self.active == Some(index) {
            return Ok(());
        }
        let dev = self.device(index)?;

        if let Some(active) = self.active {
            self.offline(active).await?;
        }

        dev.set_property(PropertyKey::Online, 1).await?;
        self.active = Some(index);
        tracing::info!(source = dev.name(), index, "source online");
        Ok(())
    }

    /// Best-effort liveness nudge. Writes a benign online value so the
    /// source's own watchdog sees traffic; failures are logged and
    /// swallowed.
    pub async fn ping(&self, index: usize) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        let Some(dev) = slot.device.as_ref() else {
            return;
        };
        if let Err(err) = dev.set_property(PropertyKey::Online, 0).await {
            tracing::debug!(source = slot.name.as_str(), %err, "ping failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChargerEntry;
    use crate::sim::SimCharger;

    fn test_config() -> SourcesConfig {
        SourcesConfig {
            chargers: vec![
                ChargerEntry { name: "main-charger".to_string(), dc_capable: false },
                ChargerEntry { name: "dc-charger".to_string(), dc_capable: true },
            ],
            wired_pps: None,
            wireless_pps: None,
        }
    }

    #[test]
    fn dc_index_follows_capability_flag() {
        let registry = SourceRegistry::new(&test_config());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.dc_index(), Some(1));
        assert!(!registry.all_attached());
    }

    #[test]
    fn device_lookup_distinguishes_missing_from_invalid() {
        let registry = SourceRegistry::new(&test_config());
        assert!(matches!(registry.device(0), Err(HeliosError::NotFound { .. })));
        assert!(matches!(registry.device(7), Err(HeliosError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn set_online_switches_sources() {
        let mut registry = SourceRegistry::new(&test_config());
        let main = SimCharger::new("main-charger");
        let dc = SimCharger::new("dc-charger");
        registry.attach(0, main.clone()).unwrap();
        registry.attach(1, dc.clone()).unwrap();

        registry.set_online(0).await.unwrap();
        assert_eq!(registry.get_active(), Some(0));
        assert_eq!(main.prop(PropertyKey::Online), Some(1));

        registry.set_online(1).await.unwrap();
        assert_eq!(registry.get_active(), Some(1));
        assert_eq!(main.prop(PropertyKey::ChargingEnabled), Some(0));
        assert_eq!(main.prop(PropertyKey::Online), Some(0));
        assert_eq!(dc.prop(PropertyKey::Online), Some(1));
    }

    #[tokio::test]
    async fn set_online_same_index_is_a_no_op() {
        let mut registry = SourceRegistry::new(&test_config());
        let main = SimCharger::new("main-charger");
        registry.attach(0, main.clone()).unwrap();

        registry.set_online(0).await.unwrap();
        let writes_after_first = main.write_count();
        registry.set_online(0).await.unwrap();
        assert_eq!(main.write_count(), writes_after_first);
    }

    #[tokio::test]
    async fn partial_failure_leaves_no_source_online() {
        let mut registry = SourceRegistry::new(&test_config());
        let main = SimCharger::new("main-charger");
        let dc = SimCharger::new("dc-charger");
        dc.fail_set(PropertyKey::Online);
        registry.attach(0, main.clone()).unwrap();
        registry.attach(1, dc.clone()).unwrap();

        registry.set_online(0).await.unwrap();
        let err = registry.set_online(1).await.unwrap_err();
        assert!(matches!(err, HeliosError::Transient { .. }));
        // Previous source went offline, new one never came up.
        assert_eq!(registry.get_active(), None);
        assert_eq!(main.prop(PropertyKey::Online), Some(0));
    }

    #[tokio::test]
    async fn offline_keeps_active_when_stop_fails() {
        let mut registry = SourceRegistry::new(&test_config());
        let main = SimCharger::new("main-charger");
        registry.attach(0, main.clone()).unwrap();
        registry.set_online(0).await.unwrap();

        main.fail_set(PropertyKey::ChargingEnabled);
        assert!(registry.offline(0).await.is_err());
        assert_eq!(registry.get_active(), Some(0));
    }

    #[tokio::test]
    async fn ping_swallows_failures() {
        let mut registry = SourceRegistry::new(&test_config());
        let main = SimCharger::new("main-charger");
        main.fail_set(PropertyKey::Online);
        registry.attach(0, main).unwrap();
        registry.ping(0).await;
        registry.ping(42).await;
    }
}
