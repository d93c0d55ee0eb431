//! PPS negotiation state machines
//!
//! One [`PpsSession`] per programmable port walks a source through
//! detection, capability discovery and contract maintenance. The
//! [`PpsBank`] steps the wired and wireless sessions together and reports
//! which one, if any, holds an active contract. Poll cadence is decided by
//! the session controller; each step only recommends an interval.

use std::sync::Arc;

use serde::Serialize;

use crate::config::TimingConfig;
use crate::error::{HeliosError, Result};
use crate::source::{ChargerDevice, OnlineLevel, PropertyKey, UsbType};

/// Negotiation stage of one programmable source.
///
/// `NotSupported` is sticky for the whole DC session: once a source says it
/// cannot do programmable output, detection is not attempted again until
/// the next session resets the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PpsStage {
    NotSupported,
    Disabled,
    None,
    Available,
    Active,
}

impl PpsStage {
    /// Integer code used on the debug surface.
    pub fn code(self) -> i32 {
        match self {
            Self::NotSupported => -1,
            Self::Disabled => 0,
            Self::None => 1,
            Self::Available => 2,
            Self::Active => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::NotSupported),
            0 => Some(Self::Disabled),
            1 => Some(Self::None),
            2 => Some(Self::Available),
            3 => Some(Self::Active),
            _ => None,
        }
    }
}

/// The two programmable ports the arbiter can negotiate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PpsPort {
    Wired,
    Wireless,
}

impl PpsPort {
    pub const ALL: [Self; 2] = [Self::Wired, Self::Wireless];

    /// Non-zero port code, written to the DC charger as the watchdog
    /// value. Zero means "still detecting".
    pub fn code(self) -> i32 {
        match self {
            Self::Wired => 1,
            Self::Wireless => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wired => "wired",
            Self::Wireless => "wireless",
        }
    }
}

/// Outcome of stepping both sessions once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankVerdict {
    /// No source active yet, keep polling.
    Detecting,
    /// This port holds an active contract.
    Active(PpsPort),
    /// The previously active port dropped out with no replacement.
    Lost,
    /// Neither port supports programmable output.
    Unsupported,
}

/// Negotiation state for one programmable source.
pub struct PpsSession {
    name: String,
    device: Arc<dyn ChargerDevice>,
    stage: PpsStage,
    online: OnlineLevel,
    /// Advertised window, zero until learned
    max_uv: i32,
    max_ua: i32,
    /// Requested operating point, negative until seeded
    req_uv: i32,
    req_ua: i32,
    /// Last observed output
    out_uv: i32,
    out_ua: i32,
    error_count: u32,
    last_error: Option<String>,
}

impl PpsSession {
    pub fn new(name: &str, device: Arc<dyn ChargerDevice>) -> Self {
        Self {
            name: name.to_string(),
            device,
            stage: PpsStage::None,
            online: OnlineLevel::Offline,
            max_uv: 0,
            max_ua: 0,
            req_uv: -1,
            req_ua: -1,
            out_uv: -1,
            out_ua: -1,
            error_count: 0,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> Arc<dyn ChargerDevice> {
        Arc::clone(&self.device)
    }

    pub fn stage(&self) -> PpsStage {
        self.stage
    }

    pub(crate) fn set_stage(&mut self, stage: PpsStage) {
        self.stage = stage;
    }

    /// Requested operating point once granted, `(uv, ua)`.
    pub fn granted(&self) -> (i32, i32) {
        (self.req_uv, self.req_ua)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Return to the initial stage for a fresh session. Clears the sticky
    /// `NotSupported` as well; callers that want to keep it filter first.
    pub fn reset(&mut self) {
        self.stage = PpsStage::None;
        self.online = OnlineLevel::Offline;
        self.max_uv = 0;
        self.max_ua = 0;
        self.req_uv = -1;
        self.req_ua = -1;
        self.out_uv = -1;
        self.out_ua = -1;
        self.error_count = 0;
        self.last_error = None;
    }

    /// Record the operating point to ask for once the source turns
    /// programmable. Clamped to the advertised window when that is known.
    pub fn seed_request(&mut self, uv: i32, ua: i32) {
        self.req_uv = uv;
        self.req_ua = ua;
        self.clamp_to_window();
    }

    fn clamp_to_window(&mut self) {
        if self.max_uv > 0 && self.req_uv > self.max_uv {
            self.req_uv = self.max_uv;
        }
        if self.max_ua > 0 && self.req_ua > self.max_ua {
            self.req_ua = self.max_ua;
        }
    }

    /// Advance the state machine one step. Returns the recommended
    /// next-poll interval; an error means the source is abandoned for this
    /// session (stage left at `NotSupported` or `Disabled`).
    pub async fn negotiate_step(&mut self, timing: &TimingConfig) -> Result<u64> {
        match self.stage {
            PpsStage::NotSupported => Err(HeliosError::not_found(format!(
                "{}: no programmable capability",
                self.name
            ))),
            PpsStage::Disabled => Err(HeliosError::not_found(format!(
                "{}: pps disabled for this session",
                self.name
            ))),
            PpsStage::None => self.step_detect(timing).await,
            PpsStage::Available => self.step_available(timing).await,
            PpsStage::Active => self.step_active(timing).await,
        }
    }

    async fn step_detect(&mut self, timing: &TimingConfig) -> Result<u64> {
        let online = match self.device.get_property(PropertyKey::Online).await {
            Ok(raw) => OnlineLevel::from_raw(raw),
            Err(err) => return self.soft_error(&err, timing),
        };
        self.online = online;

        if online == OnlineLevel::Offline {
            // Nothing attached on this port, keep watching.
            return Ok(timing.prog_retry_ms);
        }

        // A source that settled on plain PD will never do programmable
        // output. Sources that do not report a type are probed directly.
        match self.device.get_property(PropertyKey::UsbType).await {
            Ok(raw) => match UsbType::from_raw(raw) {
                UsbType::Pd => {
                    tracing::info!(source = self.name.as_str(), "plain PD source, marking not supported");
                    self.stage = PpsStage::NotSupported;
                    return Err(HeliosError::not_found(format!(
                        "{}: plain PD, no programmable support",
                        self.name
                    )));
                }
                UsbType::Unknown => return Ok(timing.prog_retry_ms),
                UsbType::PdPps => {}
            },
            Err(_) => {}
        }

        if online < OnlineLevel::Programmable {
            // Ask the source to enter programmable mode.
            if let Err(err) = self
                .device
                .set_property(PropertyKey::Online, OnlineLevel::Programmable.as_raw())
                .await
            {
                return self.soft_error(&err, timing);
            }
            return Ok(timing.prog_retry_ms);
        }

        // Programmable: learn the offered window.
        let max_uv = match self.device.get_property(PropertyKey::VoltageMax).await {
            Ok(v) => v,
            Err(err) => return self.soft_error(&err, timing),
        };
        let max_ua = match self.device.get_property(PropertyKey::CurrentMax).await {
            Ok(v) => v,
            Err(err) => return self.soft_error(&err, timing),
        };
        if max_uv <= 0 || max_ua <= 0 {
            tracing::info!(
                source = self.name.as_str(),
                max_uv,
                max_ua,
                "programmable without usable profile, marking not supported"
            );
            self.stage = PpsStage::NotSupported;
            return Err(HeliosError::not_found(format!(
                "{}: empty programmable profile",
                self.name
            )));
        }

        self.max_uv = max_uv;
        self.max_ua = max_ua;
        self.clamp_to_window();
        self.stage = PpsStage::Available;
        tracing::info!(
            source = self.name.as_str(),
            max_uv,
            max_ua,
            req_uv = self.req_uv,
            req_ua = self.req_ua,
            "pps available"
        );
        Ok(timing.active_retry_ms)
    }

    async fn step_available(&mut self, timing: &TimingConfig) -> Result<u64> {
        let online = match self.device.get_property(PropertyKey::Online).await {
            Ok(raw) => OnlineLevel::from_raw(raw),
            Err(err) => return self.soft_error(&err, timing),
        };
        self.online = online;

        if online < OnlineLevel::Programmable {
            // Dropped out of programmable mode, restart detection.
            tracing::info!(source = self.name.as_str(), ?online, "left programmable mode");
            self.stage = PpsStage::None;
            return Ok(timing.prog_retry_ms);
        }

        if self.req_uv <= 0 || self.req_ua <= 0 {
            // No operating point seeded yet.
            return Ok(timing.active_retry_ms);
        }

        if let Err(err) = self.send_request().await {
            return self.soft_error(&err, timing);
        }

        if self.out_uv >= self.req_uv && self.out_ua >= self.req_ua {
            self.stage = PpsStage::Active;
            self.error_count = 0;
            tracing::info!(
                source = self.name.as_str(),
                out_uv = self.out_uv,
                out_ua = self.out_ua,
                "pps active"
            );
            return Ok(timing.keep_alive_ms);
        }

        tracing::debug!(
            source = self.name.as_str(),
            req_uv = self.req_uv,
            out_uv = self.out_uv,
            req_ua = self.req_ua,
            out_ua = self.out_ua,
            "adapter still ramping"
        );
        Ok(timing.active_retry_ms)
    }

    async fn step_active(&mut self, timing: &TimingConfig) -> Result<u64> {
        let online = match self.device.get_property(PropertyKey::Online).await {
            Ok(raw) => OnlineLevel::from_raw(raw),
            Err(err) => return self.soft_error(&err, timing),
        };
        self.online = online;

        if online < OnlineLevel::Programmable {
            tracing::warn!(source = self.name.as_str(), ?online, "active source went offline");
            self.stage = PpsStage::Disabled;
            return Err(HeliosError::transient(format!(
                "{}: active source went offline",
                self.name
            )));
        }

        // Keep-alive: re-send the request so the contract does not lapse.
        if let Err(err) = self.send_request().await {
            return self.soft_error(&err, timing);
        }
        self.error_count = 0;
        Ok(timing.keep_alive_ms)
    }

    async fn send_request(&mut self) -> Result<()> {
        self.device
            .set_property(PropertyKey::VoltageNow, self.req_uv)
            .await?;
        self.device
            .set_property(PropertyKey::CurrentNow, self.req_ua)
            .await?;
        self.out_uv = self.device.get_property(PropertyKey::VoltageNow).await?;
        self.out_ua = self.device.get_property(PropertyKey::CurrentNow).await?;
        Ok(())
    }

    fn soft_error(&mut self, err: &HeliosError, timing: &TimingConfig) -> Result<u64> {
        self.error_count += 1;
        self.last_error = Some(err.to_string());
        tracing::warn!(
            source = self.name.as_str(),
            errors = self.error_count,
            %err,
            "pps step error"
        );
        if self.error_count > timing.pps_error_budget {
            self.stage = PpsStage::Disabled;
            return Err(HeliosError::transient(format!(
                "{}: error budget exhausted",
                self.name
            )));
        }
        Ok(timing.error_retry_ms)
    }

    /// Adjust the requested operating point, pushing it to the source
    /// immediately when a contract is active.
    pub async fn update_request(&mut self, uv: i32, ua: i32, timing: &TimingConfig) -> Result<u64> {
        self.req_uv = uv;
        self.req_ua = ua;
        self.clamp_to_window();

        match self.stage {
            PpsStage::Active => {
                if let Err(err) = self.send_request().await {
                    return self.soft_error(&err, timing);
                }
                Ok(timing.keep_alive_ms)
            }
            PpsStage::Available => Ok(timing.active_retry_ms),
            _ => Ok(timing.prog_retry_ms),
        }
    }

    /// Live check that the source still sits at the programmable level.
    pub async fn is_online(&mut self) -> bool {
        match self.device.get_property(PropertyKey::Online).await {
            Ok(raw) => {
                self.online = OnlineLevel::from_raw(raw);
                self.online >= OnlineLevel::Programmable
            }
            Err(err) => {
                tracing::warn!(source = self.name.as_str(), %err, "online check failed");
                false
            }
        }
    }

    /// Ask the source to leave programmable mode and forget the contract.
    /// Registers are cleared even when the write fails; the caller decides
    /// whether the failure matters.
    pub async fn go_offline(&mut self) -> Result<()> {
        let ret = if self.online >= OnlineLevel::Programmable {
            self.device
                .set_property(PropertyKey::Online, OnlineLevel::Raw.as_raw())
                .await
        } else {
            Ok(())
        };

        self.max_uv = 0;
        self.max_ua = 0;
        self.req_uv = -1;
        self.req_ua = -1;
        self.out_uv = -1;
        self.out_ua = -1;
        self.online = OnlineLevel::Offline;
        if self.stage != PpsStage::NotSupported {
            self.stage = PpsStage::Disabled;
        }
        ret
    }
}

/// Both negotiation sessions plus the currently selected port.
#[derive(Default)]
pub struct PpsBank {
    wired: Option<PpsSession>,
    wireless: Option<PpsSession>,
    selected: Option<PpsPort>,
}

impl PpsBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, port: PpsPort, session: PpsSession) {
        match port {
            PpsPort::Wired => self.wired = Some(session),
            PpsPort::Wireless => self.wireless = Some(session),
        }
    }

    pub fn session(&self, port: PpsPort) -> Option<&PpsSession> {
        match port {
            PpsPort::Wired => self.wired.as_ref(),
            PpsPort::Wireless => self.wireless.as_ref(),
        }
    }

    pub fn session_mut(&mut self, port: PpsPort) -> Option<&mut PpsSession> {
        match port {
            PpsPort::Wired => self.wired.as_mut(),
            PpsPort::Wireless => self.wireless.as_mut(),
        }
    }

    pub fn selected(&self) -> Option<PpsPort> {
        self.selected
    }

    pub fn selected_session_mut(&mut self) -> Option<&mut PpsSession> {
        self.selected.and_then(move |port| self.session_mut(port))
    }

    pub fn stage(&self, port: PpsPort) -> Option<PpsStage> {
        self.session(port).map(PpsSession::stage)
    }

    /// True when no installed source can ever negotiate this session. An
    /// absent session counts: a port with no device has nothing to offer.
    pub fn all_not_supported(&self) -> bool {
        PpsPort::ALL.iter().all(|&port| {
            self.session(port)
                .is_none_or(|s| s.stage() == PpsStage::NotSupported)
        })
    }

    /// Seed both sessions with the operating point to negotiate for.
    pub fn seed_all(&mut self, uv: i32, ua: i32) {
        for port in PpsPort::ALL {
            if let Some(session) = self.session_mut(port) {
                session.seed_request(uv, ua);
            }
        }
    }

    /// Reset both sessions to the initial stage for a new DC session.
    pub fn reset_all(&mut self) {
        for port in PpsPort::ALL {
            if let Some(session) = self.session_mut(port) {
                session.reset();
            }
        }
        self.selected = None;
    }

    /// Reset only the sessions that may still succeed; `NotSupported`
    /// stays sticky until the next session.
    pub fn reset_retryable(&mut self) {
        for port in PpsPort::ALL {
            if let Some(session) = self.session_mut(port) {
                if session.stage() != PpsStage::NotSupported {
                    session.reset();
                }
            }
        }
        self.selected = None;
    }

    /// Offline both sessions. Failures are logged; the sources are
    /// forgotten either way.
    pub async fn offline_all(&mut self) {
        for port in PpsPort::ALL {
            if let Some(session) = self.session_mut(port) {
                if let Err(err) = session.go_offline().await {
                    tracing::warn!(port = port.as_str(), %err, "pps offline failed");
                }
            }
        }
        self.selected = None;
    }

    /// Live online check of the selected source.
    pub async fn selected_online(&mut self) -> bool {
        match self.selected_session_mut() {
            Some(session) => session.is_online().await,
            None => false,
        }
    }

    /// Operating point granted to the selected source.
    pub fn granted(&self) -> Option<(i32, i32)> {
        self.selected.and_then(|port| self.session(port)).map(PpsSession::granted)
    }

    /// Step every steppable session once and decide which port, if any,
    /// owns an active contract. A port already selected keeps the pick as
    /// long as it stays active.
    pub async fn step_all(&mut self, timing: &TimingConfig) -> BankVerdict {
        let mut not_supported = 0;

        for port in PpsPort::ALL {
            let Some(session) = self.session_mut(port) else {
                not_supported += 1;
                continue;
            };
            match session.stage() {
                PpsStage::NotSupported => {
                    not_supported += 1;
                    continue;
                }
                PpsStage::Disabled => continue,
                _ => {}
            }
            if let Err(err) = session.negotiate_step(timing).await {
                tracing::debug!(port = port.as_str(), %err, "pps source abandoned");
                if session.stage() == PpsStage::NotSupported {
                    not_supported += 1;
                }
            }
        }

        if not_supported == PpsPort::ALL.len() {
            self.selected = None;
            return BankVerdict::Unsupported;
        }

        if let Some(port) = self.selected {
            if self.stage(port) == Some(PpsStage::Active) {
                return BankVerdict::Active(port);
            }
        }

        let newly_active = PpsPort::ALL
            .into_iter()
            .find(|&port| self.stage(port) == Some(PpsStage::Active));

        match (self.selected.take(), newly_active) {
            (prev, Some(port)) => {
                if prev != Some(port) {
                    tracing::info!(port = port.as_str(), "pps source selected");
                }
                self.selected = Some(port);
                BankVerdict::Active(port)
            }
            (Some(prev), None) => {
                tracing::warn!(port = prev.as_str(), "active pps source lost");
                BankVerdict::Lost
            }
            (None, None) => BankVerdict::Detecting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCharger;

    fn timing() -> TimingConfig {
        TimingConfig::default()
    }

    fn session_for(dev: &Arc<SimCharger>) -> PpsSession {
        PpsSession::new(dev.name(), dev.clone())
    }

    async fn drive_to_active(dev: &Arc<SimCharger>, session: &mut PpsSession) {
        dev.set_prop(PropertyKey::Online, 1);
        dev.set_prop(PropertyKey::UsbType, 2);
        dev.grant_pps_window(9_800_000, 5_000_000);
        session.seed_request(9_000_000, 4_000_000);

        session.negotiate_step(&timing()).await.unwrap();
        session.negotiate_step(&timing()).await.unwrap();
        session.negotiate_step(&timing()).await.unwrap();
        assert_eq!(session.stage(), PpsStage::Active);
    }

    #[tokio::test]
    async fn detection_walks_to_active() {
        let dev = SimCharger::new("wired-pps");
        dev.set_prop(PropertyKey::Online, 1);
        dev.set_prop(PropertyKey::UsbType, 2);
        dev.grant_pps_window(9_800_000, 5_000_000);

        let mut session = session_for(&dev);
        session.seed_request(9_000_000, 4_000_000);

        // Raw online: the step requests programmable mode.
        let ms = session.negotiate_step(&timing()).await.unwrap();
        assert_eq!(ms, timing().prog_retry_ms);
        assert_eq!(session.stage(), PpsStage::None);
        assert_eq!(dev.prop(PropertyKey::Online), Some(3));

        // Programmable: the window is learned.
        let ms = session.negotiate_step(&timing()).await.unwrap();
        assert_eq!(ms, timing().active_retry_ms);
        assert_eq!(session.stage(), PpsStage::Available);

        // First request cycle converges.
        let ms = session.negotiate_step(&timing()).await.unwrap();
        assert_eq!(ms, timing().keep_alive_ms);
        assert_eq!(session.stage(), PpsStage::Active);
        assert_eq!(dev.prop(PropertyKey::VoltageNow), Some(9_000_000));
        assert_eq!(dev.prop(PropertyKey::CurrentNow), Some(4_000_000));
    }

    #[tokio::test]
    async fn seed_is_clamped_to_learned_window() {
        let dev = SimCharger::new("wired-pps");
        dev.set_prop(PropertyKey::Online, 1);
        dev.set_prop(PropertyKey::UsbType, 2);
        dev.grant_pps_window(9_800_000, 5_000_000);

        let mut session = session_for(&dev);
        session.seed_request(12_000_000, 6_000_000);

        session.negotiate_step(&timing()).await.unwrap();
        session.negotiate_step(&timing()).await.unwrap();
        assert_eq!(session.granted(), (9_800_000, 5_000_000));
    }

    #[tokio::test]
    async fn plain_pd_goes_not_supported_and_sticks() {
        let dev = SimCharger::new("wired-pps");
        dev.set_prop(PropertyKey::Online, 1);
        dev.set_prop(PropertyKey::UsbType, 1);

        let mut session = session_for(&dev);
        assert!(session.negotiate_step(&timing()).await.is_err());
        assert_eq!(session.stage(), PpsStage::NotSupported);

        // Sticky: no more device traffic.
        let writes = dev.write_count();
        assert!(session.negotiate_step(&timing()).await.is_err());
        assert_eq!(dev.write_count(), writes);
    }

    #[tokio::test]
    async fn empty_profile_goes_not_supported() {
        let dev = SimCharger::new("wired-pps");
        dev.set_prop(PropertyKey::Online, 3);
        dev.set_prop(PropertyKey::VoltageMax, 0);
        dev.set_prop(PropertyKey::CurrentMax, 0);

        let mut session = session_for(&dev);
        assert!(session.negotiate_step(&timing()).await.is_err());
        assert_eq!(session.stage(), PpsStage::NotSupported);
    }

    #[tokio::test]
    async fn unknown_usb_type_waits() {
        let dev = SimCharger::new("wired-pps");
        dev.set_prop(PropertyKey::Online, 1);
        dev.set_prop(PropertyKey::UsbType, 0);

        let mut session = session_for(&dev);
        let ms = session.negotiate_step(&timing()).await.unwrap();
        assert_eq!(ms, timing().prog_retry_ms);
        assert_eq!(session.stage(), PpsStage::None);
        assert_eq!(dev.write_count(), 0);
    }

    #[tokio::test]
    async fn ramping_adapter_stays_available() {
        let dev = SimCharger::new("wired-pps");
        dev.set_prop(PropertyKey::Online, 1);
        dev.set_prop(PropertyKey::UsbType, 2);
        dev.grant_pps_window(9_800_000, 5_000_000);
        dev.cap_voltage(8_500_000);

        let mut session = session_for(&dev);
        session.seed_request(9_000_000, 4_000_000);
        session.negotiate_step(&timing()).await.unwrap();
        session.negotiate_step(&timing()).await.unwrap();

        let ms = session.negotiate_step(&timing()).await.unwrap();
        assert_eq!(ms, timing().active_retry_ms);
        assert_eq!(session.stage(), PpsStage::Available);

        // Output catches up, next cycle goes active.
        dev.cap_voltage(10_000_000);
        session.negotiate_step(&timing()).await.unwrap();
        assert_eq!(session.stage(), PpsStage::Active);
    }

    #[tokio::test]
    async fn error_budget_disables_session() {
        let dev = SimCharger::new("wired-pps");
        dev.fail_get(PropertyKey::Online);

        let mut session = session_for(&dev);
        let budget = timing().pps_error_budget;
        for _ in 0..budget {
            let ms = session.negotiate_step(&timing()).await.unwrap();
            assert_eq!(ms, timing().error_retry_ms);
        }
        assert!(session.negotiate_step(&timing()).await.is_err());
        assert_eq!(session.stage(), PpsStage::Disabled);
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn active_source_dropping_out_disables() {
        let dev = SimCharger::new("wired-pps");
        let mut session = session_for(&dev);
        drive_to_active(&dev, &mut session).await;

        dev.set_prop(PropertyKey::Online, 1);
        assert!(session.negotiate_step(&timing()).await.is_err());
        assert_eq!(session.stage(), PpsStage::Disabled);
    }

    #[tokio::test]
    async fn go_offline_drops_programmable_mode() {
        let dev = SimCharger::new("wired-pps");
        let mut session = session_for(&dev);
        drive_to_active(&dev, &mut session).await;

        session.go_offline().await.unwrap();
        assert_eq!(session.stage(), PpsStage::Disabled);
        assert_eq!(dev.prop(PropertyKey::Online), Some(1));
        assert_eq!(session.granted(), (-1, -1));

        // Second call is a no-op on the device.
        let writes = dev.write_count();
        session.go_offline().await.unwrap();
        assert_eq!(dev.write_count(), writes);
    }

    #[tokio::test]
    async fn bank_with_no_sessions_is_unsupported() {
        let mut bank = PpsBank::new();
        assert_eq!(bank.step_all(&timing()).await, BankVerdict::Unsupported);
        assert!(bank.all_not_supported());
    }

    #[tokio::test]
    async fn bank_selects_first_active_port() {
        let wired = SimCharger::new("wired-pps");
        let wireless = SimCharger::new("wireless-pps");
        wired.set_prop(PropertyKey::Online, 1);
        wired.set_prop(PropertyKey::UsbType, 2);
        wired.grant_pps_window(9_800_000, 5_000_000);
        wireless.set_prop(PropertyKey::Online, 0);

        let mut bank = PpsBank::new();
        bank.install(PpsPort::Wired, PpsSession::new("wired-pps", wired.clone()));
        bank.install(PpsPort::Wireless, PpsSession::new("wireless-pps", wireless.clone()));
        bank.seed_all(9_000_000, 4_000_000);

        assert_eq!(bank.step_all(&timing()).await, BankVerdict::Detecting);
        assert_eq!(bank.step_all(&timing()).await, BankVerdict::Detecting);
        assert_eq!(bank.step_all(&timing()).await, BankVerdict::Active(PpsPort::Wired));
        assert_eq!(bank.selected(), Some(PpsPort::Wired));
        assert_eq!(bank.granted(), Some((9_000_000, 4_000_000)));
    }

    #[tokio::test]
    async fn bank_reports_lost_when_active_source_drops() {
        let wired = SimCharger::new("wired-pps");
        wired.set_prop(PropertyKey::Online, 1);
        wired.set_prop(PropertyKey::UsbType, 2);
        wired.grant_pps_window(9_800_000, 5_000_000);

        let mut bank = PpsBank::new();
        bank.install(PpsPort::Wired, PpsSession::new("wired-pps", wired.clone()));
        bank.seed_all(9_000_000, 4_000_000);

        while bank.step_all(&timing()).await != BankVerdict::Active(PpsPort::Wired) {}

        wired.set_prop(PropertyKey::Online, 1);
        assert_eq!(bank.step_all(&timing()).await, BankVerdict::Lost);
        assert_eq!(bank.selected(), None);
    }

    #[tokio::test]
    async fn bank_counts_not_supported_ports() {
        let wired = SimCharger::new("wired-pps");
        wired.set_prop(PropertyKey::Online, 1);
        wired.set_prop(PropertyKey::UsbType, 1);

        let mut bank = PpsBank::new();
        bank.install(PpsPort::Wired, PpsSession::new("wired-pps", wired));

        // Wired turns NotSupported this tick, wireless has no device.
        assert_eq!(bank.step_all(&timing()).await, BankVerdict::Unsupported);
        assert!(bank.all_not_supported());
    }

    #[tokio::test]
    async fn retryable_reset_preserves_not_supported() {
        let wired = SimCharger::new("wired-pps");
        wired.set_prop(PropertyKey::Online, 1);
        wired.set_prop(PropertyKey::UsbType, 1);
        let wireless = SimCharger::new("wireless-pps");
        wireless.fail_get(PropertyKey::Online);

        let mut bank = PpsBank::new();
        bank.install(PpsPort::Wired, PpsSession::new("wired-pps", wired));
        bank.install(PpsPort::Wireless, PpsSession::new("wireless-pps", wireless));

        bank.step_all(&timing()).await;
        assert_eq!(bank.stage(PpsPort::Wired), Some(PpsStage::NotSupported));

        bank.reset_retryable();
        assert_eq!(bank.stage(PpsPort::Wired), Some(PpsStage::NotSupported));
        assert_eq!(bank.stage(PpsPort::Wireless), Some(PpsStage::None));

        bank.reset_all();
        assert_eq!(bank.stage(PpsPort::Wired), Some(PpsStage::None));
    }

    #[test]
    fn stage_codes_round_trip() {
        for stage in [
            PpsStage::NotSupported,
            PpsStage::Disabled,
            PpsStage::None,
            PpsStage::Available,
            PpsStage::Active,
        ] {
            assert_eq!(PpsStage::from_code(stage.code()), Some(stage));
        }
        assert_eq!(PpsStage::from_code(9), None);
    }
}
