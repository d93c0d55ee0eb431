//! Charge arbiter core
//!
//! The arbiter owns the source registry, the negotiation bank and the
//! selection state, and runs them from three cooperating tasks:
//!
//! - the selection task decides which source should own the charging path
//!   and opens or closes direct-charge sessions,
//! - the negotiation task walks programmable-supply detection, performs the
//!   handover to the divider engine and supervises it afterwards,
//! - the event task reacts to change notifications from tracked sources.
//!
//! Tasks communicate through deadline timers and share one state structure
//! behind an async mutex, so every pass observes a consistent view.

mod debug;
mod dc;
mod events;
mod init;
mod negotiate;
mod select;
mod snapshot;
mod timer;
pub mod types;


use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{HeliosError, Result};
use crate::logging::{StructuredLogger, get_logger, init_logging};
use crate::pps::PpsBank;
use crate::registry::SourceRegistry;
use crate::selection::{Demand, Overrides, Selected, Thresholds};
use crate::source::{DeviceCatalog, ModeVote, SourceEvent};
use crate::storage::TagStore;
use timer::TaskTimer;
pub use types::{ArbiterPhase, ArbiterSnapshot, DcState};

/// Mutable state shared by the arbiter tasks.
pub(crate) struct ArbiterState {
    /// Configured sources and which one is online
    pub(crate) registry: SourceRegistry,
    /// Programmable-supply negotiations, one per port
    pub(crate) bank: PpsBank,
    /// Direct-charge session state machine
    pub(crate) dc_state: DcState,
    /// Outcome of the last selection pass
    pub(crate) selected: Selected,
    /// Charge targets from the upstream policy
    pub(crate) demand: Demand,
    /// Ramp-down requested by the upstream policy
    pub(crate) taper: bool,
    /// Selection thresholds, demand limit adjustable at runtime
    pub(crate) thresholds: Thresholds,
    /// Debug overrides
    pub(crate) overrides: Overrides,
    /// Adapter operating point, microvolts
    pub(crate) out_uv: i32,
    /// Adapter operating point, microamps
    pub(crate) out_ua: i32,
    /// Consecutive transient watchdog failures in passthrough
    pub(crate) wd_failures: u32,
    /// A demand limit change is waiting for the next demand update
    pub(crate) new_dc_limit: bool,
    /// Discovery finished, selection may run
    pub(crate) dc_ready: bool,
    pub(crate) session_started_at: Option<Instant>,
    pub(crate) session_started_utc: Option<chrono::DateTime<chrono::Utc>>,
    pub(crate) session_id: Option<uuid::Uuid>,
    /// Sessions opened since first boot, persisted
    pub(crate) session_count: u64,
}

impl ArbiterState {
    fn new(config: &Config) -> Self {
        Self {
            registry: SourceRegistry::new(&config.sources),
            bank: PpsBank::new(),
            dc_state: DcState::Idle,
            selected: Selected::Default,
            demand: Demand::default(),
            taper: false,
            thresholds: Thresholds::from_limits(&config.limits),
            overrides: Overrides::default(),
            out_uv: 0,
            out_ua: 0,
            wd_failures: 0,
            new_dc_limit: false,
            dc_ready: false,
            session_started_at: None,
            session_started_utc: None,
            session_id: None,
            session_count: 0,
        }
    }

    /// Seconds since the current session opened, 0 without one.
    pub(crate) fn session_elapsed_s(&self) -> u64 {
        self.session_started_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Index of the direct-charge slot, only while its device is attached.
    pub(crate) fn dc_slot(&self) -> Option<usize> {
        self.registry
            .dc_index()
            .filter(|&i| self.registry.slot(i).is_some_and(|s| s.is_attached()))
    }

    /// Push the current operating point into every negotiation.
    pub(crate) fn seed_bank(&mut self) {
        let (uv, ua) = (self.out_uv, self.out_ua);
        self.bank.seed_all(uv, ua);
    }
}

/// Multi-source charging arbiter.
///
/// Construct with [`ChargeArbiter::new`], then call [`ChargeArbiter::start`]
/// to spawn the tasks. Hosts drive it through the property bridge
/// ([`ChargeArbiter::set_property`] and friends) and observe it through
/// [`ChargeArbiter::subscribe_snapshot`].
pub struct ChargeArbiter {
    config: Config,
    logger: StructuredLogger,
    catalog: Arc<dyn DeviceCatalog>,
    vote: Arc<dyn ModeVote>,
    store: Arc<dyn TagStore>,
    state: Mutex<ArbiterState>,
    phase: watch::Sender<ArbiterPhase>,
    select_timer: TaskTimer,
    pps_timer: TaskTimer,
    events_tx: mpsc::UnboundedSender<SourceEvent>,
    /// Taken by the event task on start
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<SourceEvent>>>,
    snapshot_tx: watch::Sender<Arc<ArbiterSnapshot>>,
    snapshot_rx: watch::Receiver<Arc<ArbiterSnapshot>>,
    status_tx: broadcast::Sender<String>,
}

impl ChargeArbiter {
    /// Create an arbiter over the given device catalog, mode-vote sink and
    /// tag store. Validates the configuration and initializes logging.
    pub fn new(
        config: Config,
        catalog: Arc<dyn DeviceCatalog>,
        vote: Arc<dyn ModeVote>,
        store: Arc<dyn TagStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        init_logging(&config.logging)?;
        let logger = get_logger("arbiter");

        if config.sources.chargers.is_empty() {
            return Err(HeliosError::fatal("no charging sources configured"));
        }

        let state = ArbiterState::new(&config);
        let (phase, _) = watch::channel(ArbiterPhase::Initializing);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(100);

        let initial = Arc::new(ArbiterSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: env!("APP_VERSION").to_string(),
            phase: ArbiterPhase::Initializing.as_str().to_string(),
            dc_state: state.dc_state.code(),
            selected_index: state.selected.index_code(),
            demand_cc_ua: state.demand.cc_max_ua,
            demand_fv_uv: state.demand.fv_uv,
            ..Default::default()
        });
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        logger.info(&format!(
            "charge arbiter created with {} sources",
            config.sources.chargers.len()
        ));

        Ok(Arc::new(Self {
            config,
            logger,
            catalog,
            vote,
            store,
            state: Mutex::new(state),
            phase,
            select_timer: TaskTimer::new(),
            pps_timer: TaskTimer::new(),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
            snapshot_tx,
            snapshot_rx,
            status_tx,
        }))
    }

    /// Spawn the discovery, selection, negotiation and event tasks.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_init().await });

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_select_loop().await });

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_negotiate_loop().await });

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_event_loop().await });
    }

    async fn run_select_loop(&self) {
        let mut phase_rx = self.phase.subscribe();
        loop {
            tokio::select! {
                _ = self.select_timer.wait() => {
                    let mut st = self.state.lock().await;
                    self.select_step(&mut st).await;
                    self.publish_snapshot(&st);
                }
                changed = phase_rx.changed() => {
                    if changed.is_err() || *phase_rx.borrow() == ArbiterPhase::ShuttingDown {
                        break;
                    }
                }
            }
        }
    }

    async fn run_negotiate_loop(&self) {
        let mut phase_rx = self.phase.subscribe();
        loop {
            tokio::select! {
                _ = self.pps_timer.wait() => {
                    let mut st = self.state.lock().await;
                    if let Some(delay) = self.negotiate_step(&mut st).await {
                        self.pps_timer.schedule_if_idle(delay);
                    }
                    self.publish_snapshot(&st);
                }
                changed = phase_rx.changed() => {
                    if changed.is_err() || *phase_rx.borrow() == ArbiterPhase::ShuttingDown {
                        break;
                    }
                }
            }
        }
    }

    async fn run_event_loop(&self) {
        let taken = self
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut events_rx) = taken else {
            self.logger.warn("event task already running");
            return;
        };

        let mut phase_rx = self.phase.subscribe();
        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_source_event(&event.name).await,
                        None => break,
                    }
                }
                changed = phase_rx.changed() => {
                    if changed.is_err() || *phase_rx.borrow() == ArbiterPhase::ShuttingDown {
                        break;
                    }
                }
            }
        }
    }

    /// Wait until discovery attached the default source.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut phase_rx = self.phase.subscribe();
        let settled = async {
            loop {
                let phase = phase_rx.borrow_and_update().clone();
                match phase {
                    ArbiterPhase::Ready => return Ok(()),
                    ArbiterPhase::Failed(msg) => return Err(HeliosError::fatal(msg)),
                    ArbiterPhase::ShuttingDown => {
                        return Err(HeliosError::fatal("arbiter is shutting down"));
                    }
                    ArbiterPhase::Initializing => {}
                }
                if phase_rx.changed().await.is_err() {
                    return Err(HeliosError::fatal("arbiter dropped"));
                }
            }
        };
        tokio::time::timeout(timeout, settled)
            .await
            .map_err(|_| HeliosError::timeout("arbiter did not become ready"))?
    }

    pub fn phase(&self) -> ArbiterPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ArbiterPhase> {
        self.phase.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Signal the tasks to stop without touching hardware.
    pub fn request_shutdown(&self) {
        self.phase.send_replace(ArbiterPhase::ShuttingDown);
    }

    /// Stop the tasks and unwind an open direct-charge session.
    pub async fn shutdown(&self) {
        self.logger.info("shutting down");
        self.phase.send_replace(ArbiterPhase::ShuttingDown);

        let mut st = self.state.lock().await;
        if st.dc_state > DcState::Idle {
            st.selected = Selected::Default;
            if let Err(e) = self.dc_stop(&mut st, DcState::Disabled).await {
                self.logger
                    .warn(&format!("session teardown failed on shutdown: {}", e));
            }
            st.bank.offline_all().await;
        }
        self.publish_snapshot(&st);
        self.logger.info("shutdown complete");
    }
}
