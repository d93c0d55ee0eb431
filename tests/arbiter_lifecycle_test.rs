//! End-to-end arbiter lifecycle against simulated devices.
//!
//! Unlike the unit tests these run the real task loops: discovery,
//! selection and negotiation drive themselves through their timers on the
//! paused clock, and the tests only watch the published snapshots.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Duration;

use helios::sim::{SimCatalog, SimCharger, SimVote};
use helios::source::{OnlineLevel, PropertyKey};
use helios::storage::MemoryStore;
use helios::{ArbiterPhase, ArbiterSnapshot, ChargeArbiter, Config, DcState};

const CC_UA: i32 = 3_000_000;
const FV_UV: i32 = 4_400_000;

struct Rig {
    arbiter: Arc<ChargeArbiter>,
    main: Arc<SimCharger>,
    dc: Arc<SimCharger>,
    wired: Arc<SimCharger>,
    vote: Arc<SimVote>,
    _log_dir: tempfile::TempDir,
}

fn test_config(log_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.sources.wireless_pps = None;
    config.logging.file = log_dir.join("helios.log").to_string_lossy().to_string();
    config.logging.console_output = false;
    config
}

/// Catalog with every configured source present, arbiter tasks started.
fn rig() -> Rig {
    let log_dir = tempfile::tempdir().unwrap();
    let config = test_config(log_dir.path());

    let catalog = SimCatalog::new();
    let main = SimCharger::new("main-charger");
    main.set_prop(PropertyKey::VoltageNow, 3_900_000);
    catalog.add(main.clone());
    let dc = SimCharger::new("dc-charger");
    catalog.add(dc.clone());
    let wired = SimCharger::new("wired-pps");
    wired.set_prop(PropertyKey::Online, OnlineLevel::Raw.as_raw());
    wired.grant_pps_window(9_800_000, 4_000_000);
    catalog.add(wired.clone());

    let vote = SimVote::new();
    let store = Arc::new(MemoryStore::new());
    let arbiter = ChargeArbiter::new(config, catalog, vote.clone(), store).unwrap();
    arbiter.start();

    Rig {
        arbiter,
        main,
        dc,
        wired,
        vote,
        _log_dir: log_dir,
    }
}

/// Follow the snapshot stream until `pred` holds. The paused clock only
/// moves through the loops' own timers, so a stuck arbiter trips the
/// timeout instead of hanging the test.
async fn wait_for(
    rx: &mut watch::Receiver<Arc<ArbiterSnapshot>>,
    what: &str,
    mut pred: impl FnMut(&ArbiterSnapshot) -> bool,
) -> Arc<ArbiterSnapshot> {
    let observed = async {
        loop {
            let snap = rx.borrow_and_update().clone();
            if pred(&snap) {
                return snap;
            }
            if rx.changed().await.is_err() {
                panic!("snapshot stream closed waiting for {what}");
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(120), observed).await {
        Ok(snap) => snap,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

#[tokio::test(start_paused = true)]
async fn demand_drives_session_to_passthrough_and_disconnect_unwinds() {
    let r = rig();
    r.arbiter.wait_ready(Duration::from_secs(30)).await.unwrap();
    assert_eq!(r.arbiter.phase(), ArbiterPhase::Ready);

    let mut snaps = r.arbiter.subscribe_snapshot();
    let mut status = r.arbiter.subscribe_status();

    // The upstream policy posts its charge targets.
    r.arbiter
        .set_property(PropertyKey::ConstantChargeCurrentMax, CC_UA)
        .await
        .unwrap();
    r.arbiter
        .set_property(PropertyKey::ConstantChargeVoltageMax, FV_UV)
        .await
        .unwrap();

    let snap = wait_for(&mut snaps, "passthrough", |s| {
        s.dc_state == DcState::Passthrough.code()
    })
    .await;
    assert_eq!(snap.selected_index, 1);
    assert_eq!(snap.active_source.as_deref(), Some("dc-charger"));
    assert_eq!(snap.pps_port.as_deref(), Some("wired"));
    assert_eq!(snap.out_uv, 8_300_000);
    assert_eq!(snap.session_count, 1);
    assert!(snap.session_id.is_some());
    assert_eq!(r.vote.last(), Some(true));

    // The engine was programmed before its source went online, and the
    // supply carries the requested operating point.
    assert!(
        r.dc.writes()
            .contains(&(PropertyKey::ConstantChargeVoltageMax, FV_UV))
    );
    assert_eq!(r.wired.prop(PropertyKey::VoltageNow), Some(8_300_000));

    // The status stream mirrors the snapshots as JSON lines.
    let line = loop {
        match status.recv().await {
            Ok(line) => break line,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(e) => panic!("status stream closed: {e}"),
        }
    };
    let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert!(parsed.get("dc_state").is_some());
    assert!(parsed.get("phase").is_some());
    assert!(parsed.get("session_count").is_some());

    // Disconnect: the session unwinds and the default path carries again.
    r.arbiter
        .set_property(PropertyKey::ChargeDisable, 1)
        .await
        .unwrap();
    let snap = wait_for(&mut snaps, "teardown to idle", |s| {
        s.dc_state == DcState::Idle.code() && s.selected_index == 0
    })
    .await;
    assert_eq!(snap.active_source.as_deref(), Some("main-charger"));
    assert!(snap.session_id.is_none());
    assert_eq!(r.vote.last(), Some(false));
    assert_eq!(r.main.prop(PropertyKey::Online), Some(1));
}

#[tokio::test(start_paused = true)]
async fn shutdown_parks_an_open_session() {
    let r = rig();
    r.arbiter.wait_ready(Duration::from_secs(30)).await.unwrap();

    let mut snaps = r.arbiter.subscribe_snapshot();
    r.arbiter
        .set_property(PropertyKey::ConstantChargeCurrentMax, CC_UA)
        .await
        .unwrap();
    r.arbiter
        .set_property(PropertyKey::ConstantChargeVoltageMax, FV_UV)
        .await
        .unwrap();
    wait_for(&mut snaps, "passthrough", |s| {
        s.dc_state == DcState::Passthrough.code()
    })
    .await;

    r.arbiter.shutdown().await;

    assert_eq!(r.arbiter.phase(), ArbiterPhase::ShuttingDown);
    let snap = r.arbiter.snapshot();
    assert_eq!(snap.dc_state, DcState::Disabled.code());
    assert_eq!(r.vote.last(), Some(false));
    assert_eq!(r.main.prop(PropertyKey::Online), Some(1));
}

#[tokio::test(start_paused = true)]
async fn missing_programmable_supply_starts_degraded_and_settles_direct_charge() {
    let log_dir = tempfile::tempdir().unwrap();
    let config = test_config(log_dir.path());

    // The wired supply never appears; discovery burns its retry budget and
    // starts without it.
    let catalog = SimCatalog::new();
    let main = SimCharger::new("main-charger");
    main.set_prop(PropertyKey::VoltageNow, 3_900_000);
    catalog.add(main.clone());
    let dc = SimCharger::new("dc-charger");
    catalog.add(dc);

    let vote = SimVote::new();
    let store = Arc::new(MemoryStore::new());
    let arbiter = ChargeArbiter::new(config, catalog, vote.clone(), store).unwrap();
    arbiter.start();

    arbiter.wait_ready(Duration::from_secs(60)).await.unwrap();
    let mut snaps = arbiter.subscribe_snapshot();

    arbiter
        .set_property(PropertyKey::ConstantChargeCurrentMax, CC_UA)
        .await
        .unwrap();
    arbiter
        .set_property(PropertyKey::ConstantChargeVoltageMax, FV_UV)
        .await
        .unwrap();

    // The policy wants direct charge, but with no programmable supply the
    // question is settled for this battery session without a negotiation.
    let snap = wait_for(&mut snaps, "direct charge settled off", |s| {
        s.dc_state == DcState::Disabled.code()
    })
    .await;
    assert_eq!(snap.selected_index, 0);
    assert_eq!(snap.session_count, 0);
    assert_eq!(snap.active_source.as_deref(), Some("main-charger"));
    assert_eq!(vote.last(), None);
}
