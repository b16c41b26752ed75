//! End-to-end scheduling opportunities through `SidelinkScheduler`.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use sidelink_core::config::{DecisionMode, SchedulerConfig};
use sidelink_core::exclusion::ExclusionStrategy;
use sidelink_core::protocol::{Operation, PolicyReply, PolicyRequest};
use sidelink_core::types::{LogicalChannel, SensedReservation, SlotInfo};
use sidelink_core::SchedError;
use sidelink_handoff::sideband::{INSTRUCTIONS_FILE, SRC_ID_FILE};
use sidelink_handoff::{HandoffError, LoopbackTransport, SidelinkScheduler};

const NOW: u64 = 10_000;

fn window() -> Vec<SlotInfo> {
    (NOW + 2..NOW + 34).map(|s| SlotInfo::free(s, 10)).collect()
}

fn channel(buffer: u32) -> LogicalChannel {
    LogicalChannel {
        lcid: 4,
        priority: 1,
        buffer_bytes: buffer,
    }
}

fn external_config(operator: &str) -> SchedulerConfig {
    SchedulerConfig {
        decision_mode: DecisionMode::External,
        operator_id: operator.into(),
        reply_timeout_ms: 20,
        ..SchedulerConfig::default()
    }
}

fn reservation(slot: u64, rsrp_dbm: f64) -> SensedReservation {
    SensedReservation {
        src_id: 33,
        retx_counter: 1,
        slot,
        sub_band_start: 0,
        sub_band_len: 5,
        rsrp_dbm,
        corrupt: false,
        reservation_period_slots: 400,
    }
}

/// Answers resource selections with `instructions`, logs every operation.
fn scripted_policy(instructions: &'static str, log: Arc<Mutex<Vec<PolicyRequest>>>) -> LoopbackTransport {
    LoopbackTransport::new(move |req| {
        log.lock().unwrap().push(req.clone());
        if req.op != Operation::ResourceSelections {
            return Vec::new();
        }
        let mut rep = PolicyReply::new(req.op, req.request_id);
        rep.instructions = instructions.into();
        vec![rep]
    })
}

// ─── Random mode ───────────────────────────────────────────────────────

#[test]
fn random_mode_plans_within_window() {
    let mut sched = SidelinkScheduler::new(SchedulerConfig::default(), StdRng::seed_from_u64(1)).unwrap();
    let win = window();
    let plan = sched.schedule(NOW, &win, 255, channel(50)).unwrap().unwrap();
    assert_eq!(plan.entries.len(), 2);
    assert!(plan.slots().iter().all(|s| win.iter().any(|w| w.slot == *s)));
    let stats = sched.stats();
    assert_eq!((stats.opportunities, stats.plans), (1, 1));
}

#[test]
fn random_mode_avoids_sensed_collision() {
    let mut sched = SidelinkScheduler::new(SchedulerConfig::default(), StdRng::seed_from_u64(2)).unwrap();
    // each sensed reservation reappears 400 slots later on a window slot
    for s in (NOW + 2..NOW + 20).step_by(2) {
        sched.on_sensed(NOW, reservation(s - 400, -60.0)).unwrap();
    }
    for _ in 0..10 {
        let plan = sched.schedule(NOW, &window(), 255, channel(50)).unwrap().unwrap();
        for slot in plan.slots() {
            assert!(!(slot < NOW + 20 && (slot - NOW) % 2 == 0), "collided on {slot}");
        }
    }
}

#[test]
fn empty_buffer_is_no_transmission() {
    let mut sched = SidelinkScheduler::new(SchedulerConfig::default(), StdRng::seed_from_u64(3)).unwrap();
    assert!(sched.schedule(NOW, &window(), 255, channel(0)).unwrap().is_none());
}

#[test]
fn saturated_channel_is_no_transmission() {
    let cfg = SchedulerConfig {
        resource_percentage: 100,
        exclusion_strategy: Some(ExclusionStrategy::WholeSlot),
        ..SchedulerConfig::default()
    };
    let mut sched = SidelinkScheduler::new(cfg, StdRng::seed_from_u64(4)).unwrap();
    let win = window();
    for s in &win {
        sched.on_sensed(NOW, reservation(s.slot - 400, 5.0)).unwrap();
    }
    assert!(sched.schedule(NOW, &win, 255, channel(50)).unwrap().is_none());
    let stats = sched.stats();
    assert_eq!(stats.empty_candidate_sets, 1);
    assert_eq!(stats.saturations, 1);
}

#[test]
fn future_sensing_rejected() {
    let mut sched = SidelinkScheduler::new(SchedulerConfig::default(), StdRng::seed_from_u64(5)).unwrap();
    let err = sched.on_sensed(NOW, reservation(NOW + 1, -90.0)).unwrap_err();
    assert!(matches!(err, HandoffError::Core(SchedError::Sensing(_))));
}

#[test]
fn mode_and_transport_must_agree() {
    assert!(SidelinkScheduler::new(external_config("sf0"), StdRng::seed_from_u64(0)).is_err());
    let transport = Box::new(LoopbackTransport::answering(|_| None));
    assert!(SidelinkScheduler::with_policy(SchedulerConfig::default(), StdRng::seed_from_u64(0), transport).is_err());
}

// ─── External mode ─────────────────────────────────────────────────────

#[test]
fn overwrite_instructions_drive_the_plan() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = Box::new(scripted_policy("1205031204", Arc::clone(&log)));
    let mut sched = SidelinkScheduler::with_policy(external_config("sf1"), StdRng::seed_from_u64(6), transport)
        .unwrap()
        .with_terminal_id(9);
    let win = window();
    let plan = sched.schedule(NOW, &win, 255, channel(50)).unwrap().unwrap();
    let got: Vec<(u64, u8)> = plan.entries.iter().map(|e| (e.slot, e.sub_band_start)).collect();
    assert_eq!(got, vec![(win[5].slot, 3), (win[12].slot, 4)]);

    let log = log.lock().unwrap();
    let ops: Vec<Operation> = log.iter().map(|r| r.op).collect();
    assert_eq!(ops, vec![Operation::SensingData, Operation::ResourceSelections]);
    assert_eq!(log[0].terminal_id, 9);
    assert!(log[0].first_call);
}

#[test]
fn fallback_instructions_set_transmission_count() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = Box::new(scripted_policy("21", log));
    let mut sched =
        SidelinkScheduler::with_policy(external_config("sf2"), StdRng::seed_from_u64(7), transport).unwrap();
    let plan = sched.schedule(NOW, &window(), 255, channel(50)).unwrap().unwrap();
    assert_eq!(plan.entries.len(), 1);
}

#[test]
fn silent_policy_degrades_to_random() {
    let transport = Box::new(LoopbackTransport::answering(|_| None));
    let mut sched =
        SidelinkScheduler::with_policy(external_config("sf3"), StdRng::seed_from_u64(8), transport).unwrap();
    let plan = sched.schedule(NOW, &window(), 255, channel(50)).unwrap().unwrap();
    assert_eq!(plan.entries.len(), 2);
    assert_eq!(sched.stats().fallbacks, 1);
}

#[test]
fn malformed_reply_is_fatal_to_the_opportunity() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = Box::new(scripted_policy("9x", log));
    let mut sched =
        SidelinkScheduler::with_policy(external_config("sf4"), StdRng::seed_from_u64(9), transport).unwrap();
    let err = sched.schedule(NOW, &window(), 255, channel(50)).unwrap_err();
    assert!(matches!(err, HandoffError::Core(SchedError::Instruction(_))));
    assert_eq!(sched.stats().plans, 0);
}

#[test]
fn sensing_report_carries_first_pass_observations() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = Box::new(scripted_policy("21", Arc::clone(&log)));
    let mut sched =
        SidelinkScheduler::with_policy(external_config("sf5"), StdRng::seed_from_u64(10), transport).unwrap();
    sched.on_sensed(NOW, reservation(NOW + 3 - 400, -90.0)).unwrap();
    sched.schedule(NOW, &window(), 255, channel(50)).unwrap();
    sched.schedule(NOW, &window(), 255, channel(50)).unwrap();

    let log = log.lock().unwrap();
    let reports: Vec<&PolicyRequest> = log.iter().filter(|r| r.op == Operation::SensingData).collect();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].observations.len(), 1);
    let obs = reports[0].observations[0];
    assert_eq!(obs.src_id, 33);
    assert_eq!(u64::from(obs.slot), (NOW + 3) % 100);
    assert!(reports[0].first_call);
    assert!(!reports[1].first_call);
}

#[test]
fn sideband_files_mirror_the_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SchedulerConfig {
        sideband_dir: Some(dir.path().to_path_buf()),
        ..external_config("sf6")
    };
    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = Box::new(scripted_policy("22", log));
    let mut sched = SidelinkScheduler::with_policy(cfg, StdRng::seed_from_u64(11), transport).unwrap();
    sched.on_sensed(NOW, reservation(NOW + 3 - 400, -90.0)).unwrap();
    sched.schedule(NOW, &window(), 255, channel(50)).unwrap();

    let src = std::fs::read_to_string(dir.path().join(SRC_ID_FILE)).unwrap();
    assert_eq!(src, "1033\n");
    let ins = std::fs::read_to_string(dir.path().join(INSTRUCTIONS_FILE)).unwrap();
    assert_eq!(ins, "22\n");
}
