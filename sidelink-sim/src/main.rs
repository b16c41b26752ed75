//! Synthetic-channel driver for the sidelink scheduler.
//!
//! Generates neighbour terminals with periodic reservations, feeds what
//! they transmit into the scheduler's sensing buffer, and asks for a
//! transmission plan every step. In external mode a scripted in-process
//! policy answers over a loopback transport.
//!
//! ```text
//! sidelink-sim [config.json]
//! RUST_LOG=sidelink_core=debug sidelink-sim sim.json
//! ```
//!
//! Prints a JSON summary on stdout; logs go to stderr.

use std::error::Error;
use std::fs;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sidelink_core::allocator::SlotPick;
use sidelink_core::config::{DecisionMode, SchedulerConfig};
use sidelink_core::encoding::{encode_instructions, SelectionInstructions};
use sidelink_core::protocol::{Operation, PolicyReply};
use sidelink_core::types::{LogicalChannel, SensedReservation, SlotIndex, SlotInfo, TransmissionPlan};
use sidelink_handoff::{LoopbackTransport, SchedulerStats, SidelinkScheduler};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Scripted policy behaviour in external mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PolicyScript {
    /// Names exact slots and sub-bands.
    Overwrite,
    /// Only sets the transmission count.
    Fallback,
    /// Never answers; every opportunity degrades to random selection.
    Silent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct SimConfig {
    scheduler: SchedulerConfig,
    steps: u32,
    /// Slots between scheduling opportunities.
    step_slots: u64,
    seed: u64,
    neighbours: u16,
    /// Chance that a window sub-band is already taken by the local terminal.
    busy_probability: f64,
    buffer_bytes: u32,
    policy: PolicyScript,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            steps: 50,
            step_slots: 20,
            seed: 1,
            neighbours: 8,
            busy_probability: 0.05,
            buffer_bytes: 200,
            policy: PolicyScript::Overwrite,
        }
    }
}

/// A neighbour transmitting once per reservation period.
#[derive(Debug, Clone, Copy)]
struct Neighbour {
    src_id: u16,
    phase: u64,
    sub_band_start: u8,
    sub_band_len: u8,
    rsrp_dbm: f64,
}

#[derive(Debug, Serialize)]
struct PlanSummary {
    now: SlotIndex,
    slots: Vec<SlotIndex>,
    sub_band_start: u8,
    sub_band_len: u8,
    tb_size_bytes: u32,
}

impl PlanSummary {
    fn new(now: SlotIndex, plan: &TransmissionPlan) -> Self {
        let first = plan.entries.first();
        Self {
            now,
            slots: plan.slots(),
            sub_band_start: first.map_or(0, |e| e.sub_band_start),
            sub_band_len: plan.assigned_sub_bands,
            tb_size_bytes: plan.tb_size_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    mode: DecisionMode,
    opportunities: u64,
    plans: u64,
    empty_candidate_sets: u64,
    saturations: u64,
    fallbacks: u64,
    sensed: u64,
    expired: u64,
    errors: u64,
    plan_log: Vec<PlanSummary>,
}

impl Summary {
    fn new(mode: DecisionMode, stats: SchedulerStats, errors: u64, plan_log: Vec<PlanSummary>) -> Self {
        Self {
            mode,
            opportunities: stats.opportunities,
            plans: stats.plans,
            empty_candidate_sets: stats.empty_candidate_sets,
            saturations: stats.saturations,
            fallbacks: stats.fallbacks,
            sensed: stats.sensed,
            expired: stats.expired,
            errors,
            plan_log,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading config");
            serde_json::from_str::<SimConfig>(&fs::read_to_string(&path)?)?
        }
        None => SimConfig::default(),
    };

    let summary = run(&config)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run(config: &SimConfig) -> Result<Summary, Box<dyn Error>> {
    let sched_cfg = &config.scheduler;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let scheduler_rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let mut scheduler = match sched_cfg.decision_mode {
        DecisionMode::Random => SidelinkScheduler::new(sched_cfg.clone(), scheduler_rng)?,
        DecisionMode::External => {
            let transport = scripted_policy(config, StdRng::seed_from_u64(config.seed.wrapping_add(2)));
            SidelinkScheduler::with_policy(sched_cfg.clone(), scheduler_rng, Box::new(transport))?
        }
    }
    .with_terminal_id(1);

    // sub-band counts are validated by now
    let period = u64::from(sched_cfg.reservation_period_slots());
    let neighbours = spawn_neighbours(&mut rng, config.neighbours, sched_cfg.total_sub_bands, period);

    // Start with a full sensing window behind us.
    let mut sensed_until = 0;
    let mut now = sched_cfg.sensing_window_slots();
    let mut errors = 0;
    let mut plan_log = Vec::new();

    for _ in 0..config.steps {
        for (slot, n) in transmissions(&neighbours, period, sensed_until, now) {
            scheduler.on_sensed(now, sensed(n, slot, period))?;
        }
        sensed_until = now;

        let window = build_window(&mut rng, now, sched_cfg, config.busy_probability);
        let lc = LogicalChannel {
            lcid: 4,
            priority: 1,
            buffer_bytes: config.buffer_bytes,
        };
        match scheduler.schedule(now, &window, 255, lc) {
            Ok(Some(plan)) => {
                debug!(now, slots = ?plan.slots(), "planned");
                plan_log.push(PlanSummary::new(now, &plan));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(now, error = %e, "opportunity failed");
                errors += 1;
            }
        }
        now += config.step_slots;
    }

    let stats = scheduler.stats();
    info!(
        opportunities = stats.opportunities,
        plans = stats.plans,
        fallbacks = stats.fallbacks,
        "run complete"
    );
    Ok(Summary::new(sched_cfg.decision_mode, stats, errors, plan_log))
}

fn spawn_neighbours<R: Rng>(rng: &mut R, count: u16, total_sub_bands: u8, period: u64) -> Vec<Neighbour> {
    (0..count)
        .map(|i| {
            let sub_band_len = rng.gen_range(1..=total_sub_bands.min(2));
            Neighbour {
                src_id: 100 + i,
                phase: rng.gen_range(0..period),
                sub_band_start: rng.gen_range(0..=total_sub_bands - sub_band_len),
                sub_band_len,
                rsrp_dbm: rng.gen_range(-125.0..-70.0),
            }
        })
        .collect()
}

/// Neighbour transmissions in `(from, to]`.
fn transmissions(neighbours: &[Neighbour], period: u64, from: SlotIndex, to: SlotIndex) -> Vec<(SlotIndex, Neighbour)> {
    let mut out = Vec::new();
    for n in neighbours {
        // first slot > from that is congruent to the phase
        let mut slot = from - from % period + n.phase;
        if slot <= from {
            slot += period;
        }
        while slot <= to {
            out.push((slot, *n));
            slot += period;
        }
    }
    out.sort_by_key(|(slot, _)| *slot);
    out
}

fn sensed(n: Neighbour, slot: SlotIndex, period: u64) -> SensedReservation {
    SensedReservation {
        src_id: n.src_id,
        retx_counter: 1,
        slot,
        sub_band_start: n.sub_band_start,
        sub_band_len: n.sub_band_len,
        rsrp_dbm: n.rsrp_dbm,
        corrupt: false,
        reservation_period_slots: u16::try_from(period).unwrap_or(u16::MAX),
    }
}

/// Slots `now + t1 ..= now + t2`, with the local terminal's own traffic
/// scattered across them.
fn build_window<R: Rng>(rng: &mut R, now: SlotIndex, cfg: &SchedulerConfig, busy_probability: f64) -> Vec<SlotInfo> {
    (now + u64::from(cfg.t1)..=now + u64::from(cfg.t2))
        .map(|slot| {
            let mut info = SlotInfo::free(slot, cfg.sub_band_size);
            for sb in 0..cfg.total_sub_bands {
                if rng.gen_bool(busy_probability) {
                    info.occupied_sub_bands.insert(sb);
                }
            }
            info
        })
        .collect()
}

/// In-process policy answering resource selections per `config.policy`.
///
/// Offsets stay below the exclusion yield floor, so they always index into
/// a non-empty candidate set.
fn scripted_policy(config: &SimConfig, mut rng: StdRng) -> LoopbackTransport {
    let script = config.policy;
    let cfg = &config.scheduler;
    let window_len = u32::from(cfg.t2 - cfg.t1) + 1;
    let floor = (window_len * u32::from(cfg.resource_percentage) / 100).clamp(1, u32::from(u8::MAX));
    let max_offset = u8::try_from(floor).unwrap_or(u8::MAX);
    let max_repeats = cfg.max_repeats;
    let total_sub_bands = cfg.total_sub_bands;

    LoopbackTransport::answering(move |req| {
        if req.op != Operation::ResourceSelections {
            return None;
        }
        let instructions = match script {
            PolicyScript::Silent => return None,
            PolicyScript::Fallback => SelectionInstructions::Fallback {
                target_tx: rng.gen_range(1..=max_repeats),
            },
            PolicyScript::Overwrite => {
                let total_tx = rng.gen_range(1..=max_repeats);
                let picks = (0..total_tx)
                    .map(|_| SlotPick {
                        offset: rng.gen_range(0..max_offset),
                        sub_band: rng.gen_range(0..total_sub_bands),
                    })
                    .collect();
                SelectionInstructions::Overwrite { total_tx, picks }
            }
        };
        let mut reply = PolicyReply::new(req.op, req.request_id);
        match encode_instructions(&instructions) {
            Ok(encoded) => reply.instructions = encoded,
            Err(e) => {
                warn!(error = %e, "scripted policy produced unencodable instructions");
                return None;
            }
        }
        Some(reply)
    })
}
