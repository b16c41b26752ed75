//! Per-opportunity scheduler driver.
//!
//! One call to [`SidelinkScheduler::schedule`] runs the whole pipeline:
//!
//! 1. expire stale sensing entries
//! 2. exclusion → candidate set (empty: no transmission this opportunity)
//! 3. external mode only: report observations, ask for instructions
//! 4. allocation → transmission plan
//!
//! A policy that does not answer in time is not fatal: the opportunity is
//! served with uniform-random selection instead. A reply that does not
//! parse is fatal to the opportunity.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use sidelink_core::allocator::{allocate, SelectionMode};
use sidelink_core::config::{DecisionMode, SchedulerConfig};
use sidelink_core::encoding::{decode_instructions, encode_observations};
use sidelink_core::exclusion::{select_candidates, ExclusionOutcome};
use sidelink_core::protocol::{Operation, PolicyRequest};
use sidelink_core::sensing::SensingBuffer;
use sidelink_core::types::{
    AllocationRequest, LogicalChannel, SensedReservation, SlotIndex, SlotInfo, TransmissionPlan,
};
use sidelink_core::SchedError;
use tracing::{debug, info, warn};

use crate::channel::{ChannelName, DecisionChannel};
use crate::errors::HandoffError;
use crate::sideband::SidebandDir;
use crate::transport::PolicyTransport;

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub opportunities: u64,
    pub plans: u64,
    /// Opportunities where exclusion left nothing.
    pub empty_candidate_sets: u64,
    /// Of those, how many hit the threshold ceiling.
    pub saturations: u64,
    /// Policy timeouts served with uniform-random selection.
    pub fallbacks: u64,
    pub sensed: u64,
    pub expired: u64,
}

pub struct SidelinkScheduler<R: Rng = StdRng> {
    config: SchedulerConfig,
    sensing: SensingBuffer,
    channel: Option<DecisionChannel<Box<dyn PolicyTransport>>>,
    sideband: Option<SidebandDir>,
    rng: R,
    terminal_id: u32,
    first_call: bool,
    stats: SchedulerStats,
}

impl<R: Rng> SidelinkScheduler<R> {
    /// Scheduler that draws slots itself.
    ///
    /// # Errors
    /// Config validation failures, or a config asking for an external policy.
    pub fn new(config: SchedulerConfig, rng: R) -> Result<Self, HandoffError> {
        config.validate()?;
        if config.decision_mode == DecisionMode::External {
            return Err(SchedError::Config(
                "external decision mode needs a policy transport".into(),
            )
            .into());
        }
        Self::build(config, rng, None)
    }

    /// Scheduler that consults a policy over `transport`.
    ///
    /// # Errors
    /// Config validation failures, a config not in external mode, or the
    /// channel name already being claimed in this process.
    pub fn with_policy(
        config: SchedulerConfig,
        rng: R,
        transport: Box<dyn PolicyTransport>,
    ) -> Result<Self, HandoffError> {
        config.validate()?;
        if config.decision_mode != DecisionMode::External {
            return Err(SchedError::Config(
                "a policy transport requires the external decision mode".into(),
            )
            .into());
        }
        let name = ChannelName::new(&config.decision_type, &config.operator_id)?;
        let channel = DecisionChannel::open(
            name,
            transport,
            Duration::from_millis(config.reply_timeout_ms),
        )?;
        Self::build(config, rng, Some(channel))
    }

    fn build(
        config: SchedulerConfig,
        rng: R,
        channel: Option<DecisionChannel<Box<dyn PolicyTransport>>>,
    ) -> Result<Self, HandoffError> {
        let sideband = match &config.sideband_dir {
            Some(dir) => Some(SidebandDir::new(dir.clone())?),
            None => None,
        };
        let sensing = SensingBuffer::new(config.sensing_window_slots(), config.sensing_capacity);
        info!(
            mode = ?config.decision_mode,
            strategy = ?config.effective_strategy(),
            sub_bands = config.total_sub_bands,
            "scheduler ready"
        );
        Ok(Self {
            config,
            sensing,
            channel,
            sideband,
            rng,
            terminal_id: 0,
            first_call: true,
            stats: SchedulerStats::default(),
        })
    }

    /// Identify this terminal in policy requests.
    pub fn with_terminal_id(mut self, terminal_id: u32) -> Self {
        self.terminal_id = terminal_id;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn sensing(&self) -> &SensingBuffer {
        &self.sensing
    }

    /// Ingest one sensed reservation.
    ///
    /// # Errors
    /// `SchedError::Sensing` for a reservation from the future.
    pub fn on_sensed(&mut self, now: SlotIndex, reservation: SensedReservation) -> Result<(), HandoffError> {
        self.sensing.record(now, reservation)?;
        self.stats.sensed += 1;
        Ok(())
    }

    /// Run one scheduling opportunity over `window`.
    ///
    /// `Ok(None)` means no transmission this time: the candidate set came
    /// out empty or the buffer is empty.
    ///
    /// # Errors
    /// Malformed policy replies, transport failures, and instructions that
    /// do not fit the candidate set.
    pub fn schedule(
        &mut self,
        now: SlotIndex,
        window: &[SlotInfo],
        dst_l2_id: u32,
        logical_channel: LogicalChannel,
    ) -> Result<Option<TransmissionPlan>, HandoffError> {
        self.stats.opportunities += 1;
        self.stats.expired += self.sensing.expire(now) as u64;

        let outcome = select_candidates(window, &self.sensing, &self.config.exclusion_params(), now);
        if outcome.candidates.is_empty() {
            self.stats.empty_candidate_sets += 1;
            if outcome.saturated {
                self.stats.saturations += 1;
            }
            debug!(now, saturated = outcome.saturated, "no candidates this opportunity");
            return Ok(None);
        }
        if logical_channel.buffer_bytes == 0 {
            return Ok(None);
        }

        let mode = match self.config.decision_mode {
            DecisionMode::Random => SelectionMode::UniformRandom,
            DecisionMode::External => self.consult_policy(now, &outcome)?,
        };

        let request = AllocationRequest {
            dst_l2_id,
            mcs: self.config.mcs,
            logical_channel,
            max_repeats: self.config.max_repeats,
        };
        let plan = allocate(
            &outcome.candidates,
            &request,
            &mode,
            self.config.total_sub_bands,
            &mut self.rng,
        )?;
        if plan.is_some() {
            self.stats.plans += 1;
        }
        Ok(plan)
    }

    fn consult_policy(&mut self, now: SlotIndex, outcome: &ExclusionOutcome) -> Result<SelectionMode, HandoffError> {
        let channel = self.channel.as_mut().ok_or_else(|| {
            HandoffError::Core(SchedError::Config("no decision channel".into()))
        })?;

        let mut report = PolicyRequest::new(Operation::SensingData, 0);
        report.terminal_id = self.terminal_id;
        report.time_ms = now as f64 / f64::from(self.config.slots_per_ms());
        report.rsrp_threshold_dbm = outcome.final_threshold_dbm;
        report.occupied_resources = outcome.excluded_count;
        report.first_call = self.first_call;
        report.observations = outcome.observations.clone();
        channel.notify(&report)?;
        self.first_call = false;

        if let Some(sideband) = &self.sideband {
            match encode_observations(&outcome.observations) {
                Ok(encoded) => sideband.write_observations(&encoded)?,
                Err(e) => warn!(error = %e, "observations exceed legacy widths, sideband mirror skipped"),
            }
        }

        let mut ask = PolicyRequest::new(Operation::ResourceSelections, 0);
        ask.terminal_id = self.terminal_id;
        ask.time_ms = report.time_ms;
        match channel.call(&ask) {
            Ok(reply) => {
                if let Some(sideband) = &self.sideband {
                    sideband.write_instructions(&reply.instructions)?;
                }
                let instructions = decode_instructions(&reply.instructions)?;
                debug!(?instructions, "policy instructions");
                Ok(instructions.into_selection_mode())
            }
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "policy unavailable, falling back to uniform-random selection");
                self.stats.fallbacks += 1;
                Ok(SelectionMode::UniformRandom)
            }
            Err(e) => Err(e),
        }
    }
}
