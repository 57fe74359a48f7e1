use parking_lot::Mutex;
use tracing::{debug, info};

const MIN_BATCH: usize = 5;
const MAX_BATCH: usize = 500;
const MAX_CONCURRENT_ABSOLUTE: usize = 100;

/// How the remote container is billed. Autoscale and serverless capacity can
/// absorb bursts, manual capacity cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityMode {
    Autoscale,
    Serverless,
    Manual,
}

impl CapacityMode {
    pub fn is_aggressive(&self) -> bool {
        matches!(self, CapacityMode::Autoscale | CapacityMode::Serverless)
    }

    pub fn safety_margin(&self) -> f64 {
        if self.is_aggressive() { 0.95 } else { 0.75 }
    }
}

/// All policy thresholds in one place, so operators can tune them without
/// touching the controller.
#[derive(Debug, Clone)]
pub struct ControllerTuning {
    /// Ops since the last throttle below which the controller is warming up.
    pub warmup_ops: u64,
    pub warmup_growth_every: u64,
    pub warmup_growth: f64,
    pub steady_growth_every: u64,
    pub steady_growth: f64,
    /// Consecutive throttles tolerated before an aggressive cut.
    pub aggressive_tolerance: u64,
    pub aggressive_cut: f64,
    pub warmup_cut: f64,
    /// Ops without a throttle beyond which a new throttle means saturation.
    pub saturation_ops: u64,
    pub saturated_cut: f64,
    pub conservative_growth_every: u64,
    pub conservative_growth: f64,
    pub conservative_tolerance: u64,
    pub conservative_cut: f64,
}

impl Default for ControllerTuning {
    fn default() -> Self {
        ControllerTuning {
            warmup_ops: 100,
            warmup_growth_every: 20,
            warmup_growth: 1.5,
            steady_growth_every: 30,
            steady_growth: 1.1,
            aggressive_tolerance: 5,
            aggressive_cut: 0.6,
            warmup_cut: 0.8,
            saturation_ops: 200,
            saturated_cut: 0.5,
            conservative_growth_every: 10,
            conservative_growth: 1.2,
            conservative_tolerance: 2,
            conservative_cut: 0.5,
        }
    }
}

struct State {
    current_batch: usize,
    max_concurrent: usize,
    consecutive_successes: u64,
    consecutive_throttles: u64,
    total_throttles: u64,
    ops_since_throttle: u64,
    /// Snapshot of `ops_since_throttle` when the current throttle streak began.
    streak_start_ops: u64,
}

/// Adaptive batch/concurrency controller fed by success and throttle events.
/// All accessors and reporters are mutually exclusive through one mutex.
pub struct ThrottleController {
    mode: CapacityMode,
    tuning: ControllerTuning,
    state: Mutex<State>,
}

impl ThrottleController {
    pub fn new(mode: CapacityMode, initial_batch: usize, max_concurrent: usize) -> Self {
        Self::with_tuning(mode, initial_batch, max_concurrent, ControllerTuning::default())
    }

    pub fn with_tuning(
        mode: CapacityMode,
        initial_batch: usize,
        max_concurrent: usize,
        tuning: ControllerTuning,
    ) -> Self {
        ThrottleController {
            mode,
            tuning,
            state: Mutex::new(State {
                current_batch: initial_batch.clamp(MIN_BATCH, MAX_BATCH),
                max_concurrent: max_concurrent.clamp(MIN_BATCH, MAX_BATCH),
                consecutive_successes: 0,
                consecutive_throttles: 0,
                total_throttles: 0,
                ops_since_throttle: 0,
                streak_start_ops: 0,
            }),
        }
    }

    /// Derives the initial batch size and concurrency from the provisioned
    /// capacity and the estimated per-document cost (`10 + 5 × avg_doc_kb`).
    pub fn sized_for(mode: CapacityMode, provisioned_ru: f64, avg_doc_kb: f64) -> Self {
        let available = provisioned_ru * mode.safety_margin();
        let ru_per_doc = 10.0 + 5.0 * avg_doc_kb;
        let size = (available / ru_per_doc) as usize;
        info!(?mode, provisioned_ru, avg_doc_kb, size, "sized throttle controller");
        Self::new(mode, size, size)
    }

    /// Concurrency tiers by document count, for when no throughput signal is
    /// available.
    pub fn concurrency_for_count(total_docs: usize) -> usize {
        let tier = match total_docs {
            0..1000 => 5,
            1000..10000 => 20,
            _ => 50,
        };
        tier.min(MAX_CONCURRENT_ABSOLUTE)
    }

    pub fn mode(&self) -> CapacityMode {
        self.mode
    }

    pub fn batch_size(&self) -> usize {
        self.state.lock().current_batch
    }

    pub fn concurrency(&self) -> usize {
        self.state.lock().max_concurrent
    }

    pub fn total_throttles(&self) -> u64 {
        self.state.lock().total_throttles
    }

    pub fn report_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_throttles = 0;
        state.consecutive_successes += 1;
        state.ops_since_throttle += 1;

        let t = &self.tuning;
        let (every, factor) = if self.mode.is_aggressive() {
            if state.ops_since_throttle <= t.warmup_ops {
                (t.warmup_growth_every, t.warmup_growth)
            } else {
                (t.steady_growth_every, t.steady_growth)
            }
        } else {
            (t.conservative_growth_every, t.conservative_growth)
        };

        if state.consecutive_successes % every == 0 {
            let grown = ((state.current_batch as f64 * factor) as usize).clamp(MIN_BATCH, MAX_BATCH);
            if grown != state.current_batch {
                debug!(from = state.current_batch, to = grown, "growing batch size");
                state.current_batch = grown;
            }
        }
    }

    pub fn report_throttle(&self) {
        let mut state = self.state.lock();
        if state.consecutive_throttles == 0 {
            state.streak_start_ops = state.ops_since_throttle;
        }
        state.consecutive_throttles += 1;
        state.total_throttles += 1;
        state.consecutive_successes = 0;
        state.ops_since_throttle = 0;

        let t = &self.tuning;
        let (tolerance, cut) = if self.mode.is_aggressive() {
            let cut = if state.streak_start_ops > t.saturation_ops {
                t.saturated_cut
            } else if state.streak_start_ops <= t.warmup_ops {
                t.warmup_cut
            } else {
                t.aggressive_cut
            };
            (t.aggressive_tolerance, cut)
        } else {
            (t.conservative_tolerance, t.conservative_cut)
        };

        if state.consecutive_throttles >= tolerance {
            let shrunk = ((state.current_batch as f64 * cut) as usize).clamp(MIN_BATCH, MAX_BATCH);
            info!(
                from = state.current_batch,
                to = shrunk,
                streak = state.consecutive_throttles,
                "cutting batch size after sustained throttling"
            );
            state.current_batch = shrunk;
            state.consecutive_throttles = 0;
        }
    }
}
