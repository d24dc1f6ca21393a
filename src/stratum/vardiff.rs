//! Per-session variable difficulty
//!
//! Retargets each session toward one qualifying share per
//! `target_time_secs`. The first few retargets run in a warmup mode with
//! an uncapped upward ratio and aggressive blending so high-hashrate
//! miners converge in one or two steps; after that the ratio is clamped
//! and damped 50/50 to prevent oscillation. A session flooding shares
//! retargets early; a silent one halves on every window that expires.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Vardiff tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VardiffConfig {
    /// Hard difficulty floor
    pub min_diff: f64,
    /// Difficulty for brand-new sessions (falls back to `min_diff` when 0)
    pub start_diff: f64,
    /// Difficulty ceiling; 0 means unbounded
    pub max_diff: f64,
    /// Desired seconds per qualifying share
    pub target_time_secs: u64,
    /// Nominal retarget window length in seconds
    pub retarget_time_secs: u64,
    /// Acceptable deviation around the target, in percent
    pub variance_pct: f64,
}

impl Default for VardiffConfig {
    fn default() -> Self {
        Self {
            min_diff: 0.001,
            start_diff: 1000.0,
            max_diff: 0.0,
            target_time_secs: 15,
            retarget_time_secs: 90,
            variance_pct: 30.0,
        }
    }
}

/// Per-session retarget state.
#[derive(Debug, Clone)]
pub struct VardiffState {
    last_retarget: Instant,
    shares_in_window: u32,
    retarget_count: u32,
}

/// Number of retargets that run in warmup mode.
const WARMUP_RETARGETS: u32 = 3;

/// Flood detection: qualifying-share rate above this multiple of the
/// target rate triggers an early retarget.
const FLOOD_RATIO: f64 = 3.0;

/// Minimum data before a flood retarget fires.
const FLOOD_MIN_ELAPSED_SECS: f64 = 5.0;

/// Changes smaller than this fraction are suppressed.
const MIN_CHANGE_FRACTION: f64 = 0.05;

/// Evaluates retargets for miner sessions.
#[derive(Debug, Clone)]
pub struct VardiffController {
    config: VardiffConfig,
}

impl VardiffController {
    /// Create a controller with the given tuning.
    pub fn new(config: VardiffConfig) -> Self {
        Self { config }
    }

    /// The controller's configuration.
    pub fn config(&self) -> &VardiffConfig {
        &self.config
    }

    /// The retarget window, used by sessions as their read deadline so
    /// idle connections still pulse vardiff.
    pub fn retarget_interval(&self) -> Duration {
        Duration::from_secs(self.config.retarget_time_secs)
    }

    /// Initial difficulty for new sessions.
    pub fn start_diff(&self) -> f64 {
        if self.config.start_diff > 0.0 {
            self.config.start_diff
        } else {
            self.config.min_diff
        }
    }

    /// Start difficulty keyed off the miner's user-agent. Known
    /// low-hashrate devices start at the floor instead of waiting for
    /// vardiff to ramp all the way down.
    pub fn start_diff_for_user_agent(&self, user_agent: &str) -> f64 {
        let ua = user_agent.to_lowercase();
        if ua.contains("nerdminer") {
            // ~500 H/s; needs the absolute minimum
            self.config.min_diff
        } else {
            self.start_diff()
        }
    }

    /// Fresh state for a new session.
    pub fn new_state(&self) -> VardiffState {
        VardiffState {
            last_retarget: Instant::now(),
            shares_in_window: 0,
            retarget_count: 0,
        }
    }

    /// Count a share that met session difficulty. Sub-target shares are
    /// excluded so miners grinding at ASIC difficulty don't inflate the
    /// measured rate.
    pub fn record_qualifying_share(&self, state: &mut VardiffState) {
        state.shares_in_window += 1;
    }

    /// Evaluate a retarget. Returns the new difficulty when it should
    /// change. `floor_diff` is an extra floor (from
    /// `mining.suggest_difficulty`); vardiff never drops below
    /// `max(min_diff, floor_diff)`.
    pub fn check_retarget(
        &self,
        state: &mut VardiffState,
        current_diff: f64,
        floor_diff: f64,
    ) -> Option<f64> {
        let elapsed = state.last_retarget.elapsed().as_secs_f64().max(0.001);
        let retarget_interval = self.config.retarget_time_secs as f64;
        let target_time = self.config.target_time_secs as f64;
        let floor = self.config.min_diff.max(floor_diff);

        let shares_per_sec = state.shares_in_window as f64 / elapsed;
        let flood_ratio = shares_per_sec * target_time;
        let is_flooding = flood_ratio > FLOOD_RATIO && elapsed >= FLOOD_MIN_ELAPSED_SECS;
        let normal_retarget = elapsed >= retarget_interval;

        if !is_flooding && !normal_retarget {
            return None;
        }

        if state.shares_in_window == 0 {
            // Silent window: halve toward the floor
            let new_diff = (current_diff / 2.0).max(floor);
            state.last_retarget = Instant::now();
            state.retarget_count += 1;
            return (new_diff != current_diff).then_some(new_diff);
        }

        let actual_time_per_share = elapsed / state.shares_in_window as f64;

        if normal_retarget && !is_flooding {
            let lower = target_time * (1.0 - self.config.variance_pct / 100.0);
            let upper = target_time * (1.0 + self.config.variance_pct / 100.0);
            if actual_time_per_share >= lower && actual_time_per_share <= upper {
                state.last_retarget = Instant::now();
                state.shares_in_window = 0;
                state.retarget_count += 1;
                return None;
            }
        }

        let mut ratio = target_time / actual_time_per_share;
        let warmup = state.retarget_count < WARMUP_RETARGETS;
        if warmup {
            // Uncapped upward: jump straight to where the hashrate says
            ratio = ratio.max(0.25);
        } else {
            ratio = ratio.clamp(0.5, 2.0);
        }

        let ideal = current_diff * ratio;
        let mut new_diff = if warmup {
            0.25 * current_diff + 0.75 * ideal
        } else {
            0.5 * current_diff + 0.5 * ideal
        };

        new_diff = new_diff.max(floor);
        if self.config.max_diff > 0.0 {
            new_diff = new_diff.min(self.config.max_diff);
        }

        state.last_retarget = Instant::now();
        state.shares_in_window = 0;
        state.retarget_count += 1;

        if ((new_diff - current_diff).abs() / current_diff) < MIN_CHANGE_FRACTION {
            return None;
        }

        Some(new_diff)
    }
}
