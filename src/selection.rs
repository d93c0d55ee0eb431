//! Source selection policy
//!
//! Pure decision function over demand, battery voltage and configured
//! thresholds. The session controller reads the battery voltage and passes
//! it in, so the same inputs always produce the same choice; the only state
//! consulted is the previous selection, which provides hysteresis near the
//! voltage floor and ceiling.

use crate::config::LimitsConfig;
use crate::registry::DEFAULT_INDEX;

/// Sentinel for a demand axis the upstream policy has not set yet.
pub const DEMAND_UNSET: i32 = -1;

/// Target charge current and float voltage from the upstream policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    /// Target charge current in microamps, [`DEMAND_UNSET`] when not set
    pub cc_max_ua: i32,
    /// Target float voltage in microvolts, [`DEMAND_UNSET`] when not set
    pub fv_uv: i32,
}

impl Default for Demand {
    fn default() -> Self {
        Self { cc_max_ua: DEMAND_UNSET, fv_uv: DEMAND_UNSET }
    }
}

impl Demand {
    pub fn is_set(&self) -> bool {
        self.cc_max_ua > 0 && self.fv_uv > 0
    }

    /// Battery power demand in mA*mV, the unit the demand limit is
    /// configured in.
    pub fn product(&self) -> i64 {
        (i64::from(self.cc_max_ua) / 1000) * (i64::from(self.fv_uv) / 1000)
    }
}

/// The controller's current selection, input to the next evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected {
    /// DC finished tapering this session; do not restart it.
    Done,
    /// Default wired path.
    Default,
    /// Direct charge through the given source index.
    Dc(usize),
}

impl Selected {
    pub fn is_dc(&self) -> bool {
        matches!(self, Self::Dc(_))
    }

    /// External index code: -1 finished, 0 default, >0 direct charge.
    pub fn index_code(&self) -> i32 {
        match self {
            Self::Done => -1,
            Self::Default => 0,
            Self::Dc(index) => *index as i32,
        }
    }

    /// Holding the previous selection: a finished session has no index to
    /// hold, so it degrades to a retry.
    fn hold(self) -> Choice {
        match self {
            Self::Done => Choice::RetryLater,
            Self::Default => Choice::Source(DEFAULT_INDEX),
            Self::Dc(index) => Choice::Source(index),
        }
    }
}

/// Policy output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Put this source index on the path.
    Source(usize),
    /// Conditions are not evaluable or too marginal; ask again later.
    RetryLater,
}

/// Live copies of the configured limits. Kept separate from the config so
/// the debug surface can adjust the demand limit at runtime.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Demand limit in mA*mV above which DC is preferred
    pub demand_limit: i64,
    pub vbatt_min_uv: i32,
    pub vbatt_low_uv: i32,
    pub vbatt_max_uv: i32,
    pub vbatt_high_uv: i32,
}

impl Thresholds {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            demand_limit: i64::from(limits.demand_threshold),
            vbatt_min_uv: limits.vbatt_min_uv,
            vbatt_low_uv: limits.vbatt_low_uv,
            vbatt_max_uv: limits.vbatt_max_uv,
            vbatt_high_uv: limits.vbatt_high_uv,
        }
    }

    /// Voltage rules apply only when a floor or ceiling is configured.
    pub fn voltage_configured(&self) -> bool {
        self.vbatt_min_uv != 0 || self.vbatt_max_uv != 0
    }
}

/// Operator overrides, consulted only at the top of the policy and never
/// written by the control loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    /// Force this source index regardless of demand or voltage.
    pub force_active: Option<usize>,
}

/// Decide which source should own the charging path.
///
/// Evaluation order: operator override first, then demand, then the
/// voltage window when thresholds are configured. A zero threshold
/// disables its individual rule. Near the floor and ceiling the previous
/// selection wins, so the choice does not flap on a noisy reading.
pub fn evaluate(
    overrides: &Overrides,
    demand: Demand,
    vbatt_uv: Option<i32>,
    thresholds: &Thresholds,
    prev: Selected,
    dc_index: Option<usize>,
    source_count: usize,
) -> Choice {
    if let Some(index) = overrides.force_active {
        return Choice::Source(index);
    }

    // Never enable DC without positive demand.
    if !demand.is_set() {
        return Choice::Source(DEFAULT_INDEX);
    }

    let Some(dc_index) = dc_index else {
        return Choice::Source(DEFAULT_INDEX);
    };

    let batt_demand = demand.product();
    let mut choice = if batt_demand > thresholds.demand_limit {
        Choice::Source(dc_index)
    } else {
        Choice::Source(DEFAULT_INDEX)
    };

    if thresholds.voltage_configured() {
        let Some(vbatt) = vbatt_uv else {
            // Cannot evaluate the window, hold what we have.
            tracing::warn!("battery voltage unreadable, holding previous selection");
            return prev.hold();
        };

        let min = thresholds.vbatt_min_uv;
        let low = thresholds.vbatt_low_uv;
        let max = thresholds.vbatt_max_uv;
        let high = thresholds.vbatt_high_uv;

        if low != 0 && vbatt < low {
            return Choice::RetryLater;
        }

        if min != 0 && vbatt < min {
            // Under the start floor DC may continue but not start.
            choice = match prev {
                Selected::Dc(index) => Choice::Source(index),
                Selected::Default | Selected::Done => Choice::RetryLater,
            };
        } else if max != 0 && vbatt > max {
            // Over the hard ceiling the default path is mandatory.
            choice = Choice::Source(DEFAULT_INDEX);
        } else if high != 0 && vbatt > high {
            // Between high and max DC may continue but not start.
            choice = prev.hold();
        } else if min != 0 && vbatt > min {
            choice = Choice::Source(dc_index);
        }

        tracing::debug!(
            ?choice,
            vbatt,
            low,
            min,
            high,
            max,
            "selection voltage window applied"
        );
    }

    if let Choice::Source(index) = choice {
        if index >= source_count {
            tracing::error!(index, source_count, "selected index out of bounds");
            return Choice::Source(DEFAULT_INDEX);
        }
    }

    tracing::debug!(?choice, batt_demand, limit = thresholds.demand_limit, "selection");
    choice
}
