// Threshold Monitor
//
// Sliding-window accounting of failures and outflow. Only the current window
// and the last archived window are kept. A breach is reported to the caller,
// which decides whether to trip the circuit breaker (see `protection`).

use crate::events::{self, MetricsReset, ThresholdConfigUpdated, EVENT_VERSION_V2};
use crate::Error;
use soroban_sdk::{contracttype, symbol_short, Address, Env, Symbol};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThresholdConfig {
    /// Failures per window that trip the breaker.
    pub failure_rate_threshold: u32,
    /// Maximum total outflow per window.
    pub outflow_volume_threshold: i128,
    /// Maximum amount for a single payout.
    pub max_single_payout: i128,
    pub time_window_secs: u64,
    /// Base cooldown before the breaker moves to HalfOpen.
    pub cooldown_period_secs: u64,
    /// Backoff factor applied per prior trip.
    pub cooldown_multiplier: u32,
}

impl ThresholdConfig {
    pub fn default_config() -> Self {
        ThresholdConfig {
            failure_rate_threshold: 10,
            outflow_volume_threshold: 5_000_000_0000000,
            max_single_payout: 500_000_0000000,
            time_window_secs: 600,
            cooldown_period_secs: 300,
            cooldown_multiplier: 2,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.failure_rate_threshold == 0 || self.failure_rate_threshold > 1000 {
            return Err(Error::InvalidThresholdConfig);
        }
        if self.outflow_volume_threshold <= 0 || self.max_single_payout <= 0 {
            return Err(Error::InvalidThresholdConfig);
        }
        if self.time_window_secs < 10 || self.time_window_secs > 86_400 {
            return Err(Error::InvalidThresholdConfig);
        }
        if self.cooldown_period_secs < 60 || self.cooldown_period_secs > 3_600 {
            return Err(Error::InvalidThresholdConfig);
        }
        if self.cooldown_multiplier < 1 {
            return Err(Error::InvalidThresholdConfig);
        }
        Ok(())
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WindowMetrics {
    pub window_start: u64,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_outflow: i128,
    pub max_single_outflow: i128,
    pub breach_count: u32,
}

impl WindowMetrics {
    pub fn new(window_start: u64) -> Self {
        WindowMetrics {
            window_start,
            failure_count: 0,
            success_count: 0,
            total_outflow: 0,
            max_single_outflow: 0,
            breach_count: 0,
        }
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThresholdBreach {
    /// "failure", "outflow" or "single".
    pub metric_type: Symbol,
    pub threshold_value: i128,
    pub actual_value: i128,
    pub timestamp: u64,
    pub breach_count: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ThresholdKey {
    Config,
    CurrentMetrics,
    PreviousMetrics,
}

pub fn init_threshold_monitor(env: &Env) {
    env.storage()
        .persistent()
        .set(&ThresholdKey::Config, &ThresholdConfig::default_config());
    env.storage().persistent().set(
        &ThresholdKey::CurrentMetrics,
        &WindowMetrics::new(env.ledger().timestamp()),
    );
}

/// Replaces the config after validation. On error the prior config stays.
pub fn set_threshold_config(env: &Env, config: ThresholdConfig) -> Result<(), Error> {
    config.validate()?;
    let previous = get_threshold_config(env);
    env.storage().persistent().set(&ThresholdKey::Config, &config);

    events::emit_threshold_config_updated(
        env,
        ThresholdConfigUpdated {
            version: EVENT_VERSION_V2,
            previous,
            current: config,
            timestamp: env.ledger().timestamp(),
        },
    );
    Ok(())
}

pub fn get_threshold_config(env: &Env) -> ThresholdConfig {
    env.storage()
        .persistent()
        .get(&ThresholdKey::Config)
        .unwrap_or(ThresholdConfig::default_config())
}

pub fn get_current_metrics(env: &Env) -> WindowMetrics {
    env.storage()
        .persistent()
        .get(&ThresholdKey::CurrentMetrics)
        .unwrap_or_else(|| WindowMetrics::new(env.ledger().timestamp()))
}

pub fn get_previous_metrics(env: &Env) -> Option<WindowMetrics> {
    env.storage().persistent().get(&ThresholdKey::PreviousMetrics)
}

fn save_metrics(env: &Env, metrics: &WindowMetrics) {
    env.storage()
        .persistent()
        .set(&ThresholdKey::CurrentMetrics, metrics);
}

/// Archives the current window and opens a fresh one starting now.
pub fn start_new_window(env: &Env) {
    let metrics = get_current_metrics(env);
    env.storage()
        .persistent()
        .set(&ThresholdKey::PreviousMetrics, &metrics);
    events::emit_window_rotated(env, metrics);
    save_metrics(env, &WindowMetrics::new(env.ledger().timestamp()));
}

/// Like [`start_new_window`], but the fresh window keeps the breach tally.
pub fn restart_window_after_breach(env: &Env) {
    let breach_count = get_current_metrics(env).breach_count;
    start_new_window(env);
    let mut metrics = get_current_metrics(env);
    metrics.breach_count = breach_count;
    save_metrics(env, &metrics);
}

pub fn rotate_window_if_needed(env: &Env) {
    let config = get_threshold_config(env);
    let metrics = get_current_metrics(env);
    let now = env.ledger().timestamp();

    if now.saturating_sub(metrics.window_start) >= config.time_window_secs {
        start_new_window(env);
    }
}

pub fn record_success(env: &Env, outflow: i128) {
    let mut metrics = get_current_metrics(env);
    metrics.success_count = metrics.success_count.saturating_add(1);
    if outflow > 0 {
        metrics.total_outflow = metrics.total_outflow.saturating_add(outflow);
        if outflow > metrics.max_single_outflow {
            metrics.max_single_outflow = outflow;
        }
    }
    save_metrics(env, &metrics);
}

pub fn record_failure(env: &Env) {
    let mut metrics = get_current_metrics(env);
    metrics.failure_count = metrics.failure_count.saturating_add(1);
    save_metrics(env, &metrics);
}

/// Evaluates the current window plus an attempted payout (0 when the call
/// moves nothing out).
pub fn check_thresholds(env: &Env, attempted_outflow: i128) -> Result<(), ThresholdBreach> {
    let config = get_threshold_config(env);
    let metrics = get_current_metrics(env);

    let breach = |metric_type: Symbol, threshold_value: i128, actual_value: i128| {
        ThresholdBreach {
            metric_type,
            threshold_value,
            actual_value,
            timestamp: env.ledger().timestamp(),
            breach_count: metrics.breach_count.saturating_add(1),
        }
    };

    if metrics.failure_count >= config.failure_rate_threshold {
        return Err(breach(
            symbol_short!("failure"),
            config.failure_rate_threshold as i128,
            metrics.failure_count as i128,
        ));
    }
    if metrics.total_outflow > config.outflow_volume_threshold {
        return Err(breach(
            symbol_short!("outflow"),
            config.outflow_volume_threshold,
            metrics.total_outflow,
        ));
    }
    let single = attempted_outflow.max(metrics.max_single_outflow);
    if single > config.max_single_payout {
        return Err(breach(
            symbol_short!("single"),
            config.max_single_payout,
            single,
        ));
    }
    Ok(())
}

/// Counts the breach against the current window and emits it.
pub fn record_breach(env: &Env, breach: &ThresholdBreach) {
    let mut metrics = get_current_metrics(env);
    metrics.breach_count = breach.breach_count;
    save_metrics(env, &metrics);
    events::emit_threshold_breach(env, breach.clone());
}

/// Zeroes the current window. Caller enforces admin auth.
pub fn reset_metrics(env: &Env, admin: &Address) {
    let now = env.ledger().timestamp();
    save_metrics(env, &WindowMetrics::new(now));
    events::emit_metrics_reset(
        env,
        MetricsReset {
            version: EVENT_VERSION_V2,
            admin: admin.clone(),
            timestamp: now,
        },
    );
}
