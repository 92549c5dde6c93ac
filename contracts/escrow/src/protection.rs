//! Glue between the threshold monitor and the circuit breaker.
//!
//! Every protected entry point calls [`before_call`] after authorization and
//! record lookup, and [`after_success`] once its transfer has gone through.
//! Failed calls are reported through [`after_failure`] by the entry-point
//! wrappers in `lib.rs`.
use crate::circuit_breaker::{self, CircuitState};
use crate::threshold_monitor::{self, ThresholdBreach};
use crate::Error;
use soroban_sdk::Env;

/// Pre-call gate. `attempted_outflow` is the amount the call is about to
/// transfer out of custody (0 for inbound operations).
pub fn before_call(env: &Env, attempted_outflow: i128) -> Result<(), Error> {
    threshold_monitor::rotate_window_if_needed(env);
    circuit_breaker::admit(env)?;

    if let Err(breach) = threshold_monitor::check_thresholds(env, attempted_outflow) {
        trip_on_breach(env, &breach);
        return Err(Error::CircuitOpen);
    }
    Ok(())
}

pub fn after_success(env: &Env, outflow: i128) {
    threshold_monitor::rotate_window_if_needed(env);
    threshold_monitor::record_success(env, outflow);
    circuit_breaker::record_success(env);
    reevaluate(env);
}

pub fn after_failure(env: &Env) {
    threshold_monitor::rotate_window_if_needed(env);
    threshold_monitor::record_failure(env);
    circuit_breaker::record_failure(env);
    reevaluate(env);
}

/// A breach observed after the call blocks the calls that follow it.
fn reevaluate(env: &Env) {
    if circuit_breaker::effective_state(env) == CircuitState::Open {
        return;
    }
    if let Err(breach) = threshold_monitor::check_thresholds(env, 0) {
        trip_on_breach(env, &breach);
    }
}

/// The breaching window is archived so a HalfOpen trial is judged on fresh
/// counts. The breach tally carries over until the window rotates on time.
fn trip_on_breach(env: &Env, breach: &ThresholdBreach) {
    threshold_monitor::record_breach(env, breach);
    circuit_breaker::trip(env, breach.metric_type.clone());
    threshold_monitor::restart_window_after_breach(env);
}
