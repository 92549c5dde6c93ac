// Circuit Breaker
//
// Three-state protection gate consulted before every protected operation.
//
// ```
//   [Closed] ──(threshold breach / force_open)──> [Open]
//      ^                                             │
//      │                                  (cooldown elapsed, no override)
//  (trial succeeds / force_close)                    v
//      └─────────────────────────────────────── [HalfOpen]
//                                                    │
//                     (trial fails: reopen, longer cooldown)
// ```
//
// Open -> HalfOpen is evaluated lazily from the stored cooldown end, so the
// effective state is always derived from `now`. All state lives in a single
// record under `CircuitBreakerKey::State`.

use crate::events::{self, CircuitTransition, EVENT_VERSION_V2};
use crate::threshold_monitor;
use crate::Error;
use soroban_sdk::{contracttype, symbol_short, Env, Symbol};

/// Trial calls admitted while HalfOpen before the outcome is decided.
pub const HALF_OPEN_TRIAL_CALLS: u32 = 1;

/// Upper bound for any computed cooldown (one day).
pub const MAX_COOLDOWN_SECS: u64 = 86_400;

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CircuitBreakerKey {
    State,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: u64,
    pub cooldown_end: u64,
    /// Automatic trips since the last stability reset. Drives the backoff.
    pub trip_count: u32,
    /// Set by `force_open`; suppresses the automatic move to HalfOpen.
    pub manual_override: bool,
    pub last_closed_at: u64,
    pub half_open_trials: u32,
}

impl CircuitBreakerState {
    fn closed(now: u64) -> Self {
        CircuitBreakerState {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: 0,
            cooldown_end: 0,
            trip_count: 0,
            manual_override: false,
            last_closed_at: now,
            half_open_trials: 0,
        }
    }

    /// State as seen at `now`.
    pub fn effective_state(&self, now: u64) -> CircuitState {
        match self.state {
            CircuitState::Open if !self.manual_override && now >= self.cooldown_end => {
                CircuitState::HalfOpen
            }
            state => state,
        }
    }
}

pub fn init_circuit_breaker(env: &Env) {
    save(env, &CircuitBreakerState::closed(env.ledger().timestamp()));
}

pub fn load(env: &Env) -> CircuitBreakerState {
    env.storage()
        .persistent()
        .get(&CircuitBreakerKey::State)
        .unwrap_or_else(|| CircuitBreakerState::closed(env.ledger().timestamp()))
}

fn save(env: &Env, state: &CircuitBreakerState) {
    env.storage()
        .persistent()
        .set(&CircuitBreakerKey::State, state);
}

/// Status snapshot with the effective state filled in.
pub fn get_status(env: &Env) -> CircuitBreakerState {
    let mut status = load(env);
    status.state = status.effective_state(env.ledger().timestamp());
    status
}

pub fn effective_state(env: &Env) -> CircuitState {
    load(env).effective_state(env.ledger().timestamp())
}

/// `cooldown_period_secs * cooldown_multiplier^trip_count`, capped.
pub fn compute_cooldown(config: &threshold_monitor::ThresholdConfig, trip_count: u32) -> u64 {
    (config.cooldown_multiplier as u64)
        .checked_pow(trip_count)
        .and_then(|factor| config.cooldown_period_secs.checked_mul(factor))
        .unwrap_or(MAX_COOLDOWN_SECS)
        .min(MAX_COOLDOWN_SECS)
}

/// Admission check for a protected call.
pub fn admit(env: &Env) -> Result<(), Error> {
    let now = env.ledger().timestamp();
    let mut cb = load(env);

    match cb.effective_state(now) {
        CircuitState::Closed => Ok(()),
        CircuitState::Open => Err(Error::CircuitOpen),
        CircuitState::HalfOpen => {
            if cb.state == CircuitState::Open {
                transition(env, &mut cb, CircuitState::HalfOpen, symbol_short!("half_open"));
                cb.half_open_trials = 0;
            }
            if cb.half_open_trials >= HALF_OPEN_TRIAL_CALLS {
                return Err(Error::CircuitOpen);
            }
            cb.half_open_trials += 1;
            save(env, &cb);
            Ok(())
        }
    }
}

pub fn record_success(env: &Env) {
    let now = env.ledger().timestamp();
    let mut cb = load(env);
    cb.consecutive_failures = 0;

    match cb.effective_state(now) {
        CircuitState::HalfOpen => {
            cb.half_open_trials = 0;
            cb.last_closed_at = now;
            transition(env, &mut cb, CircuitState::Closed, symbol_short!("closed"));
        }
        CircuitState::Closed => {
            // Backoff memory is cleared after a full window of stable operation.
            let stability = threshold_monitor::get_threshold_config(env).time_window_secs;
            if cb.trip_count > 0 && now.saturating_sub(cb.last_closed_at) >= stability {
                cb.trip_count = 0;
            }
        }
        CircuitState::Open => {}
    }
    save(env, &cb);
}

pub fn record_failure(env: &Env) {
    let now = env.ledger().timestamp();
    let mut cb = load(env);
    cb.consecutive_failures = cb.consecutive_failures.saturating_add(1);

    if cb.effective_state(now) == CircuitState::HalfOpen {
        open(env, &mut cb, symbol_short!("reopen"));
    }
    save(env, &cb);
}

/// Trips the breaker from any state, applying the backoff cooldown.
pub fn trip(env: &Env, reason: Symbol) {
    let mut cb = load(env);
    if cb.effective_state(env.ledger().timestamp()) == CircuitState::Open {
        return;
    }
    open(env, &mut cb, reason);
    save(env, &cb);
}

fn open(env: &Env, cb: &mut CircuitBreakerState, reason: Symbol) {
    let now = env.ledger().timestamp();
    let config = threshold_monitor::get_threshold_config(env);
    let cooldown = compute_cooldown(&config, cb.trip_count);

    cb.trip_count = cb.trip_count.saturating_add(1);
    cb.opened_at = now;
    cb.cooldown_end = now.saturating_add(cooldown);
    cb.half_open_trials = 0;
    transition(env, cb, CircuitState::Open, reason);
}

/// Manual trip. Stays Open until `force_close`.
pub fn force_open(env: &Env) {
    let mut cb = load(env);
    cb.manual_override = true;
    cb.opened_at = env.ledger().timestamp();
    cb.half_open_trials = 0;
    transition(env, &mut cb, CircuitState::Open, symbol_short!("forced"));
    save(env, &cb);
}

pub fn force_close(env: &Env) {
    let mut cb = load(env);
    cb.manual_override = false;
    cb.consecutive_failures = 0;
    cb.half_open_trials = 0;
    cb.last_closed_at = env.ledger().timestamp();
    transition(env, &mut cb, CircuitState::Closed, symbol_short!("reset"));
    save(env, &cb);
}

fn transition(env: &Env, cb: &mut CircuitBreakerState, to: CircuitState, reason: Symbol) {
    let from = cb.state;
    cb.state = to;
    events::emit_circuit_transition(
        env,
        CircuitTransition {
            version: EVENT_VERSION_V2,
            from,
            to,
            reason,
            trip_count: cb.trip_count,
            cooldown_end: cb.cooldown_end,
            timestamp: env.ledger().timestamp(),
        },
    );
}
