// ============================================================================
// Invariant Checker
//
// Read-only audit over the ledger, the depositor index, configuration and the
// protection state. Nothing here writes storage, so reports can be requested
// at any frequency.
//
// Checks:
//
//  - Per-escrow sanity: amounts non-negative, remaining <= amount,
//    FullyReleased => remaining == 0, claimed tickets covered by payouts.
//  - Refund coherence: Refunded => remaining == 0.
//  - Balance: sum of remaining over custody-holding records equals the
//    token balance held by the contract.
//  - Index: every EscrowIndex id has a record; every DepositorIndex id has a
//    record owned by that same (non-anonymous) depositor.
//  - Config: admin and token set, fee rates within bounds, amount policy
//    well-formed, multisig signature count achievable.
//  - Metrics: threshold config valid, window counters non-negative, breaker
//    record coherent.
// ============================================================================

use crate::anonymization::AnonymousParty;
use crate::circuit_breaker::{self, CircuitState, HALF_OPEN_TRIAL_CALLS};
use crate::config;
use crate::invariants;
use crate::threshold_monitor;
use crate::{DataKey, Escrow};
use soroban_sdk::{contracttype, token, Address, Env, Vec};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvariantReport {
    /// True when `violation_count == 0`.
    pub healthy: bool,
    pub config_sane: bool,
    pub metrics_sane: bool,
    pub balance_consistent: bool,
    /// Sum of `remaining_amount` over custody-holding escrows.
    pub sum_remaining: i128,
    /// Token balance held by the contract (0 if no token is configured).
    pub token_balance: i128,
    pub per_escrow_failures: u32,
    pub orphaned_index_entries: u32,
    pub refund_inconsistencies: u32,
    pub violation_count: u32,
}

pub fn check_all_invariants(env: &Env) -> InvariantReport {
    let mut per_escrow_failures = 0u32;
    let mut orphaned_index_entries = 0u32;
    let mut refund_inconsistencies = 0u32;
    let mut sum_remaining: i128 = 0;

    let index: Vec<u64> = env
        .storage()
        .persistent()
        .get(&DataKey::EscrowIndex)
        .unwrap_or(Vec::new(env));

    for bounty_id in index.iter() {
        match load_escrow(env, bounty_id) {
            Some(escrow) => {
                if !invariants::verify_escrow_invariants(&escrow) {
                    per_escrow_failures += 1;
                }
                if !invariants::verify_refund_consistency(&escrow) {
                    refund_inconsistencies += 1;
                }
                if invariants::holds_custody(&escrow.status) {
                    sum_remaining = sum_remaining.saturating_add(escrow.remaining_amount);
                }
            }
            None => orphaned_index_entries += 1,
        }
    }

    orphaned_index_entries += count_orphaned_depositor_entries(env);

    let token_balance = contract_token_balance(env);
    let balance_consistent = sum_remaining == token_balance;
    let config_sane = check_config_sane(env);
    let metrics_sane = check_metrics_sane(env);

    let violation_count = per_escrow_failures
        + orphaned_index_entries
        + refund_inconsistencies
        + u32::from(!balance_consistent)
        + u32::from(!config_sane)
        + u32::from(!metrics_sane);

    InvariantReport {
        healthy: violation_count == 0,
        config_sane,
        metrics_sane,
        balance_consistent,
        sum_remaining,
        token_balance,
        per_escrow_failures,
        orphaned_index_entries,
        refund_inconsistencies,
        violation_count,
    }
}

fn load_escrow(env: &Env, bounty_id: u64) -> Option<Escrow> {
    env.storage().persistent().get(&DataKey::Escrow(bounty_id))
}

fn count_orphaned_depositor_entries(env: &Env) -> u32 {
    let depositors: Vec<Address> = env
        .storage()
        .persistent()
        .get(&DataKey::Depositors)
        .unwrap_or(Vec::new(env));

    let mut orphaned = 0u32;
    for depositor in depositors.iter() {
        let ids: Vec<u64> = env
            .storage()
            .persistent()
            .get(&DataKey::DepositorIndex(depositor.clone()))
            .unwrap_or(Vec::new(env));
        for bounty_id in ids.iter() {
            let owned = match load_escrow(env, bounty_id) {
                Some(escrow) => escrow.depositor == AnonymousParty::Address(depositor.clone()),
                None => false,
            };
            if !owned {
                orphaned += 1;
            }
        }
    }
    orphaned
}

fn contract_token_balance(env: &Env) -> i128 {
    match env.storage().instance().get::<DataKey, Address>(&DataKey::Token) {
        Some(token_addr) => token::Client::new(env, &token_addr).balance(&env.current_contract_address()),
        None => 0,
    }
}

fn check_config_sane(env: &Env) -> bool {
    if !config::is_initialized(env) || !env.storage().instance().has(&DataKey::Token) {
        return false;
    }

    let fees = config::get_fee_config(env);
    if config::validate_fee_rate(fees.lock_fee_rate).is_err()
        || config::validate_fee_rate(fees.release_fee_rate).is_err()
    {
        return false;
    }

    if let Some(policy) = config::get_amount_policy(env) {
        if policy.min_amount < 0 || policy.min_amount > policy.max_amount {
            return false;
        }
    }

    let multisig = config::get_multisig_config(env);
    multisig.required_signatures <= multisig.signers.len()
        && (multisig.required_signatures == 0 || multisig.threshold_amount > 0)
}

fn check_metrics_sane(env: &Env) -> bool {
    if threshold_monitor::get_threshold_config(env).validate().is_err() {
        return false;
    }

    let now = env.ledger().timestamp();
    let metrics = threshold_monitor::get_current_metrics(env);
    if metrics.window_start > now
        || metrics.total_outflow < 0
        || metrics.max_single_outflow < 0
        || metrics.max_single_outflow > metrics.total_outflow
    {
        return false;
    }

    let cb = circuit_breaker::load(env);
    if cb.half_open_trials > HALF_OPEN_TRIAL_CALLS {
        return false;
    }
    !(cb.state == CircuitState::Open && !cb.manual_override && cb.cooldown_end < cb.opened_at)
}
