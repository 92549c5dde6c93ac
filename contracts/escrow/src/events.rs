//! Contract events.
//!
//! Every event carries a [`LogLevel`] as `topics[0]` so indexers can filter by
//! severity without decoding the payload:
//!
//! ```text
//! topic[0]  LogLevel
//! topic[1]  Symbol    category ("escrow", "fee", "circuit", "thresh", ...)
//! topic[2]  Symbol    event name
//! topic[3]  u64       bounty_id, where applicable
//! ```
use crate::circuit_breaker::CircuitState;
use crate::threshold_monitor::{ThresholdBreach, ThresholdConfig, WindowMetrics};
use soroban_sdk::{contracttype, symbol_short, Address, BytesN, Env, String, Symbol};

pub const EVENT_VERSION_V2: u32 = 2;

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

const ESCROW: Symbol = symbol_short!("escrow");
const FEE: Symbol = symbol_short!("fee");
const CIRCUIT: Symbol = symbol_short!("circuit");
const THRESH: Symbol = symbol_short!("thresh");
const JURIS: Symbol = symbol_short!("juris");
const ANON: Symbol = symbol_short!("anon");
const CAP: Symbol = symbol_short!("cap");
const TICKET: Symbol = symbol_short!("ticket");

// ---------------------------------------------------------------------------
// Ledger lifecycle
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EscrowInitialized {
    pub version: u32,
    pub admin: Address,
    pub token: Address,
    pub timestamp: u64,
}

pub fn emit_initialized(env: &Env, event: EscrowInitialized) {
    let topics = (LogLevel::Info, ESCROW, symbol_short!("init"));
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FundsLocked {
    pub version: u32,
    pub bounty_id: u64,
    pub amount: i128,
    pub depositor: Address,
    pub deadline: u64,
}

pub fn emit_funds_locked(env: &Env, event: FundsLocked) {
    let topics = (LogLevel::Info, ESCROW, symbol_short!("locked"), event.bounty_id);
    env.events().publish(topics, event);
}

/// Lock event for commitment-held escrows. Never carries the depositor address.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FundsLockedAnonymous {
    pub version: u32,
    pub bounty_id: u64,
    pub amount: i128,
    pub commitment: BytesN<32>,
    pub deadline: u64,
}

pub fn emit_funds_locked_anonymous(env: &Env, event: FundsLockedAnonymous) {
    let topics = (LogLevel::Info, ESCROW, symbol_short!("lock_anon"), event.bounty_id);
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FundsReleased {
    pub version: u32,
    pub bounty_id: u64,
    pub amount: i128,
    pub recipient: Address,
    pub remaining_amount: i128,
    pub timestamp: u64,
}

pub fn emit_funds_released(env: &Env, event: FundsReleased) {
    let topics = (LogLevel::Info, ESCROW, symbol_short!("released"), event.bounty_id);
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FundsRefunded {
    pub version: u32,
    pub bounty_id: u64,
    pub amount: i128,
    pub refund_to: Address,
    pub resolved: bool,
    pub timestamp: u64,
}

pub fn emit_funds_refunded(env: &Env, event: FundsRefunded) {
    let topics = (LogLevel::Info, ESCROW, symbol_short!("refunded"), event.bounty_id);
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EscrowExpired {
    pub version: u32,
    pub bounty_id: u64,
    pub remaining_amount: i128,
    pub deadline: u64,
    pub timestamp: u64,
}

pub fn emit_escrow_expired(env: &Env, event: EscrowExpired) {
    let topics = (LogLevel::Info, ESCROW, symbol_short!("expired"), event.bounty_id);
    env.events().publish(topics, event);
}

// ---------------------------------------------------------------------------
// Fees and admin configuration
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FeeOperationType {
    Lock,
    Release,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeeCollected {
    pub version: u32,
    pub operation_type: FeeOperationType,
    pub amount: i128,
    pub fee_rate: i128,
    pub recipient: Address,
    pub timestamp: u64,
}

pub fn emit_fee_collected(env: &Env, event: FeeCollected) {
    let topics = (LogLevel::Debug, FEE, symbol_short!("collected"));
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeeConfigUpdated {
    pub version: u32,
    pub lock_fee_rate: i128,
    pub release_fee_rate: i128,
    pub fee_recipient: Address,
    pub fee_enabled: bool,
    pub timestamp: u64,
}

pub fn emit_fee_config_updated(env: &Env, event: FeeConfigUpdated) {
    let topics = (LogLevel::Info, FEE, symbol_short!("cfg"));
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApprovalAdded {
    pub version: u32,
    pub bounty_id: u64,
    pub contributor: Address,
    pub approver: Address,
    pub timestamp: u64,
}

pub fn emit_approval_added(env: &Env, event: ApprovalAdded) {
    let topics = (LogLevel::Warn, ESCROW, symbol_short!("approval"), event.bounty_id);
    env.events().publish(topics, event);
}

// ---------------------------------------------------------------------------
// Anonymization
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolverUpdated {
    pub version: u32,
    pub resolver: Option<Address>,
    pub timestamp: u64,
}

pub fn emit_resolver_updated(env: &Env, event: ResolverUpdated) {
    let topics = (LogLevel::Warn, ANON, symbol_short!("resolver"));
    env.events().publish(topics, event);
}

// ---------------------------------------------------------------------------
// Jurisdiction
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JurisdictionLifecycle {
    pub version: u32,
    pub bounty_id: u64,
    pub operation: Symbol,
    pub tag: Option<String>,
    pub requires_kyc: bool,
    pub enforce_limits: bool,
    pub lock_paused: bool,
    pub release_paused: bool,
    pub refund_paused: bool,
    pub max_amount: Option<i128>,
    pub timestamp: u64,
}

pub fn emit_jurisdiction_lifecycle(env: &Env, event: JurisdictionLifecycle) {
    let topics = (LogLevel::Info, JURIS, event.operation.clone(), event.bounty_id);
    env.events().publish(topics, event);
}

// ---------------------------------------------------------------------------
// Claim tickets and capabilities
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TicketIssued {
    pub version: u32,
    pub bounty_id: u64,
    pub beneficiary: Address,
    pub amount: i128,
    pub expires_at: u64,
    pub timestamp: u64,
}

pub fn emit_ticket_issued(env: &Env, event: TicketIssued) {
    let topics = (LogLevel::Info, TICKET, symbol_short!("issued"), event.bounty_id);
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TicketClaimed {
    pub version: u32,
    pub bounty_id: u64,
    pub beneficiary: Address,
    pub amount: i128,
    pub timestamp: u64,
}

pub fn emit_ticket_claimed(env: &Env, event: TicketClaimed) {
    let topics = (LogLevel::Info, TICKET, symbol_short!("claimed"), event.bounty_id);
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapabilityIssued {
    pub version: u32,
    pub capability_id: u64,
    pub holder: Address,
    pub bounty_id: u64,
    pub amount_limit: i128,
    pub expires_at: u64,
    pub max_uses: u32,
    pub timestamp: u64,
}

pub fn emit_capability_issued(env: &Env, event: CapabilityIssued) {
    let topics = (LogLevel::Info, CAP, symbol_short!("issued"), event.bounty_id);
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapabilityUsed {
    pub version: u32,
    pub capability_id: u64,
    pub holder: Address,
    pub bounty_id: u64,
    pub amount_used: i128,
    pub remaining_amount: i128,
    pub remaining_uses: u32,
    pub timestamp: u64,
}

pub fn emit_capability_used(env: &Env, event: CapabilityUsed) {
    let topics = (LogLevel::Info, CAP, symbol_short!("used"), event.bounty_id);
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapabilityRevoked {
    pub version: u32,
    pub capability_id: u64,
    pub timestamp: u64,
}

pub fn emit_capability_revoked(env: &Env, event: CapabilityRevoked) {
    let topics = (LogLevel::Warn, CAP, symbol_short!("revoked"));
    env.events().publish(topics, event);
}

// ---------------------------------------------------------------------------
// Threshold monitor and circuit breaker
// ---------------------------------------------------------------------------

pub fn emit_threshold_breach(env: &Env, breach: ThresholdBreach) {
    let topics = (LogLevel::Warn, THRESH, symbol_short!("breach"));
    env.events().publish(topics, breach);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThresholdConfigUpdated {
    pub version: u32,
    pub previous: ThresholdConfig,
    pub current: ThresholdConfig,
    pub timestamp: u64,
}

pub fn emit_threshold_config_updated(env: &Env, event: ThresholdConfigUpdated) {
    let topics = (LogLevel::Info, THRESH, symbol_short!("cfg"));
    env.events().publish(topics, event);
}

pub fn emit_window_rotated(env: &Env, archived: WindowMetrics) {
    let topics = (LogLevel::Debug, THRESH, symbol_short!("rotate"));
    env.events().publish(topics, archived);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetricsReset {
    pub version: u32,
    pub admin: Address,
    pub timestamp: u64,
}

pub fn emit_metrics_reset(env: &Env, event: MetricsReset) {
    let topics = (LogLevel::Warn, THRESH, symbol_short!("reset"));
    env.events().publish(topics, event);
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CircuitTransition {
    pub version: u32,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: Symbol,
    pub trip_count: u32,
    pub cooldown_end: u64,
    pub timestamp: u64,
}

pub fn emit_circuit_transition(env: &Env, event: CircuitTransition) {
    let level = match event.to {
        CircuitState::Closed => LogLevel::Info,
        _ => LogLevel::Warn,
    };
    let topics = (level, CIRCUIT, event.reason.clone());
    env.events().publish(topics, event);
}

