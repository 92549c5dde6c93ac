#![no_std]
mod anonymization;
mod circuit_breaker;
mod config;
mod events;
mod invariant_checker;
mod invariants;
mod jurisdiction;
mod protection;
mod threshold_monitor;

#[cfg(test)]
mod test_anonymization;
#[cfg(test)]
mod test_capabilities;
#[cfg(test)]
mod test_threshold_monitor;

pub use anonymization::AnonymousParty;
pub use circuit_breaker::{CircuitBreakerState, CircuitState};
pub use config::{AmountPolicy, ContractConfig, FeeConfig, MultisigConfig, ReleaseApproval};
pub use invariant_checker::InvariantReport;
pub use jurisdiction::EscrowJurisdictionConfig;
pub use threshold_monitor::{ThresholdConfig, WindowMetrics};

use events::{
    ApprovalAdded, CapabilityIssued, CapabilityRevoked, CapabilityUsed, EscrowExpired,
    EscrowInitialized, FeeCollected, FeeConfigUpdated, FeeOperationType, FundsLocked,
    FundsLockedAnonymous, FundsRefunded, FundsReleased, ResolverUpdated, TicketClaimed,
    TicketIssued, EVENT_VERSION_V2,
};
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, token, vec, Address,
    BytesN, Env, Vec,
};

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    BountyExists = 3,
    BountyNotFound = 4,
    FundsNotLocked = 5,
    DeadlineNotPassed = 6,
    Unauthorized = 7,
    InvalidFeeRate = 8,
    InvalidAmount = 9,
    InsufficientRemaining = 10,
    AmountBelowMinimum = 11,
    AmountAboveMaximum = 12,
    InvalidAmountPolicy = 13,
    InvalidMultisigConfig = 14,
    MultisigApprovalRequired = 15,
    InvalidAssetId = 16,
    InvalidDeadline = 17,
    /// Release attempted on an escrow past its deadline
    EscrowExpired = 18,

    LockPaused = 20,
    ReleasePaused = 21,
    RefundPaused = 22,
    JurisdictionKycRequired = 23,
    JurisdictionFundingLimitExceeded = 24,
    InvalidJurisdictionConfig = 25,

    /// Commitment depositors can only be refunded through `refund_resolved`
    AnonymousRefundRequiresResolution = 30,
    NotAnonymousEscrow = 31,
    AnonymousResolverNotSet = 32,
    NotAnonymousResolver = 33,

    CircuitOpen = 40,
    InvalidThresholdConfig = 41,

    TicketNotFound = 50,
    TicketAlreadyUsed = 51,
    TicketExpired = 52,
    DuplicateTicket = 53,

    CapabilityNotFound = 60,
    CapabilityExpired = 61,
    CapabilityRevoked = 62,
    CapabilityMismatch = 63,
    CapabilityAmountExceeded = 64,
    CapabilityUsesExhausted = 65,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EscrowStatus {
    Active,
    PartiallyReleased,
    FullyReleased,
    Refunded,
    Expired,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClaimTicket {
    pub beneficiary: Address,
    pub amount: i128,
    pub expires_at: u64,
    pub claimed: bool,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Escrow {
    pub depositor: AnonymousParty,
    pub amount: i128,
    pub remaining_amount: i128,
    pub status: EscrowStatus,
    pub deadline: u64,
    pub jurisdiction: Option<EscrowJurisdictionConfig>,
    pub claim_tickets: Vec<ClaimTicket>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EscrowWithId {
    pub bounty_id: u64,
    pub escrow: Escrow,
}

/// Delegated release authority scoped to one escrow.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Capability {
    pub holder: Address,
    pub bounty_id: u64,
    pub amount_limit: i128,
    pub remaining_amount: i128,
    pub expiry: u64,
    pub remaining_uses: u32,
    pub revoked: bool,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DataKey {
    Admin,
    Token,
    FeeConfig,
    AmountPolicy,
    MultisigConfig,
    AnonymousResolver,
    Escrow(u64),
    EscrowIndex,
    DepositorIndex(Address),
    /// Every address that has an entry in `DepositorIndex`
    Depositors,
    ReleaseApproval(u64),
    Capability(u64),
    CapabilityNonce,
}

#[contract]
pub struct CustodyEscrowContract;

#[contractimpl]
impl CustodyEscrowContract {
    // ========================================================================
    // Configuration
    // ========================================================================

    /// Initialize the contract with the admin address and the custody token.
    /// Also seeds the default threshold config and a Closed circuit breaker.
    pub fn init(env: Env, admin: Address, token: Address) -> Result<(), Error> {
        if config::is_initialized(&env) {
            return Err(Error::AlreadyInitialized);
        }
        config::validate_asset_id(&token)?;

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Token, &token);
        threshold_monitor::init_threshold_monitor(&env);
        circuit_breaker::init_circuit_breaker(&env);

        events::emit_initialized(
            &env,
            EscrowInitialized {
                version: EVENT_VERSION_V2,
                admin,
                token,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    pub fn get_config(env: Env) -> Result<ContractConfig, Error> {
        Ok(ContractConfig {
            admin: config::get_admin(&env)?,
            token: config::get_token(&env)?,
            fee_config: config::get_fee_config(&env),
            amount_policy: config::get_amount_policy(&env),
            multisig: config::get_multisig_config(&env),
            anonymous_resolver: anonymization::get_resolver(&env),
        })
    }

    /// Update fee configuration (admin only). Rates are in basis points.
    pub fn update_fee_config(
        env: Env,
        lock_fee_rate: Option<i128>,
        release_fee_rate: Option<i128>,
        fee_recipient: Option<Address>,
        fee_enabled: Option<bool>,
    ) -> Result<(), Error> {
        config::require_admin(&env)?;

        let mut fee_config = config::get_fee_config(&env);
        if let Some(rate) = lock_fee_rate {
            config::validate_fee_rate(rate)?;
            fee_config.lock_fee_rate = rate;
        }
        if let Some(rate) = release_fee_rate {
            config::validate_fee_rate(rate)?;
            fee_config.release_fee_rate = rate;
        }
        if let Some(recipient) = fee_recipient {
            fee_config.fee_recipient = recipient;
        }
        if let Some(enabled) = fee_enabled {
            fee_config.fee_enabled = enabled;
        }
        config::set_fee_config(&env, &fee_config);

        events::emit_fee_config_updated(
            &env,
            FeeConfigUpdated {
                version: EVENT_VERSION_V2,
                lock_fee_rate: fee_config.lock_fee_rate,
                release_fee_rate: fee_config.release_fee_rate,
                fee_recipient: fee_config.fee_recipient,
                fee_enabled: fee_config.fee_enabled,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    pub fn get_fee_config(env: Env) -> FeeConfig {
        config::get_fee_config(&env)
    }

    /// Set the inclusive lock amount bounds (admin only).
    pub fn set_amount_policy(
        env: Env,
        caller: Address,
        min_amount: i128,
        max_amount: i128,
    ) -> Result<(), Error> {
        let admin = config::get_admin(&env)?;
        if caller != admin {
            return Err(Error::Unauthorized);
        }
        admin.require_auth();

        if min_amount < 0 || min_amount > max_amount {
            return Err(Error::InvalidAmountPolicy);
        }
        env.storage().instance().set(
            &DataKey::AmountPolicy,
            &AmountPolicy {
                min_amount,
                max_amount,
            },
        );
        Ok(())
    }

    /// Update multisig configuration (admin only)
    pub fn update_multisig_config(
        env: Env,
        threshold_amount: i128,
        signers: Vec<Address>,
        required_signatures: u32,
    ) -> Result<(), Error> {
        config::require_admin(&env)?;

        if required_signatures > signers.len()
            || (required_signatures > 0 && threshold_amount <= 0)
        {
            return Err(Error::InvalidMultisigConfig);
        }
        env.storage().instance().set(
            &DataKey::MultisigConfig,
            &MultisigConfig {
                threshold_amount,
                signers,
                required_signatures,
            },
        );
        Ok(())
    }

    pub fn get_multisig_config(env: Env) -> MultisigConfig {
        config::get_multisig_config(&env)
    }

    /// Record a signer's approval for a large release to `contributor`.
    pub fn approve_large_release(
        env: Env,
        bounty_id: u64,
        contributor: Address,
        approver: Address,
    ) -> Result<(), Error> {
        if !config::is_initialized(&env) {
            return Err(Error::NotInitialized);
        }
        Self::load_escrow(&env, bounty_id)?;
        let multisig = config::get_multisig_config(&env);
        if !config::is_signer(&multisig, &approver) {
            return Err(Error::Unauthorized);
        }
        approver.require_auth();

        let key = DataKey::ReleaseApproval(bounty_id);
        let mut approval: ReleaseApproval = env
            .storage()
            .persistent()
            .get::<DataKey, ReleaseApproval>(&key)
            .filter(|a| a.contributor == contributor)
            .unwrap_or(ReleaseApproval {
                bounty_id,
                contributor: contributor.clone(),
                approvals: vec![&env],
            });

        if approval.approvals.contains(&approver) {
            return Ok(());
        }
        approval.approvals.push_back(approver.clone());
        env.storage().persistent().set(&key, &approval);

        events::emit_approval_added(
            &env,
            ApprovalAdded {
                version: EVENT_VERSION_V2,
                bounty_id,
                contributor,
                approver,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    /// Set or clear the anonymous refund resolver (admin only).
    pub fn set_anonymous_resolver(env: Env, resolver: Option<Address>) -> Result<(), Error> {
        config::require_admin(&env)?;
        anonymization::set_resolver(&env, &resolver);
        events::emit_resolver_updated(
            &env,
            ResolverUpdated {
                version: EVENT_VERSION_V2,
                resolver,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    pub fn get_anonymous_resolver(env: Env) -> Option<Address> {
        anonymization::get_resolver(&env)
    }

    // ========================================================================
    // Threshold monitor and circuit breaker controls
    // ========================================================================

    /// Replace the threshold config (admin only). Invalid configs are
    /// rejected and the previous config is kept.
    pub fn configure_thresholds(
        env: Env,
        threshold_config: ThresholdConfig,
    ) -> Result<(), Error> {
        config::require_admin(&env)?;
        threshold_monitor::set_threshold_config(&env, threshold_config)
    }

    pub fn get_threshold_config(env: Env) -> ThresholdConfig {
        threshold_monitor::get_threshold_config(&env)
    }

    pub fn get_threshold_metrics(env: Env) -> WindowMetrics {
        threshold_monitor::get_current_metrics(&env)
    }

    pub fn get_previous_threshold_window(env: Env) -> Option<WindowMetrics> {
        threshold_monitor::get_previous_metrics(&env)
    }

    pub fn get_circuit_status(env: Env) -> CircuitBreakerState {
        circuit_breaker::get_status(&env)
    }

    pub fn force_open_circuit(env: Env) -> Result<(), Error> {
        config::require_admin(&env)?;
        circuit_breaker::force_open(&env);
        Ok(())
    }

    pub fn force_close_circuit(env: Env) -> Result<(), Error> {
        config::require_admin(&env)?;
        circuit_breaker::force_close(&env);
        Ok(())
    }

    /// Zero the current window counters (admin only).
    pub fn reset_threshold_metrics(env: Env) -> Result<(), Error> {
        let admin = config::require_admin(&env)?;
        threshold_monitor::reset_metrics(&env, &admin);
        Ok(())
    }

    // ========================================================================
    // Lock
    // ========================================================================

    /// Lock funds for a specific bounty.
    pub fn lock_funds(
        env: Env,
        depositor: Address,
        bounty_id: u64,
        amount: i128,
        deadline: u64,
    ) -> Result<(), Error> {
        let res = Self::lock_funds_logic(
            &env,
            depositor.clone(),
            AnonymousParty::Address(depositor),
            bounty_id,
            amount,
            deadline,
            None,
            None,
        );
        Self::track_outcome(&env, &res);
        res
    }

    /// Lock funds under a jurisdiction policy. The policy is stored with the
    /// escrow and consulted on every later transition.
    pub fn lock_funds_with_jurisdiction(
        env: Env,
        depositor: Address,
        bounty_id: u64,
        amount: i128,
        deadline: u64,
        jurisdiction: Option<EscrowJurisdictionConfig>,
        kyc_attested: Option<bool>,
    ) -> Result<(), Error> {
        let res = Self::lock_funds_logic(
            &env,
            depositor.clone(),
            AnonymousParty::Address(depositor),
            bounty_id,
            amount,
            deadline,
            jurisdiction,
            kyc_attested,
        );
        Self::track_outcome(&env, &res);
        res
    }

    /// Lock funds while persisting only `commitment` as the depositor.
    /// `depositor` authorizes and pays but is not stored or indexed.
    pub fn lock_funds_anonymous(
        env: Env,
        depositor: Address,
        commitment: BytesN<32>,
        bounty_id: u64,
        amount: i128,
        deadline: u64,
    ) -> Result<(), Error> {
        let res = Self::lock_funds_logic(
            &env,
            depositor,
            AnonymousParty::Commitment(commitment),
            bounty_id,
            amount,
            deadline,
            None,
            None,
        );
        Self::track_outcome(&env, &res);
        res
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Release everything not reserved by claim tickets to `contributor`.
    /// Only the admin can authorize this.
    pub fn release_funds(env: Env, bounty_id: u64, contributor: Address) -> Result<(), Error> {
        let res = Self::release_logic(&env, bounty_id, contributor, None, None, None);
        Self::track_outcome(&env, &res);
        res
    }

    /// Release `payout_amount` to `contributor` (admin only). Paying out the
    /// full remaining amount settles the escrow.
    pub fn partial_release(
        env: Env,
        bounty_id: u64,
        contributor: Address,
        payout_amount: i128,
    ) -> Result<(), Error> {
        let res = Self::release_logic(
            &env,
            bounty_id,
            contributor,
            Some(payout_amount),
            None,
            None,
        );
        Self::track_outcome(&env, &res);
        res
    }

    /// Release with a KYC attestation, for escrows whose jurisdiction
    /// requires one. `payout_amount` of `None` releases everything available.
    pub fn release_with_attestation(
        env: Env,
        bounty_id: u64,
        contributor: Address,
        payout_amount: Option<i128>,
        kyc_attested: bool,
    ) -> Result<(), Error> {
        let res = Self::release_logic(
            &env,
            bounty_id,
            contributor,
            payout_amount,
            Some(kyc_attested),
            None,
        );
        Self::track_outcome(&env, &res);
        res
    }

    /// Delegated release authorized by `holder`'s capability instead of the admin.
    pub fn release_with_capability(
        env: Env,
        bounty_id: u64,
        contributor: Address,
        payout_amount: i128,
        holder: Address,
        capability_id: u64,
    ) -> Result<(), Error> {
        let res = Self::release_logic(
            &env,
            bounty_id,
            contributor,
            Some(payout_amount),
            None,
            Some((holder, capability_id)),
        );
        Self::track_outcome(&env, &res);
        res
    }

    pub fn issue_release_capability(
        env: Env,
        bounty_id: u64,
        holder: Address,
        amount_limit: i128,
        expiry: u64,
        max_uses: u32,
    ) -> Result<u64, Error> {
        config::require_admin(&env)?;
        if max_uses == 0 || amount_limit <= 0 {
            return Err(Error::InvalidAmount);
        }
        let now = env.ledger().timestamp();
        if expiry <= now {
            return Err(Error::InvalidDeadline);
        }

        let escrow = Self::load_escrow(&env, bounty_id)?;
        Self::ensure_releasable(&env, &escrow)?;
        if amount_limit > escrow.remaining_amount {
            return Err(Error::InsufficientRemaining);
        }

        let capability_id: u64 = env
            .storage()
            .instance()
            .get(&DataKey::CapabilityNonce)
            .unwrap_or(0_u64)
            + 1;
        env.storage()
            .instance()
            .set(&DataKey::CapabilityNonce, &capability_id);
        env.storage().persistent().set(
            &DataKey::Capability(capability_id),
            &Capability {
                holder: holder.clone(),
                bounty_id,
                amount_limit,
                remaining_amount: amount_limit,
                expiry,
                remaining_uses: max_uses,
                revoked: false,
            },
        );

        events::emit_capability_issued(
            &env,
            CapabilityIssued {
                version: EVENT_VERSION_V2,
                capability_id,
                holder,
                bounty_id,
                amount_limit,
                expires_at: expiry,
                max_uses,
                timestamp: now,
            },
        );
        Ok(capability_id)
    }

    pub fn revoke_capability(env: Env, capability_id: u64) -> Result<(), Error> {
        config::require_admin(&env)?;
        let mut capability = Self::load_capability(&env, capability_id)?;
        if capability.revoked {
            return Ok(());
        }
        capability.revoked = true;
        env.storage()
            .persistent()
            .set(&DataKey::Capability(capability_id), &capability);

        events::emit_capability_revoked(
            &env,
            CapabilityRevoked {
                version: EVENT_VERSION_V2,
                capability_id,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    pub fn get_capability(env: Env, capability_id: u64) -> Result<Capability, Error> {
        Self::load_capability(&env, capability_id)
    }

    // ========================================================================
    // Refund
    // ========================================================================

    /// Refund the full remaining amount to the depositor once the deadline
    /// has passed. Commitment depositors must go through `refund_resolved`.
    pub fn refund(env: Env, bounty_id: u64) -> Result<(), Error> {
        let res = Self::refund_logic(&env, bounty_id);
        Self::track_outcome(&env, &res);
        res
    }

    /// Resolver-driven refund of an anonymous escrow to `recipient`.
    pub fn refund_resolved(
        env: Env,
        caller: Address,
        bounty_id: u64,
        recipient: Address,
    ) -> Result<(), Error> {
        let res = Self::refund_resolved_logic(&env, caller, bounty_id, recipient);
        Self::track_outcome(&env, &res);
        res
    }

    // ========================================================================
    // Claim tickets
    // ========================================================================

    /// Pre-authorize `beneficiary` to claim `amount` until `expires_at` (admin only).
    pub fn issue_claim_ticket(
        env: Env,
        bounty_id: u64,
        beneficiary: Address,
        amount: i128,
        expires_at: u64,
    ) -> Result<(), Error> {
        config::require_admin(&env)?;
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        let now = env.ledger().timestamp();
        if expires_at <= now {
            return Err(Error::InvalidDeadline);
        }

        let mut escrow = Self::load_escrow(&env, bounty_id)?;
        Self::ensure_releasable(&env, &escrow)?;
        Self::drop_tickets(&env, &mut escrow, |t| !t.claimed && now > t.expires_at);

        if escrow
            .claim_tickets
            .iter()
            .any(|t| !t.claimed && t.beneficiary == beneficiary)
        {
            return Err(Error::DuplicateTicket);
        }
        let reserved = invariants::outstanding_ticket_amount(&escrow);
        if reserved.saturating_add(amount) > escrow.remaining_amount {
            return Err(Error::InsufficientRemaining);
        }

        escrow.claim_tickets.push_back(ClaimTicket {
            beneficiary: beneficiary.clone(),
            amount,
            expires_at,
            claimed: false,
        });
        Self::save_escrow(&env, bounty_id, &escrow);

        events::emit_ticket_issued(
            &env,
            TicketIssued {
                version: EVENT_VERSION_V2,
                bounty_id,
                beneficiary,
                amount,
                expires_at,
                timestamp: now,
            },
        );
        Ok(())
    }

    /// Beneficiary redeems their ticket. Allowed after the escrow deadline.
    pub fn claim(env: Env, bounty_id: u64, beneficiary: Address) -> Result<(), Error> {
        let res = Self::claim_logic(&env, bounty_id, beneficiary);
        Self::track_outcome(&env, &res);
        res
    }

    // ========================================================================
    // Deadlines
    // ========================================================================

    /// Persist `Expired` for overdue escrows in `EscrowIndex[offset..offset+limit]`
    /// (admin only). Returns how many records were transitioned.
    pub fn expire_overdue(env: Env, offset: u32, limit: u32) -> Result<u32, Error> {
        config::require_admin(&env)?;
        let index = Self::escrow_index(&env);
        let start = offset.min(index.len());
        let end = offset.saturating_add(limit).min(index.len());

        let mut expired = 0u32;
        for i in start..end {
            let Some(bounty_id) = index.get(i) else {
                continue;
            };
            let Ok(mut escrow) = Self::load_escrow(&env, bounty_id) else {
                continue;
            };
            if !Self::refresh_expiry(&env, &mut escrow) {
                continue;
            }
            Self::save_escrow(&env, bounty_id, &escrow);
            events::emit_escrow_expired(
                &env,
                EscrowExpired {
                    version: EVENT_VERSION_V2,
                    bounty_id,
                    remaining_amount: escrow.remaining_amount,
                    deadline: escrow.deadline,
                    timestamp: env.ledger().timestamp(),
                },
            );
            jurisdiction::emit_lifecycle(
                &env,
                bounty_id,
                symbol_short!("expire"),
                &escrow.jurisdiction,
            );
            expired += 1;
        }
        Ok(expired)
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Escrow record with the deadline applied: overdue records read as `Expired`.
    pub fn get_escrow_info(env: Env, bounty_id: u64) -> Result<Escrow, Error> {
        let mut escrow = Self::load_escrow(&env, bounty_id)?;
        Self::refresh_expiry(&env, &mut escrow);
        Ok(escrow)
    }

    /// Depositor of an escrow. Callers must branch on the variant.
    pub fn get_depositor(env: Env, bounty_id: u64) -> Result<AnonymousParty, Error> {
        Ok(Self::load_escrow(&env, bounty_id)?.depositor)
    }

    /// view function to get contract balance of the token
    pub fn get_balance(env: Env) -> Result<i128, Error> {
        let client = Self::token_client(&env)?;
        Ok(client.balance(&env.current_contract_address()))
    }

    pub fn query_escrows_by_depositor(
        env: Env,
        depositor: Address,
        offset: u32,
        limit: u32,
    ) -> Vec<EscrowWithId> {
        let index: Vec<u64> = env
            .storage()
            .persistent()
            .get(&DataKey::DepositorIndex(depositor))
            .unwrap_or(Vec::new(&env));
        let mut results = Vec::new(&env);
        let start = offset.min(index.len());
        let end = offset.saturating_add(limit).min(index.len());

        for i in start..end {
            let Some(bounty_id) = index.get(i) else {
                continue;
            };
            if let Ok(escrow) = Self::load_escrow(&env, bounty_id) {
                results.push_back(EscrowWithId { bounty_id, escrow });
            }
        }
        results
    }

    /// Get total count of escrows
    pub fn get_escrow_count(env: Env) -> u32 {
        Self::escrow_index(&env).len()
    }

    /// Full read-only audit report.
    pub fn check_invariants(env: Env) -> InvariantReport {
        invariant_checker::check_all_invariants(&env)
    }

    /// `true` iff the contract is initialized and every invariant holds.
    pub fn verify_all_invariants(env: Env) -> bool {
        if !config::is_initialized(&env) {
            return false;
        }
        invariant_checker::check_all_invariants(&env).healthy
    }

    /// Per-record sanity check for a single escrow.
    pub fn verify_state(env: Env, bounty_id: u64) -> bool {
        match Self::load_escrow(&env, bounty_id) {
            Ok(escrow) => {
                invariants::verify_escrow_invariants(&escrow)
                    && invariants::verify_refund_consistency(&escrow)
            }
            Err(_) => false,
        }
    }
}

impl CustodyEscrowContract {
    /// Reports a failed outcome to the threshold monitor. The host discards
    /// these writes together with the rest of a failing invocation, so the
    /// count only sticks when the logic runs inside a frame that commits.
    /// Rejections by the breaker itself are not counted again.
    fn track_outcome<T>(env: &Env, res: &Result<T, Error>) {
        if let Err(err) = res {
            if *err != Error::CircuitOpen {
                protection::after_failure(env);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lock_funds_logic(
        env: &Env,
        payer: Address,
        depositor: AnonymousParty,
        bounty_id: u64,
        amount: i128,
        deadline: u64,
        jurisdiction: Option<EscrowJurisdictionConfig>,
        kyc_attested: Option<bool>,
    ) -> Result<(), Error> {
        if !config::is_initialized(env) {
            return Err(Error::NotInitialized);
        }
        payer.require_auth();

        config::enforce_amount_policy(env, amount)?;
        if deadline <= env.ledger().timestamp() {
            return Err(Error::InvalidDeadline);
        }
        if env.storage().persistent().has(&DataKey::Escrow(bounty_id)) {
            return Err(Error::BountyExists);
        }
        jurisdiction::validate(&jurisdiction)?;

        protection::before_call(env, 0)?;
        jurisdiction::enforce_lock(&jurisdiction, amount, kyc_attested)?;

        let fees = config::get_fee_config(env);
        let (fee, net) = if fees.fee_enabled {
            config::split_amount(amount, fees.lock_fee_rate)
        } else {
            (0, amount)
        };

        // EFFECTS: write escrow state and indexes before the external call
        let escrow = Escrow {
            depositor: depositor.clone(),
            amount: net,
            remaining_amount: net,
            status: EscrowStatus::Active,
            deadline,
            jurisdiction: jurisdiction.clone(),
            claim_tickets: Vec::new(env),
        };
        Self::save_escrow(env, bounty_id, &escrow);

        let mut index = Self::escrow_index(env);
        index.push_back(bounty_id);
        env.storage()
            .persistent()
            .set(&DataKey::EscrowIndex, &index);

        if let AnonymousParty::Address(addr) = &depositor {
            Self::add_to_depositor_index(env, addr, bounty_id);
        }

        // INTERACTION: external token transfers are last
        let client = Self::token_client(env)?;
        client.transfer(&payer, &env.current_contract_address(), &net);
        if fee > 0 {
            client.transfer(&payer, &fees.fee_recipient, &fee);
            events::emit_fee_collected(
                env,
                FeeCollected {
                    version: EVENT_VERSION_V2,
                    operation_type: FeeOperationType::Lock,
                    amount: fee,
                    fee_rate: fees.lock_fee_rate,
                    recipient: fees.fee_recipient.clone(),
                    timestamp: env.ledger().timestamp(),
                },
            );
        }

        match depositor {
            AnonymousParty::Address(addr) => events::emit_funds_locked(
                env,
                FundsLocked {
                    version: EVENT_VERSION_V2,
                    bounty_id,
                    amount: net,
                    depositor: addr,
                    deadline,
                },
            ),
            AnonymousParty::Commitment(commitment) => events::emit_funds_locked_anonymous(
                env,
                FundsLockedAnonymous {
                    version: EVENT_VERSION_V2,
                    bounty_id,
                    amount: net,
                    commitment,
                    deadline,
                },
            ),
        }
        jurisdiction::emit_lifecycle(env, bounty_id, symbol_short!("lock"), &jurisdiction);

        protection::after_success(env, 0);
        Ok(())
    }

    fn release_logic(
        env: &Env,
        bounty_id: u64,
        contributor: Address,
        payout_amount: Option<i128>,
        kyc_attested: Option<bool>,
        capability: Option<(Address, u64)>,
    ) -> Result<(), Error> {
        let admin = config::get_admin(env)?;
        if capability.is_none() {
            admin.require_auth();
        }

        let mut escrow = Self::load_escrow(env, bounty_id)?;
        Self::ensure_releasable(env, &escrow)?;

        let now = env.ledger().timestamp();
        Self::drop_tickets(env, &mut escrow, |t| !t.claimed && now > t.expires_at);
        let available = escrow.remaining_amount - invariants::outstanding_ticket_amount(&escrow);

        let amount = match payout_amount {
            Some(amount) if amount <= 0 => return Err(Error::InvalidAmount),
            Some(amount) => amount,
            None => available,
        };
        if amount <= 0 || amount > available {
            return Err(Error::InsufficientRemaining);
        }

        if let Some((holder, capability_id)) = &capability {
            Self::consume_capability(env, holder, *capability_id, bounty_id, amount)?;
        }
        config::check_release_approval(env, bounty_id, &contributor, amount)?;

        protection::before_call(env, amount)?;
        jurisdiction::enforce_release(&escrow.jurisdiction, kyc_attested)?;

        // EFFECTS: update state before external call (CEI)
        escrow.remaining_amount -= amount;
        escrow.status = if escrow.remaining_amount == 0 {
            EscrowStatus::FullyReleased
        } else {
            EscrowStatus::PartiallyReleased
        };
        Self::save_escrow(env, bounty_id, &escrow);

        // INTERACTION: external token transfer is last
        Self::pay_out(env, &contributor, amount)?;

        events::emit_funds_released(
            env,
            FundsReleased {
                version: EVENT_VERSION_V2,
                bounty_id,
                amount,
                recipient: contributor,
                remaining_amount: escrow.remaining_amount,
                timestamp: now,
            },
        );
        jurisdiction::emit_lifecycle(env, bounty_id, symbol_short!("release"), &escrow.jurisdiction);

        protection::after_success(env, amount);
        Ok(())
    }

    fn refund_logic(env: &Env, bounty_id: u64) -> Result<(), Error> {
        if !config::is_initialized(env) {
            return Err(Error::NotInitialized);
        }
        let mut escrow = Self::load_escrow(env, bounty_id)?;
        let refund_to = anonymization::refund_target(&escrow)?;
        Self::ensure_refundable(env, &mut escrow)?;

        protection::before_call(env, escrow.remaining_amount)?;
        jurisdiction::enforce_refund(&escrow.jurisdiction)?;

        Self::settle_refund(env, bounty_id, escrow, refund_to, false)
    }

    fn refund_resolved_logic(
        env: &Env,
        caller: Address,
        bounty_id: u64,
        recipient: Address,
    ) -> Result<(), Error> {
        if !config::is_initialized(env) {
            return Err(Error::NotInitialized);
        }
        let mut escrow = Self::load_escrow(env, bounty_id)?;
        anonymization::authorize_resolution(env, &escrow, &caller)?;
        Self::ensure_refundable(env, &mut escrow)?;

        protection::before_call(env, escrow.remaining_amount)?;
        jurisdiction::enforce_refund(&escrow.jurisdiction)?;

        Self::settle_refund(env, bounty_id, escrow, recipient, true)
    }

    fn settle_refund(
        env: &Env,
        bounty_id: u64,
        mut escrow: Escrow,
        refund_to: Address,
        resolved: bool,
    ) -> Result<(), Error> {
        let amount = escrow.remaining_amount;

        // EFFECTS: open tickets are voided by the refund
        escrow.remaining_amount = 0;
        escrow.status = EscrowStatus::Refunded;
        Self::drop_tickets(env, &mut escrow, |t| !t.claimed);
        Self::save_escrow(env, bounty_id, &escrow);

        // INTERACTION
        if amount > 0 {
            let client = Self::token_client(env)?;
            client.transfer(&env.current_contract_address(), &refund_to, &amount);
        }

        events::emit_funds_refunded(
            env,
            FundsRefunded {
                version: EVENT_VERSION_V2,
                bounty_id,
                amount,
                refund_to,
                resolved,
                timestamp: env.ledger().timestamp(),
            },
        );
        jurisdiction::emit_lifecycle(env, bounty_id, symbol_short!("refund"), &escrow.jurisdiction);

        protection::after_success(env, amount);
        Ok(())
    }

    fn claim_logic(env: &Env, bounty_id: u64, beneficiary: Address) -> Result<(), Error> {
        if !config::is_initialized(env) {
            return Err(Error::NotInitialized);
        }
        beneficiary.require_auth();

        let mut escrow = Self::load_escrow(env, bounty_id)?;
        Self::refresh_expiry(env, &mut escrow);
        if !invariants::holds_custody(&escrow.status) {
            return Err(Error::FundsNotLocked);
        }

        let now = env.ledger().timestamp();
        let mut position = None;
        let mut already_claimed = false;
        for (i, ticket) in escrow.claim_tickets.iter().enumerate() {
            if ticket.beneficiary != beneficiary {
                continue;
            }
            if ticket.claimed {
                already_claimed = true;
            } else {
                position = Some(i as u32);
            }
        }
        let position = match position {
            Some(position) => position,
            None if already_claimed => return Err(Error::TicketAlreadyUsed),
            None => return Err(Error::TicketNotFound),
        };
        let mut ticket = escrow
            .claim_tickets
            .get(position)
            .ok_or(Error::TicketNotFound)?;
        if now > ticket.expires_at {
            return Err(Error::TicketExpired);
        }

        protection::before_call(env, ticket.amount)?;
        jurisdiction::enforce_claim(&escrow.jurisdiction)?;

        // EFFECTS
        ticket.claimed = true;
        escrow.claim_tickets.set(position, ticket.clone());
        escrow.remaining_amount -= ticket.amount;
        if escrow.remaining_amount == 0 {
            escrow.status = EscrowStatus::FullyReleased;
        } else if escrow.status == EscrowStatus::Active {
            escrow.status = EscrowStatus::PartiallyReleased;
        }
        Self::save_escrow(env, bounty_id, &escrow);

        // INTERACTION
        Self::pay_out(env, &beneficiary, ticket.amount)?;

        events::emit_ticket_claimed(
            env,
            TicketClaimed {
                version: EVENT_VERSION_V2,
                bounty_id,
                beneficiary,
                amount: ticket.amount,
                timestamp: now,
            },
        );
        jurisdiction::emit_lifecycle(env, bounty_id, symbol_short!("claim"), &escrow.jurisdiction);

        protection::after_success(env, ticket.amount);
        Ok(())
    }

    fn consume_capability(
        env: &Env,
        holder: &Address,
        capability_id: u64,
        bounty_id: u64,
        amount: i128,
    ) -> Result<(), Error> {
        let mut capability = Self::load_capability(env, capability_id)?;

        if capability.revoked {
            return Err(Error::CapabilityRevoked);
        }
        if capability.bounty_id != bounty_id || capability.holder != *holder {
            return Err(Error::CapabilityMismatch);
        }
        if env.ledger().timestamp() > capability.expiry {
            return Err(Error::CapabilityExpired);
        }
        if capability.remaining_uses == 0 {
            return Err(Error::CapabilityUsesExhausted);
        }
        if amount > capability.remaining_amount {
            return Err(Error::CapabilityAmountExceeded);
        }
        holder.require_auth();

        capability.remaining_amount -= amount;
        capability.remaining_uses -= 1;
        env.storage()
            .persistent()
            .set(&DataKey::Capability(capability_id), &capability);

        events::emit_capability_used(
            env,
            CapabilityUsed {
                version: EVENT_VERSION_V2,
                capability_id,
                holder: holder.clone(),
                bounty_id,
                amount_used: amount,
                remaining_amount: capability.remaining_amount,
                remaining_uses: capability.remaining_uses,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    /// Transfers `gross` out of custody, splitting off the release fee when enabled.
    fn pay_out(env: &Env, recipient: &Address, gross: i128) -> Result<(), Error> {
        let client = Self::token_client(env)?;
        let contract = env.current_contract_address();
        let fees = config::get_fee_config(env);
        let (fee, net) = if fees.fee_enabled {
            config::split_amount(gross, fees.release_fee_rate)
        } else {
            (0, gross)
        };

        if fee > 0 {
            client.transfer(&contract, &fees.fee_recipient, &fee);
            events::emit_fee_collected(
                env,
                FeeCollected {
                    version: EVENT_VERSION_V2,
                    operation_type: FeeOperationType::Release,
                    amount: fee,
                    fee_rate: fees.release_fee_rate,
                    recipient: fees.fee_recipient.clone(),
                    timestamp: env.ledger().timestamp(),
                },
            );
        }
        client.transfer(&contract, recipient, &net);
        Ok(())
    }

    fn token_client(env: &Env) -> Result<token::Client, Error> {
        let token_addr = config::get_token(env)?;
        Ok(token::Client::new(env, &token_addr))
    }

    fn load_escrow(env: &Env, bounty_id: u64) -> Result<Escrow, Error> {
        env.storage()
            .persistent()
            .get(&DataKey::Escrow(bounty_id))
            .ok_or(Error::BountyNotFound)
    }

    fn save_escrow(env: &Env, bounty_id: u64, escrow: &Escrow) {
        invariants::assert_escrow(escrow);
        env.storage()
            .persistent()
            .set(&DataKey::Escrow(bounty_id), escrow);
    }

    fn load_capability(env: &Env, capability_id: u64) -> Result<Capability, Error> {
        env.storage()
            .persistent()
            .get(&DataKey::Capability(capability_id))
            .ok_or(Error::CapabilityNotFound)
    }

    fn escrow_index(env: &Env) -> Vec<u64> {
        env.storage()
            .persistent()
            .get(&DataKey::EscrowIndex)
            .unwrap_or(Vec::new(env))
    }

    fn add_to_depositor_index(env: &Env, depositor: &Address, bounty_id: u64) {
        let key = DataKey::DepositorIndex(depositor.clone());
        let mut ids: Vec<u64> = env
            .storage()
            .persistent()
            .get(&key)
            .unwrap_or(Vec::new(env));
        if ids.is_empty() {
            let mut depositors: Vec<Address> = env
                .storage()
                .persistent()
                .get(&DataKey::Depositors)
                .unwrap_or(Vec::new(env));
            if !depositors.contains(depositor) {
                depositors.push_back(depositor.clone());
                env.storage()
                    .persistent()
                    .set(&DataKey::Depositors, &depositors);
            }
        }
        ids.push_back(bounty_id);
        env.storage().persistent().set(&key, &ids);
    }

    /// Marks an overdue Active/PartiallyReleased record as Expired in memory.
    /// Returns whether the status changed.
    fn refresh_expiry(env: &Env, escrow: &mut Escrow) -> bool {
        let open = matches!(
            escrow.status,
            EscrowStatus::Active | EscrowStatus::PartiallyReleased
        );
        if open && env.ledger().timestamp() >= escrow.deadline {
            escrow.status = EscrowStatus::Expired;
            return true;
        }
        false
    }

    fn ensure_releasable(env: &Env, escrow: &Escrow) -> Result<(), Error> {
        match escrow.status {
            EscrowStatus::Active | EscrowStatus::PartiallyReleased => {
                if env.ledger().timestamp() >= escrow.deadline {
                    Err(Error::EscrowExpired)
                } else {
                    Ok(())
                }
            }
            EscrowStatus::Expired => Err(Error::EscrowExpired),
            EscrowStatus::FullyReleased | EscrowStatus::Refunded => Err(Error::FundsNotLocked),
        }
    }

    fn ensure_refundable(env: &Env, escrow: &mut Escrow) -> Result<(), Error> {
        if !invariants::holds_custody(&escrow.status) {
            return Err(Error::FundsNotLocked);
        }
        if env.ledger().timestamp() < escrow.deadline {
            return Err(Error::DeadlineNotPassed);
        }
        Self::refresh_expiry(env, escrow);
        Ok(())
    }

    fn drop_tickets(env: &Env, escrow: &mut Escrow, drop: impl Fn(&ClaimTicket) -> bool) {
        let mut kept = Vec::new(env);
        for ticket in escrow.claim_tickets.iter() {
            if !drop(&ticket) {
                kept.push_back(ticket);
            }
        }
        escrow.claim_tickets = kept;
    }
}
