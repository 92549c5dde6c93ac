//! Admin-owned configuration: fees, amount policy, multisig and asset validation.
use crate::{DataKey, Error};
use soroban_sdk::{contracttype, vec, Address, Env, Vec};

/// Basis points denominator (1 bp = 0.01%).
pub const BASIS_POINTS: i128 = 10_000;

/// Upper bound for any fee rate (50%).
pub const MAX_FEE_RATE: i128 = 5_000;

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeeConfig {
    pub lock_fee_rate: i128,
    pub release_fee_rate: i128,
    pub fee_recipient: Address,
    pub fee_enabled: bool,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AmountPolicy {
    pub min_amount: i128,
    pub max_amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultisigConfig {
    pub threshold_amount: i128,
    pub signers: Vec<Address>,
    pub required_signatures: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseApproval {
    pub bounty_id: u64,
    pub contributor: Address,
    pub approvals: Vec<Address>,
}

/// Snapshot returned by `get_config`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContractConfig {
    pub admin: Address,
    pub token: Address,
    pub fee_config: FeeConfig,
    pub amount_policy: Option<AmountPolicy>,
    pub multisig: MultisigConfig,
    pub anonymous_resolver: Option<Address>,
}

pub fn is_initialized(env: &Env) -> bool {
    env.storage().instance().has(&DataKey::Admin)
}

pub fn get_admin(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(Error::NotInitialized)
}

/// Loads the admin and requires its authorization.
pub fn require_admin(env: &Env) -> Result<Address, Error> {
    let admin = get_admin(env)?;
    admin.require_auth();
    Ok(admin)
}

pub fn get_token(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Token)
        .ok_or(Error::NotInitialized)
}

/// Token ids must be Soroban contract addresses (`C...` strkeys).
pub fn validate_asset_id(asset_id: &Address) -> Result<(), Error> {
    let strkey = asset_id.to_string();
    if strkey.len() != 56 {
        return Err(Error::InvalidAssetId);
    }

    let mut bytes = [0u8; 56];
    strkey.copy_into_slice(&mut bytes);
    if bytes[0] == b'C' {
        Ok(())
    } else {
        Err(Error::InvalidAssetId)
    }
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

/// Fees go to the admin until a recipient is configured.
pub fn get_fee_config(env: &Env) -> FeeConfig {
    env.storage()
        .instance()
        .get(&DataKey::FeeConfig)
        .unwrap_or_else(|| FeeConfig {
            lock_fee_rate: 0,
            release_fee_rate: 0,
            fee_recipient: env
                .storage()
                .instance()
                .get(&DataKey::Admin)
                .unwrap_or_else(|| env.current_contract_address()),
            fee_enabled: false,
        })
}

pub fn set_fee_config(env: &Env, config: &FeeConfig) {
    env.storage().instance().set(&DataKey::FeeConfig, config);
}

pub fn validate_fee_rate(rate: i128) -> Result<(), Error> {
    if (0..=MAX_FEE_RATE).contains(&rate) {
        Ok(())
    } else {
        Err(Error::InvalidFeeRate)
    }
}

/// Floor of `amount * fee_rate / BASIS_POINTS`; zero on overflow.
pub fn calculate_fee(amount: i128, fee_rate: i128) -> i128 {
    if fee_rate == 0 {
        return 0;
    }
    amount
        .checked_mul(fee_rate)
        .and_then(|x| x.checked_div(BASIS_POINTS))
        .unwrap_or(0)
}

/// Splits `amount` into `(fee, net)` with `fee + net == amount`.
pub fn split_amount(amount: i128, fee_rate: i128) -> (i128, i128) {
    let fee = calculate_fee(amount, fee_rate);
    (fee, amount - fee)
}

// ---------------------------------------------------------------------------
// Amount policy
// ---------------------------------------------------------------------------

pub fn get_amount_policy(env: &Env) -> Option<AmountPolicy> {
    env.storage().instance().get(&DataKey::AmountPolicy)
}

pub fn enforce_amount_policy(env: &Env, amount: i128) -> Result<(), Error> {
    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }
    if let Some(policy) = get_amount_policy(env) {
        if amount < policy.min_amount {
            return Err(Error::AmountBelowMinimum);
        }
        if amount > policy.max_amount {
            return Err(Error::AmountAboveMaximum);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Multisig
// ---------------------------------------------------------------------------

pub fn get_multisig_config(env: &Env) -> MultisigConfig {
    env.storage()
        .instance()
        .get(&DataKey::MultisigConfig)
        .unwrap_or(MultisigConfig {
            threshold_amount: i128::MAX,
            signers: vec![env],
            required_signatures: 0,
        })
}

pub fn is_signer(config: &MultisigConfig, who: &Address) -> bool {
    config.signers.iter().any(|signer| signer == *who)
}

/// Payouts at or above the threshold need `required_signatures` approvals
/// recorded for the same contributor. Approvals are consumed on success.
pub fn check_release_approval(
    env: &Env,
    bounty_id: u64,
    contributor: &Address,
    payout: i128,
) -> Result<(), Error> {
    let config = get_multisig_config(env);
    if config.required_signatures == 0 || payout < config.threshold_amount {
        return Ok(());
    }

    let key = DataKey::ReleaseApproval(bounty_id);
    let approval: ReleaseApproval = env
        .storage()
        .persistent()
        .get(&key)
        .ok_or(Error::MultisigApprovalRequired)?;
    if approval.contributor != *contributor
        || approval.approvals.len() < config.required_signatures
    {
        return Err(Error::MultisigApprovalRequired);
    }

    env.storage().persistent().remove(&key);
    Ok(())
}
