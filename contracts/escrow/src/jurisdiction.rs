//! Per-escrow jurisdiction policy.
//!
//! A policy snapshot is captured on the escrow at lock time and is never
//! re-read from anywhere else afterwards. Pause flags apply per lifecycle
//! phase. `enforce_limits` gates the amount cap and KYC checks separately
//! from the pause flags.
use crate::events::{self, JurisdictionLifecycle, EVENT_VERSION_V2};
use crate::Error;
use soroban_sdk::{contracttype, Env, String, Symbol};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EscrowJurisdictionConfig {
    pub tag: Option<String>,
    pub requires_kyc: bool,
    pub enforce_limits: bool,
    pub lock_paused: bool,
    pub release_paused: bool,
    pub refund_paused: bool,
    pub max_amount: Option<i128>,
}

pub fn validate(config: &Option<EscrowJurisdictionConfig>) -> Result<(), Error> {
    if let Some(config) = config {
        if let Some(max_amount) = config.max_amount {
            if max_amount <= 0 {
                return Err(Error::InvalidJurisdictionConfig);
            }
        }
    }
    Ok(())
}

pub fn enforce_lock(
    config: &Option<EscrowJurisdictionConfig>,
    amount: i128,
    kyc_attested: Option<bool>,
) -> Result<(), Error> {
    if let Some(config) = config {
        if config.lock_paused {
            return Err(Error::LockPaused);
        }
        if config.enforce_limits {
            if let Some(max_amount) = config.max_amount {
                if amount > max_amount {
                    return Err(Error::JurisdictionFundingLimitExceeded);
                }
            }
            if config.requires_kyc && !kyc_attested.unwrap_or(false) {
                return Err(Error::JurisdictionKycRequired);
            }
        }
    }
    Ok(())
}

pub fn enforce_release(
    config: &Option<EscrowJurisdictionConfig>,
    kyc_attested: Option<bool>,
) -> Result<(), Error> {
    if let Some(config) = config {
        if config.release_paused {
            return Err(Error::ReleasePaused);
        }
        if config.enforce_limits && config.requires_kyc && !kyc_attested.unwrap_or(false) {
            return Err(Error::JurisdictionKycRequired);
        }
    }
    Ok(())
}

/// Claims are pre-authorized by the admin at ticket issuance, so only the
/// release pause applies.
pub fn enforce_claim(config: &Option<EscrowJurisdictionConfig>) -> Result<(), Error> {
    match config {
        Some(config) if config.release_paused => Err(Error::ReleasePaused),
        _ => Ok(()),
    }
}

pub fn enforce_refund(config: &Option<EscrowJurisdictionConfig>) -> Result<(), Error> {
    match config {
        Some(config) if config.refund_paused => Err(Error::RefundPaused),
        _ => Ok(()),
    }
}

/// Emits a jurisdiction-tagged lifecycle event. No-op for untagged escrows.
pub fn emit_lifecycle(
    env: &Env,
    bounty_id: u64,
    operation: Symbol,
    config: &Option<EscrowJurisdictionConfig>,
) {
    if let Some(config) = config {
        events::emit_jurisdiction_lifecycle(
            env,
            JurisdictionLifecycle {
                version: EVENT_VERSION_V2,
                bounty_id,
                operation,
                tag: config.tag.clone(),
                requires_kyc: config.requires_kyc,
                enforce_limits: config.enforce_limits,
                lock_paused: config.lock_paused,
                release_paused: config.release_paused,
                refund_paused: config.refund_paused,
                max_amount: config.max_amount,
                timestamp: env.ledger().timestamp(),
            },
        );
    }
}
