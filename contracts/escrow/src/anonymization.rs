//! Commitment-held depositors and the resolver refund path.
//!
//! An anonymous escrow stores only a 32-byte commitment in place of the
//! depositor. Refunds for such escrows go through the single configured
//! resolver, which supplies the recipient. The contract does not check that
//! the recipient corresponds to the commitment.
use crate::{DataKey, Error, Escrow};
use soroban_sdk::{contracttype, Address, BytesN, Env};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AnonymousParty {
    Address(Address),
    Commitment(BytesN<32>),
}

impl AnonymousParty {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, AnonymousParty::Commitment(_))
    }
}

pub fn get_resolver(env: &Env) -> Option<Address> {
    env.storage().instance().get(&DataKey::AnonymousResolver)
}

pub fn set_resolver(env: &Env, resolver: &Option<Address>) {
    match resolver {
        Some(addr) => env
            .storage()
            .instance()
            .set(&DataKey::AnonymousResolver, addr),
        None => env.storage().instance().remove(&DataKey::AnonymousResolver),
    }
}

/// Target of a plain `refund`. Commitment depositors have no address to
/// return funds to.
pub fn refund_target(escrow: &Escrow) -> Result<Address, Error> {
    match &escrow.depositor {
        AnonymousParty::Address(addr) => Ok(addr.clone()),
        AnonymousParty::Commitment(_) => Err(Error::AnonymousRefundRequiresResolution),
    }
}

/// Checks that `caller` may resolve a refund for `escrow`, then requires its auth.
pub fn authorize_resolution(env: &Env, escrow: &Escrow, caller: &Address) -> Result<(), Error> {
    if !escrow.depositor.is_anonymous() {
        return Err(Error::NotAnonymousEscrow);
    }
    let resolver = get_resolver(env).ok_or(Error::AnonymousResolverNotSet)?;
    if *caller != resolver {
        return Err(Error::NotAnonymousResolver);
    }
    caller.require_auth();
    Ok(())
}
