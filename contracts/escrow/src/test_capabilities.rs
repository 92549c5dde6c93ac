use super::*;
use soroban_sdk::{testutils::Address as _, testutils::Ledger as _, token, Address, Env};

struct Setup {
    client: CustodyEscrowContractClient<'static>,
    depositor: Address,
    holder: Address,
    token: token::Client<'static>,
}

fn setup(env: &Env) -> Setup {
    env.mock_all_auths();
    let contract_id = env.register_contract(None, CustodyEscrowContract);
    let client = CustodyEscrowContractClient::new(env, &contract_id);

    let admin = Address::generate(env);
    let depositor = Address::generate(env);
    let token_id = env
        .register_stellar_asset_contract_v2(Address::generate(env))
        .address();
    token::StellarAssetClient::new(env, &token_id).mint(&depositor, &100_000);

    client.init(&admin, &token_id);
    client.lock_funds(&depositor, &1, &1_000, &10_000);
    Setup {
        client,
        depositor,
        holder: Address::generate(env),
        token: token::Client::new(env, &token_id),
    }
}

#[test]
fn test_release_with_capability_decrements_budget() {
    let env = Env::default();
    let s = setup(&env);
    let contributor = Address::generate(&env);

    let id = s.client.issue_release_capability(&1, &s.holder, &500, &5_000, &2);
    assert_eq!(id, 1);

    s.client
        .release_with_capability(&1, &contributor, &200, &s.holder, &id);
    assert_eq!(s.token.balance(&contributor), 200);

    let capability = s.client.get_capability(&id);
    assert_eq!(capability.remaining_amount, 300);
    assert_eq!(capability.remaining_uses, 1);
    assert_eq!(s.client.get_escrow_info(&1).remaining_amount, 800);

    s.client
        .release_with_capability(&1, &contributor, &300, &s.holder, &id);
    assert_eq!(
        s.client
            .try_release_with_capability(&1, &contributor, &1, &s.holder, &id),
        Err(Ok(Error::CapabilityUsesExhausted))
    );
    assert_eq!(s.token.balance(&contributor), 500);
}

#[test]
fn test_capability_ids_increase() {
    let env = Env::default();
    let s = setup(&env);

    assert_eq!(
        s.client.issue_release_capability(&1, &s.holder, &100, &5_000, &1),
        1
    );
    assert_eq!(
        s.client.issue_release_capability(&1, &s.holder, &100, &5_000, &1),
        2
    );
}

#[test]
fn test_issue_validation() {
    let env = Env::default();
    let s = setup(&env);

    assert_eq!(
        s.client
            .try_issue_release_capability(&1, &s.holder, &100, &5_000, &0),
        Err(Ok(Error::InvalidAmount))
    );
    assert_eq!(
        s.client
            .try_issue_release_capability(&1, &s.holder, &0, &5_000, &1),
        Err(Ok(Error::InvalidAmount))
    );
    assert_eq!(
        s.client
            .try_issue_release_capability(&1, &s.holder, &100, &0, &1),
        Err(Ok(Error::InvalidDeadline))
    );
    assert_eq!(
        s.client
            .try_issue_release_capability(&1, &s.holder, &1_001, &5_000, &1),
        Err(Ok(Error::InsufficientRemaining))
    );
    assert_eq!(
        s.client
            .try_issue_release_capability(&9, &s.holder, &100, &5_000, &1),
        Err(Ok(Error::BountyNotFound))
    );
}

#[test]
fn test_capability_amount_limit() {
    let env = Env::default();
    let s = setup(&env);
    let id = s.client.issue_release_capability(&1, &s.holder, &500, &5_000, &3);

    assert_eq!(
        s.client
            .try_release_with_capability(&1, &Address::generate(&env), &501, &s.holder, &id),
        Err(Ok(Error::CapabilityAmountExceeded))
    );
}

#[test]
fn test_capability_bound_to_holder_and_escrow() {
    let env = Env::default();
    let s = setup(&env);
    let contributor = Address::generate(&env);
    s.client.lock_funds(&s.depositor, &2, &1_000, &10_000);
    let id = s.client.issue_release_capability(&1, &s.holder, &500, &5_000, &3);

    assert_eq!(
        s.client.try_release_with_capability(
            &1,
            &contributor,
            &100,
            &Address::generate(&env),
            &id
        ),
        Err(Ok(Error::CapabilityMismatch))
    );
    assert_eq!(
        s.client
            .try_release_with_capability(&2, &contributor, &100, &s.holder, &id),
        Err(Ok(Error::CapabilityMismatch))
    );
}

#[test]
fn test_revoked_capability() {
    let env = Env::default();
    let s = setup(&env);
    let id = s.client.issue_release_capability(&1, &s.holder, &500, &5_000, &3);

    s.client.revoke_capability(&id);
    s.client.revoke_capability(&id);
    assert!(s.client.get_capability(&id).revoked);
    assert_eq!(
        s.client
            .try_release_with_capability(&1, &Address::generate(&env), &100, &s.holder, &id),
        Err(Ok(Error::CapabilityRevoked))
    );
}

#[test]
fn test_expired_capability() {
    let env = Env::default();
    let s = setup(&env);
    let id = s.client.issue_release_capability(&1, &s.holder, &500, &5_000, &3);

    env.ledger().set_timestamp(5_001);
    assert_eq!(
        s.client
            .try_release_with_capability(&1, &Address::generate(&env), &100, &s.holder, &id),
        Err(Ok(Error::CapabilityExpired))
    );
}

#[test]
fn test_unknown_capability() {
    let env = Env::default();
    let s = setup(&env);

    assert_eq!(
        s.client.try_get_capability(&7),
        Err(Ok(Error::CapabilityNotFound))
    );
    assert_eq!(
        s.client
            .try_release_with_capability(&1, &Address::generate(&env), &100, &s.holder, &7),
        Err(Ok(Error::CapabilityNotFound))
    );
    assert_eq!(
        s.client.try_revoke_capability(&7),
        Err(Ok(Error::CapabilityNotFound))
    );
}
