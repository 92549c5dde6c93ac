//! Commitment depositors and resolver-driven refunds.

use crate::{
    AnonymousParty, CustodyEscrowContract, CustodyEscrowContractClient, DataKey,
    Error as ContractError, EscrowStatus,
};
use soroban_sdk::{
    testutils::{Address as _, Ledger},
    token, Address, BytesN, Env, Vec,
};

fn create_test_env() -> (Env, CustodyEscrowContractClient<'static>, Address) {
    let env = Env::default();
    let contract_id = env.register_contract(None, CustodyEscrowContract);
    let client = CustodyEscrowContractClient::new(&env, &contract_id);
    (env, client, contract_id)
}

fn create_token_contract<'a>(
    e: &'a Env,
    admin: &Address,
) -> (Address, token::Client<'a>, token::StellarAssetClient<'a>) {
    let token_id = e.register_stellar_asset_contract_v2(admin.clone());
    let token = token_id.address();
    let token_client = token::Client::new(e, &token);
    let token_admin_client = token::StellarAssetClient::new(e, &token);
    (token, token_client, token_admin_client)
}

fn commitment_from_bytes(env: &Env, bytes: &[u8; 32]) -> BytesN<32> {
    BytesN::from_array(env, bytes)
}

#[test]
fn test_lock_funds_anonymous_stores_commitment_only() {
    let (env, client, contract_id) = create_test_env();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let depositor = Address::generate(&env);
    let (token, token_client, token_admin_client) =
        create_token_contract(&env, &Address::generate(&env));

    client.init(&admin, &token);
    token_admin_client.mint(&depositor, &5_000);

    let commitment = commitment_from_bytes(&env, &[0xab; 32]);
    client.lock_funds_anonymous(&depositor, &commitment, &100, &1_000, &3_600);

    let info = client.get_escrow_info(&100);
    assert_eq!(info.amount, 1_000);
    assert_eq!(info.remaining_amount, 1_000);
    assert_eq!(info.status, EscrowStatus::Active);
    match &info.depositor {
        AnonymousParty::Address(_) => panic!("expected commitment"),
        AnonymousParty::Commitment(c) => assert_eq!(*c, commitment),
    }
    assert_eq!(
        client.get_depositor(&100),
        AnonymousParty::Commitment(commitment)
    );

    // The depositor paid, but no index entry exists for them.
    assert_eq!(token_client.balance(&depositor), 4_000);
    assert_eq!(client.query_escrows_by_depositor(&depositor, &0, &10).len(), 0);
    let depositors: Option<Vec<Address>> = env.as_contract(&contract_id, || {
        env.storage().persistent().get(&DataKey::Depositors)
    });
    assert!(depositors.is_none());
    assert!(client.verify_all_invariants());
}

#[test]
fn test_anonymous_refund_requires_resolution() {
    let (env, client, _) = create_test_env();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let depositor = Address::generate(&env);
    let (token, _token_client, token_admin_client) =
        create_token_contract(&env, &Address::generate(&env));

    client.init(&admin, &token);
    token_admin_client.mint(&depositor, &5_000);

    let commitment = commitment_from_bytes(&env, &[0x01; 32]);
    client.lock_funds_anonymous(&depositor, &commitment, &1, &1_000, &100);

    // Rejected regardless of the deadline.
    assert_eq!(
        client.try_refund(&1),
        Err(Ok(ContractError::AnonymousRefundRequiresResolution))
    );
    env.ledger().set_timestamp(200);
    assert_eq!(
        client.try_refund(&1),
        Err(Ok(ContractError::AnonymousRefundRequiresResolution))
    );
}

#[test]
fn test_refund_resolved_full_scenario() {
    let (env, client, _) = create_test_env();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let depositor = Address::generate(&env);
    let resolver = Address::generate(&env);
    let impostor = Address::generate(&env);
    let recipient = Address::generate(&env);
    let (token, token_client, token_admin_client) =
        create_token_contract(&env, &Address::generate(&env));

    client.init(&admin, &token);
    token_admin_client.mint(&depositor, &5_000);

    let commitment = commitment_from_bytes(&env, &[0x02; 32]);
    client.lock_funds_anonymous(&depositor, &commitment, &7, &1_000, &100);
    env.ledger().set_timestamp(101);

    assert_eq!(
        client.try_refund_resolved(&resolver, &7, &recipient),
        Err(Ok(ContractError::AnonymousResolverNotSet))
    );

    client.set_anonymous_resolver(&Some(resolver.clone()));
    assert_eq!(client.get_anonymous_resolver(), Some(resolver.clone()));

    assert_eq!(
        client.try_refund_resolved(&impostor, &7, &recipient),
        Err(Ok(ContractError::NotAnonymousResolver))
    );

    client.refund_resolved(&resolver, &7, &recipient);

    assert_eq!(token_client.balance(&recipient), 1_000);
    assert_eq!(token_client.balance(&client.address), 0);
    let info = client.get_escrow_info(&7);
    assert_eq!(info.status, EscrowStatus::Refunded);
    assert_eq!(info.remaining_amount, 0);
    assert!(client.verify_all_invariants());
}

#[test]
fn test_refund_resolved_before_deadline_fails() {
    let (env, client, _) = create_test_env();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let depositor = Address::generate(&env);
    let resolver = Address::generate(&env);
    let (token, _token_client, token_admin_client) =
        create_token_contract(&env, &Address::generate(&env));

    client.init(&admin, &token);
    token_admin_client.mint(&depositor, &5_000);
    client.set_anonymous_resolver(&Some(resolver.clone()));

    let commitment = commitment_from_bytes(&env, &[0x03; 32]);
    client.lock_funds_anonymous(&depositor, &commitment, &8, &1_000, &500);

    assert_eq!(
        client.try_refund_resolved(&resolver, &8, &Address::generate(&env)),
        Err(Ok(ContractError::DeadlineNotPassed))
    );
}

#[test]
fn test_refund_resolved_rejects_address_depositor() {
    let (env, client, _) = create_test_env();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let depositor = Address::generate(&env);
    let resolver = Address::generate(&env);
    let (token, _token_client, token_admin_client) =
        create_token_contract(&env, &Address::generate(&env));

    client.init(&admin, &token);
    token_admin_client.mint(&depositor, &5_000);
    client.set_anonymous_resolver(&Some(resolver.clone()));

    client.lock_funds(&depositor, &9, &1_000, &100);
    env.ledger().set_timestamp(200);

    assert_eq!(
        client.try_refund_resolved(&resolver, &9, &resolver),
        Err(Ok(ContractError::NotAnonymousEscrow))
    );
}

#[test]
fn test_clearing_resolver_blocks_resolution() {
    let (env, client, _) = create_test_env();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let depositor = Address::generate(&env);
    let resolver = Address::generate(&env);
    let (token, _token_client, token_admin_client) =
        create_token_contract(&env, &Address::generate(&env));

    client.init(&admin, &token);
    token_admin_client.mint(&depositor, &5_000);
    client.set_anonymous_resolver(&Some(resolver.clone()));
    client.set_anonymous_resolver(&None);
    assert_eq!(client.get_anonymous_resolver(), None);

    let commitment = commitment_from_bytes(&env, &[0x04; 32]);
    client.lock_funds_anonymous(&depositor, &commitment, &10, &1_000, &100);
    env.ledger().set_timestamp(200);

    assert_eq!(
        client.try_refund_resolved(&resolver, &10, &resolver),
        Err(Ok(ContractError::AnonymousResolverNotSet))
    );
}

#[test]
fn test_release_works_for_anonymous_escrow() {
    let (env, client, _) = create_test_env();
    env.mock_all_auths();

    let admin = Address::generate(&env);
    let depositor = Address::generate(&env);
    let contributor = Address::generate(&env);
    let (token, token_client, token_admin_client) =
        create_token_contract(&env, &Address::generate(&env));

    client.init(&admin, &token);
    token_admin_client.mint(&depositor, &5_000);

    let commitment = commitment_from_bytes(&env, &[0x05; 32]);
    client.lock_funds_anonymous(&depositor, &commitment, &11, &2_000, &1_000);
    client.release_funds(&11, &contributor);

    assert_eq!(token_client.balance(&contributor), 2_000);
    assert_eq!(
        client.get_escrow_info(&11).status,
        EscrowStatus::FullyReleased
    );
}
