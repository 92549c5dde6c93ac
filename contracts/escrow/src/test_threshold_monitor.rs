use super::*;
use soroban_sdk::{testutils::Address as _, testutils::Ledger as _, token, Address, Env};

fn setup(env: &Env) -> (CustodyEscrowContractClient<'static>, Address) {
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
    (client, depositor)
}

fn thresholds(outflow: i128, single: i128, window: u64) -> ThresholdConfig {
    ThresholdConfig {
        outflow_volume_threshold: outflow,
        max_single_payout: single,
        time_window_secs: window,
        ..ThresholdConfig::default_config()
    }
}

#[test]
fn test_config_validation_bounds() {
    let valid = ThresholdConfig::default_config();
    assert!(valid.validate().is_ok());

    let cases = [
        ThresholdConfig { failure_rate_threshold: 0, ..valid.clone() },
        ThresholdConfig { failure_rate_threshold: 1_001, ..valid.clone() },
        ThresholdConfig { outflow_volume_threshold: 0, ..valid.clone() },
        ThresholdConfig { max_single_payout: -1, ..valid.clone() },
        ThresholdConfig { time_window_secs: 9, ..valid.clone() },
        ThresholdConfig { time_window_secs: 86_401, ..valid.clone() },
        ThresholdConfig { cooldown_period_secs: 59, ..valid.clone() },
        ThresholdConfig { cooldown_period_secs: 3_601, ..valid.clone() },
        ThresholdConfig { cooldown_multiplier: 0, ..valid.clone() },
    ];
    for config in cases.iter() {
        assert_eq!(config.validate(), Err(Error::InvalidThresholdConfig));
    }

    let edges = ThresholdConfig {
        failure_rate_threshold: 1_000,
        time_window_secs: 10,
        cooldown_period_secs: 3_600,
        cooldown_multiplier: 1,
        ..valid
    };
    assert!(edges.validate().is_ok());
}

#[test]
fn test_defaults_seeded_at_init() {
    let env = Env::default();
    let (client, _depositor) = setup(&env);

    assert_eq!(
        client.get_threshold_config(),
        ThresholdConfig::default_config()
    );
    let metrics = client.get_threshold_metrics();
    assert_eq!(metrics, WindowMetrics::new(0));
    assert_eq!(client.get_previous_threshold_window(), None);
}

#[test]
fn test_invalid_config_keeps_previous() {
    let env = Env::default();
    let (client, _depositor) = setup(&env);

    let custom = thresholds(10_000, 1_000, 60);
    client.configure_thresholds(&custom);
    assert_eq!(client.get_threshold_config(), custom);

    assert_eq!(
        client.try_configure_thresholds(&thresholds(10_000, 1_000, 5)),
        Err(Ok(Error::InvalidThresholdConfig))
    );
    assert_eq!(client.get_threshold_config(), custom);
}

#[test]
fn test_window_rotation_archives_previous_window() {
    let env = Env::default();
    let (client, depositor) = setup(&env);
    client.configure_thresholds(&thresholds(1_000_000, 1_000_000, 60));

    client.lock_funds(&depositor, &1, &1_000, &10_000);
    client.partial_release(&1, &Address::generate(&env), &250);
    let metrics = client.get_threshold_metrics();
    assert_eq!(metrics.success_count, 2);
    assert_eq!(metrics.total_outflow, 250);
    assert_eq!(metrics.max_single_outflow, 250);

    env.ledger().set_timestamp(61);
    client.lock_funds(&depositor, &2, &1_000, &10_000);

    let previous = client.get_previous_threshold_window().unwrap();
    assert_eq!(previous.window_start, 0);
    assert_eq!(previous.success_count, 2);
    assert_eq!(previous.total_outflow, 250);

    let current = client.get_threshold_metrics();
    assert_eq!(current.window_start, 61);
    assert_eq!(current.success_count, 1);
    assert_eq!(current.total_outflow, 0);
}

#[test]
fn test_outflow_volume_breach_trips_breaker() {
    let env = Env::default();
    let (client, depositor) = setup(&env);
    let contributor = Address::generate(&env);
    client.configure_thresholds(&thresholds(1_000, 100_000, 600));

    client.lock_funds(&depositor, &1, &5_000, &10_000);
    client.partial_release(&1, &contributor, &600);
    assert_eq!(client.get_circuit_status().state, CircuitState::Closed);

    // The payout that crosses the threshold goes through and blocks later calls.
    client.partial_release(&1, &contributor, &600);
    let status = client.get_circuit_status();
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.trip_count, 1);

    assert_eq!(
        client.try_partial_release(&1, &contributor, &100),
        Err(Ok(Error::CircuitOpen))
    );
    assert_eq!(client.get_escrow_info(&1).remaining_amount, 3_800);

    let archived = client.get_previous_threshold_window().unwrap();
    assert_eq!(archived.total_outflow, 1_200);
    assert_eq!(archived.breach_count, 1);
    assert_eq!(client.get_threshold_metrics().total_outflow, 0);
}

#[test]
fn test_single_payout_breach_rejects_call() {
    let env = Env::default();
    let (client, depositor) = setup(&env);
    let contributor = Address::generate(&env);
    client.configure_thresholds(&thresholds(1_000_000, 500, 600));

    client.lock_funds(&depositor, &1, &5_000, &10_000);
    assert_eq!(
        client.try_partial_release(&1, &contributor, &600),
        Err(Ok(Error::CircuitOpen))
    );
    // The rejected invocation is rolled back, trip included.
    assert_eq!(client.get_escrow_info(&1).remaining_amount, 5_000);
    assert_eq!(client.get_circuit_status().state, CircuitState::Closed);

    client.partial_release(&1, &contributor, &500);
    assert_eq!(client.get_escrow_info(&1).remaining_amount, 4_500);
}

#[test]
fn test_reset_metrics_zeroes_current_window() {
    let env = Env::default();
    let (client, depositor) = setup(&env);

    client.lock_funds(&depositor, &1, &1_000, &10_000);
    client.release_funds(&1, &Address::generate(&env));
    assert_eq!(client.get_threshold_metrics().total_outflow, 1_000);

    env.ledger().set_timestamp(30);
    client.reset_threshold_metrics();
    assert_eq!(client.get_threshold_metrics(), WindowMetrics::new(30));
}

#[test]
fn test_failed_calls_are_not_persisted() {
    let env = Env::default();
    let (client, depositor) = setup(&env);

    client.lock_funds(&depositor, &1, &1_000, &10_000);
    for _ in 0..3 {
        assert_eq!(client.try_refund(&1), Err(Ok(Error::DeadlineNotPassed)));
    }
    assert_eq!(client.get_threshold_metrics().failure_count, 0);
}
