//! Simulate -> train -> persist -> serve, against the causal ground truth.

use common::contract::{ASSET_CLASSES, CURRENCIES, LIQUIDITY_TIERS, RATINGS, SSI_STATUSES};
use proptest::prelude::*;
use settlement_risk::{
    ArtifactBundle, BoosterParams, Explanation, RiskLevel, ScoreRequest, ScoringContext, ScoringError,
    ServiceState, ServingConfig, TrainingConfig, TrainingOrchestrator, FEATURE_NAMES_FILE, MODEL_FILE,
};
use std::sync::{Arc, OnceLock};
use trade_simulator::{CausalSimulator, SimulatorConfig};

const TRAINING_ROWS: usize = 40_000;
const DEFAULT_CONFIG_ROWS: usize = 60_000;

fn trained_bundle() -> &'static ArtifactBundle {
    static BUNDLE: OnceLock<ArtifactBundle> = OnceLock::new();
    BUNDLE.get_or_init(|| {
        let trades = CausalSimulator::new(SimulatorConfig::default())
            .unwrap()
            .generate(TRAINING_ROWS)
            .unwrap();

        let params = BoosterParams {
            n_estimators: 150,
            learning_rate: 0.15,
            max_depth: 4,
            ..BoosterParams::default()
        };
        TrainingOrchestrator::new(TrainingConfig::default(), params)
            .fit_bundle(&trades)
            .unwrap()
            .bundle
    })
}

/// Trained with the shipped defaults for both training and boosting.
fn default_bundle() -> &'static ArtifactBundle {
    static BUNDLE: OnceLock<ArtifactBundle> = OnceLock::new();
    BUNDLE.get_or_init(|| {
        let trades = CausalSimulator::new(SimulatorConfig::default())
            .unwrap()
            .generate(DEFAULT_CONFIG_ROWS)
            .unwrap();

        TrainingOrchestrator::new(TrainingConfig::default(), BoosterParams::default())
            .fit_bundle(&trades)
            .unwrap()
            .bundle
    })
}

fn context() -> ScoringContext {
    ScoringContext::from_bundle(trained_bundle().clone(), ServingConfig::default())
}

fn neutral_request() -> ScoreRequest {
    ScoreRequest {
        trade_id: Some("neutral".to_string()),
        asset_class: Some("Equity".to_string()),
        counterparty_rating: Some("AA".to_string()),
        custodian_location: Some("US".to_string()),
        ssi_status: Some("Match".to_string()),
        liquidity_score: Some("High".to_string()),
        market_volatility_index: Some(15.0),
        operation_type: Some("DVP".to_string()),
        currency: Some("USD".to_string()),
        notional_amount_usd: Some(5_000_000.0),
        ..ScoreRequest::default()
    }
}

#[test]
fn test_ssi_mismatch_is_critical() {
    let request = ScoreRequest {
        trade_id: Some("mismatch".to_string()),
        ssi_status: Some("Mismatch".to_string()),
        ..neutral_request()
    };

    let result = context().score(&request).unwrap();
    assert!(
        result.failure_probability > 0.85,
        "probability {}",
        result.failure_probability
    );
    assert_eq!(result.risk_level, RiskLevel::Critical);
    assert_eq!(result.prediction, 1);
    assert_eq!(result.trade_id.as_deref(), Some("mismatch"));
}

#[test]
fn test_neutral_trade_stays_near_base_rate() {
    let result = context().score(&neutral_request()).unwrap();
    assert!(
        result.failure_probability <= 0.10,
        "probability {}",
        result.failure_probability
    );
    assert_eq!(result.risk_level, RiskLevel::Low);
    assert_eq!(result.prediction, 0);
}

#[test]
fn test_default_configuration_scenarios() {
    let ctx = ScoringContext::from_bundle(default_bundle().clone(), ServingConfig::default());

    let mismatch = ScoreRequest {
        ssi_status: Some("Mismatch".to_string()),
        ..neutral_request()
    };
    let result = ctx.score(&mismatch).unwrap();
    assert!(
        result.failure_probability > 0.85,
        "mismatch probability {}",
        result.failure_probability
    );
    assert_eq!(result.risk_level, RiskLevel::Critical);

    let result = ctx.score(&neutral_request()).unwrap();
    assert!(
        result.failure_probability <= 0.10,
        "neutral probability {}",
        result.failure_probability
    );
    assert_eq!(result.risk_level, RiskLevel::Low);
}

#[test]
fn test_attribution_is_additive_to_margin() {
    let bundle = trained_bundle();
    let explainer = bundle.explainer.as_ref().expect("attribution model built");
    let holdout = CausalSimulator::new(SimulatorConfig {
        seed: 7,
        ..SimulatorConfig::default()
    })
    .unwrap()
    .generate(80)
    .unwrap();

    for trade in &holdout {
        let enriched = common::derive_features(&trade.record).unwrap();
        let x = bundle.preprocessor.transform(&enriched).unwrap();
        let attribution = explainer.explain(&x).unwrap();

        assert_eq!(attribution.contributions.len(), bundle.feature_names.len());
        let margin = bundle.classifier.margin(&x);
        assert!(
            (attribution.total() - margin).abs() < 1e-3,
            "attribution {} vs margin {}",
            attribution.total(),
            margin
        );
    }
}

#[test]
fn test_ssi_contribution_dominates_mismatch() {
    let request = ScoreRequest {
        ssi_status: Some("Mismatch".to_string()),
        ..neutral_request()
    };
    let result = context().score(&request).unwrap();

    let Explanation::Available {
        feature_contributions, ..
    } = &result.explanation
    else {
        panic!("expected attribution, got {:?}", result.explanation);
    };

    let names = &trained_bundle().feature_names;
    let (top, value) = names
        .iter()
        .zip(feature_contributions)
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .unwrap();
    assert!(top.starts_with("SSI_Status_"), "top factor {}", top);
    assert!(value.abs() > 0.0);
}

#[test]
fn test_disabled_attribution_returns_neutral_explanation() {
    let config = ServingConfig {
        attribution_enabled: false,
        ..ServingConfig::default()
    };
    let ctx = ScoringContext::from_bundle(trained_bundle().clone(), config);

    let result = ctx.score(&neutral_request()).unwrap();
    assert!(!result.explanation.is_available());

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["explanation"]["feature_contributions"].as_array().unwrap().len(), 0);
    assert_eq!(json["risk_level"], "LOW");
    assert!(!ctx.health().attribution_available);
}

#[test]
fn test_unseen_category_scores() {
    let request = ScoreRequest {
        currency: Some("CHF".to_string()),
        ..neutral_request()
    };
    let result = context().score(&request).unwrap();
    assert!((0.0..=1.0).contains(&result.failure_probability));
}

#[test]
fn test_save_load_and_reload() {
    let first = tempfile::tempdir().unwrap();
    trained_bundle().save(first.path()).unwrap();
    assert!(first.path().join(MODEL_FILE).exists());
    assert!(first.path().join(FEATURE_NAMES_FILE).exists());

    let ctx = ScoringContext::load(first.path(), &ServingConfig::default());
    let health = ctx.health();
    assert_eq!(health.status, ServiceState::Healthy);
    assert!(health.attribution_available);
    assert_eq!(health.feature_count, trained_bundle().feature_names.len());

    let before = ctx.score(&neutral_request()).unwrap();
    let direct = context().score(&neutral_request()).unwrap();
    assert_eq!(before.failure_probability, direct.failure_probability);

    let second = tempfile::tempdir().unwrap();
    trained_bundle().save(second.path()).unwrap();
    ctx.reload(second.path()).unwrap();
    assert_eq!(
        ctx.score(&neutral_request()).unwrap().failure_probability,
        before.failure_probability
    );

    let missing = second.path().join("does-not-exist");
    assert!(ctx.reload(&missing).is_err());
    let health = ctx.health();
    assert_eq!(health.status, ServiceState::Healthy);
    assert!(health.detail.is_some());
    assert!(ctx.score(&neutral_request()).is_ok());

    ctx.unload();
    assert_eq!(ctx.health().status, ServiceState::Degraded);
    assert_eq!(
        ctx.score(&neutral_request()).unwrap_err(),
        ScoringError::ModelUnavailable
    );
}

#[tokio::test]
async fn test_concurrent_scoring_matches_serial() {
    let ctx = Arc::new(context());
    let expected = ctx.score(&neutral_request()).unwrap().failure_probability;

    let mut handles = Vec::new();
    for i in 0..16 {
        let ctx = Arc::clone(&ctx);
        handles.push(tokio::task::spawn_blocking(move || {
            let request = ScoreRequest {
                trade_id: Some(format!("t-{i}")),
                ..neutral_request()
            };
            ctx.score(&request).unwrap()
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.failure_probability, expected);
        assert!(result.explanation.is_available());
    }
}

fn arb_request() -> impl Strategy<Value = ScoreRequest> {
    (
        prop::sample::select(ASSET_CLASSES.to_vec()),
        prop::sample::select(RATINGS.to_vec()),
        prop::sample::select(SSI_STATUSES.to_vec()),
        prop::sample::select(LIQUIDITY_TIERS.to_vec()),
        prop::sample::select(CURRENCIES.to_vec()),
        0.0f64..80.0,
        1.0f64..1e10,
    )
        .prop_map(|(asset, rating, ssi, liquidity, currency, vix, notional)| ScoreRequest {
            asset_class: Some(asset.to_string()),
            counterparty_rating: Some(rating.to_string()),
            ssi_status: Some(ssi.to_string()),
            liquidity_score: Some(liquidity.to_string()),
            currency: Some(currency.to_string()),
            market_volatility_index: Some(vix),
            notional_amount_usd: Some(notional),
            ..ScoreRequest::default()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_scores_are_bounded_and_tiered(request in arb_request()) {
        let result = context().score(&request).unwrap();
        prop_assert!((0.0..=1.0).contains(&result.failure_probability));
        prop_assert_eq!(result.risk_level, RiskLevel::from_probability(result.failure_probability));
        prop_assert_eq!(result.prediction, u8::from(result.failure_probability > 0.5));

        if let Explanation::Available { base_value, feature_contributions } = &result.explanation {
            let margin = base_value + feature_contributions.iter().sum::<f64>();
            let probability = 1.0 / (1.0 + (-margin).exp());
            prop_assert!((probability - result.failure_probability).abs() < 1e-6);
        }
    }
}
