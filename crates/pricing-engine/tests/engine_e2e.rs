//! End-to-end evaluation scenarios against in-memory stores, plus
//! remote pricing resolution against a mock HTTP host.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pricing_core::{
    BillingPeriod, Contract, FeatureDefinition, FeatureValue, Plan, Pricing, PricingLocator,
    RenewalPeriod, Service,
};
use pricing_engine::{
    Cache, ConsumeOptions, ContractStore, EngineError, EvaluationOptions, FallbackSubscription,
    FeatureEvaluator, MemoryCache, MemoryContractStore, MemoryServiceStore, NovationEngine,
    PricingResolver, ResolverConfig, ServiceStore, SingleEvaluation,
};
use pricing_events::{EventSink, NoopEventSink};
use pricing_expr::Value;

fn seats_pricing(version: &str, seats: f64) -> Pricing {
    let mut pricing = Pricing::new(version, "USD");
    pricing.features.insert(
        "maxSeats".into(),
        FeatureDefinition::numeric("maxSeats", 0.0)
            .with_server_expression("acme.usage.maxSeats <= acme.maxSeats")
            .with_renewal_period(RenewalPeriod::Monthly),
    );
    pricing.plans.insert(
        "BASIC".into(),
        Plan {
            price: 9.99,
            features: BTreeMap::from([("maxSeats".into(), FeatureValue::Number(seats))]),
            usage_limits: BTreeMap::new(),
        },
    );
    pricing
}

struct Harness {
    evaluator: FeatureEvaluator,
    novation: NovationEngine,
    services: Arc<MemoryServiceStore>,
    contracts: Arc<MemoryContractStore>,
    org: Uuid,
}

async fn harness() -> Harness {
    let services = Arc::new(MemoryServiceStore::new());
    let contracts = Arc::new(MemoryContractStore::new());
    let cache = Arc::new(MemoryCache::new());
    let org = Uuid::now_v7();

    let mut service = Service::new("acme", org);
    service
        .add_active("1.0.0", PricingLocator::Id("p-1".into()))
        .unwrap();
    services.update(service).await.unwrap();
    services
        .insert_pricing("p-1", seats_pricing("1.0.0", 10.0))
        .await
        .unwrap();

    let resolver = Arc::new(
        PricingResolver::new(
            services.clone() as Arc<dyn ServiceStore>,
            cache.clone() as Arc<dyn Cache>,
            ResolverConfig::default(),
        )
        .unwrap(),
    );

    let evaluator = FeatureEvaluator::new(
        services.clone() as Arc<dyn ServiceStore>,
        contracts.clone() as Arc<dyn ContractStore>,
        cache.clone() as Arc<dyn Cache>,
        resolver.clone(),
    );
    let novation = NovationEngine::new(
        services.clone() as Arc<dyn ServiceStore>,
        contracts.clone() as Arc<dyn ContractStore>,
        cache as Arc<dyn Cache>,
        resolver,
        Arc::new(NoopEventSink) as Arc<dyn EventSink>,
    );

    Harness {
        evaluator,
        novation,
        services,
        contracts,
        org,
    }
}

async fn subscribe(harness: &Harness, user: &str, auto_renew: bool) {
    let now = Utc::now();
    let mut contract = Contract::new(user, harness.org, BillingPeriod::starting(now, 30, auto_renew));
    contract.subscribe("acme", "1.0.0", Some("BASIC".to_string()));
    harness.contracts.update(contract).await.unwrap();
}

async fn consume_seats(harness: &Harness, user: &str, amount: f64) -> SingleEvaluation {
    harness
        .evaluator
        .evaluate_feature(
            harness.org,
            user,
            "maxSeats",
            &ConsumeOptions {
                expected: BTreeMap::from([("seats".to_string(), amount)]),
                server: true,
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn seat_consumption_lifecycle() {
    let harness = harness().await;
    subscribe(&harness, "u1", true).await;

    // First seat: within the limit of 10 granted by BASIC.
    match consume_seats(&harness, "u1", 1.0).await {
        SingleEvaluation::Evaluated(evaluation) => {
            assert_eq!(evaluation.eval, Value::Bool(true));
            assert_eq!(evaluation.used, Some(1.0));
            assert_eq!(evaluation.limit, Some(10.0));
        }
        other => panic!("expected evaluation, got {other:?}"),
    }

    // Seats two through eight.
    for _ in 0..7 {
        consume_seats(&harness, "u1", 1.0).await;
    }

    // Ninth seat still fits.
    match consume_seats(&harness, "u1", 1.0).await {
        SingleEvaluation::Evaluated(evaluation) => {
            assert_eq!(evaluation.eval, Value::Bool(true));
            assert_eq!(evaluation.used, Some(9.0));
            assert_eq!(evaluation.limit, Some(10.0));
        }
        other => panic!("expected evaluation, got {other:?}"),
    }

    // Two more would cross the limit: refused, counter untouched.
    match consume_seats(&harness, "u1", 2.0).await {
        SingleEvaluation::Evaluated(evaluation) => {
            assert_eq!(evaluation.eval, Value::Bool(false));
            assert_eq!(evaluation.used, Some(9.0));
            assert_eq!(evaluation.limit, Some(10.0));
        }
        other => panic!("expected evaluation, got {other:?}"),
    }

    let stored = harness
        .contracts
        .find_by_user_id(harness.org, "u1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_level("acme", "maxSeats").unwrap().consumed, 9.0);
}

#[tokio::test]
async fn aggregate_evaluation_reflects_consumption() {
    let harness = harness().await;
    subscribe(&harness, "u1", true).await;

    consume_seats(&harness, "u1", 4.0).await;

    let summary = harness
        .evaluator
        .evaluate_all(
            harness.org,
            "u1",
            &EvaluationOptions {
                server: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let seats = &summary.evaluations["acme.maxSeats"];
    assert_eq!(seats.eval, Value::Bool(true));
    assert_eq!(seats.used, Some(4.0));
    assert_eq!(seats.limit, Some(10.0));
}

#[tokio::test]
async fn expired_contract_renews_exactly_once() {
    let harness = harness().await;

    let start = Utc::now() - Duration::days(90);
    let mut contract = Contract::new("u1", harness.org, BillingPeriod::starting(start, 30, true));
    contract.subscribe("acme", "1.0.0", Some("BASIC".to_string()));
    harness.contracts.update(contract).await.unwrap();

    for _ in 0..3 {
        harness
            .evaluator
            .evaluate_all(harness.org, "u1", &EvaluationOptions::default())
            .await
            .unwrap();
    }

    let stored = harness
        .contracts
        .find_by_user_id(harness.org, "u1")
        .await
        .unwrap()
        .unwrap();
    // One renewal, recorded once, regardless of how many evaluations ran.
    assert_eq!(stored.history.len(), 1);
    assert!(!stored.billing_period.is_expired(Utc::now()));
}

#[tokio::test]
async fn expired_contract_without_renewal_rejects_all_operations() {
    let harness = harness().await;

    let start = Utc::now() - Duration::days(90);
    let mut contract = Contract::new("u1", harness.org, BillingPeriod::starting(start, 30, false));
    contract.subscribe("acme", "1.0.0", Some("BASIC".to_string()));
    harness.contracts.update(contract).await.unwrap();

    assert!(matches!(
        harness
            .evaluator
            .evaluate_all(harness.org, "u1", &EvaluationOptions::default())
            .await
            .unwrap_err(),
        EngineError::SubscriptionExpired(_)
    ));
    assert!(matches!(
        harness
            .evaluator
            .evaluate_feature(harness.org, "u1", "maxSeats", &ConsumeOptions::default())
            .await
            .unwrap_err(),
        EngineError::SubscriptionExpired(_)
    ));
}

#[tokio::test]
async fn archival_novates_and_new_limits_apply() {
    let harness = harness().await;
    subscribe(&harness, "u1", true).await;
    consume_seats(&harness, "u1", 9.0).await;

    // Publish 2.0.0 with more seats, then archive 1.0.0 onto it.
    let mut service = harness
        .services
        .find_by_name(harness.org, "acme")
        .await
        .unwrap()
        .unwrap();
    service
        .add_active("2.0.0", PricingLocator::Id("p-2".into()))
        .unwrap();
    harness.services.update(service).await.unwrap();
    harness
        .services
        .insert_pricing("p-2", seats_pricing("2.0.0", 50.0))
        .await
        .unwrap();

    let count = harness
        .novation
        .archive_pricing(
            harness.org,
            "acme",
            "1.0.0",
            Some(FallbackSubscription {
                pricing_version: "2.0.0".to_string(),
                plan: Some("BASIC".to_string()),
                add_ons: BTreeMap::new(),
            }),
        )
        .await
        .unwrap();
    assert_eq!(count, 1);

    // Usage was regenerated, so the larger plan has full headroom.
    match consume_seats(&harness, "u1", 20.0).await {
        SingleEvaluation::Evaluated(evaluation) => {
            assert_eq!(evaluation.eval, Value::Bool(true));
            assert_eq!(evaluation.used, Some(20.0));
            assert_eq!(evaluation.limit, Some(50.0));
        }
        other => panic!("expected evaluation, got {other:?}"),
    }

    let stored = harness
        .contracts
        .find_by_user_id(harness.org, "u1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.contracted_services.get("acme"),
        Some(&"2.0.0".to_string())
    );
    // Novation history, then nothing else.
    assert_eq!(stored.history.len(), 1);
}

#[tokio::test]
async fn service_removal_disables_single_service_contracts() {
    let harness = harness().await;
    subscribe(&harness, "u1", true).await;

    harness
        .novation
        .remove_service(harness.org, "acme")
        .await
        .unwrap();

    // With its only service gone, the contract is disabled and every
    // evaluation is rejected as expired.
    assert!(matches!(
        harness
            .evaluator
            .evaluate_all(harness.org, "u1", &EvaluationOptions::default())
            .await
            .unwrap_err(),
        EngineError::SubscriptionExpired(_)
    ));
}

const REMOTE_PRICING: &str = r#"
version: "1.0.0"
currency: USD
created_at: 2026-01-01T00:00:00Z
features:
  maxSeats:
    name: maxSeats
    value_type: numeric
    default_value: 0
    server_expression: "acme.usage.maxSeats <= acme.maxSeats"
    renewal_period: monthly
plans:
  BASIC:
    price: 9.99
    features:
      maxSeats: 10
"#;

async fn url_backed_harness(url: &str, config: ResolverConfig) -> Harness {
    let services = Arc::new(MemoryServiceStore::new());
    let contracts = Arc::new(MemoryContractStore::new());
    let cache = Arc::new(MemoryCache::new());
    let org = Uuid::now_v7();

    let mut service = Service::new("acme", org);
    service
        .add_active("1.0.0", PricingLocator::Url(url.to_string()))
        .unwrap();
    services.update(service).await.unwrap();

    let resolver = Arc::new(
        PricingResolver::new(
            services.clone() as Arc<dyn ServiceStore>,
            cache.clone() as Arc<dyn Cache>,
            config,
        )
        .unwrap(),
    );

    let evaluator = FeatureEvaluator::new(
        services.clone() as Arc<dyn ServiceStore>,
        contracts.clone() as Arc<dyn ContractStore>,
        cache.clone() as Arc<dyn Cache>,
        resolver.clone(),
    );
    let novation = NovationEngine::new(
        services.clone() as Arc<dyn ServiceStore>,
        contracts.clone() as Arc<dyn ContractStore>,
        cache as Arc<dyn Cache>,
        resolver,
        Arc::new(NoopEventSink) as Arc<dyn EventSink>,
    );

    Harness {
        evaluator,
        novation,
        services,
        contracts,
        org,
    }
}

#[tokio::test]
async fn url_backed_pricing_resolves_and_evaluates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pricing.yml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(REMOTE_PRICING))
        .mount(&server)
        .await;

    let url = format!("{}/pricing.yml", server.uri());
    let harness = url_backed_harness(&url, ResolverConfig::default()).await;
    subscribe(&harness, "u1", true).await;

    let summary = harness
        .evaluator
        .evaluate_all(
            harness.org,
            "u1",
            &EvaluationOptions {
                server: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let seats = &summary.evaluations["acme.maxSeats"];
    assert_eq!(seats.eval, Value::Bool(true));
    assert_eq!(seats.limit, Some(10.0));
}

#[tokio::test]
async fn remote_fetch_timeout_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pricing.yml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(REMOTE_PRICING)
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let url = format!("{}/pricing.yml", server.uri());
    let config = ResolverConfig {
        fetch_timeout_ms: 50,
        ..Default::default()
    };
    let harness = url_backed_harness(&url, config).await;
    subscribe(&harness, "u1", true).await;

    let err = harness
        .evaluator
        .evaluate_all(harness.org, "u1", &EvaluationOptions::default())
        .await
        .unwrap_err();
    match err {
        EngineError::RemoteFetch { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("expected remote fetch error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_remote_pricing_fails_validation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pricing.yml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("version: [not, a, pricing"))
        .mount(&server)
        .await;

    let url = format!("{}/pricing.yml", server.uri());
    let harness = url_backed_harness(&url, ResolverConfig::default()).await;
    subscribe(&harness, "u1", true).await;

    assert!(matches!(
        harness
            .evaluator
            .evaluate_all(harness.org, "u1", &EvaluationOptions::default())
            .await
            .unwrap_err(),
        EngineError::Validation(_)
    ));
}
