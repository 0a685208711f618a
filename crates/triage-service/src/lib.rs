#![deny(unsafe_code)]

pub mod actions;
pub mod middleware;
pub mod sse;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use triage_adapters::{
    CoordinationBackend, InMemoryCoordinationStore, InMemoryPersistenceAdapter,
    PersistenceBackend, PostgresPersistenceAdapter, RedisCoordinationStore,
};
use triage_core::{
    clamp_limit, summarize, Account, Alert, Card, Customer, IdempotencyCache, InsightsSummary,
    Metrics, PersistenceAdapter, RateLimiter, RateLimiterConfig, Redactor, RiskPolicyConfig,
    RiskPolicyEngine, RunRegistry, Transaction, TransactionQuery, TriageEngine, TriageEngineConfig,
    TriageError,
};

/// Which relational store backend a running instance picked at startup.
#[derive(Debug, Clone)]
pub enum PersistenceChoice {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

/// Which coordination store backend a running instance picked at startup.
#[derive(Debug, Clone)]
pub enum CoordinationChoice {
    Memory,
    Redis { redis_url: String },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub persistence: PersistenceChoice,
    pub coordination: CoordinationChoice,
    pub api_key: String,
    pub engine: TriageEngineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceChoice::Memory,
            coordination: CoordinationChoice::Memory,
            api_key: "dev-api-key".to_string(),
            engine: TriageEngineConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub store: Arc<PersistenceBackend>,
    pub engine: Arc<TriageEngine<PersistenceBackend>>,
    pub registry: RunRegistry,
    pub rate_limiter: Arc<RateLimiter<CoordinationBackend>>,
    pub idempotency: IdempotencyCache,
    pub redactor: Arc<Redactor>,
    pub metrics: Arc<Metrics>,
    pub api_key: Arc<String>,
    /// Last `RateLimiter::fail_opens()` value observed, so the rate-limit
    /// middleware can turn the limiter's cumulative atomic counter into a
    /// per-request Prometheus increment.
    pub last_fail_opens: Arc<AtomicU64>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let store = match config.persistence {
            PersistenceChoice::Memory => {
                PersistenceBackend::Memory(InMemoryPersistenceAdapter::new())
            }
            PersistenceChoice::Postgres {
                database_url,
                max_connections,
            } => PersistenceBackend::Postgres(
                PostgresPersistenceAdapter::connect(&database_url, max_connections).await?,
            ),
        };
        store.ensure_schema().await?;
        let store = Arc::new(store);

        let coordination = match config.coordination {
            CoordinationChoice::Memory => {
                CoordinationBackend::Memory(InMemoryCoordinationStore::new())
            }
            CoordinationChoice::Redis { redis_url } => {
                CoordinationBackend::Redis(RedisCoordinationStore::connect(&redis_url).await?)
            }
        };

        let registry = RunRegistry::new();
        let policy = RiskPolicyEngine::new(RiskPolicyConfig::default());
        let metrics = Arc::new(Metrics::new());
        let engine = Arc::new(
            TriageEngine::new(store.clone(), policy, registry.clone(), config.engine)
                .with_metrics(metrics.clone()),
        );
        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::new(coordination),
            RateLimiterConfig::default(),
        ));

        spawn_registry_sweeper(registry.clone());

        Ok(Self {
            store,
            engine,
            registry,
            rate_limiter,
            idempotency: IdempotencyCache::new(),
            redactor: Arc::new(Redactor::new()),
            metrics,
            api_key: Arc::new(config.api_key),
            last_fail_opens: Arc::new(AtomicU64::new(0)),
        })
    }
}

/// Periodically evict runs whose terminal event has aged out of the
/// late-join window, mirroring the background sweep the run registry
/// documents as its own expectation rather than something it drives itself.
fn spawn_registry_sweeper(registry: RunRegistry) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            registry.sweep();
        }
    });
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("persistence error: {0}")]
    Persistence(#[from] TriageError),
}

/// Typed HTTP error surface. Every variant maps to a fixed status code per
/// the component design's error taxonomy; conflict outcomes like
/// `ALREADY_FROZEN`/`ALREADY_EXISTS` are ordinary `Ok` responses, not errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },
    #[error("policy denied: {0}")]
    Policy(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }
}

impl From<TriageError> for ApiError {
    fn from(err: TriageError) -> Self {
        match err {
            TriageError::Validation(m) => ApiError::Validation(m),
            TriageError::Auth(m) => ApiError::Auth(m),
            TriageError::NotFound(m) => ApiError::NotFound(m),
            TriageError::RateLimited { retry_after_secs } => {
                ApiError::RateLimited { retry_after_secs }
            }
            TriageError::Policy(m) => ApiError::Policy(m),
            TriageError::StageViolation { .. } => ApiError::Internal(err.to_string()),
            TriageError::Upstream(m) => ApiError::Internal(format!("upstream dependency unavailable: {m}")),
            TriageError::Ledger(m) => ApiError::Internal(format!("ledger integrity error: {m}")),
            TriageError::Serialization(m) => ApiError::Internal(format!("serialization error: {m}")),
            TriageError::Internal(m) => ApiError::Internal(m),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Auth(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("rate limited, retry after {retry_after_secs}s"),
            ),
            ApiError::Policy(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };

        let mut response =
            (status, Json(serde_json::json!({ "error": message }))).into_response();

        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }

        response
    }
}

pub fn build_router(state: ServiceState) -> Router {
    let reads = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/alerts", get(list_alerts))
        .route("/api/customer/:id/profile", get(customer_profile))
        .route("/api/customer/:id/transactions", get(customer_transactions))
        .route("/api/insights/:customer_id/summary", get(insights_summary))
        .route("/api/triage", post(start_triage))
        .route("/api/triage/:run_id/stream", get(sse::stream_triage));

    let actions = Router::new()
        .route("/api/action/freeze-card", post(actions::freeze_card))
        .route("/api/action/open-dispute", post(actions::open_dispute))
        .route(
            "/api/action/mark-false-positive",
            post(actions::mark_false_positive),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::idempotency_layer,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::api_key_layer,
        ));

    let ingest = Router::new()
        .route("/api/ingest/transactions", post(ingest_transactions))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::idempotency_layer,
        ));

    reads
        .merge(actions)
        .merge(ingest)
        // `route_layer` (not `layer`) so `MatchedPath` is already populated by
        // the time this middleware runs, giving per-template route labels.
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_metrics_layer,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::redact_layer,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_layer,
        ))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    ts: DateTime<Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        ts: Utc::now(),
    })
}

async fn metrics_handler(State(state): State<ServiceState>) -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
}

#[derive(Debug, Clone, Serialize)]
struct AlertCustomerSummary {
    name: String,
    email: String,
}

#[derive(Debug, Clone, Serialize)]
struct AlertListItem {
    #[serde(flatten)]
    alert: Alert,
    customer: AlertCustomerSummary,
}

async fn list_alerts(State(state): State<ServiceState>) -> Result<Json<Vec<AlertListItem>>, ApiError> {
    let rows = state.store.list_open_alerts(50).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(alert, customer)| AlertListItem {
                alert,
                customer: AlertCustomerSummary {
                    name: customer.display_name,
                    email: customer.email,
                },
            })
            .collect(),
    ))
}

#[derive(Debug, Clone, Serialize)]
struct CustomerProfileResponse {
    #[serde(flatten)]
    customer: Customer,
    cards: Vec<Card>,
    accounts: Vec<Account>,
}

async fn customer_profile(
    State(state): State<ServiceState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<CustomerProfileResponse>, ApiError> {
    let customer = state.store.get_customer(customer_id).await?;
    let cards = state.store.list_cards_for_customer(customer_id).await?;
    let accounts = state.store.list_accounts_for_customer(customer_id).await?;
    Ok(Json(CustomerProfileResponse {
        customer,
        cards,
        accounts,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct TransactionsQueryParams {
    cursor: Option<String>,
    limit: Option<u32>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionPageResponse {
    items: Vec<Transaction>,
    next_cursor: Option<String>,
    has_more: bool,
}

async fn customer_transactions(
    State(state): State<ServiceState>,
    Path(customer_id): Path<Uuid>,
    Query(params): Query<TransactionsQueryParams>,
) -> Result<Json<TransactionPageResponse>, ApiError> {
    let query = TransactionQuery {
        cursor: params.cursor,
        limit: clamp_limit(params.limit),
        from: params.from,
        to: params.to,
    };
    let page = state.store.paginate_transactions(customer_id, query).await?;
    Ok(Json(TransactionPageResponse {
        items: page.items,
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct InsightsQueryParams {
    days: Option<i64>,
}

async fn insights_summary(
    State(state): State<ServiceState>,
    Path(customer_id): Path<Uuid>,
    Query(params): Query<InsightsQueryParams>,
) -> Result<Json<InsightsSummary>, ApiError> {
    let days = params.days.unwrap_or(90).max(1);
    let from = Utc::now() - chrono::Duration::days(days);

    // Insights has no dedicated "all transactions in window" read; it walks
    // the same keyset page the transaction list endpoint uses until exhausted.
    let mut all = Vec::new();
    let mut cursor = None;
    loop {
        let query = TransactionQuery {
            cursor: cursor.clone(),
            limit: clamp_limit(Some(100)),
            from: Some(from),
            to: None,
        };
        let page = state.store.paginate_transactions(customer_id, query).await?;
        let has_more = page.has_more;
        cursor = page.next_cursor.clone();
        all.extend(page.items);
        if !has_more || cursor.is_none() {
            break;
        }
    }

    Ok(Json(summarize(&all)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartTriageRequest {
    alert_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartTriageResponse {
    run_id: Uuid,
    alert_id: Uuid,
    status: &'static str,
}

async fn start_triage(
    State(state): State<ServiceState>,
    Json(req): Json<StartTriageRequest>,
) -> Result<Json<StartTriageResponse>, ApiError> {
    // Validated up front so an unknown alert id fails fast with 404 instead of
    // only surfacing inside the orchestrator's asynchronous getProfile step.
    state.store.get_alert(req.alert_id).await?;
    state.metrics.triage_runs_started_total.inc();

    let run_id = state.engine.start(req.alert_id);
    Ok(Json(StartTriageResponse {
        run_id,
        alert_id: req.alert_id,
        status: "started",
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct IngestTransaction {
    id: Option<Uuid>,
    customer_id: Uuid,
    card_id: Uuid,
    timestamp: DateTime<Utc>,
    amount_minor: i64,
    merchant: String,
    mcc: String,
    currency: String,
    device_id: Option<String>,
    city: Option<String>,
    #[serde(default = "default_country")]
    country: String,
    #[serde(default = "default_transaction_status")]
    status: triage_core::TransactionStatus,
}

fn default_country() -> String {
    Transaction::DEFAULT_COUNTRY.to_string()
}

fn default_transaction_status() -> triage_core::TransactionStatus {
    triage_core::TransactionStatus::Posted
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    inserted: usize,
}

async fn ingest_transactions(
    State(state): State<ServiceState>,
    Json(items): Json<Vec<IngestTransaction>>,
) -> Result<Json<IngestResponse>, ApiError> {
    if items.is_empty() {
        return Err(ApiError::validation("transactions array must not be empty"));
    }

    let transactions: Vec<Transaction> = items
        .into_iter()
        .map(|t| Transaction {
            id: t.id.unwrap_or_else(Uuid::new_v4),
            customer_id: t.customer_id,
            card_id: t.card_id,
            timestamp: t.timestamp,
            amount_minor: t.amount_minor,
            merchant: t.merchant,
            mcc: t.mcc,
            currency: t.currency,
            device_id: t.device_id,
            city: t.city,
            country: t.country,
            status: t.status,
        })
        .collect();

    let inserted = transactions.len();
    state.store.insert_transactions(transactions).await?;
    Ok(Json(IngestResponse { inserted }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> ServiceState {
        ServiceState::bootstrap(ServiceConfig {
            api_key: "test-key".to_string(),
            ..ServiceConfig::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = build_router(test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_prometheus_text() {
        let app = build_router(test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("triage_runs_started_total"));
    }

    #[tokio::test]
    async fn action_route_without_api_key_is_rejected() {
        let app = build_router(test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/action/freeze-card")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"cardId": Uuid::new_v4()}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ingest_transactions_rejects_empty_array() {
        let app = build_router(test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/ingest/transactions")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::json!([]).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn triage_start_returns_404_for_unknown_alert() {
        let app = build_router(test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/triage")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"alertId": Uuid::new_v4()}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn seed_kyc3_customer_with_active_card(state: &ServiceState) -> (Uuid, Uuid) {
        let triage_adapters::PersistenceBackend::Memory(adapter) = &*state.store else {
            panic!("test state always seeds the in-memory backend");
        };
        let customer = Customer {
            id: Uuid::new_v4(),
            display_name: "Priya Singh".to_string(),
            email: "priya@example.com".to_string(),
            phone: "+919876543210".to_string(),
            kyc_level: 3,
            created_at: Utc::now(),
        };
        let card = Card {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            last_four: "4242".to_string(),
            network: triage_core::CardNetwork::Visa,
            status: triage_core::CardStatus::Active,
        };
        adapter.seed_customer(customer.clone());
        adapter.seed_card(card.clone());
        (customer.id, card.id)
    }

    async fn post_json(app: &Router, uri: &str, api_key: &str, body: serde_json::Value) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .header("X-API-Key", api_key)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn freeze_card_requires_otp_for_high_kyc_customer_then_succeeds() {
        let state = test_state().await;
        let (_, card_id) = seed_kyc3_customer_with_active_card(&state);
        let app = build_router(state);

        let pending = post_json(
            &app,
            "/api/action/freeze-card",
            "test-key",
            serde_json::json!({"cardId": card_id}),
        )
        .await;
        assert_eq!(pending.status(), StatusCode::OK);
        let bytes = to_bytes(pending.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "PENDING_OTP");
        assert_eq!(body["requiresOtp"], true);

        let frozen = post_json(
            &app,
            "/api/action/freeze-card",
            "test-key",
            serde_json::json!({"cardId": card_id, "otp": "123456"}),
        )
        .await;
        assert_eq!(frozen.status(), StatusCode::OK);
        let bytes = to_bytes(frozen.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "FROZEN");

        let repeat = post_json(
            &app,
            "/api/action/freeze-card",
            "test-key",
            serde_json::json!({"cardId": card_id}),
        )
        .await;
        assert_eq!(repeat.status(), StatusCode::OK);
        let bytes = to_bytes(repeat.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ALREADY_FROZEN");
    }

    #[tokio::test]
    async fn freeze_card_rejects_wrong_otp() {
        let state = test_state().await;
        let (_, card_id) = seed_kyc3_customer_with_active_card(&state);
        let app = build_router(state);

        let response = post_json(
            &app,
            "/api/action/freeze-card",
            "test-key",
            serde_json::json!({"cardId": card_id, "otp": "000000"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_dispute_is_idempotent() {
        let state = test_state().await;
        let triage_adapters::PersistenceBackend::Memory(adapter) = &*state.store else {
            panic!("test state always seeds the in-memory backend");
        };
        let customer = Customer {
            id: Uuid::new_v4(),
            display_name: "Raj Kumar".to_string(),
            email: "raj@example.com".to_string(),
            phone: "+911122334455".to_string(),
            kyc_level: 2,
            created_at: Utc::now(),
        };
        let txn = Transaction {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            card_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            amount_minor: 75_00,
            merchant: "Online Store".to_string(),
            mcc: "5999".to_string(),
            currency: "INR".to_string(),
            device_id: None,
            city: None,
            country: "IN".to_string(),
            status: triage_core::TransactionStatus::Posted,
        };
        adapter.seed_customer(customer);
        adapter.seed_transaction(txn.clone());
        let app = build_router(state);

        let first = post_json(
            &app,
            "/api/action/open-dispute",
            "test-key",
            serde_json::json!({
                "txnId": txn.id,
                "reasonCode": "unrecognized_charge",
                "confirm": true,
            }),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);
        let bytes = to_bytes(first.into_body(), usize::MAX).await.unwrap();
        let first_body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(first_body["status"], "OPEN");
        let case_id = first_body["caseId"].clone();

        let second = post_json(
            &app,
            "/api/action/open-dispute",
            "test-key",
            serde_json::json!({
                "txnId": txn.id,
                "reasonCode": "unrecognized_charge",
                "confirm": true,
            }),
        )
        .await;
        assert_eq!(second.status(), StatusCode::OK);
        let bytes = to_bytes(second.into_body(), usize::MAX).await.unwrap();
        let second_body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(second_body["status"], "ALREADY_EXISTS");
        assert_eq!(second_body["caseId"], case_id);
    }

    #[tokio::test]
    async fn open_dispute_without_confirm_is_rejected() {
        let state = test_state().await;
        let app = build_router(state);

        let response = post_json(
            &app,
            "/api/action/open-dispute",
            "test-key",
            serde_json::json!({"txnId": Uuid::new_v4(), "reasonCode": "fraud"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
