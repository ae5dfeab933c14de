//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the custody node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Description                          |
//! |--------|-----------------------------------|--------------------------------------|
//! | GET    | `/health`                         | Liveness probe                       |
//! | GET    | `/status`                         | Node status summary                  |
//! | GET    | `/registry`                       | Deployed components of this chain    |
//! | GET    | `/ledger/:context/:id/balances`   | Ledger, trust or key balances        |
//! | GET    | `/providers/:address/balances`    | Balances held by one provider        |
//! | GET    | `/events`                         | Event history, filterable            |
//! | GET    | `/ws`                             | WebSocket for live committed events  |
//! | POST   | `/tx`                             | Execute a batch of calls atomically  |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use custody_protocol::error::{CustodyError, CustodyResult, ErrorCategory};
use custody_protocol::{Address, Amount, Arn, BalanceContext, EventRecord, KeyId, TrustId};

use crate::calls::TxRequest;
use crate::registry::{Registry, RegistryEntry};
use crate::service::{CustodyService, SubmitError, TxReceipt};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Network name derived from the chain id.
    pub network: String,
    pub chain_id: u64,
    pub service: Arc<CustodyService>,
    /// Registry document of this chain, loaded at startup.
    pub registry: Arc<Registry>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/registry", get(registry_handler))
        .route("/ledger/:context/:id/balances", get(ledger_balances_handler))
        .route("/providers/:address/balances", get(provider_balances_handler))
        .route("/events", get(events_handler))
        .route("/ws", get(ws_handler))
        .route("/tx", post(tx_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response body for `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub network: String,
    pub chain_id: u64,
    /// Committed transactions.
    pub transactions: u64,
    pub events: u64,
    pub trusts: u64,
    pub keys: u64,
    pub ledger: Address,
    pub vault: Address,
    pub faucet: bool,
    pub timestamp: String,
}

/// Response body for `GET /ledger/:context/:id/balances`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBalancesResponse {
    pub context: BalanceContext,
    pub provider: Option<Address>,
    pub providers: Vec<Address>,
    pub balances: BTreeMap<Arn, Amount>,
}

/// Error body. `reason` is the stable wire code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: String,
    pub category: Option<ErrorCategory>,
}

/// Handler error carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn bad_request(reason: &str, error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: error.into(),
                reason: reason.to_string(),
                category: None,
            },
        }
    }
}

impl From<CustodyError> for ApiError {
    fn from(err: CustodyError) -> Self {
        let category = err.category();
        let status = match category {
            ErrorCategory::Authorization => StatusCode::FORBIDDEN,
            ErrorCategory::PolicyLimit | ErrorCategory::Accounting => StatusCode::CONFLICT,
            ErrorCategory::Input => StatusCode::BAD_REQUEST,
            ErrorCategory::Invariant => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorResponse {
                error: err.to_string(),
                reason: err.reason().to_string(),
                category: Some(category),
            },
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Rejected(err) => err.into(),
            SubmitError::Store(err) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: ErrorResponse {
                    error: err.to_string(),
                    reason: "STORAGE".into(),
                    category: None,
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — returns node status summary.
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let service = &state.service;
    let (transactions, events, trusts, keys) = service.read(|chain| {
        let world = chain.state();
        (
            world.transactions(),
            chain.events().len() as u64,
            world.issuer().trusts().len() as u64,
            world.issuer().key_count(),
        )
    });

    Json(StatusResponse {
        version: state.version.clone(),
        network: state.network.clone(),
        chain_id: state.chain_id,
        transactions,
        events,
        trusts,
        keys,
        ledger: service.vault().ledger(),
        vault: service.vault().address(),
        faucet: service.faucet_enabled(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /registry` — alias to `{address, code_hash}`.
async fn registry_handler(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, RegistryEntry>> {
    Json(state.registry.entries().clone())
}

#[derive(Debug, Deserialize)]
struct ProviderQuery {
    provider: Option<Address>,
}

/// `GET /ledger/:context/:id/balances` where `context` is `ledger`, `trust`
/// or `key`. The id is ignored for `ledger`. `?provider=` scopes the result
/// to one provider; otherwise balances aggregate over all providers.
async fn ledger_balances_handler(
    Path((context, id)): Path<(String, u64)>,
    Query(query): Query<ProviderQuery>,
    State(state): State<AppState>,
) -> Result<Json<LedgerBalancesResponse>, ApiError> {
    let context = match context.as_str() {
        "ledger" => BalanceContext::Ledger,
        "trust" => BalanceContext::Trust(id as TrustId),
        "key" => BalanceContext::Key(id as KeyId),
        other => {
            return Err(ApiError::bad_request(
                "INVALID_INPUT",
                format!("unknown balance context {other:?}"),
            ))
        }
    };

    let response = state.service.read(|chain| {
        let ledger = chain.state().ledger();
        let balances = ledger
            .arn_registry(context)
            .into_iter()
            .map(|arn| ledger.balance(context, query.provider, arn).map(|amount| (arn, amount)))
            .collect::<CustodyResult<_>>()?;
        Ok::<_, CustodyError>(LedgerBalancesResponse {
            context,
            provider: query.provider,
            providers: ledger.provider_registry(context, None),
            balances,
        })
    })?;
    Ok(Json(response))
}

/// `GET /providers/:address/balances` — everything a provider holds in the
/// ledger, next to its physical native-coin balance.
async fn provider_balances_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = Address::from_hex(&address)
        .map_err(|e| ApiError::bad_request("INVALID_INPUT", format!("bad address: {e}")))?;

    let (balances, coins) = state.service.read(|chain| {
        let world = chain.state();
        (
            world.ledger().provider_balances(provider),
            world.coins().balance_of(provider),
        )
    });
    Ok(Json(serde_json::json!({
        "provider": provider,
        "balances": balances,
        "coins": coins,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct EventQuery {
    provider: Option<Address>,
    trust: Option<TrustId>,
    key: Option<KeyId>,
    since: Option<u64>,
}

/// `GET /events?provider=&trust=&key=&since=` — filters combine with AND.
async fn events_handler(
    Query(query): Query<EventQuery>,
    State(state): State<AppState>,
) -> Json<Vec<EventRecord>> {
    let records = state.service.read(|chain| {
        chain
            .events()
            .since(query.since.unwrap_or(0))
            .iter()
            .filter(|r| query.provider.map_or(true, |p| r.event.provider() == Some(p)))
            .filter(|r| query.trust.map_or(true, |t| r.event.trust_id() == Some(t)))
            .filter(|r| query.key.map_or(true, |k| r.event.key_ids().contains(&k)))
            .cloned()
            .collect()
    });
    Json(records)
}

/// `POST /tx` — executes `{caller, calls}` as one atomic transaction.
async fn tx_handler(
    State(state): State<AppState>,
    Json(request): Json<TxRequest>,
) -> Result<Json<TxReceipt>, ApiError> {
    let service = Arc::clone(&state.service);
    let receipt = tokio::task::spawn_blocking(move || service.submit(&request))
        .await
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorResponse {
                error: format!("executor failed: {e}"),
                reason: "INTERNAL".into(),
                category: None,
            },
        })??;
    Ok(Json(receipt))
}

/// `GET /ws` — upgrades to a WebSocket for live event streaming.
///
/// Clients receive one JSON [`EventRecord`] per message, for events of
/// committed transactions only. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding broadcast events
/// until the client disconnects or the channel is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.service.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(record) => {
                        let payload = match serde_json::to_string(&record) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use custody_contracts::NativeVault;
    use custody_protocol::{Chain, Deployment};

    use crate::metrics::NodeMetrics;
    use crate::registry::code_hash;
    use crate::store::StateStore;

    struct TestNode {
        router: Router,
        vault: Arc<NativeVault>,
        _dir: tempfile::TempDir,
    }

    fn test_node() -> TestNode {
        let dir = tempfile::tempdir().unwrap();
        let deployment = Deployment::derive("api");
        let mut chain = Chain::new(deployment);
        let vault = NativeVault::install(&mut chain, "api/native-vault").unwrap();

        let mut registry = Registry::open(dir.path(), 31337).unwrap();
        for (alias, address) in deployment.components() {
            registry.record(alias, address, code_hash(alias));
        }

        let (events, _) = broadcast::channel(16);
        let service = CustodyService::new(
            chain,
            Arc::clone(&vault),
            StateStore::open_temporary().unwrap(),
            Arc::new(NodeMetrics::new()),
            events,
            true,
        );
        let state = AppState {
            version: "0.1.0-test".into(),
            network: "devnet".into(),
            chain_id: 31337,
            service: Arc::new(service),
            registry: Arc::new(registry),
        };
        TestNode {
            router: create_router(state),
            vault,
            _dir: dir,
        }
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a POST request with JSON body and returns (status, body_bytes).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Owner funds itself, opens trust 0, trusts the vault and deposits 40.
    async fn seed(node: &TestNode, owner: Address) {
        let (status, body) = post_json(
            &node.router,
            "/tx",
            serde_json::json!({
                "caller": owner,
                "calls": [
                    { "call": "faucet", "to": owner, "amount": 100 },
                    { "call": "create_trust", "name": "family" },
                    {
                        "call": "set_trusted_role",
                        "trust_id": 0,
                        "role": "collateral_provider",
                        "provider": node.vault.address(),
                        "trusted": true
                    },
                    { "call": "vault_deposit", "key_id": 0, "value": 40 }
                ]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let node = test_node();
        let (status, body) = get(&node.router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_committed_transactions() {
        let node = test_node();
        seed(&node, Address::derive("owner")).await;

        let (status, body) = get(&node.router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.transactions, 1);
        assert_eq!(resp.trusts, 1);
        assert_eq!(resp.chain_id, 31337);
        assert_eq!(resp.vault, node.vault.address());
    }

    #[tokio::test]
    async fn registry_lists_components() {
        let node = test_node();
        let (status, body) = get(&node.router, "/registry").await;

        assert_eq!(status, StatusCode::OK);
        let entries: BTreeMap<String, RegistryEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries["Ledger"].address, node.vault.ledger());
    }

    #[tokio::test]
    async fn tx_returns_outcomes_and_events() {
        let node = test_node();
        let owner = Address::derive("owner");
        let (status, body) = post_json(
            &node.router,
            "/tx",
            serde_json::json!({
                "caller": owner,
                "calls": [{ "call": "create_trust", "name": "solo" }]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let receipt: TxReceipt = serde_json::from_slice(&body).unwrap();
        assert_eq!(receipt.transaction, 1);
        assert_eq!(receipt.outcomes.len(), 1);
        assert!(!receipt.events.is_empty());
    }

    #[tokio::test]
    async fn trust_balances_follow_deposits() {
        let node = test_node();
        seed(&node, Address::derive("owner")).await;

        let (status, body) = get(&node.router, "/ledger/trust/0/balances").await;
        assert_eq!(status, StatusCode::OK);
        let resp: LedgerBalancesResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.balances[&node.vault.arn()], 40);
        assert_eq!(resp.providers, vec![node.vault.address()]);

        let (_, body) = get(&node.router, "/ledger/ledger/0/balances").await;
        let resp: LedgerBalancesResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.balances[&node.vault.arn()], 40);
    }

    #[tokio::test]
    async fn unknown_balance_context_is_bad_request() {
        let node = test_node();
        let (status, body) = get(&node.router, "/ledger/vault/0/balances").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.reason, "INVALID_INPUT");
    }

    #[tokio::test]
    async fn provider_balances_include_coins() {
        let node = test_node();
        seed(&node, Address::derive("owner")).await;

        let path = format!("/providers/{}/balances", node.vault.address());
        let (status, body) = get(&node.router, &path).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["coins"], 40);
        assert_eq!(json["balances"][node.vault.arn().to_string()], 40);
    }

    #[tokio::test]
    async fn rejected_tx_maps_reason_and_status() {
        let node = test_node();
        let owner = Address::derive("owner");
        seed(&node, owner).await;

        let (status, body) = post_json(
            &node.router,
            "/tx",
            serde_json::json!({
                "caller": owner,
                "calls": [{ "call": "vault_withdrawal", "key_id": 0, "amount": 10 }]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.reason, "UNAPPROVED_AMOUNT");
        assert_eq!(err.category, Some(ErrorCategory::PolicyLimit));

        let (_, body) = get(&node.router, "/status").await;
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.transactions, 1);
    }

    #[tokio::test]
    async fn stranger_deposit_is_forbidden() {
        let node = test_node();
        seed(&node, Address::derive("owner")).await;
        let stranger = Address::derive("stranger");

        let (status, body) = post_json(
            &node.router,
            "/tx",
            serde_json::json!({
                "caller": stranger,
                "calls": [
                    { "call": "faucet", "to": stranger, "amount": 5 },
                    { "call": "vault_deposit", "key_id": 0, "value": 5 }
                ]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.reason, "KEY_NOT_HELD");
    }

    #[tokio::test]
    async fn events_filter_by_trust_and_since() {
        let node = test_node();
        let owner = Address::derive("owner");
        seed(&node, owner).await;
        post_json(
            &node.router,
            "/tx",
            serde_json::json!({
                "caller": owner,
                "calls": [{ "call": "create_trust", "name": "second" }]
            }),
        )
        .await;

        let (status, body) = get(&node.router, "/events?trust=1").await;
        assert_eq!(status, StatusCode::OK);
        let records: Vec<EventRecord> = serde_json::from_slice(&body).unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.event.trust_id() == Some(1)));
        assert!(records.iter().all(|r| r.transaction == 2));

        let (_, body) = get(&node.router, "/events?since=1000").await;
        let records: Vec<EventRecord> = serde_json::from_slice(&body).unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn deposit_events_filter_by_provider() {
        let node = test_node();
        seed(&node, Address::derive("owner")).await;

        let path = format!("/events?provider={}", node.vault.address());
        let (_, body) = get(&node.router, &path).await;
        let records: Vec<EventRecord> = serde_json::from_slice(&body).unwrap();
        assert!(records.iter().any(|r| r.event.name() == "deposit_occurred"));
        assert!(records
            .iter()
            .all(|r| r.event.provider() == Some(node.vault.address())));
    }
}
