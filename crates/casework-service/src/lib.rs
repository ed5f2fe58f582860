#![deny(unsafe_code)]

mod gateway;

use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use casework_adapters::{MockBankAccountRail, MockCheckRail, MockWalletRail};
use casework_core::authority::ActorKind;
use casework_core::chat::ChatStore;
use casework_core::{
    authorize_disbursement, complete_execution, create_case, execute_disbursement,
    explain_lifecycle, get_authoritative_decision, get_decision_chain, get_ledger_trail,
    get_routing_counterfactual, route_case, start_execution, start_verification,
    submit_verification_consensus, transition_case_lifecycle_with_ledger, AuthorizeOutcome,
    AuthorizeRequest, Case, CaseLifecycle, CoreError, Decision, DisbursementActor, ExecuteOutcome,
    Execution, IdempotencyStore, KeyStore, LedgerAuthority, LedgerCommit, LedgerStorageConfig,
    LifecycleExplanation, Payee, ProjectionStore, RailRegistry, RoutingCounterfactual,
    TransitionActor, VerificationRecord,
};
use casework_core::types::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub use gateway::Gateway;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ledger_storage: LedgerStorageConfig,
    pub key_path: PathBuf,
    pub database_url: String,
    pub max_connections: u32,
    pub typing_throttle_ms: u64,
}

/// Shared process state. Cloned per-request by axum; every field is a handle, not owned data.
#[derive(Clone)]
pub struct ServiceState {
    pub ledger: Arc<Mutex<LedgerAuthority>>,
    pub projections: Arc<ProjectionStore>,
    pub chat: Arc<ChatStore>,
    pub idempotency: Arc<IdempotencyStore>,
    pub rails: Arc<RailRegistry>,
    pub gateway: Arc<Gateway>,
    pub lock_pool: PgPool,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ApiError> {
        let signer = Arc::new(
            KeyStore::load_or_generate(&config.key_path)
                .map_err(|e| ApiError::from(CoreError::KeyStore(e.to_string())))?,
        );
        let ledger = LedgerAuthority::bootstrap(config.ledger_storage.clone(), signer).await?;

        let lock_pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.database_url)
            .await
            .map_err(|e| CoreError::Database(format!("service pool connect failed: {e}")))?;

        let projections = ProjectionStore::new(lock_pool.clone());
        projections.ensure_schema().await?;

        let chat = Arc::new(ChatStore::new(lock_pool.clone()));
        chat.ensure_schema().await?;

        let idempotency = IdempotencyStore::new(lock_pool.clone());
        idempotency.ensure_schema().await?;

        let mut rails = RailRegistry::new();
        rails.register(Arc::new(MockBankAccountRail));
        rails.register(Arc::new(MockWalletRail));
        rails.register(Arc::new(MockCheckRail));

        let gateway = Arc::new(Gateway::new(chat.clone(), config.typing_throttle_ms));

        Ok(Self {
            ledger: Arc::new(Mutex::new(ledger)),
            projections: Arc::new(projections),
            chat,
            idempotency: Arc::new(idempotency),
            rails: Arc::new(rails),
            gateway,
            lock_pool,
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/cases", post(create_case_handler))
        .route("/v1/cases/:case_id/transitions", post(transition_handler))
        .route("/v1/cases/:case_id/route", post(route_handler))
        .route("/v1/cases/:case_id/executions", post(start_execution_handler))
        .route(
            "/v1/cases/:case_id/executions/complete",
            post(complete_execution_handler),
        )
        .route(
            "/v1/cases/:case_id/verifications",
            post(start_verification_handler),
        )
        .route(
            "/v1/cases/:case_id/verifications/:verification_id/consensus",
            post(verification_consensus_handler),
        )
        .route(
            "/v1/cases/:case_id/disbursement/authorize",
            post(authorize_disbursement_handler),
        )
        .route(
            "/v1/cases/:case_id/disbursement/execute",
            post(execute_disbursement_handler),
        )
        .route("/v1/cases/:case_id/explain", get(explain_handler))
        .route("/v1/cases/:case_id/ledger", get(ledger_trail_handler))
        .route(
            "/v1/cases/:case_id/decisions/:decision_type",
            get(decision_handler),
        )
        .route(
            "/v1/cases/:case_id/decisions/:decision_type/chain",
            get(decision_chain_handler),
        )
        .route(
            "/v1/cases/:case_id/counterfactual",
            get(counterfactual_handler),
        )
        .route(
            "/v1/cases/:case_id/messages",
            get(list_messages_handler).post(create_message_handler),
        )
        .route("/v1/ws/cases/:case_id", get(ws_upgrade_handler))
        .with_state(state)
}

// ---- auth extraction ----------------------------------------------------------------------

/// Pulled from headers the caller's own auth layer is expected to have stamped (spec.md §1 scopes
/// authentication itself out); mirrors the teacher's header-driven `X-Trace-Id` plumbing.
pub struct AuthContext {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub actor_kind: ActorKind,
    pub authority_proof: String,
}

impl AuthContext {
    fn transition_actor(&self) -> TransitionActor {
        TransitionActor {
            kind: self.actor_kind,
            user_id: self.user_id,
            authority_proof: self.authority_proof.clone(),
        }
    }

    fn disbursement_actor(&self) -> DisbursementActor {
        DisbursementActor {
            kind: self.actor_kind,
            user_id: self.user_id,
            authority_proof: self.authority_proof.clone(),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = required_header_uuid(parts, "x-tenant-id")?;
        let actor_kind = match header_str(parts, "x-actor-kind").as_deref() {
            Some("human") => ActorKind::Human,
            Some("system") | None => ActorKind::System,
            Some(other) => {
                return Err(ApiError::bad_request(format!(
                    "invalid x-actor-kind '{other}'"
                )))
            }
        };
        let user_id = match header_str(parts, "x-user-id") {
            Some(raw) => Some(
                Uuid::parse_str(&raw)
                    .map_err(|_| ApiError::bad_request("invalid x-user-id header"))?,
            ),
            None => None,
        };
        let authority_proof =
            header_str(parts, "x-authority-proof").unwrap_or_else(|| "SYSTEM".to_string());

        Ok(Self {
            tenant_id,
            user_id,
            actor_kind,
            authority_proof,
        })
    }
}

fn header_str(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn required_header_uuid(parts: &Parts, name: &str) -> Result<Uuid, ApiError> {
    let raw = header_str(parts, name)
        .ok_or_else(|| ApiError::bad_request(format!("missing required header '{name}'")))?;
    Uuid::parse_str(&raw).map_err(|_| ApiError::bad_request(format!("invalid header '{name}'")))
}

fn idempotency_key(parts: &Parts) -> Option<String> {
    header_str(parts, "idempotency-key")
}

// ---- idempotency wrapper -------------------------------------------------------------------

async fn with_idempotency<T, F, Fut>(
    state: &ServiceState,
    tenant_id: Uuid,
    key: Option<&str>,
    f: F,
) -> Result<T, ApiError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    if let Some(key) = key {
        if let Some(cached) = state.idempotency.lookup(&tenant_id, key).await? {
            let value: T = serde_json::from_value(cached)
                .map_err(|e| ApiError::bad_request(format!("cached idempotency payload: {e}")))?;
            return Ok(value);
        }
    }
    let result = f().await?;
    if let Some(key) = key {
        state.idempotency.record(&tenant_id, key, &result).await?;
    }
    Ok(result)
}

// ---- health ---------------------------------------------------------------------------------

async fn health(State(state): State<ServiceState>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.lock_pool).await {
        Ok(_) => Json(json!({"status": "OK"})).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check database probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "CORRUPTED"})),
            )
                .into_response()
        }
    }
}

// ---- case creation / transitions -------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateCaseRequest {
    #[serde(rename = "referenceCode")]
    reference_code: String,
    status: String,
}

async fn create_case_handler(
    State(state): State<ServiceState>,
    auth: AuthContext,
    parts_key: IdempotencyKeyExtractor,
    Json(body): Json<CreateCaseRequest>,
) -> Result<Json<Case>, ApiError> {
    let tenant_id = auth.tenant_id;
    let actor = auth.transition_actor();
    let result = with_idempotency(&state, tenant_id, parts_key.0.as_deref(), || async move {
        let mut ledger = state.ledger.lock().await;
        let case = create_case(
            &state.projections,
            &mut ledger,
            tenant_id,
            body.reference_code,
            body.status,
            actor,
        )
        .await?;
        Ok::<_, ApiError>(case)
    })
    .await?;
    Ok(Json(result))
}

/// Thin extractor so the idempotency key can be read before the JSON body extractor consumes
/// the request.
struct IdempotencyKeyExtractor(Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for IdempotencyKeyExtractor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(idempotency_key(parts)))
    }
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    target: CaseLifecycle,
}

async fn transition_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    auth: AuthContext,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut ledger = state.ledger.lock().await;
    transition_case_lifecycle_with_ledger(
        &state.projections,
        &mut ledger,
        auth.tenant_id,
        case_id,
        body.target,
        auth.transition_actor(),
    )
    .await?;
    Ok(Json(
        json!({"caseId": case_id, "lifecycle": body.target.as_str()}),
    ))
}

#[derive(Debug, Deserialize)]
struct RouteRequest {
    #[serde(rename = "chosenRoute")]
    chosen_route: String,
    reason: Option<String>,
}

async fn route_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    auth: AuthContext,
    Json(body): Json<RouteRequest>,
) -> Result<Json<Decision>, ApiError> {
    let mut ledger = state.ledger.lock().await;
    let decision = route_case(
        &state.projections,
        &mut ledger,
        auth.tenant_id,
        case_id,
        body.chosen_route,
        body.reason,
        auth.transition_actor(),
    )
    .await?;
    Ok(Json(decision))
}

async fn start_execution_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    auth: AuthContext,
) -> Result<Json<Execution>, ApiError> {
    let mut ledger = state.ledger.lock().await;
    let execution = start_execution(
        &state.projections,
        &mut ledger,
        auth.tenant_id,
        case_id,
        auth.transition_actor(),
    )
    .await?;
    Ok(Json(execution))
}

async fn complete_execution_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    auth: AuthContext,
) -> Result<Json<Execution>, ApiError> {
    let mut ledger = state.ledger.lock().await;
    let execution = complete_execution(
        &state.projections,
        &mut ledger,
        auth.tenant_id,
        case_id,
        auth.transition_actor(),
    )
    .await?;
    Ok(Json(execution))
}

#[derive(Debug, Deserialize)]
struct StartVerificationRequest {
    #[serde(rename = "requiredVerifiers")]
    required_verifiers: Vec<String>,
}

async fn start_verification_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    auth: AuthContext,
    Json(body): Json<StartVerificationRequest>,
) -> Result<Json<VerificationRecord>, ApiError> {
    let mut ledger = state.ledger.lock().await;
    let record = start_verification(
        &state.projections,
        &mut ledger,
        auth.tenant_id,
        case_id,
        body.required_verifiers,
        auth.transition_actor(),
    )
    .await?;
    Ok(Json(record))
}

async fn verification_consensus_handler(
    State(state): State<ServiceState>,
    Path((case_id, verification_id)): Path<(Uuid, Uuid)>,
    auth: AuthContext,
) -> Result<Json<VerificationRecord>, ApiError> {
    let mut ledger = state.ledger.lock().await;
    let record = submit_verification_consensus(
        &state.projections,
        &mut ledger,
        auth.tenant_id,
        case_id,
        verification_id,
        auth.transition_actor(),
    )
    .await?;
    Ok(Json(record))
}

// ---- disbursement -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthorizeDisbursementRequest {
    #[serde(rename = "disbursementType")]
    disbursement_type: String,
    #[serde(rename = "amountMinor")]
    amount_minor: u64,
    currency: String,
    payee: Payee,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "outcome")]
enum AuthorizeResponse {
    #[serde(rename = "AUTHORIZED")]
    Authorized {
        #[serde(rename = "disbursementId")]
        disbursement_id: Uuid,
    },
    #[serde(rename = "ALREADY_AUTHORIZED")]
    AlreadyAuthorized {
        #[serde(rename = "disbursementId")]
        disbursement_id: Uuid,
    },
    #[serde(rename = "DENIED")]
    Denied { reason: String },
}

async fn authorize_disbursement_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    auth: AuthContext,
    Json(body): Json<AuthorizeDisbursementRequest>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    let mut ledger = state.ledger.lock().await;
    let outcome = authorize_disbursement(
        &state.projections,
        &mut ledger,
        AuthorizeRequest {
            tenant_id: auth.tenant_id,
            case_id,
            disbursement_type: body.disbursement_type,
            amount_minor: body.amount_minor,
            currency: body.currency,
            payee: body.payee,
            actor: auth.disbursement_actor(),
        },
    )
    .await?;

    Ok(Json(match outcome {
        AuthorizeOutcome::Authorized { disbursement_id } => {
            AuthorizeResponse::Authorized { disbursement_id }
        }
        AuthorizeOutcome::AlreadyAuthorized { disbursement_id } => {
            AuthorizeResponse::AlreadyAuthorized { disbursement_id }
        }
        AuthorizeOutcome::Denied { reason } => AuthorizeResponse::Denied { reason },
    }))
}

#[derive(Debug, Deserialize)]
struct ExecuteDisbursementRequest {
    #[serde(rename = "disbursementId")]
    disbursement_id: Uuid,
    #[serde(rename = "railKind")]
    rail_kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "outcome")]
enum ExecuteResponse {
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed { reason: String },
}

async fn execute_disbursement_handler(
    State(state): State<ServiceState>,
    Path(_case_id): Path<Uuid>,
    auth: AuthContext,
    Json(body): Json<ExecuteDisbursementRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let rail = state.rails.get(&body.rail_kind).ok_or_else(|| {
        ApiError::bad_request(format!(
            "no payee rail registered for '{}'",
            body.rail_kind
        ))
    })?;

    let mut ledger = state.ledger.lock().await;
    let outcome = execute_disbursement(
        &state.projections,
        &mut ledger,
        auth.tenant_id,
        body.disbursement_id,
        |disbursement| async move { rail.settle(&disbursement).await },
    )
    .await?;

    Ok(Json(match outcome {
        ExecuteOutcome::Completed => ExecuteResponse::Completed,
        ExecuteOutcome::Failed { reason } => ExecuteResponse::Failed { reason },
    }))
}

// ---- read query surface -----------------------------------------------------------------------

async fn explain_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    auth: AuthContext,
) -> Result<Json<LifecycleExplanation>, ApiError> {
    let ledger = state.ledger.lock().await;
    let explanation =
        explain_lifecycle(&state.projections, &ledger, &auth.tenant_id, &case_id).await?;
    Ok(Json(explanation))
}

async fn ledger_trail_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
) -> Json<Vec<LedgerCommit>> {
    let ledger = state.ledger.lock().await;
    let trail: Vec<_> = get_ledger_trail(&ledger, &case_id).into_iter().cloned().collect();
    Json(trail)
}

async fn decision_handler(
    State(state): State<ServiceState>,
    Path((case_id, decision_type)): Path<(Uuid, String)>,
    auth: AuthContext,
) -> Result<Json<Option<Decision>>, ApiError> {
    let decision =
        get_authoritative_decision(&state.projections, &auth.tenant_id, &case_id, &decision_type)
            .await?;
    Ok(Json(decision))
}

async fn decision_chain_handler(
    State(state): State<ServiceState>,
    Path((case_id, decision_type)): Path<(Uuid, String)>,
    auth: AuthContext,
) -> Result<Json<Vec<Decision>>, ApiError> {
    let chain =
        get_decision_chain(&state.projections, &auth.tenant_id, &case_id, &decision_type).await?;
    Ok(Json(chain))
}

async fn counterfactual_handler(
    Path(case_id): Path<Uuid>,
) -> Result<Json<Option<RoutingCounterfactual>>, ApiError> {
    let counterfactual = get_routing_counterfactual(&case_id).await?;
    Ok(Json(counterfactual))
}

// ---- chat / messages ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    cursor: Option<String>,
    limit: Option<i64>,
}

async fn list_messages_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = state
        .chat
        .list_page(case_id, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(json!({
        "messages": page.messages,
        "nextCursor": page.next_cursor,
        "hasMore": page.has_more,
    })))
}

#[derive(Debug, Deserialize)]
struct CreateMessageRequest {
    body: String,
    #[serde(rename = "clientMutationId")]
    client_mutation_id: Option<String>,
}

async fn create_message_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    auth: AuthContext,
    Json(body): Json<CreateMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let author_user_id = auth
        .user_id
        .ok_or_else(|| ApiError::bad_request("message author requires x-user-id"))?;
    let message = state
        .chat
        .create_message(
            auth.tenant_id,
            case_id,
            author_user_id,
            body.body,
            body.client_mutation_id,
        )
        .await?;
    state
        .gateway
        .publish_message(case_id, message.clone())
        .await;
    Ok(Json(message))
}

// ---- websocket upgrade --------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WsAuthQuery {
    #[serde(rename = "tenantId")]
    tenant_id: Uuid,
    #[serde(rename = "userId")]
    user_id: Uuid,
}

async fn ws_upgrade_handler(
    State(state): State<ServiceState>,
    Path(case_id): Path<Uuid>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| {
        gateway.handle_socket(socket, case_id, query.tenant_id, query.user_id)
    })
}

// ---- error mapping ------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Http {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Http {
                status,
                code,
                message,
            } => (status, code, message),
            ApiError::Core(err) => (core_error_status(&err), err.code(), err.to_string()),
        };
        (status, Json(json!({"error": message, "code": code}))).into_response()
    }
}

fn core_error_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) | CoreError::InvalidCursor => StatusCode::BAD_REQUEST,
        CoreError::CaseNotFound(_) | CoreError::DisbursementNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::IllegalLifecycleTransition { .. }
        | CoreError::LifecycleInvariantViolation(_)
        | CoreError::SupersededCommitNotFound(_)
        | CoreError::CrossTenantSupersessionForbidden
        | CoreError::CommitAlreadySuperseded(_)
        | CoreError::InsufficientAuthorityForSupersession { .. }
        | CoreError::SystemCannotSupersedeHumanAuthority
        | CoreError::EqualAuthoritySupersessionRequiresEscalation => StatusCode::CONFLICT,
        CoreError::LedgerChainCorrupted(_)
        | CoreError::SignatureInvalid(_)
        | CoreError::KeyStore(_)
        | CoreError::Serialization(_)
        | CoreError::Database(_)
        | CoreError::ClockUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> ServiceState {
        let dir = std::env::temp_dir().join(format!("casework-service-{}", Uuid::new_v4()));
        ServiceState::bootstrap(ServiceConfig {
            ledger_storage: LedgerStorageConfig::memory(),
            key_path: dir.join("signing.key"),
            database_url: std::env::var("TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/casework_test".to_string()),
            max_connections: 2,
            typing_throttle_ms: 300,
        })
        .await
        .expect("bootstrap")
    }

    #[tokio::test]
    #[ignore = "requires a live postgres instance; exercised in integration environments"]
    async fn health_reports_ok_when_database_reachable() {
        let state = test_state().await;
        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "OK");
    }

    #[tokio::test]
    #[ignore = "requires a live postgres instance; exercised in integration environments"]
    async fn create_and_transition_case_round_trips() {
        let state = test_state().await;
        let app = build_router(state);
        let tenant_id = Uuid::new_v4();

        let create_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/cases")
                    .header("content-type", "application/json")
                    .header("x-tenant-id", tenant_id.to_string())
                    .body(Body::from(
                        json!({"referenceCode": "CASE-1", "status": "open"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_response.status(), StatusCode::OK);
        let bytes = to_bytes(create_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let case: Case = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(case.lifecycle, CaseLifecycle::Intaked);

        let transition_response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/cases/{}/transitions", case.case_id))
                    .header("content-type", "application/json")
                    .header("x-tenant-id", tenant_id.to_string())
                    .body(Body::from(json!({"target": "ROUTED"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(transition_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    #[ignore = "requires a live postgres instance; exercised in integration environments"]
    async fn case_reaches_disbursement_authorized_through_route_execute_verify() {
        let state = test_state().await;
        let app = build_router(state);
        let tenant_id = Uuid::new_v4();
        let headers = [("x-tenant-id", tenant_id.to_string())];

        let create_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/cases")
                    .header("content-type", "application/json")
                    .header("x-tenant-id", tenant_id.to_string())
                    .body(Body::from(
                        json!({"referenceCode": "CASE-2", "status": "open"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = to_bytes(create_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let case: Case = serde_json::from_slice(&bytes).unwrap();

        let route_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/cases/{}/route", case.case_id))
                    .header("content-type", "application/json")
                    .header(headers[0].0, &headers[0].1)
                    .body(Body::from(
                        json!({"chosenRoute": "STANDARD"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(route_response.status(), StatusCode::OK);

        let exec_start = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/cases/{}/executions", case.case_id))
                    .header(headers[0].0, &headers[0].1)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(exec_start.status(), StatusCode::OK);

        let exec_complete = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/cases/{}/executions/complete", case.case_id))
                    .header(headers[0].0, &headers[0].1)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(exec_complete.status(), StatusCode::OK);

        let verify_start = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/cases/{}/verifications", case.case_id))
                    .header("content-type", "application/json")
                    .header(headers[0].0, &headers[0].1)
                    .body(Body::from(
                        json!({"requiredVerifiers": ["supervisor"]}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(verify_start.status(), StatusCode::OK);
        let bytes = to_bytes(verify_start.into_body(), usize::MAX)
            .await
            .unwrap();
        let record: VerificationRecord = serde_json::from_slice(&bytes).unwrap();

        let consensus = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/v1/cases/{}/verifications/{}/consensus",
                        case.case_id, record.id
                    ))
                    .header(headers[0].0, &headers[0].1)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(consensus.status(), StatusCode::OK);

        let authorize = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/cases/{}/disbursement/authorize", case.case_id))
                    .header("content-type", "application/json")
                    .header(headers[0].0, &headers[0].1)
                    .body(Body::from(
                        json!({
                            "disbursementType": "GRANT",
                            "amountMinor": 5000,
                            "currency": "USD",
                            "payee": {"kind": "bank_account", "id": "acct-1"}
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(authorize.status(), StatusCode::OK);
        let bytes = to_bytes(authorize.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["outcome"], "AUTHORIZED");
    }

    #[test]
    fn core_error_status_maps_not_found() {
        let err = CoreError::CaseNotFound("x".to_string());
        assert_eq!(core_error_status(&err), StatusCode::NOT_FOUND);
    }

    #[test]
    fn core_error_status_maps_conflict() {
        let err = CoreError::IllegalLifecycleTransition {
            from: "INTAKED".to_string(),
            to: "CLOSED".to_string(),
        };
        assert_eq!(core_error_status(&err), StatusCode::CONFLICT);
    }
}
