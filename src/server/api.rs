use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agent::{AgentClient, AgentHandle, AgentOutcome, LogPoller};
use crate::blob::BlobStore;
use crate::config::DashboardConfig;
use crate::editor::EditSession;
use crate::errors::{
    AgentError, KycError, OrderError, ResearchError, StoreError, UploadError, ValidationError,
};
use crate::events::{EventLog, EventQuery};
use crate::kyc::{KycDesk, KycSubmission, KycTarget};
use crate::orders::{NewOrder, OrderBook};
use crate::query::QueryBuilder;
use crate::research::{self, ResearchDesk, ResearchRequest};
use crate::session::{ChatRole, SessionContext, SessionRegistry, contact_id};
use crate::sourcing::Sourcing;
use crate::store::{DocumentDatabase, text_filter};
use crate::upload::{UploadFile, Uploader};
use crate::validation::{ReportDesk, RuleDecision, ValidationDesk, ValidationQuery, report_rules};
use crate::visualization::VisualizationGallery;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: Arc<dyn DocumentDatabase>,
    pub dashboard: DashboardConfig,
    pub agent: AgentHandle,
    pub orders: OrderBook,
    pub validation: ValidationDesk,
    pub reports: ReportDesk,
    pub events: EventLog,
    pub uploader: Uploader,
    pub sourcing: Sourcing,
    pub kyc: KycDesk,
    pub research: ResearchDesk,
    pub visualizations: VisualizationGallery,
    pub sessions: SessionRegistry,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire every desk to its collection in `db`.
    pub fn new(
        db: Arc<dyn DocumentDatabase>,
        dashboard: DashboardConfig,
        blobs: Arc<dyn BlobStore>,
        container: impl Into<String>,
    ) -> Self {
        let cols = &dashboard.collections;
        let agent_cfg = &dashboard.agent;
        let agent = AgentHandle::new(
            AgentClient::new(agent_cfg.endpoint.clone()),
            LogPoller::new(db.collection(&cols.log), agent_cfg.poll_interval()),
            dashboard.admin_id(),
        );
        let order_store = db.collection(&dashboard.database.collection);
        let orders = OrderBook::new(order_store.clone(), dashboard.inputs.clone());
        let container: String = container.into();
        let kyc = KycDesk::new(
            dashboard.kyc.clone(),
            db.collection(&cols.kyc),
            blobs.clone(),
            container.clone(),
            agent.clone(),
            agent_cfg.validation_timeout(),
        );
        let research = ResearchDesk::new(
            agent.clone(),
            db.collection(&cols.research),
            agent_cfg.research_timeout(),
        );
        let uploader = Uploader::new(
            orders.clone(),
            blobs,
            container,
            agent.clone(),
            agent_cfg.validation_timeout(),
        )
        .with_max_workers(dashboard.upload.max_workers);
        let sourcing = Sourcing::new(
            agent.clone(),
            db.collection(&cols.suppliers),
            db.collection(&cols.products),
            db.collection(&cols.supplier_searches),
            db.collection(&cols.product_searches),
            agent_cfg.search_timeout(),
        );

        Self {
            validation: ValidationDesk::new(order_store),
            reports: ReportDesk::new(db.collection(&cols.checker)),
            events: EventLog::new(db.collection(&cols.events)),
            visualizations: VisualizationGallery::new(db.collection(&cols.visualizations)),
            kyc,
            research,
            orders,
            uploader,
            sourcing,
            agent,
            sessions: SessionRegistry::default(),
            dashboard,
            db,
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct IdsQuery {
    /// Comma-separated order ids.
    pub ids: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub collection: String,
    #[serde(default)]
    pub q: String,
}

#[derive(Deserialize)]
pub struct EventsParams {
    pub text: Option<String>,
    pub order_id: Option<String>,
    /// Comma-separated event types.
    pub event_types: Option<String>,
}

#[derive(Deserialize)]
pub struct UploadRequest {
    pub files: Vec<UploadedFile>,
}

#[derive(Deserialize)]
pub struct UploadedFile {
    pub document: String,
    pub file_name: String,
    /// File bytes, base64.
    pub content: String,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: RuleDecision,
}

#[derive(Deserialize)]
pub struct CheckRequest {
    pub order_id: String,
    pub rules: Value,
    #[serde(default)]
    pub doc_types: Vec<String>,
}

#[derive(Deserialize)]
pub struct AskRequest {
    pub message: String,
    pub ai_role: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub role: ChatRole,
    pub country: Option<String>,
    #[serde(default)]
    pub phone: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct SupplierSearchRequest {
    pub query: String,
}

#[derive(Deserialize)]
pub struct ProductSearchRequest {
    pub query: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Deserialize)]
pub struct KycUploadRequest {
    pub order: String,
    #[serde(flatten)]
    pub target: KycTarget,
    pub file_name: String,
    /// File bytes, base64.
    pub content: String,
}

#[derive(Deserialize)]
pub struct OrderQuery {
    pub order: String,
}

#[derive(Deserialize)]
pub struct CompanyQuery {
    pub company: String,
}

#[derive(Serialize)]
pub struct AskResponse {
    pub timed_out: bool,
    pub message: String,
    pub record: Option<crate::agent::LogRecord>,
}

impl From<AgentOutcome> for AskResponse {
    fn from(outcome: AgentOutcome) -> Self {
        Self {
            timed_out: matches!(outcome, AgentOutcome::TimedOut),
            message: outcome.message(),
            record: outcome.record().cloned(),
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateKey(_) => ApiError::Conflict(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::AlreadyExists { .. } => ApiError::Conflict(e.to_string()),
            OrderError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            OrderError::Store(e) => e.into(),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            ValidationError::UnknownRule(_) | ValidationError::Edit(_) => {
                ApiError::BadRequest(e.to_string())
            }
            ValidationError::Store(e) => e.into(),
            ValidationError::Agent(e) => e.into(),
        }
    }
}

impl From<KycError> for ApiError {
    fn from(e: KycError) -> Self {
        match e {
            KycError::Blob(_) | KycError::Agent(_) => ApiError::Internal(e.to_string()),
            KycError::Store(e) => e.into(),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<ResearchError> for ApiError {
    fn from(e: ResearchError) -> Self {
        match e {
            ResearchError::Agent(e) => e.into(),
            ResearchError::Store(e) => e.into(),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::NotRequested { .. } => ApiError::BadRequest(e.to_string()),
            UploadError::Order(e) => e.into(),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/orders",
            get(list_orders).post(place_order).delete(delete_orders),
        )
        .route("/api/orders/stats", get(order_stats))
        .route("/api/orders/{order}/missing", get(missing_documents))
        .route("/api/orders/{order}/upload", post(upload_documents))
        .route("/api/search", get(search_collection))
        .route("/api/validation", get(search_validation))
        .route(
            "/api/documents/{id}/form",
            get(get_form).post(save_form),
        )
        .route("/api/reports/check", post(request_check))
        .route("/api/reports/{id}", get(latest_report))
        .route("/api/reports/{id}/rules/{rule}", post(decide_rule))
        .route("/api/reports/{id}/confirm", post(confirm_report))
        .route("/api/events", get(list_events))
        .route("/api/events/filters", get(event_filters))
        .route("/api/agent/ask", post(ask_agent))
        .route("/api/chat", post(chat))
        .route("/api/chat/{id}", delete(end_chat))
        .route("/api/kyc", get(kyc_records).post(kyc_upload))
        .route("/api/kyc/{id}/form", get(kyc_form).post(kyc_save))
        .route("/api/research", get(research_reports).post(request_research))
        .route("/api/research/companies", get(research_companies))
        .route("/api/research/options", get(research_options))
        .route("/api/visualizations", get(list_visualizations))
        .route("/api/visualizations/{uuid}", get(get_visualization))
        .route("/api/sourcing/suppliers", post(search_suppliers))
        .route("/api/sourcing/products", post(search_products))
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

// ── Orders ────────────────────────────────────────────────────────────

async fn list_orders(
    State(state): State<SharedState>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.orders.list(query.ids.as_deref()).await?))
}

async fn place_order(
    State(state): State<SharedState>,
    Json(req): Json<NewOrder>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = state.orders.place(&req).await?;
    Ok((StatusCode::CREATED, Json(json!({"ids": ids}))))
}

async fn delete_orders(
    State(state): State<SharedState>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<Value>, ApiError> {
    let ids = query
        .ids
        .ok_or_else(|| ApiError::BadRequest("ids query parameter is required".into()))?;
    let deleted = state.orders.delete(&ids).await?;
    Ok(Json(json!({"deleted": deleted})))
}

async fn order_stats(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let stats = state.orders.statistics().await?;
    let progress = state.orders.progress().await?;
    Ok(Json(json!({"stats": stats, "progress": progress})))
}

async fn missing_documents(
    State(state): State<SharedState>,
    Path(order): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let missing = state.orders.missing_documents(&order).await?;
    Ok(Json(json!(missing)))
}

async fn upload_documents(
    State(state): State<SharedState>,
    Path(order): Path<String>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut files = Vec::with_capacity(req.files.len());
    for f in req.files {
        let bytes = STANDARD
            .decode(f.content.as_bytes())
            .map_err(|e| ApiError::BadRequest(format!("{}: content is not base64: {}", f.file_name, e)))?;
        files.push(UploadFile {
            document: f.document,
            file_name: f.file_name,
            bytes,
        });
    }
    let results = state.uploader.upload(&order, files).await?;
    Ok(Json(json!(results)))
}

// ── Search and validation ─────────────────────────────────────────────

async fn search_collection(
    State(state): State<SharedState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let store = state.db.collection(&query.collection);
    let filter = text_filter(store.as_ref(), &QueryBuilder::new(), &query.q).await?;
    Ok(Json(store.find(&filter).await?))
}

async fn search_validation(
    State(state): State<SharedState>,
    Query(query): Query<ValidationQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.validation.search(&query).await?))
}

async fn get_form(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let form = state.validation.form(&id).await?;
    Ok(Json(json!({"form": form, "controls": form.controls().len()})))
}

/// Tie a submitted edit session to the document named in the path.
fn bind_session(mut session: EditSession, id: String) -> Result<EditSession, ApiError> {
    if session.document_id.is_empty() {
        session.document_id = id;
    } else if session.document_id != id {
        return Err(ApiError::BadRequest(format!(
            "session is for document {}, not {}",
            session.document_id, id
        )));
    }
    Ok(session)
}

async fn save_form(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(session): Json<EditSession>,
) -> Result<Json<Value>, ApiError> {
    let session = bind_session(session, id)?;
    let outcome = state.validation.save(&session).await?;
    Ok(Json(json!(outcome)))
}

// ── Content-check reports ─────────────────────────────────────────────

async fn request_check(
    State(state): State<SharedState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let outcome = state
        .reports
        .request_check(
            &state.agent,
            &req.order_id,
            &req.rules,
            &req.doc_types,
            state.dashboard.agent.validation_timeout(),
        )
        .await?;
    Ok(Json(outcome.into()))
}

/// `id` is the order id here.
async fn latest_report(
    State(state): State<SharedState>,
    Path(order): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = state.reports.latest(&order).await?.ok_or_else(|| {
        ApiError::NotFound(format!(
            "No content-check report for order {}. Run the content validation first.",
            order
        ))
    })?;
    let rules = report_rules(&report);
    Ok(Json(json!({"report": report, "rules": rules})))
}

async fn decide_rule(
    State(state): State<SharedState>,
    Path((id, rule)): Path<(String, String)>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .reports
        .decide(&id, &rule, req.decision)
        .await?;
    Ok(Json(json!({"modified": result.modified})))
}

async fn confirm_report(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let result = state.reports.confirm(&id).await?;
    Ok(Json(json!({"modified": result.modified})))
}

// ── Events ────────────────────────────────────────────────────────────

async fn list_events(
    State(state): State<SharedState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Value>, ApiError> {
    let query = EventQuery {
        text: params.text,
        order_id: params.order_id,
        event_types: params
            .event_types
            .as_deref()
            .map(crate::orders::split_ids)
            .unwrap_or_default(),
    };
    Ok(Json(json!(state.events.search(&query).await?)))
}

async fn event_filters(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({
        "event_types": state.events.event_types().await?,
        "order_ids": state.events.order_ids().await?,
    })))
}

// ── Agent ─────────────────────────────────────────────────────────────

async fn ask_agent(
    State(state): State<SharedState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let timeout = req
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.dashboard.agent.search_timeout());
    let outcome = state
        .agent
        .ask(req.message, req.ai_role.as_deref(), timeout)
        .await?;
    Ok(Json(outcome.into()))
}

async fn chat(
    State(state): State<SharedState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let contact = match req.country.as_deref() {
        Some(country) => contact_id(&state.dashboard, country, &req.phone)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown country '{}'", country)))?,
        None => req.phone.trim().to_string(),
    };
    let session_id = req
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Sessions are independent; take this one out while the call runs.
    let mut session = state
        .sessions
        .take(&session_id)
        .await
        .unwrap_or_else(|| SessionContext::new(req.role, state.dashboard.admin_id(), contact.clone()));
    session.set_role(req.role);
    session.set_contact(contact);

    let reply = session.send(&state.agent.client, &req.message).await;
    let history = session.history().to_vec();
    state.sessions.put(session_id.clone(), session).await;

    let reply = reply?;
    Ok(Json(json!({
        "session_id": session_id,
        "reply": reply,
        "history": history,
    })))
}

async fn end_chat(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.end(&session_id).await {
        tracing::info!(session_id, "chat session ended");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Chat session {} not found", session_id)))
    }
}

// ── KYC extraction ────────────────────────────────────────────────────

async fn kyc_upload(
    State(state): State<SharedState>,
    Json(req): Json<KycUploadRequest>,
) -> Result<Json<Value>, ApiError> {
    let bytes = STANDARD
        .decode(req.content.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("{}: content is not base64: {}", req.file_name, e)))?;
    let outcome = state
        .kyc
        .submit(KycSubmission {
            order: req.order,
            target: req.target,
            file_name: req.file_name,
            bytes,
        })
        .await?;
    Ok(Json(json!(outcome)))
}

async fn kyc_records(
    State(state): State<SharedState>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.kyc.records(&query.order).await?))
}

async fn kyc_form(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let form = state.kyc.form(&id).await?;
    Ok(Json(json!({"form": form, "controls": form.controls().len()})))
}

async fn kyc_save(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(session): Json<EditSession>,
) -> Result<Json<Value>, ApiError> {
    let session = bind_session(session, id)?;
    Ok(Json(json!(state.kyc.save(&session).await?)))
}

// ── Company research ──────────────────────────────────────────────────

async fn request_research(
    State(state): State<SharedState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!(state.research.request(&req).await?)))
}

async fn research_reports(
    State(state): State<SharedState>,
    Query(query): Query<CompanyQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    if query.company.trim().is_empty() {
        return Err(ApiError::BadRequest("company is required".into()));
    }
    Ok(Json(state.research.reports(&query.company).await?))
}

async fn research_companies(State(state): State<SharedState>) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.research.companies().await?))
}

async fn research_options() -> Json<Value> {
    let defaults = ResearchRequest::default();
    Json(json!({
        "languages": research::LANGUAGES,
        "regions": research::REGIONS,
        "news_sources": research::NEWS_SOURCES,
        "default_focuses": research::DEFAULT_FOCUSES,
        "defaults": defaults,
    }))
}

// ── Visualisations ────────────────────────────────────────────────────

async fn list_visualizations(State(state): State<SharedState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.visualizations.uuids().await?))
}

async fn get_visualization(
    State(state): State<SharedState>,
    Path(uuid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chart = state
        .visualizations
        .get(&uuid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Visualization {} not found", uuid)))?;
    Ok(Json(json!(chart)))
}

async fn search_suppliers(
    State(state): State<SharedState>,
    Json(req): Json<SupplierSearchRequest>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!(state.sourcing.search_suppliers(&req.query).await?)))
}

async fn search_products(
    State(state): State<SharedState>,
    Json(req): Json<ProductSearchRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.query.is_none() && req.image_url.is_none() {
        return Err(ApiError::BadRequest("query or image_url is required".into()));
    }
    let results = state
        .sourcing
        .search_products(req.query.as_deref(), req.image_url.as_deref())
        .await?;
    Ok(Json(json!(results)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use crate::config::sample_config;
    use crate::store::MemoryDatabase;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: SharedState,
        db: MemoryDatabase,
        _blobs: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let db = MemoryDatabase::new();
        let blobs = tempfile::tempdir().unwrap();
        let mut config = sample_config();
        config.agent.endpoint = "http://127.0.0.1:9/agent-call".into();
        let state = Arc::new(AppState::new(
            Arc::new(db.clone()),
            config,
            Arc::new(LocalBlobStore::new(blobs.path())),
            "docs",
        ));
        TestApp {
            router: api_router().with_state(state.clone()),
            state,
            db,
            _blobs: blobs,
        }
    }

    async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn t1() -> Value {
        json!({"order": "T1", "email": "ops@example.com", "documents": ["Invoice"]})
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_place_order_then_duplicate() {
        let app = test_app();
        let (status, body) = send(&app, "POST", "/api/orders", Some(t1())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["ids"].as_array().unwrap().len(), 1);

        let (status, body) = send(&app, "POST", "/api/orders", Some(t1())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "An order with this ID already exists.");

        let (_, list) = send(&app, "GET", "/api/orders", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_place_order_without_contact() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/orders",
            Some(json!({"order": "T1", "documents": ["Invoice"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["ids"].as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            "POST",
            "/api/orders",
            Some(json!({"order": " ", "documents": ["Invoice"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Order ID and (phone number or email) are required fields.");

        let (status, _) = send(
            &app,
            "POST",
            "/api/orders",
            Some(json!({"order": "../../../escaped", "documents": ["Invoice"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_stats_and_missing() {
        let app = test_app();
        for id in ["A", "B"] {
            let mut order = t1();
            order["order"] = json!(id);
            order["documents"] = json!(["Invoice", "Packing List"]);
            send(&app, "POST", "/api/orders", Some(order)).await;
        }

        let (status, missing) = send(&app, "GET", "/api/orders/B/missing", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(missing.as_array().unwrap().len(), 2);

        let (_, deleted) = send(&app, "DELETE", "/api/orders?ids=A", None).await;
        assert_eq!(deleted["deleted"], 2);

        let (_, stats) = send(&app, "GET", "/api/orders/stats", None).await;
        assert_eq!(stats["stats"]["total_orders"], 1);
        assert_eq!(stats["stats"]["document_required"], 2);
        assert_eq!(stats["progress"][0]["order"], "B");

        let (status, _) = send(&app, "GET", "/api/orders/A/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", "/api/orders", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_form_render_and_save() {
        let app = test_app();
        app.db
            .collection("chase_order")
            .insert_one(json!({"_id": "d1", "Order": "T1",
                               "Extracted Fields": {"Total": 12.5, "Lines": [{"sku": "A1"}]}}))
            .await
            .unwrap();

        let (status, body) = send(&app, "GET", "/api/documents/d1/form", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["form"]["identity"], "d1");

        let session = json!({"fields": {"Extracted Fields.Total": "13"}});
        let (status, body) = send(&app, "POST", "/api/documents/d1/form", Some(session)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fields"], json!({"Total": 13.0, "Lines": [{"sku": "A1"}]}));

        let (_, validated) = send(&app, "GET", "/api/validation?status=validated", None).await;
        assert_eq!(validated.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "GET", "/api/documents/zz/form", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &app,
            "POST",
            "/api/documents/d1/form",
            Some(json!({"document_id": "other"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_free_text_search_endpoint() {
        let app = test_app();
        let suppliers = app.db.collection("supplier");
        suppliers
            .insert_one(json!({"SupplierBasic": {"Demographics": {"EntityFullName": "Acme Steel"}}}))
            .await
            .unwrap();
        suppliers
            .insert_one(json!({"SupplierBasic": {"Demographics": {"EntityFullName": "Globex"}}}))
            .await
            .unwrap();
        let (_, hits) = send(&app, "GET", "/api/search?collection=supplier&q=steel", None).await;
        assert_eq!(hits.as_array().unwrap().len(), 1);
        let (_, all) = send(&app, "GET", "/api/search?collection=supplier", None).await;
        assert_eq!(all.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_report_review() {
        let app = test_app();
        app.db
            .collection("air8_checker")
            .insert_one(json!({"_id": "r1", "Order ID": "T1", "created_time": "01/10/2026 09:00AM",
                               "rule_1": {"Rule": "Totals match", "Score": 5}}))
            .await
            .unwrap();

        let (status, body) = send(&app, "GET", "/api/reports/T1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rules"][0]["key"], "rule_1");

        let (status, body) = send(
            &app,
            "POST",
            "/api/reports/r1/rules/rule_1",
            Some(json!({"decision": "Rejected"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["modified"], 1);

        let (status, _) = send(&app, "POST", "/api/reports/r1/confirm", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/api/reports/T9", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_events_endpoint() {
        let app = test_app();
        let events = app.db.collection("event_log");
        for (id, time, kind) in [
            ("e1", "02/10/2026 09:00AM", "upload"),
            ("e2", "01/10/2026 09:00AM", "reminder"),
        ] {
            events
                .insert_one(json!({"_id": id, "created_time": time, "event_type": kind, "order_id": "T1"}))
                .await
                .unwrap();
        }
        let (_, all) = send(&app, "GET", "/api/events", None).await;
        assert_eq!(all[0]["id"], "e2");
        let (_, uploads) = send(&app, "GET", "/api/events?event_types=upload", None).await;
        assert_eq!(uploads.as_array().unwrap().len(), 1);
        let (_, filters) = send(&app, "GET", "/api/events/filters", None).await;
        assert_eq!(filters["event_types"], json!(["upload", "reminder"]));
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_base64() {
        let app = test_app();
        send(&app, "POST", "/api/orders", Some(t1())).await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/orders/T1/upload",
            Some(json!({"files": [{"document": "Invoice", "file_name": "i.pdf", "content": "***"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("base64"));
    }

    #[tokio::test]
    async fn test_product_search_needs_input() {
        let app = test_app();
        let (status, _) = send(&app, "POST", "/api/sourcing/products", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_end_chat_discards_session() {
        let app = test_app();
        app.state
            .sessions
            .put("s-1", SessionContext::new(ChatRole::Admin, "admin-001", ""))
            .await;

        let (status, _) = send(&app, "DELETE", "/api/chat/s-1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(app.state.sessions.is_empty().await);

        let (status, body) = send(&app, "DELETE", "/api/chat/s-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Chat session s-1 not found");
    }

    #[tokio::test]
    async fn test_kyc_records_and_form() {
        let app = test_app();
        let kyc = app.db.collection("air8_kyc");
        kyc.insert_one(json!({"_id": "k1", "Order ID": "K1", "created_time": "01/10/2026 09:00AM",
                              "Extracted Fields": {"Name": "CHAN Tai Man"}}))
            .await
            .unwrap();
        kyc.insert_one(json!({"_id": "k2", "Order ID": "K2"})).await.unwrap();

        let (status, body) = send(&app, "GET", "/api/kyc?order=K1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"_id": "k1", "Order ID": "K1", "created_time": "01/10/2026 09:00AM",
                                 "Extracted Fields": {"Name": "CHAN Tai Man"}}]));

        let (status, body) = send(&app, "GET", "/api/kyc/k1/form", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["form"]["identity"], "k1");

        let session = json!({"fields": {"Extracted Fields.Name": "CHAN Tai-man"}});
        let (status, body) = send(&app, "POST", "/api/kyc/k1/form", Some(session)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fields"], json!({"Name": "CHAN Tai-man"}));

        let (status, _) = send(&app, "POST", "/api/kyc/k1/form", Some(json!({"document_id": "k2"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_kyc_upload_checks_target() {
        let app = test_app();
        let upload = json!({"order": "K1", "mode": "single", "nation": "Mars", "document_type": "HKID",
                            "file_name": "id.jpg", "content": "aGk="});
        let (status, body) = send(&app, "POST", "/api/kyc", Some(upload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Mars"));

        let upload = json!({"order": "K1", "mode": "multiple", "document_types": [],
                            "file_name": "id.jpg", "content": "aGk="});
        let (status, _) = send(&app, "POST", "/api/kyc", Some(upload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_research_endpoints() {
        let app = test_app();
        let (status, _) = send(&app, "POST", "/api/research", Some(json!({"company": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            "POST",
            "/api/research",
            Some(json!({"company": "Acme", "news_results": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        app.db
            .collection("air8_company_info_news")
            .insert_one(json!({"_id": "c1", "Company Name": "Acme Holdings"}))
            .await
            .unwrap();
        let (status, body) = send(&app, "GET", "/api/research?company=acme", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        let (_, body) = send(&app, "GET", "/api/research/companies", None).await;
        assert_eq!(body, json!(["Acme Holdings"]));

        let (status, body) = send(&app, "GET", "/api/research/options", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["defaults"]["news_results"], 30);
        assert!(body["regions"].as_array().unwrap().contains(&json!("Hong Kong")));
    }

    #[tokio::test]
    async fn test_visualization_endpoints() {
        let app = test_app();
        let charts = app.db.collection("data_visualization");
        charts
            .insert_one(json!({"uuid": "v1", "question": "Sales?", "data_visualization_result": "<div/>"}))
            .await
            .unwrap();
        charts.insert_one(json!({"uuid": "v2", "question": "Pending"})).await.unwrap();

        let (_, body) = send(&app, "GET", "/api/visualizations", None).await;
        assert_eq!(body, json!(["v1"]));
        let (status, body) = send(&app, "GET", "/api/visualizations/v1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["html"], "<div/>");
        let (status, _) = send(&app, "GET", "/api/visualizations/v2", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
