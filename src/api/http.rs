//! HTTP API Server
//!
//! Client operations, replica replay endpoints and cluster status.
//!
//! A client mutation is applied to local storage first. Only after it
//! succeeds is it handed to the dispatcher, and the response goes back
//! without waiting for any replica.

use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State, Json},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::executor::{statements, Column, Row, Statement, StorageEngine, TableSpec};
use crate::replication::{OperationKind, ReplicationDispatcher, ReplicationPayload, StatsSnapshot};
use crate::state::{ClusterRoster, ElectionState, FailoverCoordinator};
use crate::error::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Node ID
    pub node_id: String,
    /// Cluster roster
    pub roster: Arc<ClusterRoster>,
    /// Replication fan-out
    pub dispatcher: Arc<ReplicationDispatcher>,
    /// Local storage engine
    pub storage: Arc<dyn StorageEngine>,
    /// Failover coordinator, absent when auto failover is off
    pub coordinator: Option<Arc<FailoverCoordinator>>,
    /// Process start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let router = create_router(Arc::clone(&self.state)).layer(TraceLayer::new_for_http());

        if self.config.cors_enabled {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([header::CONTENT_TYPE]),
            )
        } else {
            router
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Client operations
        .route("/createdb", post(handle_create_db))
        .route("/dropdb", post(handle_drop_db))
        .route("/createtable", post(handle_create_table))
        .route("/insert", post(handle_insert))
        .route("/select", get(handle_select))
        .route("/update", post(handle_update))
        .route("/delete", post(handle_delete))
        // Replica replay
        .route("/replicate/db", get(handle_replicate_db))
        .route("/replicate/dropdb", get(handle_replicate_drop_db))
        .route("/replicate/table", get(handle_replicate_table))
        .route("/replicate/insert", post(handle_replicate_insert))
        .route("/replicate/update", post(handle_replicate_update))
        .route("/replicate/delete", post(handle_replicate_delete))
        // Cluster
        .route("/ping", get(handle_ping))
        .route("/health", get(handle_health))
        .route("/nodes", get(handle_nodes))
        .route("/is-writer", get(handle_is_writer))
        .route("/stats", get(handle_stats))
        .with_state(state)
}

// ============ Request/Response Types ============

/// Database name query
#[derive(Debug, Deserialize)]
pub struct DatabaseParams {
    #[serde(default)]
    pub name: String,
}

/// Table creation query
#[derive(Debug, Deserialize)]
pub struct TableParams {
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub table: String,
    pub schema: Option<String>,
}

/// Optional body of a table creation request
#[derive(Debug, Default, Deserialize)]
pub struct CreateTableBody {
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// Select query
#[derive(Debug, Deserialize)]
pub struct SelectParams {
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub table: String,
}

/// Insert request: raw `values` or a `records` map
#[derive(Debug, Deserialize, Serialize)]
pub struct InsertRequest {
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Update request
#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub set: String,
    #[serde(default, rename = "where")]
    pub predicate: String,
}

/// Delete request
#[derive(Debug, Deserialize, Serialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub table: String,
    #[serde(default, rename = "where")]
    pub predicate: String,
}

/// Success response
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Roster response
#[derive(Debug, Serialize, Deserialize)]
pub struct NodesResponse {
    pub node_id: String,
    pub address: String,
    pub writer: String,
    pub replicas: Vec<String>,
    pub is_writer: bool,
    pub election_in_progress: bool,
    pub election_state: Option<ElectionState>,
}

/// Writer flag response
#[derive(Debug, Serialize, Deserialize)]
pub struct IsWriterResponse {
    pub is_writer: bool,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub is_writer: bool,
}

/// Stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub node_id: String,
    pub role: String,
    pub uptime_seconds: u64,
    pub replication: StatsSnapshot,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidRequest(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::NotWriter { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

// ============ Translation ============

fn insert_statement(req: &InsertRequest) -> Result<Statement> {
    match (&req.values, &req.records) {
        (Some(values), _) if !values.is_empty() => {
            statements::insert_values(&req.dbname, &req.table, values)
        }
        (_, Some(records)) if !records.is_empty() => {
            statements::insert_records(&req.dbname, &req.table, records)
        }
        _ => {
            statements::validate_identifier("database name", &req.dbname)?;
            statements::validate_identifier("table name", &req.table)?;
            Err(Error::InvalidRequest("Either 'values' or 'records' is required".into()))
        }
    }
}

fn table_spec(params: &TableParams, body: &Bytes) -> Result<TableSpec> {
    let body: CreateTableBody = if body.is_empty() {
        CreateTableBody::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| Error::InvalidRequest(format!("Invalid request body: {}", e)))?
    };

    if !body.columns.is_empty() {
        return Ok(TableSpec::Columns(body.columns));
    }
    match &params.schema {
        Some(schema) if !schema.is_empty() => Ok(TableSpec::Schema(schema.clone())),
        _ => Err(Error::InvalidRequest(
            "Either columns in request body or schema parameter is required".into(),
        )),
    }
}

// ============ Client Handlers ============

/// Refuse mutations on a node that is not the writer
async fn ensure_writer(state: &AppState) -> Result<()> {
    let (writer, is_writer) = state.roster.writer_view().await;
    if is_writer {
        Ok(())
    } else {
        Err(Error::NotWriter { writer })
    }
}

/// Apply locally, then hand off to the dispatcher without waiting
async fn apply_and_replicate(
    state: &AppState,
    statement: &Statement,
    payload: ReplicationPayload,
) -> Result<()> {
    state.storage.execute(statement).await?;
    let handle = state.dispatcher.replicate(payload);
    tracing::debug!(
        operation = %handle.operation_id(),
        "Applied locally, replicating to {} replicas",
        handle.len()
    );
    Ok(())
}

async fn handle_create_db(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DatabaseParams>,
) -> Result<Json<MessageResponse>> {
    ensure_writer(&state).await?;
    let statement = statements::create_database(&params.name)?;
    let payload = ReplicationPayload::get(
        OperationKind::CreateDatabase,
        vec![("name".to_string(), params.name)],
    );
    apply_and_replicate(&state, &statement, payload).await?;
    Ok(message("Database created successfully"))
}

async fn handle_drop_db(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DatabaseParams>,
) -> Result<Json<MessageResponse>> {
    ensure_writer(&state).await?;
    let statement = statements::drop_database(&params.name)?;
    let payload = ReplicationPayload::get(
        OperationKind::DropDatabase,
        vec![("name".to_string(), params.name)],
    );
    apply_and_replicate(&state, &statement, payload).await?;
    Ok(message("Database dropped successfully"))
}

async fn handle_create_table(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TableParams>,
    body: Bytes,
) -> Result<Json<MessageResponse>> {
    ensure_writer(&state).await?;
    let spec = table_spec(&params, &body)?;
    let (statement, schema) = statements::create_table(&params.dbname, &params.table, &spec)?;
    let payload = ReplicationPayload::get(
        OperationKind::CreateTable,
        vec![
            ("dbname".to_string(), params.dbname),
            ("table".to_string(), params.table),
            ("schema".to_string(), schema),
        ],
    );
    apply_and_replicate(&state, &statement, payload).await?;
    Ok(message("Table created successfully"))
}

async fn handle_insert(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<InsertRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = body?;
    ensure_writer(&state).await?;
    let statement = insert_statement(&req)?;
    let payload = ReplicationPayload::post_json(OperationKind::Insert, &req)?;
    apply_and_replicate(&state, &statement, payload).await?;
    Ok(message("Record inserted successfully"))
}

async fn handle_select(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SelectParams>,
) -> Result<Json<Vec<Row>>> {
    let statement = statements::select_all(&params.dbname, &params.table)?;
    let rows = state.storage.query(&statement).await?;
    Ok(Json(rows))
}

async fn handle_update(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = body?;
    ensure_writer(&state).await?;
    let statement = statements::update(&req.dbname, &req.table, &req.set, &req.predicate)?;
    let payload = ReplicationPayload::post_json(OperationKind::Update, &req)?;
    apply_and_replicate(&state, &statement, payload).await?;
    Ok(message("Record updated successfully"))
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = body?;
    ensure_writer(&state).await?;
    let statement = statements::delete(&req.dbname, &req.table, &req.predicate)?;
    let payload = ReplicationPayload::post_json(OperationKind::Delete, &req)?;
    apply_and_replicate(&state, &statement, payload).await?;
    Ok(message("Record deleted successfully"))
}

// ============ Replica Handlers ============

async fn apply_replayed(
    state: &AppState,
    kind: OperationKind,
    statement: Statement,
) -> Result<Json<MessageResponse>> {
    state.storage.execute(&statement).await?;
    tracing::debug!("Applied replicated {}", kind);
    Ok(message("Replicated successfully"))
}

async fn handle_replicate_db(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DatabaseParams>,
) -> Result<Json<MessageResponse>> {
    let statement = statements::create_database(&params.name)?;
    apply_replayed(&state, OperationKind::CreateDatabase, statement).await
}

async fn handle_replicate_drop_db(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DatabaseParams>,
) -> Result<Json<MessageResponse>> {
    let statement = statements::drop_database(&params.name)?;
    apply_replayed(&state, OperationKind::DropDatabase, statement).await
}

async fn handle_replicate_table(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TableParams>,
) -> Result<Json<MessageResponse>> {
    let spec = TableSpec::Schema(params.schema.clone().unwrap_or_default());
    let (statement, _) = statements::create_table(&params.dbname, &params.table, &spec)?;
    apply_replayed(&state, OperationKind::CreateTable, statement).await
}

async fn handle_replicate_insert(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<InsertRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = body?;
    let statement = insert_statement(&req)?;
    apply_replayed(&state, OperationKind::Insert, statement).await
}

async fn handle_replicate_update(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = body?;
    let statement = statements::update(&req.dbname, &req.table, &req.set, &req.predicate)?;
    apply_replayed(&state, OperationKind::Update, statement).await
}

async fn handle_replicate_delete(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = body?;
    let statement = statements::delete(&req.dbname, &req.table, &req.predicate)?;
    apply_replayed(&state, OperationKind::Delete, statement).await
}

// ============ Cluster Handlers ============

async fn handle_ping() -> &'static str {
    "pong"
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = match state.storage.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            tracing::warn!("Storage health check failed: {}", e);
            false
        }
    };
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(HealthResponse {
            healthy,
            node_id: state.node_id.clone(),
            is_writer: state.roster.is_writer().await,
        }),
    )
}

async fn handle_nodes(State(state): State<Arc<AppState>>) -> Json<NodesResponse> {
    let snapshot = state.roster.snapshot().await;
    let election_state = match &state.coordinator {
        Some(coordinator) => Some(coordinator.state().await),
        None => None,
    };

    Json(NodesResponse {
        node_id: state.node_id.clone(),
        address: snapshot.self_address,
        writer: snapshot.writer_address,
        replicas: snapshot.replicas,
        is_writer: snapshot.self_is_writer,
        election_in_progress: snapshot.election_in_progress,
        election_state,
    })
}

async fn handle_is_writer(State(state): State<Arc<AppState>>) -> Json<IsWriterResponse> {
    Json(IsWriterResponse {
        is_writer: state.roster.is_writer().await,
    })
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let role = state.roster.snapshot().await.role();
    let uptime = chrono::Utc::now() - state.started_at;

    Json(StatsResponse {
        node_id: state.node_id.clone(),
        role: role.to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        replication: state.dispatcher.stats(),
    })
}
