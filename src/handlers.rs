use crate::config::Config;
use crate::errors::AppError;
use crate::models::{filter_by_schema, schema_names, Progress, TableDescriptor};
use crate::report::{render_markdown, AuditReport};
use crate::session::{Auditor, Phase, RunState};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Catalog, analyzer and summarizer.
    pub auditor: Arc<Auditor>,
    /// The session's report state. Handlers are its only writers.
    pub session: Arc<Mutex<RunState>>,
}

impl AppState {
    pub fn new(config: Config, auditor: Auditor) -> Self {
        Self {
            config,
            auditor: Arc::new(auditor),
            session: Arc::new(Mutex::new(RunState::default())),
        }
    }
}

/// The session API, without middleware. Callers add rate limiting and
/// tracing on top.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/databases", get(list_databases))
        .route("/api/v1/session", get(get_session))
        .route("/api/v1/session/database", post(select_database))
        .route("/api/v1/session/tables", get(list_tables))
        .route(
            "/api/v1/session/analyze",
            post(start_analysis).delete(cancel_analysis),
        )
        .route("/api/v1/session/progress", get(get_progress))
        .route("/api/v1/session/report", get(get_report))
        .route("/api/v1/session/report.md", get(get_report_markdown))
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "iceberg-audit",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/databases
pub async fn list_databases(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    let databases = state.auditor.list_databases().await?;
    Ok(Json(databases))
}

#[derive(Debug, Deserialize)]
pub struct SelectDatabaseRequest {
    pub database: String,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub phase: Phase,
    pub database: Option<String>,
    pub table_count: Option<usize>,
    pub schemas: Vec<String>,
    pub last_error: Option<String>,
    pub progress: Option<Progress>,
}

impl SessionView {
    fn of(run_state: &RunState) -> Self {
        let tables = run_state.tables();
        Self {
            phase: run_state.phase(),
            database: run_state.database().map(str::to_string),
            table_count: tables.map(|t| t.len()),
            schemas: tables.map(|t| schema_names(t)).unwrap_or_default(),
            last_error: run_state.last_error().map(str::to_string),
            progress: run_state.progress(),
        }
    }
}

/// GET /api/v1/session
pub async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    let session = state.session.lock().await;
    Json(SessionView::of(&session))
}

/// POST /api/v1/session/database
///
/// Selects a database and collects its metadata. A collection failure leaves
/// the session idle and is returned to the caller.
pub async fn select_database(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectDatabaseRequest>,
) -> Result<Json<SessionView>, AppError> {
    let database = body.database.trim().to_string();
    if database.is_empty() {
        return Err(AppError::BadRequest("database is required".to_string()));
    }

    {
        let mut session = state.session.lock().await;
        *session = session.select_database(&database);
    }
    tracing::info!("Database {} selected", database);

    let collected = state.auditor.collect(&database).await;

    let mut session = state.session.lock().await;
    match collected {
        Ok(tables) => {
            if tables.is_empty() {
                tracing::warn!("No base tables found in {}", database);
            }
            *session = session.metadata_loaded(&database, tables)?;
            Ok(Json(SessionView::of(&session)))
        }
        Err(e) => {
            // Only reset if no newer selection happened in the meantime
            if session.database() == Some(database.as_str()) {
                *session = session.collection_failed(&e);
            }
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TablesQuery {
    pub schema: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub database: String,
    pub schemas: Vec<String>,
    pub tables: Vec<TableDescriptor>,
}

/// GET /api/v1/session/tables?schema=
pub async fn list_tables(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TablesQuery>,
) -> Result<Json<TablesResponse>, AppError> {
    let session = state.session.lock().await;
    let (Some(database), Some(tables)) = (session.database(), session.tables()) else {
        return Err(AppError::InvalidState(
            "No table metadata loaded; select a database first".to_string(),
        ));
    };

    Ok(Json(TablesResponse {
        database: database.to_string(),
        schemas: schema_names(tables),
        tables: filter_by_schema(tables, params.schema.as_deref()),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    pub schema: Option<String>,
}

/// POST /api/v1/session/analyze
///
/// Starts a run in the background and returns immediately; poll
/// `/progress`, then fetch `/report`.
pub async fn start_analysis(
    State(state): State<Arc<AppState>>,
    body: Option<Json<AnalyzeRequest>>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let schema = body
        .and_then(|Json(b)| b.schema)
        .filter(|s| !s.trim().is_empty());

    let ticket = {
        let mut session = state.session.lock().await;
        let (next, ticket) = session.start_analysis(schema)?;
        *session = next;
        ticket
    };

    let run_id = ticket.request.id;
    let total = ticket.request.tables.len();
    let app = state.clone();

    tokio::spawn(async move {
        let Some(report) = app.auditor.execute(ticket).await else {
            return;
        };
        let mut session = app.session.lock().await;
        match session.complete(report) {
            Ok(next) => {
                *session = next;
                tracing::info!("Run {} stored", run_id);
            }
            Err(e) => tracing::info!("Discarding finished run {}: {}", run_id, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "run_id": run_id,
            "tables": total,
        })),
    ))
}

/// GET /api/v1/session/progress
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = state.session.lock().await;
    let progress = session
        .progress()
        .ok_or_else(|| AppError::InvalidState("No analysis in progress".to_string()))?;

    Ok(Json(json!({
        "completed": progress.completed,
        "total": progress.total,
        "current_table": progress.current_table,
        "fraction": progress.fraction(),
    })))
}

/// DELETE /api/v1/session/analyze
pub async fn cancel_analysis(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionView>, AppError> {
    let mut session = state.session.lock().await;
    *session = session.cancel()?;
    tracing::info!("Analysis cancelled");
    Ok(Json(SessionView::of(&session)))
}

async fn current_report(state: &AppState) -> Result<Arc<AuditReport>, AppError> {
    let session = state.session.lock().await;
    session
        .report()
        .cloned()
        .ok_or_else(|| AppError::InvalidState("No completed analysis in this session".to_string()))
}

/// GET /api/v1/session/report
pub async fn get_report(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AuditReport>, AppError> {
    let report = current_report(&state).await?;
    Ok(Json(report.as_ref().clone()))
}

/// GET /api/v1/session/report.md
pub async fn get_report_markdown(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let report = current_report(&state).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        render_markdown(&report),
    ))
}
