//! Report state: the one audit a session is working on.
//!
//! `RunState` is a plain value. Every transition borrows the current state
//! and returns the next one; the single owner decides whether to store it.
//! Nothing survives a new database selection.

use crate::analysis::{AnalysisSettings, Analyzer, RunOutcome, RunRequest};
use crate::backend::CompletionBackend;
use crate::catalog::Catalog;
use crate::errors::AppError;
use crate::models::{filter_by_schema, schema_names, Progress, TableDescriptor};
use crate::report::AuditReport;
use crate::summary::summarize_run;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    DatabaseSelected,
    MetadataLoaded,
    Analyzing,
    RunComplete,
}

#[derive(Debug, Clone)]
pub enum RunState {
    Idle {
        /// Collection failure that sent the session back here, if any.
        last_error: Option<String>,
    },
    DatabaseSelected {
        database: String,
    },
    MetadataLoaded {
        database: String,
        tables: Arc<Vec<TableDescriptor>>,
    },
    Analyzing {
        database: String,
        tables: Arc<Vec<TableDescriptor>>,
        run_id: Uuid,
        progress: watch::Receiver<Progress>,
        cancel: CancellationToken,
    },
    RunComplete {
        database: String,
        tables: Arc<Vec<TableDescriptor>>,
        report: Arc<AuditReport>,
    },
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Idle { last_error: None }
    }
}

/// Everything a run needs, handed out when analysis starts.
#[derive(Debug)]
pub struct AnalysisTicket {
    pub request: RunRequest,
    pub progress: watch::Sender<Progress>,
    pub cancel: CancellationToken,
}

impl RunState {
    pub fn phase(&self) -> Phase {
        match self {
            RunState::Idle { .. } => Phase::Idle,
            RunState::DatabaseSelected { .. } => Phase::DatabaseSelected,
            RunState::MetadataLoaded { .. } => Phase::MetadataLoaded,
            RunState::Analyzing { .. } => Phase::Analyzing,
            RunState::RunComplete { .. } => Phase::RunComplete,
        }
    }

    pub fn database(&self) -> Option<&str> {
        match self {
            RunState::Idle { .. } => None,
            RunState::DatabaseSelected { database }
            | RunState::MetadataLoaded { database, .. }
            | RunState::Analyzing { database, .. }
            | RunState::RunComplete { database, .. } => Some(database),
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            RunState::Idle { last_error } => last_error.as_deref(),
            _ => None,
        }
    }

    /// Collected tables, once metadata is loaded.
    pub fn tables(&self) -> Option<&Arc<Vec<TableDescriptor>>> {
        match self {
            RunState::MetadataLoaded { tables, .. }
            | RunState::Analyzing { tables, .. }
            | RunState::RunComplete { tables, .. } => Some(tables),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<Progress> {
        match self {
            RunState::Analyzing { progress, .. } => Some(progress.borrow().clone()),
            _ => None,
        }
    }

    pub fn subscribe_progress(&self) -> Option<watch::Receiver<Progress>> {
        match self {
            RunState::Analyzing { progress, .. } => Some(progress.clone()),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&Arc<AuditReport>> {
        match self {
            RunState::RunComplete { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Picks a database from any phase. An in-flight run is cancelled and
    /// any finished run is discarded.
    pub fn select_database(&self, database: &str) -> RunState {
        if let RunState::Analyzing { cancel, run_id, .. } = self {
            tracing::info!("Abandoning run {} for new selection {}", run_id, database);
            cancel.cancel();
        }
        RunState::DatabaseSelected {
            database: database.to_string(),
        }
    }

    /// Collection for the selected database succeeded.
    pub fn metadata_loaded(
        &self,
        database: &str,
        tables: Vec<TableDescriptor>,
    ) -> Result<RunState, AppError> {
        match self {
            RunState::DatabaseSelected { database: selected } if selected == database => {
                Ok(RunState::MetadataLoaded {
                    database: database.to_string(),
                    tables: Arc::new(tables),
                })
            }
            _ => Err(AppError::InvalidState(format!(
                "Metadata for {} arrived while the session is {:?}",
                database,
                self.phase()
            ))),
        }
    }

    /// Collection failed; back to idle with the error kept for display.
    pub fn collection_failed(&self, error: &AppError) -> RunState {
        RunState::Idle {
            last_error: Some(error.to_string()),
        }
    }

    /// Starts analyzing the loaded tables, optionally one schema only.
    /// Allowed after metadata load or after a previous run, which is dropped.
    pub fn start_analysis(
        &self,
        schema_filter: Option<String>,
    ) -> Result<(RunState, AnalysisTicket), AppError> {
        let (database, tables) = match self {
            RunState::MetadataLoaded { database, tables }
            | RunState::RunComplete { database, tables, .. } => (database, tables),
            _ => {
                return Err(AppError::InvalidState(format!(
                    "Cannot start analysis while the session is {:?}",
                    self.phase()
                )))
            }
        };

        if let Some(ref schema) = schema_filter {
            if !schema_names(tables).contains(schema) {
                return Err(AppError::BadRequest(format!(
                    "Schema {} has no base tables in {}",
                    schema, database
                )));
            }
        }

        let selected = filter_by_schema(tables, schema_filter.as_deref());
        let run_id = Uuid::new_v4();
        let (progress_tx, progress_rx) = watch::channel(Progress {
            completed: 0,
            total: selected.len(),
            current_table: String::new(),
        });
        let cancel = CancellationToken::new();

        let next = RunState::Analyzing {
            database: database.clone(),
            tables: tables.clone(),
            run_id,
            progress: progress_rx,
            cancel: cancel.clone(),
        };
        let ticket = AnalysisTicket {
            request: RunRequest {
                id: run_id,
                database: database.clone(),
                schema_filter,
                tables: Arc::new(selected),
            },
            progress: progress_tx,
            cancel,
        };

        Ok((next, ticket))
    }

    /// Stores a finished run, provided it is still the one being waited on.
    pub fn complete(&self, report: AuditReport) -> Result<RunState, AppError> {
        match self {
            RunState::Analyzing {
                database,
                tables,
                run_id,
                ..
            } if *run_id == report.run.id => Ok(RunState::RunComplete {
                database: database.clone(),
                tables: tables.clone(),
                report: Arc::new(report),
            }),
            _ => Err(AppError::InvalidState(format!(
                "Run {} is no longer current",
                report.run.id
            ))),
        }
    }

    /// Abandons the in-flight run and returns to the loaded metadata.
    pub fn cancel(&self) -> Result<RunState, AppError> {
        match self {
            RunState::Analyzing {
                database,
                tables,
                cancel,
                ..
            } => {
                cancel.cancel();
                Ok(RunState::MetadataLoaded {
                    database: database.clone(),
                    tables: tables.clone(),
                })
            }
            _ => Err(AppError::InvalidState(format!(
                "No analysis to cancel while the session is {:?}",
                self.phase()
            ))),
        }
    }
}

/// Wires catalog, analyzer, and summarizer together for the session owner.
pub struct Auditor {
    catalog: Arc<dyn Catalog>,
    analyzer: Analyzer,
}

impl Auditor {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        backend: Arc<dyn CompletionBackend>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            catalog,
            analyzer: Analyzer::new(backend, settings),
        }
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub async fn list_databases(&self) -> Result<Vec<String>, AppError> {
        self.catalog.list_databases().await
    }

    /// Runs the collector for `database`.
    pub async fn collect(&self, database: &str) -> Result<Vec<TableDescriptor>, AppError> {
        self.catalog.list_tables(database).await
    }

    /// Selects and loads a database in one step, for owners that hold the
    /// state for the whole call.
    pub async fn load_database(&self, state: &RunState, database: &str) -> RunState {
        let selected = state.select_database(database);
        match self.collect(database).await {
            Ok(tables) => selected
                .metadata_loaded(database, tables)
                .unwrap_or_else(|e| selected.collection_failed(&e)),
            Err(e) => {
                tracing::error!("Metadata collection for {} failed: {}", database, e);
                selected.collection_failed(&e)
            }
        }
    }

    /// Runs the ticket to completion and builds the report, or returns `None`
    /// if the run was cancelled. The summary is requested once, here.
    pub async fn execute(&self, ticket: AnalysisTicket) -> Option<AuditReport> {
        let AnalysisTicket {
            request,
            progress,
            cancel,
        } = ticket;

        let on_progress = move |p: &Progress| {
            let _ = progress.send(p.clone());
        };

        match self.analyzer.run(&request, &on_progress, &cancel).await {
            RunOutcome::Completed(run) => {
                let summary =
                    summarize_run(self.analyzer.backend(), self.analyzer.model(), &run).await;
                Some(AuditReport::assemble(run, summary))
            }
            RunOutcome::Cancelled { partial } => {
                tracing::info!(
                    "Discarding {} partial results of run {}",
                    partial.len(),
                    request.id
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDescriptor;

    fn tables() -> Vec<TableDescriptor> {
        ["A", "B"]
            .iter()
            .map(|schema| TableDescriptor {
                schema_name: schema.to_string(),
                table_name: "T".to_string(),
                is_transient: false,
                clustering_key: None,
                columns: vec![ColumnDescriptor::new("id", "integer")],
            })
            .collect()
    }

    fn loaded() -> RunState {
        RunState::default()
            .select_database("DB1")
            .metadata_loaded("DB1", tables())
            .unwrap()
    }

    #[test]
    fn test_happy_path_phases() {
        let idle = RunState::default();
        assert_eq!(idle.phase(), Phase::Idle);

        let selected = idle.select_database("DB1");
        assert_eq!(selected.phase(), Phase::DatabaseSelected);
        assert_eq!(selected.database(), Some("DB1"));

        let loaded = selected.metadata_loaded("DB1", tables()).unwrap();
        assert_eq!(loaded.phase(), Phase::MetadataLoaded);
        assert_eq!(loaded.tables().unwrap().len(), 2);

        let (analyzing, ticket) = loaded.start_analysis(Some("A".to_string())).unwrap();
        assert_eq!(analyzing.phase(), Phase::Analyzing);
        assert_eq!(ticket.request.tables.len(), 1);
        assert_eq!(analyzing.progress().unwrap().total, 1);
    }

    #[test]
    fn test_metadata_for_other_database_is_rejected() {
        let selected = RunState::default().select_database("DB2");
        assert!(selected.metadata_loaded("DB1", tables()).is_err());
    }

    #[test]
    fn test_collection_failure_returns_to_idle() {
        let selected = RunState::default().select_database("DB1");
        let idle = selected.collection_failed(&AppError::CollectionError("down".to_string()));

        assert_eq!(idle.phase(), Phase::Idle);
        assert!(idle.last_error().unwrap().contains("down"));
    }

    #[test]
    fn test_analysis_requires_metadata() {
        let err = RunState::default().start_analysis(None).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn test_unknown_schema_filter_is_rejected() {
        let err = loaded().start_analysis(Some("Z".to_string())).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_new_selection_cancels_in_flight_run() {
        let (analyzing, ticket) = loaded().start_analysis(None).unwrap();

        let reselected = analyzing.select_database("DB2");

        assert!(ticket.cancel.is_cancelled());
        assert_eq!(reselected.phase(), Phase::DatabaseSelected);
        assert!(reselected.report().is_none());
    }

    #[test]
    fn test_cancel_returns_to_metadata_loaded() {
        let (analyzing, ticket) = loaded().start_analysis(None).unwrap();

        let back = analyzing.cancel().unwrap();

        assert!(ticket.cancel.is_cancelled());
        assert_eq!(back.phase(), Phase::MetadataLoaded);
        assert!(back.cancel().is_err());
    }
}
