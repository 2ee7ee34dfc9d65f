//! Per-table assessment pipeline and the run driver around it.
//!
//! Each table goes request builder -> backend -> parser independently. A
//! table whose request fails gets an error verdict; the run carries on.

use crate::backend::CompletionBackend;
use crate::errors::AppError;
use crate::models::{AnalysisRun, Progress, TableDescriptor, TableResult, Verdict};
use crate::parser::{decode_verdict, Decoded};
use crate::prompt::{build_assessment_prompt, ruleset_fingerprint};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Upper bound for the wait between two attempts on one table.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Backoff before retry number `attempt + 1`: `base * 2^attempt`, capped.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_RETRY_DELAY)
}

/// Knobs for one analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Model identifier passed with every request.
    pub model: String,
    /// Tables assessed at once. 1 means strictly sequential.
    pub concurrency: usize,
    /// Extra attempts per table after a backend error.
    pub retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_base_delay: Duration,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            model: "mistral-large2".to_string(),
            concurrency: 1,
            retries: 0,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// What the run driver hands back.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(AnalysisRun),
    /// The run was abandoned; whatever finished before is returned as one
    /// unit so the caller can drop it.
    Cancelled { partial: Vec<TableResult> },
}

/// Identifies one run request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub id: Uuid,
    pub database: String,
    pub schema_filter: Option<String>,
    pub tables: Arc<Vec<TableDescriptor>>,
}

pub struct Analyzer {
    backend: Arc<dyn CompletionBackend>,
    settings: AnalysisSettings,
}

impl Analyzer {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: AnalysisSettings) -> Self {
        Self { backend, settings }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn backend(&self) -> &dyn CompletionBackend {
        self.backend.as_ref()
    }

    /// Builds the request, submits it (retrying backend errors as
    /// configured), and decodes the answer.
    pub async fn assess(&self, table: &TableDescriptor) -> Result<Decoded, AppError> {
        let prompt = build_assessment_prompt(table);
        let mut attempt: u32 = 0;

        loop {
            match self.backend.complete(&self.settings.model, &prompt).await {
                Ok(raw) => return Ok(decode_verdict(&raw)),
                Err(e) if attempt < self.settings.retries => {
                    let delay = retry_delay(self.settings.retry_base_delay, attempt);
                    tracing::warn!(
                        "Assessment of {} failed (attempt {}): {}; retrying in {:?}",
                        table.qualified_name(),
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Assesses one table. Never fails: backend errors become error verdicts.
    pub async fn analyze_table(&self, table: &TableDescriptor) -> TableResult {
        let verdict = match self.assess(table).await {
            Ok(Decoded::Structured(verdict)) => verdict,
            Ok(Decoded::Fallback(verdict)) => {
                tracing::warn!("Unstructured verdict for {}", table.qualified_name());
                verdict
            }
            Err(e) => {
                tracing::error!("Assessment of {} failed: {}", table.qualified_name(), e);
                Verdict::failed(e.to_string())
            }
        };

        tracing::debug!(
            "{} -> suitable={:?} target={}",
            table.qualified_name(),
            verdict.suitable,
            verdict.target.as_str()
        );
        TableResult::new(table, verdict)
    }

    /// Lazily assesses `tables`, yielding `(index, result)` in completion
    /// order with at most `concurrency` requests in flight.
    pub fn results<'a>(
        &'a self,
        tables: &'a [TableDescriptor],
    ) -> impl Stream<Item = (usize, TableResult)> + 'a {
        stream::iter(tables.iter().enumerate())
            .map(move |(idx, table)| async move { (idx, self.analyze_table(table).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
    }

    /// Runs every table of the request, reporting progress as each finishes.
    ///
    /// Results keep the input order regardless of completion order.
    pub async fn run(
        &self,
        request: &RunRequest,
        on_progress: &(dyn Fn(&Progress) + Send + Sync),
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let started_at = Utc::now();
        let total = request.tables.len();
        tracing::info!(
            "Analyzing {} tables of {} (run {}, concurrency {})",
            total,
            request.database,
            request.id,
            self.settings.concurrency.max(1)
        );

        let mut slots: Vec<Option<TableResult>> = vec![None; total];
        let mut completed = 0;
        let mut cancelled = false;

        let results = self.results(&request.tables);
        tokio::pin!(results);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = results.next() => match next {
                    Some((idx, result)) => {
                        completed += 1;
                        on_progress(&Progress {
                            completed,
                            total,
                            current_table: result.qualified_name(),
                        });
                        slots[idx] = Some(result);
                    }
                    None => break,
                }
            }
        }

        let results: Vec<TableResult> = slots.into_iter().flatten().collect();

        if cancelled {
            tracing::info!(
                "Run {} cancelled after {}/{} tables",
                request.id,
                results.len(),
                total
            );
            return RunOutcome::Cancelled { partial: results };
        }

        tracing::info!("Run {} complete: {} tables analyzed", request.id, results.len());
        RunOutcome::Completed(AnalysisRun {
            id: request.id,
            database: request.database.clone(),
            schema_filter: request.schema_filter.clone(),
            model: self.settings.model.clone(),
            ruleset: ruleset_fingerprint(),
            started_at,
            finished_at: Utc::now(),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDescriptor, Suitability};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` calls, then answers with a suitable verdict.
    struct FlakyBackend {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for FlakyBackend {
        async fn complete(&self, _model: &str, _prompt: &str) -> Result<String, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(AppError::BackendError("quota exceeded".to_string()))
            } else {
                Ok(r#"{"suitable": true, "target": "MANAGED"}"#.to_string())
            }
        }
    }

    fn flaky(failures: usize) -> Arc<FlakyBackend> {
        Arc::new(FlakyBackend {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn table(name: &str) -> TableDescriptor {
        TableDescriptor {
            schema_name: "public".to_string(),
            table_name: name.to_string(),
            is_transient: false,
            clustering_key: None,
            columns: vec![ColumnDescriptor::new("id", "integer")],
        }
    }

    fn settings(retries: u32) -> AnalysisSettings {
        AnalysisSettings {
            retries,
            retry_base_delay: Duration::from_millis(1),
            ..AnalysisSettings::default()
        }
    }

    fn request(tables: Vec<TableDescriptor>) -> RunRequest {
        RunRequest {
            id: Uuid::new_v4(),
            database: "DB1".to_string(),
            schema_filter: None,
            tables: Arc::new(tables),
        }
    }

    #[tokio::test]
    async fn test_backend_error_becomes_error_verdict() {
        let analyzer = Analyzer::new(flaky(1), settings(0));

        let result = analyzer.analyze_table(&table("t1")).await;

        assert_eq!(result.verdict.suitable, Suitability::Unknown);
        assert!(result.verdict.error.as_deref().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_retries_recover_from_backend_error() {
        let backend = flaky(2);
        let analyzer = Analyzer::new(backend.clone(), settings(2));

        let result = analyzer.analyze_table(&table("t1")).await;

        assert_eq!(result.verdict.suitable, Suitability::Suitable);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_many_retries_exhaust_without_overflow() {
        let backend = flaky(usize::MAX);
        let analyzer = Analyzer::new(
            backend.clone(),
            AnalysisSettings {
                retries: 40,
                retry_base_delay: Duration::ZERO,
                ..AnalysisSettings::default()
            },
        );

        let result = analyzer.analyze_table(&table("t1")).await;

        assert_eq!(result.verdict.suitable, Suitability::Unknown);
        assert!(result.verdict.error.is_some());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn test_retry_delay_doubles_then_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 0), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(4));
        assert_eq!(retry_delay(base, 6), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(base, 40), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(Duration::MAX, 1), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_run_reports_progress_for_every_table() {
        let analyzer = Analyzer::new(flaky(0), settings(0));
        let seen = Mutex::new(Vec::new());
        let on_progress = |p: &Progress| seen.lock().unwrap().push(p.completed);

        let outcome = analyzer
            .run(
                &request(vec![table("t1"), table("t2"), table("t3")]),
                &on_progress,
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            RunOutcome::Completed(run) => {
                assert_eq!(run.results.len(), 3);
                assert_eq!(run.database, "DB1");
                assert_eq!(run.ruleset, ruleset_fingerprint());
            }
            other => panic!("expected completed run, got {:?}", other),
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_returns_nothing() {
        let analyzer = Analyzer::new(flaky(0), settings(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = analyzer
            .run(&request(vec![table("t1")]), &|_| {}, &cancel)
            .await;

        match outcome {
            RunOutcome::Cancelled { partial } => assert!(partial.is_empty()),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_table_set_completes() {
        let analyzer = Analyzer::new(flaky(0), settings(0));

        let outcome = analyzer
            .run(&request(Vec::new()), &|_| {}, &CancellationToken::new())
            .await;

        assert!(matches!(outcome, RunOutcome::Completed(run) if run.results.is_empty()));
    }
}
