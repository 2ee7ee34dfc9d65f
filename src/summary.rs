//! Executive summary of a finished run, written by the backend.

use crate::backend::CompletionBackend;
use crate::errors::AppError;
use crate::models::{AnalysisRun, Suitability, TableResult};
use serde::{Deserialize, Serialize};

/// Summary text, or the reason it could not be produced. A failed summary
/// never affects the per-table results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NarrativeSummary {
    Generated { text: String },
    Unavailable { warning: String },
}

impl NarrativeSummary {
    pub fn text(&self) -> Option<&str> {
        match self {
            NarrativeSummary::Generated { text } => Some(text),
            NarrativeSummary::Unavailable { .. } => None,
        }
    }
}

/// `schema.table: suitable|not suitable[ (blockers: a, b)]`
pub fn table_summary_line(result: &TableResult) -> String {
    let status = match result.verdict.suitable {
        Suitability::Suitable => "suitable",
        _ => "not suitable",
    };
    let blockers = &result.verdict.blockers;
    let blocker_text = if blockers.is_empty() {
        String::new()
    } else {
        format!(" (blockers: {})", blockers.join(", "))
    };

    format!("{}.{}: {}{}", result.schema, result.table, status, blocker_text)
}

pub fn build_summary_prompt(database: &str, run: &AnalysisRun) -> String {
    let all_summaries = run
        .results
        .iter()
        .map(table_summary_line)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Summarize the Iceberg migration readiness assessment for the {database} database.\n\
         Do not escape underscores or use backslashes in table names.\n\
         Write a brief section on each of these. Be specific.\n\
         1. Overall readiness (how many tables are suitable vs not)\n\
         2. Common blockers or issues found across tables\n\
         3. Key recommendations for the migration\n\
         \n\
         Table assessments:\n\
         {all_summaries}\n\
         \n\
         Write in a professional tone suitable for a technical report.",
    )
}

/// Drops every backslash; the backend tends to escape underscores anyway.
pub fn strip_backslashes(text: &str) -> String {
    text.replace('\\', "")
}

pub async fn generate_summary(
    backend: &dyn CompletionBackend,
    model: &str,
    run: &AnalysisRun,
) -> Result<String, AppError> {
    let prompt = build_summary_prompt(&run.database, run);
    let text = backend.complete(model, &prompt).await?;
    Ok(strip_backslashes(&text))
}

/// Like [`generate_summary`], downgrading failure to a warning.
pub async fn summarize_run(
    backend: &dyn CompletionBackend,
    model: &str,
    run: &AnalysisRun,
) -> NarrativeSummary {
    match generate_summary(backend, model, run).await {
        Ok(text) => NarrativeSummary::Generated { text },
        Err(e) => {
            tracing::warn!("Could not generate summary for {}: {}", run.database, e);
            NarrativeSummary::Unavailable {
                warning: format!("Could not generate summary: {}", e),
            }
        }
    }
}
