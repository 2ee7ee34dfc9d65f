//! The finished audit: run, rollups, narrative, and its Markdown rendering.

use crate::aggregate::{RunTotals, SchemaRollup};
use crate::models::{AnalysisRun, Suitability, TableResult};
use crate::summary::NarrativeSummary;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Everything a presentation layer needs, computed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub run: AnalysisRun,
    pub totals: RunTotals,
    pub schemas: Vec<SchemaRollup>,
    pub summary: NarrativeSummary,
}

impl AuditReport {
    pub fn assemble(run: AnalysisRun, summary: NarrativeSummary) -> Self {
        Self {
            totals: run.totals(),
            schemas: run.schema_rollups(),
            run,
            summary,
        }
    }
}

fn bullet_section(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "**{}:**", heading);
    for item in items {
        let _ = writeln!(out, "  - {}", item);
    }
}

/// Continues a blockquote across every line of `text`.
fn quoted(text: &str) -> String {
    text.trim().lines().collect::<Vec<_>>().join("\n> ")
}

fn render_table(out: &mut String, result: &TableResult) {
    let verdict = &result.verdict;
    let _ = writeln!(
        out,
        "### {} {}\n",
        verdict.suitable.icon(),
        result.qualified_name()
    );

    if let Some(ref error) = verdict.error {
        let _ = writeln!(out, "Analysis error: {}\n", error);
        return;
    }

    let suitable = match verdict.suitable {
        Suitability::Suitable => "true",
        Suitability::NotSuitable => "false",
        Suitability::Unknown => "unknown",
    };
    let _ = writeln!(out, "- **Suitable:** {}", suitable);
    let _ = writeln!(out, "- **Target:** {}", verdict.target.as_str());
    let _ = writeln!(
        out,
        "- **Clustering:** {}",
        result.clustering_key.as_deref().unwrap_or("None")
    );
    out.push('\n');

    bullet_section(out, "🚫 Blockers", &verdict.blockers);
    bullet_section(out, "⚠️ Feature Loss", &verdict.feature_loss);
    bullet_section(out, "Warnings", &verdict.warnings);

    if !verdict.recommendation.is_empty() {
        let _ = writeln!(
            out,
            "\n> **Recommendation:** {}",
            quoted(&verdict.recommendation)
        );
    }
    out.push('\n');
}

/// Renders the report as Markdown.
pub fn render_markdown(report: &AuditReport) -> String {
    let run = &report.run;
    let mut out = String::new();

    let _ = writeln!(out, "# 🧊 Iceberg Readiness Audit: {}\n", run.database);
    let _ = writeln!(
        out,
        "Model `{}`, rules `{}`, finished {}\n",
        run.model,
        run.ruleset,
        run.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(ref schema) = run.schema_filter {
        let _ = writeln!(out, "Schema filter: `{}`\n", schema);
    }

    let _ = writeln!(out, "## 📊 Summary\n");
    let _ = writeln!(out, "- ✅ Suitable: {}", report.totals.suitable);
    let _ = writeln!(out, "- ❌ Not Suitable: {}", report.totals.unsuitable);
    let _ = writeln!(out, "- ⚠️ Unknown: {}\n", report.totals.unknown);

    let _ = writeln!(out, "## 📁 Schema Overview\n");
    for rollup in &report.schemas {
        let _ = writeln!(
            out,
            "- **{}**: {}/{} tables suitable ({:.0}%)",
            rollup.schema,
            rollup.suitable_count,
            rollup.total_count,
            rollup.suitable_percentage()
        );
    }
    out.push('\n');

    let _ = writeln!(out, "## 📝 Executive Summary\n");
    match &report.summary {
        NarrativeSummary::Generated { text } => {
            let _ = writeln!(out, "{}\n", text.trim());
        }
        NarrativeSummary::Unavailable { warning } => {
            let _ = writeln!(out, "> ⚠️ {}\n", quoted(warning));
        }
    }

    let _ = writeln!(out, "## 📋 Detailed Results\n");
    for result in &run.results {
        render_table(&mut out, result);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Target, Verdict};
    use chrono::Utc;
    use uuid::Uuid;

    fn run(results: Vec<TableResult>) -> AnalysisRun {
        AnalysisRun {
            id: Uuid::new_v4(),
            database: "DB1".to_string(),
            schema_filter: None,
            model: "mistral-large2".to_string(),
            ruleset: "iceberg-rules-v1+abc".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            results,
        }
    }

    fn unsuitable() -> TableResult {
        TableResult {
            schema: "A".to_string(),
            table: "T1".to_string(),
            clustering_key: Some("C1".to_string()),
            verdict: Verdict {
                suitable: Suitability::NotSuitable,
                target: Target::Managed,
                blockers: vec!["GEOMETRY column X".to_string()],
                recommendation: "Convert X to WKB".to_string(),
                ..Verdict::default()
            },
        }
    }

    fn failed() -> TableResult {
        TableResult {
            schema: "B".to_string(),
            table: "T2".to_string(),
            clustering_key: None,
            verdict: Verdict::failed("Backend error: timed out"),
        }
    }

    #[test]
    fn test_assemble_computes_rollups() {
        let report = AuditReport::assemble(
            run(vec![unsuitable(), failed()]),
            NarrativeSummary::Generated {
                text: "ok".to_string(),
            },
        );

        assert_eq!(report.totals.total, 2);
        assert_eq!(report.totals.unknown, 1);
        assert_eq!(report.schemas.len(), 2);
    }

    #[test]
    fn test_markdown_contains_sections() {
        let report = AuditReport::assemble(
            run(vec![unsuitable(), failed()]),
            NarrativeSummary::Generated {
                text: "Half the tables need work.".to_string(),
            },
        );
        let md = render_markdown(&report);

        assert!(md.contains("# 🧊 Iceberg Readiness Audit: DB1"));
        assert!(md.contains("- ❌ Not Suitable: 1"));
        assert!(md.contains("- **A**: 0/1 tables suitable (0%)"));
        assert!(md.contains("Half the tables need work."));
        assert!(md.contains("### ❌ A.T1"));
        assert!(md.contains("- **Clustering:** C1"));
        assert!(md.contains("  - GEOMETRY column X"));
        assert!(md.contains("**Recommendation:** Convert X to WKB"));
        assert!(md.contains("### ⚠️ B.T2"));
        assert!(md.contains("Analysis error: Backend error: timed out"));
    }

    #[test]
    fn test_multiline_recommendation_stays_quoted() {
        let fallback = TableResult {
            schema: "C".to_string(),
            table: "T3".to_string(),
            clustering_key: None,
            verdict: Verdict::fallback("Looks mostly fine.\n\nConsider:\n- partitioning by day"),
        };
        let md = render_markdown(&AuditReport::assemble(
            run(vec![fallback]),
            NarrativeSummary::Generated {
                text: "ok".to_string(),
            },
        ));

        assert!(md.contains(
            "> **Recommendation:** Looks mostly fine.\n> \n> Consider:\n> - partitioning by day\n"
        ));
    }

    #[test]
    fn test_markdown_shows_summary_warning() {
        let report = AuditReport::assemble(
            run(vec![unsuitable()]),
            NarrativeSummary::Unavailable {
                warning: "Could not generate summary: Backend error: down".to_string(),
            },
        );
        let md = render_markdown(&report);

        assert!(md.contains("> ⚠️ Could not generate summary"));
        assert!(md.contains("### ❌ A.T1"));
    }
}
