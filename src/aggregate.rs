//! Rollups of verdicts. Pure sums, so result order never matters.

use crate::models::{AnalysisRun, Suitability, TableResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Verdict counts over a set of tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub suitable: usize,
    pub unsuitable: usize,
    /// Neither suitable nor unsuitable: fallback and error verdicts.
    pub unknown: usize,
    pub total: usize,
}

impl RunTotals {
    fn add(&mut self, result: &TableResult) {
        self.total += 1;
        match result.verdict.suitable {
            Suitability::Suitable => self.suitable += 1,
            Suitability::NotSuitable => self.unsuitable += 1,
            Suitability::Unknown => self.unknown += 1,
        }
    }
}

/// Per-schema counts, recomputed from a run on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRollup {
    pub schema: String,
    pub suitable_count: usize,
    pub unsuitable_count: usize,
    pub total_count: usize,
}

impl SchemaRollup {
    pub fn unknown_count(&self) -> usize {
        self.total_count - self.suitable_count - self.unsuitable_count
    }

    /// Share of suitable tables in percent; 0 for an empty schema.
    pub fn suitable_percentage(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.suitable_count as f64 / self.total_count as f64 * 100.0
        }
    }
}

pub fn run_totals(results: &[TableResult]) -> RunTotals {
    let mut totals = RunTotals::default();
    for result in results {
        totals.add(result);
    }
    totals
}

/// One rollup per distinct schema, sorted by schema name.
pub fn schema_rollups(results: &[TableResult]) -> Vec<SchemaRollup> {
    let mut by_schema: BTreeMap<&str, RunTotals> = BTreeMap::new();
    for result in results {
        by_schema.entry(result.schema.as_str()).or_default().add(result);
    }

    by_schema
        .into_iter()
        .map(|(schema, totals)| SchemaRollup {
            schema: schema.to_string(),
            suitable_count: totals.suitable,
            unsuitable_count: totals.unsuitable,
            total_count: totals.total,
        })
        .collect()
}

impl AnalysisRun {
    pub fn totals(&self) -> RunTotals {
        run_totals(&self.results)
    }

    pub fn schema_rollups(&self) -> Vec<SchemaRollup> {
        schema_rollups(&self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;

    fn result(schema: &str, table: &str, suitable: Suitability) -> TableResult {
        TableResult {
            schema: schema.to_string(),
            table: table.to_string(),
            clustering_key: None,
            verdict: Verdict {
                suitable,
                ..Verdict::default()
            },
        }
    }

    #[test]
    fn test_totals_count_each_state() {
        let results = vec![
            result("A", "t1", Suitability::Suitable),
            result("A", "t2", Suitability::NotSuitable),
            result("B", "t3", Suitability::Unknown),
            result("B", "t4", Suitability::Suitable),
        ];

        assert_eq!(
            run_totals(&results),
            RunTotals {
                suitable: 2,
                unsuitable: 1,
                unknown: 1,
                total: 4
            }
        );
    }

    #[test]
    fn test_rollups_per_schema() {
        let results = vec![
            result("B", "t2", Suitability::Suitable),
            result("A", "t1", Suitability::NotSuitable),
        ];

        let rollups = schema_rollups(&results);
        assert_eq!(rollups.len(), 2);
        assert_eq!(rollups[0].schema, "A");
        assert_eq!(rollups[0].suitable_percentage(), 0.0);
        assert_eq!(rollups[1].schema, "B");
        assert_eq!(rollups[1].suitable_percentage(), 100.0);
    }

    #[test]
    fn test_error_verdicts_count_as_unknown() {
        let failed = TableResult {
            schema: "A".to_string(),
            table: "t1".to_string(),
            clustering_key: None,
            verdict: Verdict::failed("timeout"),
        };

        let rollups = schema_rollups(&[failed]);
        assert_eq!(rollups[0].unknown_count(), 1);
        assert_eq!(rollups[0].suitable_percentage(), 0.0);
    }

    #[test]
    fn test_empty_schema_percentage_is_zero() {
        let empty = SchemaRollup {
            schema: "empty".to_string(),
            suitable_count: 0,
            unsuitable_count: 0,
            total_count: 0,
        };
        assert_eq!(empty.suitable_percentage(), 0.0);
        assert!(schema_rollups(&[]).is_empty());
    }

    #[test]
    fn test_rollups_ignore_order() {
        let mut results = vec![
            result("A", "t1", Suitability::Suitable),
            result("B", "t2", Suitability::NotSuitable),
            result("A", "t3", Suitability::Unknown),
        ];
        let forward = schema_rollups(&results);
        results.reverse();

        assert_eq!(forward, schema_rollups(&results));
    }
}
