use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============ Catalog Models ============

fn default_collation() -> String {
    "none".to_string()
}

/// One column of a base table, as reported by the catalog.
///
/// Serialized with the short keys the catalog query emits (`column`, `type`,
/// `collation`, `precision`); the same rendering is embedded in assessment
/// requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    #[serde(rename = "column")]
    pub name: String,
    /// Data type name. User-defined types report their underlying type name.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Collation name, `none` when the column has none.
    #[serde(default = "default_collation", deserialize_with = "collation_or_none")]
    pub collation: String,
    /// Fractional-seconds precision for date/time columns.
    #[serde(rename = "precision", default)]
    pub datetime_precision: Option<i64>,
}

fn collation_or_none<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_else(default_collation))
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            collation: default_collation(),
            datetime_precision: None,
        }
    }

    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = collation.into();
        self
    }

    pub fn with_precision(mut self, precision: i64) -> Self {
        self.datetime_precision = Some(precision);
        self
    }
}

/// Structural facts about one base table. Identity is `(schema_name, table_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema_name: String,
    pub table_name: String,
    /// Whether the table skips durability guarantees (unlogged).
    pub is_transient: bool,
    pub clustering_key: Option<String>,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    /// `schema.table` label used in progress updates and reports.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

/// Keeps only the descriptors of one schema; `None` keeps everything.
pub fn filter_by_schema(tables: &[TableDescriptor], schema: Option<&str>) -> Vec<TableDescriptor> {
    tables
        .iter()
        .filter(|t| schema.map_or(true, |s| t.schema_name == s))
        .cloned()
        .collect()
}

/// Distinct schema names, sorted.
pub fn schema_names(tables: &[TableDescriptor]) -> Vec<String> {
    let mut names: Vec<String> = tables.iter().map(|t| t.schema_name.clone()).collect();
    names.sort();
    names.dedup();
    names
}

// ============ Verdict Models ============

/// Tri-state suitability. Serialized as `true` / `false` / `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Suitability {
    Suitable,
    NotSuitable,
    #[default]
    Unknown,
}

impl From<Option<bool>> for Suitability {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Suitability::Suitable,
            Some(false) => Suitability::NotSuitable,
            None => Suitability::Unknown,
        }
    }
}

impl From<Suitability> for Option<bool> {
    fn from(value: Suitability) -> Self {
        match value {
            Suitability::Suitable => Some(true),
            Suitability::NotSuitable => Some(false),
            Suitability::Unknown => None,
        }
    }
}

impl Suitability {
    /// Report icon for the verdict.
    pub fn icon(&self) -> &'static str {
        match self {
            Suitability::Suitable => "✅",
            Suitability::NotSuitable => "❌",
            Suitability::Unknown => "⚠️",
        }
    }
}

/// Recommended migration target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Target {
    Managed,
    External,
    #[default]
    Unknown,
}

impl Target {
    /// Case-insensitive parse; anything but a single known target is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "MANAGED" => Target::Managed,
            "EXTERNAL" => Target::External,
            _ => Target::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Managed => "MANAGED",
            Target::External => "EXTERNAL",
            Target::Unknown => "UNKNOWN",
        }
    }
}

/// Assessment of one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verdict {
    pub suitable: Suitability,
    pub target: Target,
    pub blockers: Vec<String>,
    pub feature_loss: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Verdict {
    /// Verdict for output that could not be decoded; the text is kept as the
    /// recommendation so nothing the backend said is lost.
    pub fn fallback(raw_text: impl Into<String>) -> Self {
        Self {
            recommendation: raw_text.into(),
            ..Self::default()
        }
    }

    /// Verdict for a table whose assessment request failed outright.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

// ============ Run Models ============

/// Verdict for one table plus the descriptor facts the report needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    pub schema: String,
    pub table: String,
    pub clustering_key: Option<String>,
    pub verdict: Verdict,
}

impl TableResult {
    pub fn new(descriptor: &TableDescriptor, verdict: Verdict) -> Self {
        Self {
            schema: descriptor.schema_name.clone(),
            table: descriptor.table_name.clone(),
            clustering_key: descriptor.clustering_key.clone(),
            verdict,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// One completed analysis of a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub database: String,
    pub schema_filter: Option<String>,
    /// Model identifier the verdicts came from.
    pub model: String,
    /// Rule-set fingerprint embedded in every request of the run.
    pub ruleset: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<TableResult>,
}

/// Progress of an in-flight run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    /// Label of the table that finished most recently.
    pub current_table: String,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}
