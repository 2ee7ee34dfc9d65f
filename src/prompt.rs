//! Assessment requests sent to the text-generation backend.

use crate::models::{ColumnDescriptor, TableDescriptor};
use sha2::{Digest, Sha256};

/// Version of [`RULES`]. Bump whenever the rule block changes.
pub const RULESET_VERSION: &str = "iceberg-rules-v1";

/// Format limitations and feature-parity matrix the backend judges against.
pub const RULES: &str = r#"ICEBERG DATA TYPE LIMITATIONS:
- Semi-structured JSON/JSONB columns without a fixed schema NOT supported (must convert to structured OBJECT/ARRAY/MAP)
- Semi-structured ARRAY and OBJECT must be structured types with defined schemas
- GEOGRAPHY and GEOMETRY types NOT supported
- Collation on columns NOT supported
- UUID type NOT supported in managed Iceberg tables
- Timestamp precision limited to microseconds (6), nanoseconds will truncate
- Temporary, transient and unlogged tables NOT supported

FEATURE COMPARISON (Native vs Iceberg Managed vs Iceberg External):
| Feature              | Native | Managed | External |
|----------------------|--------|---------|----------|
| Fail-safe            | Yes    | No      | No       |
| Collation            | Yes    | No      | No       |
| Streaming ingestion  | Yes    | No      | No       |
| Automatic Clustering | Yes    | Yes     | No       |
| Replication          | Yes    | No      | No       |
| Time Travel          | 90 days| Yes     | Limited  |

IMPORTANT: If table has clustering keys and needs clustering, External Iceberg is NOT suitable."#;

/// Closing instruction of every assessment request. The response parser
/// relies on it being present.
pub const RESPONSE_CONTRACT: &str = r#"Respond with raw JSON only. Do NOT include ```json or ``` or any markdown. Start directly with curly brace:
{"suitable": true/false, "target": "MANAGED or EXTERNAL", "blockers": ["list"], "feature_loss": ["list"], "warnings": ["list"], "recommendation": "brief recommendation"}"#;

/// `<version>+<12 hex chars of sha256(RULES)>`.
pub fn ruleset_fingerprint() -> String {
    let mut hasher = Sha256::new();
    hasher.update(RULES.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}+{}", RULESET_VERSION, &digest[..12])
}

/// Doubles single quotes so embedded metadata cannot close a quoted literal.
pub fn escape_quotes(value: &str) -> String {
    value.replace('\'', "''")
}

/// Column list as a compact JSON array with the catalog's keys.
pub fn render_columns(columns: &[ColumnDescriptor]) -> String {
    serde_json::to_string(columns).unwrap_or_default()
}

/// Builds the assessment request for one table.
pub fn build_assessment_prompt(table: &TableDescriptor) -> String {
    let clustering_key = table
        .clustering_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .unwrap_or("none");

    format!(
        "You are a data engineer. Analyze if this table is suitable for migration to Apache Iceberg format.\n\
         \n\
         {rules}\n\
         \n\
         TABLE METADATA:\n\
         Schema: {schema}\n\
         Table: {table}\n\
         Is Transient: {transient}\n\
         Clustering Key: {clustering}\n\
         Columns: {columns}\n\
         \n\
         {contract}",
        rules = RULES,
        schema = escape_quotes(&table.schema_name),
        table = escape_quotes(&table.table_name),
        transient = table.is_transient,
        clustering = escape_quotes(clustering_key),
        columns = escape_quotes(&render_columns(&table.columns)),
        contract = RESPONSE_CONTRACT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(clustering_key: Option<&str>) -> TableDescriptor {
        TableDescriptor {
            schema_name: "sales".to_string(),
            table_name: "o'brien_orders".to_string(),
            is_transient: false,
            clustering_key: clustering_key.map(str::to_string),
            columns: vec![
                ColumnDescriptor::new("id", "bigint"),
                ColumnDescriptor::new("shape", "geometry"),
                ColumnDescriptor::new("name", "text").with_collation("en_US"),
            ],
        }
    }

    #[test]
    fn test_prompt_embeds_rules_and_metadata() {
        let prompt = build_assessment_prompt(&descriptor(Some("id")));

        assert!(prompt.contains(RULES));
        assert!(prompt.contains("Schema: sales\n"));
        assert!(prompt.contains("Is Transient: false\n"));
        assert!(prompt.contains("Clustering Key: id\n"));
        assert!(prompt.contains(r#""column":"shape","type":"geometry""#));
        assert!(prompt.contains(r#""collation":"en_US""#));
    }

    #[test]
    fn test_prompt_always_ends_with_response_contract() {
        assert!(build_assessment_prompt(&descriptor(None)).ends_with(RESPONSE_CONTRACT));
        assert!(build_assessment_prompt(&descriptor(Some("id"))).ends_with(RESPONSE_CONTRACT));
    }

    #[test]
    fn test_missing_clustering_key_renders_none_token() {
        let prompt = build_assessment_prompt(&descriptor(None));
        assert!(prompt.contains("Clustering Key: none\n"));

        let blank = build_assessment_prompt(&descriptor(Some("")));
        assert!(blank.contains("Clustering Key: none\n"));
    }

    #[test]
    fn test_quotes_in_metadata_are_doubled() {
        let prompt = build_assessment_prompt(&descriptor(None));
        assert!(prompt.contains("Table: o''brien_orders\n"));
        assert!(!prompt.contains("o'brien"));
    }

    #[test]
    fn test_ruleset_fingerprint_is_stable() {
        let fingerprint = ruleset_fingerprint();
        assert_eq!(fingerprint, ruleset_fingerprint());
        assert!(fingerprint.starts_with("iceberg-rules-v1+"));
        assert_eq!(fingerprint.len(), RULESET_VERSION.len() + 1 + 12);
    }
}
