//! Metadata collection: which databases exist and what their base tables look like.

use crate::db::Database;
use crate::errors::{AppError, ResultExt};
use crate::models::{ColumnDescriptor, TableDescriptor};
use async_trait::async_trait;
use moka::future::Cache;
use sqlx::{types::Json, Connection, FromRow};
use std::sync::Arc;
use std::time::Duration;

/// Database list staleness window.
pub const DATABASE_LIST_TTL: Duration = Duration::from_secs(300);
/// Table metadata staleness window, per database.
pub const TABLE_METADATA_TTL: Duration = Duration::from_secs(60);

/// Source of schema metadata.
///
/// An empty table list is a valid answer; an unreachable catalog or a
/// database that cannot be opened is a `CollectionError`.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Names of the databases that can be audited, sorted.
    async fn list_databases(&self) -> Result<Vec<String>, AppError>;

    /// Every base table of `database` with its ordered column list, ordered
    /// by schema then table name.
    async fn list_tables(&self, database: &str) -> Result<Vec<TableDescriptor>, AppError>;
}

const LIST_DATABASES_SQL: &str = r#"
    SELECT datname
    FROM pg_catalog.pg_database
    WHERE datallowconn AND NOT datistemplate
    ORDER BY datname
"#;

const LIST_TABLES_SQL: &str = r#"
    SELECT
        c.table_schema::text AS table_schema,
        c.table_name::text AS table_name,
        (cls.relpersistence = 'u') AS is_transient,
        ck.clustering_key,
        json_agg(
            json_build_object(
                'column', c.column_name,
                'type', CASE WHEN c.data_type = 'USER-DEFINED' THEN c.udt_name ELSE c.data_type END,
                'collation', COALESCE(c.collation_name, 'none'),
                'precision', c.datetime_precision
            )
            ORDER BY c.ordinal_position
        ) AS columns_info
    FROM information_schema.columns c
    JOIN information_schema.tables t
        ON c.table_schema = t.table_schema
        AND c.table_name = t.table_name
    JOIN pg_catalog.pg_namespace ns ON ns.nspname = t.table_schema
    JOIN pg_catalog.pg_class cls ON cls.relnamespace = ns.oid AND cls.relname = t.table_name
    LEFT JOIN LATERAL (
        SELECT string_agg(a.attname, ', ' ORDER BY k.ord) AS clustering_key
        FROM pg_catalog.pg_index i
        CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
        WHERE i.indrelid = cls.oid AND i.indisclustered
    ) ck ON TRUE
    WHERE t.table_type = 'BASE TABLE'
        AND t.table_schema NOT IN ('pg_catalog', 'information_schema')
        AND t.table_schema NOT LIKE 'pg_toast%'
    GROUP BY c.table_schema, c.table_name, cls.relpersistence, ck.clustering_key
    ORDER BY c.table_schema, c.table_name
"#;

#[derive(Debug, FromRow)]
struct TableRow {
    table_schema: String,
    table_name: String,
    is_transient: bool,
    clustering_key: Option<String>,
    columns_info: Json<Vec<ColumnDescriptor>>,
}

impl From<TableRow> for TableDescriptor {
    fn from(row: TableRow) -> Self {
        Self {
            schema_name: row.table_schema,
            table_name: row.table_name,
            is_transient: row.is_transient,
            clustering_key: row.clustering_key.filter(|k| !k.trim().is_empty()),
            columns: row.columns_info.0,
        }
    }
}

/// PostgreSQL catalog reader built on `information_schema` and `pg_catalog`.
pub struct PgCatalog {
    db: Database,
}

impl PgCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn list_databases(&self) -> Result<Vec<String>, AppError> {
        let names: Vec<(String,)> = sqlx::query_as(LIST_DATABASES_SQL)
            .fetch_all(&self.db.pool)
            .await
            .context("Failed to list databases")?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<TableDescriptor>, AppError> {
        if database.trim().is_empty() {
            return Err(AppError::BadRequest("Database name cannot be empty".to_string()));
        }

        tracing::info!("Collecting table metadata from {}", database);

        let mut conn = self
            .db
            .connect_to(database)
            .await
            .with_context(|| format!("Failed to open database {}", database))?;

        let rows: Vec<TableRow> = sqlx::query_as(LIST_TABLES_SQL)
            .fetch_all(&mut conn)
            .await
            .with_context(|| format!("Failed to collect table metadata for {}", database))?;

        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close connection to {}: {}", database, e);
        }

        let tables: Vec<TableDescriptor> = rows.into_iter().map(TableDescriptor::from).collect();
        tracing::info!("Collected {} base tables from {}", tables.len(), database);

        Ok(tables)
    }
}

/// TTL cache in front of another catalog.
///
/// Schema changes in the middle of an audit are rare, so briefly stale
/// metadata is acceptable.
pub struct CachedCatalog<C> {
    inner: C,
    databases: Cache<(), Arc<Vec<String>>>,
    tables: Cache<String, Arc<Vec<TableDescriptor>>>,
}

impl<C: Catalog> CachedCatalog<C> {
    pub fn new(inner: C) -> Self {
        Self::with_ttl(inner, DATABASE_LIST_TTL, TABLE_METADATA_TTL)
    }

    pub fn with_ttl(inner: C, database_ttl: Duration, table_ttl: Duration) -> Self {
        Self {
            inner,
            databases: Cache::builder()
                .time_to_live(database_ttl)
                .max_capacity(1)
                .build(),
            tables: Cache::builder()
                .time_to_live(table_ttl)
                .max_capacity(256)
                .build(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Drops the cached metadata of one database.
    pub async fn invalidate(&self, database: &str) {
        self.tables.invalidate(database).await;
    }
}

#[async_trait]
impl<C: Catalog> Catalog for CachedCatalog<C> {
    async fn list_databases(&self) -> Result<Vec<String>, AppError> {
        let names = self
            .databases
            .try_get_with((), async {
                self.inner.list_databases().await.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())?;

        Ok(names.as_ref().clone())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<TableDescriptor>, AppError> {
        let tables = self
            .tables
            .try_get_with(database.to_string(), async {
                self.inner.list_tables(database).await.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())?;

        tracing::debug!("Table metadata for {} served ({} tables)", database, tables.len());
        Ok(tables.as_ref().clone())
    }
}
