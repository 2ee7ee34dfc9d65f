use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    Connection, PgConnection, PgPool,
};
use std::str::FromStr;

/// Connection to the server hosting the audited databases.
///
/// The pool targets the database named in the URL and serves server-wide
/// queries; metadata collection opens a short-lived connection to each
/// audited database instead.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
    options: PgConnectOptions,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = PgConnectOptions::from_str(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options.clone())
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool, options })
    }

    /// Opens a dedicated connection to `database` on the same server with the
    /// same credentials.
    pub async fn connect_to(&self, database: &str) -> Result<PgConnection, sqlx::Error> {
        let options = self.options.clone().database(database);
        PgConnection::connect_with(&options).await
    }
}
