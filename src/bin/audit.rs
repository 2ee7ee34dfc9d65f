//! One-shot audit of a database, printed as a Markdown report.
//!
//! Usage: `audit <DATABASE> [SCHEMA]`. Progress goes to stderr, the report to
//! stdout. Ctrl-C abandons the run.

use iceberg_audit::{
    backend::HttpCompletionBackend,
    catalog::PgCatalog,
    config::Config,
    db::Database,
    report::render_markdown,
    session::{Auditor, RunState},
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iceberg_audit=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let database = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: audit <DATABASE> [SCHEMA]"))?;
    let schema = args.next();

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;
    let backend = HttpCompletionBackend::new(
        &config.llm_base_url,
        config.llm_api_key.clone(),
        config.llm_timeout(),
    )?;
    let auditor = Auditor::new(
        Arc::new(PgCatalog::new(db)),
        Arc::new(backend),
        config.analysis_settings(),
    );

    eprintln!("Loading table metadata from {}...", database);
    let state = auditor.load_database(&RunState::default(), &database).await;
    if let Some(error) = state.last_error() {
        anyhow::bail!("Error loading metadata: {}", error);
    }

    let table_count = state.tables().map(|t| t.len()).unwrap_or(0);
    if table_count == 0 {
        eprintln!("No base tables found in {}.", database);
        return Ok(());
    }
    eprintln!("Found {} base tables", table_count);

    let (state, ticket) = state.start_analysis(schema)?;

    let cancel = ticket.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, abandoning run...");
            cancel.cancel();
        }
    });

    if let Some(mut progress) = state.subscribe_progress() {
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let p = progress.borrow_and_update().clone();
                eprintln!(
                    "[{}/{}] {} ({:.0}%)",
                    p.completed,
                    p.total,
                    p.current_table,
                    p.fraction() * 100.0
                );
            }
        });
    }

    let Some(report) = auditor.execute(ticket).await else {
        anyhow::bail!("Analysis cancelled; partial results discarded");
    };
    let state = state.complete(report)?;

    if let Some(report) = state.report() {
        print!("{}", render_markdown(report));
    }

    Ok(())
}
