//! Iceberg Readiness Audit Library
//!
//! Audits the base tables of a PostgreSQL database for compatibility with the
//! Apache Iceberg table format. Schema metadata is collected from the catalog,
//! each table is assessed by a text-generation backend against a fixed rule
//! set, and the verdicts are rolled up into a human-readable report.
//!
//! # Modules
//!
//! - `aggregate`: Suitability counts per run and per schema.
//! - `analysis`: Per-table pipeline and run driver (progress, cancellation, retries).
//! - `backend`: Text-generation backend client.
//! - `catalog`: Metadata collection and caching.
//! - `circuit_breaker`: Circuit breaker for backend requests.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `parser`: Backend output decoding.
//! - `prompt`: Assessment request building and the rule set.
//! - `report`: Report assembly and Markdown rendering.
//! - `session`: Session state machine and orchestration.
//! - `summary`: Executive summary generation.

pub mod aggregate;
pub mod analysis;
pub mod backend;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod parser;
pub mod prompt;
pub mod report;
pub mod session;
pub mod summary;
