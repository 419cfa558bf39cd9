//! # Geobatch Library
//!
//! Resolves large lists of place names to coordinates through an HTTP
//! geocoding service, in bounded-concurrency windows, checkpointing the
//! resolved store to disk as it goes so a crashed run loses at most the work
//! since the last checkpoint.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geobatch_lib::{
//!     load_stores, read_corpus, read_persisted_store, BatchDispatcher, CheckpointWriter,
//!     GeocodeClient, RunConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::default();
//!     let corpus = read_corpus(&config.corpus).await?;
//!     let persisted = read_persisted_store(&config.store_in).await?;
//!     let (resolved, pending) = load_stores(corpus, persisted);
//!
//!     let dispatcher = BatchDispatcher::with_config(
//!         GeocodeClient::with_config(&config)?,
//!         CheckpointWriter::new(&config.store_out),
//!         &config,
//!     );
//!     let report = dispatcher.run(resolved, pending).await;
//!     for failure in &report.errors {
//!         println!("{}: {}", failure.key, failure.kind());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Windowed dispatch**: at most W requests in flight, windows in order
//! - **Checkpointing**: atomic full snapshots every K windows and at the end
//! - **Typed failures**: transport, protocol and empty-result outcomes per key
//! - **Layered configuration**: TOML files and `GB_*` environment variables

// Re-export main public API types and functions
pub use checkpoint::{CheckpointWriter, Checkpointer};
pub use config::{
    load_env_config, load_env_config_from, parse_timeout_string, ConfigManager, EnvConfig,
    FileConfig, ProviderSection, RunSection,
};
pub use dispatcher::BatchDispatcher;
pub use error::{FailureKind, GeobatchError, GeocodeFailure};
pub use provider::{extract_coordinate, GeocodeClient, Geocoder};
pub use store::{
    corpus_key, format_store_line, load_stores, parse_store_line, read_corpus,
    read_persisted_store,
};
pub use types::{
    Coordinate, FailureRecord, LocationKey, PayloadFormat, PendingSet, Progress, ResolvedEntry,
    ResolvedStore, RunConfig, RunReport, DEFAULT_BASE_URL, MAX_CONCURRENCY,
};

mod checkpoint;
mod config;
mod dispatcher;
mod error;
mod provider;
mod store;
mod types;

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
