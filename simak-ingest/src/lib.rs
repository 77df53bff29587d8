//! simak-ingest library interface
//!
//! Asynchronous transcript ingestion: uploaded spreadsheets are queued,
//! parsed, mapped to canonical records and persisted per student, with the
//! outcome reported on an import log.

pub mod api;
pub mod db;
pub mod error;
pub mod mapper;
pub mod models;
pub mod parser;
pub mod queue;
pub mod security;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use crate::mapper::columns::ColumnTable;
use crate::models::JobEvent;
use crate::queue::JobQueue;
use crate::security::IdentityCodec;
use crate::services::ServiceOptions;
use axum::Router;
use chrono::{DateTime, Utc};
use simak_common::config::IngestConfig;
use simak_common::EncryptionKey;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

/// Buffered job events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// Everything a job needs, built once at startup and cloned into workers
#[derive(Clone)]
pub struct IngestContext {
    pub db: SqlitePool,
    pub codec: Arc<IdentityCodec>,
    pub queue: JobQueue,
    pub service_options: ServiceOptions,
    pub columns: Arc<ColumnTable>,
    events: broadcast::Sender<JobEvent>,
}

impl IngestContext {
    pub fn new(db: SqlitePool, key: &EncryptionKey, config: &IngestConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue: JobQueue::new(db.clone(), config.max_attempts),
            codec: Arc::new(IdentityCodec::new(key)),
            service_options: ServiceOptions::from(config),
            columns: Arc::new(ColumnTable::v1()),
            db,
            events,
        }
    }

    /// Replace the column alias table used for jobs mapped after this call
    pub fn with_columns(mut self, columns: ColumnTable) -> Self {
        self.columns = Arc::new(columns);
        self
    }

    /// Broadcast a job event; having no subscribers is not an error
    pub fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub queue: JobQueue,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(ctx: &IngestContext) -> Self {
        Self {
            db: ctx.db.clone(),
            queue: ctx.queue.clone(),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::upload_routes())
        .merge(api::import_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
