//! Handoff server - delivery and review lifecycle for outsourced creative production

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod review;
pub mod routes;
pub mod store;
pub mod websocket;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::review::{EngineConfig, ReviewEngine};

/// Application state shared across handlers
pub struct AppState {
    pub engine: ReviewEngine,
}

impl AppState {
    /// State on the wall clock with default engine settings
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Self::with_engine(pool, Arc::new(SystemClock), EngineConfig::default())
    }

    pub fn with_engine(pool: SqlitePool, clock: Arc<dyn Clock>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            engine: ReviewEngine::new(store::Store::new(pool), clock, config),
        })
    }
}
