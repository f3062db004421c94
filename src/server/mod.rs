//! JSON-RPC server exposing the gateway and participant sessions.
//!
//! This module provides:
//! - the stdio JSON-RPC 2.0 loop
//! - method routing onto grids, studies, stimuli and sessions
//! - shared application state

mod handlers;
mod rpc;

pub use handlers::*;
pub use rpc::*;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::participant::ParticipantSession;
use crate::storage::Storage;

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Persistence gateway (SQLite or remote).
    pub storage: Arc<dyn Storage>,
    /// Participant sessions in progress on this server, by session id. Each
    /// session carries its own lock; finished sessions are dropped.
    pub sessions: Mutex<HashMap<String, Arc<Mutex<ParticipantSession>>>>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Self {
        tracing::info!(
            backend = ?config.gateway.backend,
            "AppState initializing"
        );

        Self {
            config,
            storage,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
