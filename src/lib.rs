//! # qgrid-studio
//!
//! Engine for running Q-methodology studies: researchers configure a Q-grid
//! and author stimuli, participants are walked through the study's steps and
//! sort the stimuli onto the grid.
//!
//! ## Features
//!
//! - **Grid configuration**: range, distribution shape (bell, flat, forced),
//!   symmetry and per-column cell counts, with a structural validator
//! - **Study authoring**: an explicit builder aggregate with study-level
//!   validation and change notifications
//! - **Participant sessions**: a resumable step state machine that never
//!   blocks on transient gateway failures
//! - **Persistence gateway**: embedded SQLite or a remote REST gateway
//!
//! ## Architecture
//!
//! ```text
//! UI client → JSON-RPC (stdio) → handlers → Storage
//!                                              ├── SQLite
//!                                              └── REST gateway (HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use qgrid_studio::{AppState, Config, RpcServer};
//! use qgrid_studio::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, Arc::new(storage)));
//!     RpcServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Q-grid configuration, shape generation and validation.
pub mod grid;
/// Participant session state machine and q-sort reconciliation.
pub mod participant;
/// REST client for a remote persistence gateway.
pub mod remote;
/// JSON-RPC server and request handling.
pub mod server;
/// Persistence gateway trait and SQLite implementation.
pub mod storage;
/// Study authoring state and stimuli.
pub mod study;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, RpcServer, SharedState};
