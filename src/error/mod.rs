use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },

    /// Persistence gateway failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Grid construction or mutation failure.
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    /// Study authoring failure.
    #[error("Study error: {0}")]
    Builder(#[from] BuilderError),

    /// JSON-RPC failure.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Anything else.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

/// Grid shape and mutation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Range bounds out of order or beyond the allowed magnitude.
    #[error("Invalid range {min}..{max}: bounds must satisfy min < max within -6..6")]
    InvalidRange {
        /// Requested lower bound.
        min: i32,
        /// Requested upper bound.
        max: i32,
    },

    /// Shape generation was asked for zero columns.
    #[error("A grid needs at least one column")]
    NoColumns,

    /// Fewer cells than columns, so some column would be empty.
    #[error("Total cells ({total_cells}) must be at least the column count ({column_count})")]
    TooFewCells {
        /// Requested cell total.
        total_cells: u32,
        /// Columns the cells were meant for.
        column_count: usize,
    },

    /// Supplied cell counts do not match the range width.
    #[error("Expected {expected} cell counts, got {actual}")]
    CellCountMismatch {
        /// Columns in the range.
        expected: usize,
        /// Cell counts supplied.
        actual: usize,
    },

    /// No column sits at the given scale position.
    #[error("No column with value {value}")]
    UnknownColumn {
        /// Scale position that was looked up.
        value: i32,
    },

    /// Column cells would sum past what `totalCells` can hold.
    #[error("Column cells would sum to {total}, more than a grid can hold")]
    TooManyCells {
        /// Sum the mutation would have produced.
        total: u64,
    },
}

/// Q-sort placements that do not fit the grid or the study's stimuli
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    /// Payload is not a placement list.
    #[error("Malformed q-sort payload: {message}")]
    Malformed {
        /// Decoder message.
        message: String,
    },

    /// Placement names a stimulus the study does not have.
    #[error("Stimulus {stimulus_id} is not part of this study")]
    UnknownStimulus {
        /// Offending stimulus.
        stimulus_id: String,
    },

    /// Placement names a stimulus whose upload is not complete.
    #[error("Stimulus {stimulus_id} is not ready for sorting")]
    IncompleteStimulus {
        /// Offending stimulus.
        stimulus_id: String,
    },

    /// Same stimulus placed twice.
    #[error("Stimulus {stimulus_id} is placed more than once")]
    DuplicatePlacement {
        /// Offending stimulus.
        stimulus_id: String,
    },

    /// Placement targets a scale position outside the grid.
    #[error("Column {column} does not exist on the grid")]
    UnknownColumn {
        /// Requested scale position.
        column: i32,
    },

    /// More placements in a column than it has cells.
    #[error("Column {column} holds {placed} stimuli but only has {capacity} cells")]
    OverCapacity {
        /// Scale position of the column.
        column: i32,
        /// Stimuli placed there.
        placed: u32,
        /// Cells the column has.
        capacity: u32,
    },

    /// Some of the study's stimuli were left out.
    #[error("{missing} stimuli have not been placed")]
    Unplaced {
        /// Number of stimuli without a placement.
        missing: usize,
    },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not open or reach the database.
    #[error("Database connection failed: {message}")]
    Connection {
        /// Driver message.
        message: String,
    },

    /// A query failed or returned unusable data.
    #[error("Query failed: {message}")]
    Query {
        /// Driver or decoding message.
        message: String,
    },

    /// No study with this id.
    #[error("Study not found: {study_id}")]
    StudyNotFound {
        /// Requested study.
        study_id: String,
    },

    /// No stimulus with this id in the study.
    #[error("Stimulus not found: {stimulus_id}")]
    StimulusNotFound {
        /// Requested stimulus.
        stimulus_id: String,
    },

    /// No session with this id.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// Requested session.
        session_id: String,
    },

    /// Input refused before or by the gateway.
    #[error("Validation failed: {message}")]
    Validation {
        /// Why the input was refused.
        message: String,
    },

    /// Participant submission refused by the gateway.
    #[error("Submission rejected: {message}")]
    Rejected {
        /// Why the submission was refused.
        message: String,
    },

    /// Q-sort placements do not fit the grid.
    #[error("Placement rejected: {0}")]
    Placement(#[from] PlacementError),

    /// Schema migration failed.
    #[error("Migration failed: {message}")]
    Migration {
        /// Migrator message.
        message: String,
    },

    /// Remote gateway failure.
    #[error("Remote gateway error: {0}")]
    Remote(#[from] RemoteError),

    /// Raw SQLx failure.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StorageError {
    /// Whether the gateway refused the input itself, as opposed to failing to
    /// reach or query the backing store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StorageError::Validation { .. }
                | StorageError::Rejected { .. }
                | StorageError::Placement(_)
        )
    }
}

/// Remote gateway (HTTP) errors
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Every attempt failed with a retryable error.
    #[error("Gateway unavailable: {message} (retries: {retries})")]
    Unavailable {
        /// Last failure seen.
        message: String,
        /// Retries made after the first attempt.
        retries: u32,
    },

    /// Gateway answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// Response body could not be decoded.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Decoder message.
        message: String,
    },

    /// Request exceeded the configured timeout.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Configured base URL cannot address gateway paths.
    #[error("Invalid gateway URL: {message}")]
    InvalidUrl {
        /// Parser message.
        message: String,
    },

    /// Request body could not be serialized.
    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RemoteError {
    /// Whether another attempt may succeed: server errors, throttling and
    /// transport failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Api { status, .. } => *status >= 500 || *status == 429,
            RemoteError::Timeout { .. } | RemoteError::Http(_) => true,
            _ => false,
        }
    }
}

/// Study authoring errors
#[derive(Debug, Error)]
pub enum BuilderError {
    /// Study-level validation failed; nothing was written.
    #[error("Study is invalid: {}", summarize(.issues))]
    Invalid {
        /// Every issue found.
        issues: Vec<crate::study::ValidationIssue>,
    },

    /// The gateway refused or failed the write.
    #[error("Save failed: {0}")]
    Save(#[from] StorageError),
}

fn summarize(issues: &[crate::study::ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// JSON-RPC protocol errors
#[derive(Debug, Error)]
pub enum RpcError {
    /// Request envelope is not valid JSON-RPC 2.0.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the envelope.
        message: String,
    },

    /// No handler for the method.
    #[error("Unknown method: {method}")]
    UnknownMethod {
        /// Requested method.
        method: String,
    },

    /// Params missing or of the wrong shape.
    #[error("Invalid parameters for {method}: {message}")]
    InvalidParameters {
        /// Method being called.
        method: String,
        /// Decoder message.
        message: String,
    },

    /// Input refused by grid, study or gateway validation.
    #[error("Validation failed: {message}")]
    Validation {
        /// Why the input was refused.
        message: String,
    },

    /// Handler failed for a reason other than bad input.
    #[error("Execution failed: {message}")]
    ExecutionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Result could not be serialized.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidRequest { .. } => -32600,
            RpcError::UnknownMethod { .. } => -32601,
            RpcError::InvalidParameters { .. } => -32602,
            RpcError::Json(_) => -32603,
            RpcError::Validation { .. } => -32001,
            RpcError::ExecutionFailed { .. } => -32000,
        }
    }
}

impl From<StorageError> for RpcError {
    fn from(err: StorageError) -> Self {
        if err.is_rejection() {
            RpcError::Validation {
                message: err.to_string(),
            }
        } else {
            RpcError::ExecutionFailed {
                message: err.to_string(),
            }
        }
    }
}

impl From<GridError> for RpcError {
    fn from(err: GridError) -> Self {
        RpcError::Validation {
            message: err.to_string(),
        }
    }
}

impl From<BuilderError> for RpcError {
    fn from(err: BuilderError) -> Self {
        match err {
            BuilderError::Invalid { .. } => RpcError::Validation {
                message: err.to_string(),
            },
            BuilderError::Save(e) => e.into(),
        }
    }
}

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        RpcError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for grid operations
pub type GridResult<T> = Result<T, GridError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for remote gateway calls
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type alias for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::study::ValidationIssue;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_grid_error_display() {
        let err = GridError::InvalidRange { min: 2, max: 1 };
        assert_eq!(
            err.to_string(),
            "Invalid range 2..1: bounds must satisfy min < max within -6..6"
        );

        let err = GridError::TooFewCells {
            total_cells: 3,
            column_count: 7,
        };
        assert_eq!(
            err.to_string(),
            "Total cells (3) must be at least the column count (7)"
        );

        let err = GridError::UnknownColumn { value: 9 };
        assert_eq!(err.to_string(), "No column with value 9");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::StudyNotFound {
            study_id: "study-1".to_string(),
        };
        assert_eq!(err.to_string(), "Study not found: study-1");

        let err = StorageError::SessionNotFound {
            session_id: "sess-123".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::Rejected {
            message: "column 0 over capacity".to_string(),
        };
        assert_eq!(err.to_string(), "Submission rejected: column 0 over capacity");
    }

    #[test]
    fn test_storage_error_rejection_classification() {
        assert!(StorageError::Validation {
            message: "bad".to_string()
        }
        .is_rejection());
        assert!(StorageError::Rejected {
            message: "bad".to_string()
        }
        .is_rejection());
        assert!(!StorageError::Connection {
            message: "down".to_string()
        }
        .is_rejection());
        assert!(!StorageError::Remote(RemoteError::Timeout { timeout_ms: 10 }).is_rejection());
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(err.to_string(), "Gateway unavailable: server down (retries: 3)");

        let err = RemoteError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = RemoteError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_remote_error_retryable() {
        let api = |status| RemoteError::Api {
            status,
            message: String::new(),
        };
        assert!(api(503).is_retryable());
        assert!(api(429).is_retryable());
        assert!(!api(404).is_retryable());
        assert!(!api(422).is_retryable());
        assert!(RemoteError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!RemoteError::InvalidResponse {
            message: "bad json".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_builder_error_lists_issues() {
        let err = BuilderError::Invalid {
            issues: vec![
                ValidationIssue::new("title", "Title is required"),
                ValidationIssue::new("grid", "rangeMin must be less than rangeMax"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Study is invalid: title: Title is required; grid: rangeMin must be less than rangeMax"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            RpcError::UnknownMethod {
                method: "x".to_string()
            }
            .code(),
            -32601
        );
        assert_eq!(
            RpcError::InvalidParameters {
                method: "grid.save".to_string(),
                message: "missing".to_string()
            }
            .code(),
            -32602
        );
        assert_eq!(
            RpcError::Validation {
                message: "bad".to_string()
            }
            .code(),
            -32001
        );
    }

    #[test]
    fn test_storage_error_conversion_to_rpc_error() {
        let rejected: RpcError = StorageError::Rejected {
            message: "too many".to_string(),
        }
        .into();
        assert!(matches!(rejected, RpcError::Validation { .. }));

        let failed: RpcError = StorageError::Query {
            message: "locked".to_string(),
        }
        .into();
        assert!(matches!(failed, RpcError::ExecutionFailed { .. }));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::SessionNotFound {
            session_id: "test-123".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }

    #[test]
    fn test_grid_error_conversion_to_app_error() {
        let app_err: AppError = GridError::NoColumns.into();
        assert!(matches!(app_err, AppError::Grid(_)));
        assert!(app_err.to_string().contains("at least one column"));
    }
}
