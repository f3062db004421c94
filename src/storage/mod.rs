//! Persistence gateway for studies, grids, stimuli and participant progress.
//!
//! [`Storage`] is the contract both the authoring side and the participant
//! flow talk to. [`SqliteStorage`] keeps everything in an embedded database;
//! [`crate::remote::RemoteStorage`] forwards to a REST gateway.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::grid::GridConfiguration;
use crate::participant::ParticipantStep;
use crate::study::{NewStimulus, Stimulus, StimulusPatch};

/// A research study. Owns one grid configuration and a stimulus list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    /// Unique study identifier.
    pub id: String,
    /// Title shown to researchers.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// When the study was created.
    pub created_at: DateTime<Utc>,
    /// When the study was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Study {
    /// Create a new study with a fresh id
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Persisted position of a participant session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    /// Session identifier.
    pub session_id: String,
    /// Study the session belongs to.
    pub study_id: String,
    /// Step the participant is on.
    pub current_step: ParticipantStep,
    /// Completed steps in completion order, without duplicates.
    #[serde(default)]
    pub completed_steps: Vec<ParticipantStep>,
    /// Whether pre-screening ended the session.
    #[serde(default)]
    pub disqualified: bool,
    /// Time of the last update.
    pub updated_at: DateTime<Utc>,
}

/// Generic progress update sent after a step without a dedicated endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Study the session belongs to.
    pub study_id: String,
    /// Step the participant is on after this update.
    pub current_step: ParticipantStep,
    /// Step that was just finished, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_step: Option<ParticipantStep>,
    /// Payload recorded for `completed_step`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_data: Option<Value>,
    /// Whether this update ends the session after pre-screening.
    #[serde(default)]
    pub disqualified: bool,
}

impl ProgressUpdate {
    /// Update moving the session to `current_step` with nothing completed.
    pub fn new(study_id: impl Into<String>, current_step: ParticipantStep) -> Self {
        Self {
            study_id: study_id.into(),
            current_step,
            completed_step: None,
            step_data: None,
            disqualified: false,
        }
    }

    /// Mark `step` as finished by this update
    pub fn with_completed_step(mut self, step: ParticipantStep) -> Self {
        self.completed_step = Some(step);
        self
    }

    /// Attach the finished step's payload
    pub fn with_step_data(mut self, data: Value) -> Self {
        self.step_data = Some(data);
        self
    }

    /// Flag the participant as disqualified
    pub fn disqualified(mut self) -> Self {
        self.disqualified = true;
        self
    }
}

/// Re-run the grid invariants before persisting.
pub(crate) fn ensure_valid_grid(grid: &GridConfiguration) -> StorageResult<()> {
    let result = grid.validate();
    if result.valid {
        Ok(())
    } else {
        Err(StorageError::Validation {
            message: result
                .error
                .unwrap_or_else(|| "Invalid grid configuration".to_string()),
        })
    }
}

/// Persistence gateway operations.
///
/// Implementations re-validate grids on save and reconcile q-sort
/// placements on submission; both refusals are reported as rejections
/// (see [`StorageError::is_rejection`]).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    // Study operations

    /// Create a new study.
    async fn create_study(&self, study: &Study) -> StorageResult<()>;
    /// Get a study by ID.
    async fn get_study(&self, id: &str) -> StorageResult<Option<Study>>;
    /// Update title and description of a study.
    async fn update_study(&self, study: &Study) -> StorageResult<()>;
    /// Delete a study together with its grid and stimuli.
    async fn delete_study(&self, id: &str) -> StorageResult<()>;

    // Grid operations

    /// Stored grid of a study, or the default grid when none was saved yet.
    async fn get_grid_configuration(&self, study_id: &str) -> StorageResult<GridConfiguration>;
    /// Validate and store a grid.
    async fn save_grid_configuration(
        &self,
        study_id: &str,
        grid: &GridConfiguration,
    ) -> StorageResult<GridConfiguration>;

    // Stimulus operations

    /// Stimuli of a study in creation order.
    async fn list_stimuli(&self, study_id: &str) -> StorageResult<Vec<Stimulus>>;
    /// Create a stimulus.
    async fn create_stimulus(
        &self,
        study_id: &str,
        stimulus: &NewStimulus,
    ) -> StorageResult<Stimulus>;
    /// Apply a partial update to a stimulus.
    async fn update_stimulus(
        &self,
        study_id: &str,
        stimulus_id: &str,
        patch: &StimulusPatch,
    ) -> StorageResult<Stimulus>;
    /// Delete a stimulus.
    async fn delete_stimulus(&self, study_id: &str, stimulus_id: &str) -> StorageResult<()>;

    // Participant progress

    /// Persisted progress of a session, if any.
    async fn get_session_progress(&self, session_id: &str)
        -> StorageResult<Option<SessionProgress>>;
    /// Record a step transition.
    async fn update_session_progress(
        &self,
        session_id: &str,
        update: &ProgressUpdate,
    ) -> StorageResult<()>;
    /// Last payload recorded for a step.
    async fn get_step_data(
        &self,
        session_id: &str,
        step: ParticipantStep,
    ) -> StorageResult<Option<Value>>;

    // Dedicated step submissions

    /// Submit the pre-sorting piles.
    async fn submit_pre_sort(&self, session_id: &str, payload: &Value) -> StorageResult<()>;
    /// Submit the q-sort placements. Rejects placements that do not fit the grid.
    async fn submit_q_sort(&self, session_id: &str, payload: &Value) -> StorageResult<()>;
    /// Submit the participant's commentary.
    async fn submit_commentary(&self, session_id: &str, payload: &Value) -> StorageResult<()>;
}
