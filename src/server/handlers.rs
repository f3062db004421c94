use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::SharedState;
use crate::error::{RpcError, RpcResult, StorageError};
use crate::grid::{Distribution, GridConfiguration};
use crate::participant::{AdvanceOutcome, ParticipantSession};
use crate::storage::Study;
use crate::study::{NewStimulus, StimulusPatch, StudyBuilder, StudyMetadataPatch};

/// Route a method call to its handler
pub async fn handle_method(
    state: &SharedState,
    method: &str,
    params: Option<Value>,
) -> RpcResult<Value> {
    info!(method = %method, "Routing method call");

    match method {
        // Grid
        "grid.get" => handle_grid_get(state, params).await,
        "grid.save" => handle_grid_save(state, params).await,
        "grid.preview" => handle_grid_preview(params),
        // Studies
        "study.create" => handle_study_create(state, params).await,
        "study.get" => handle_study_get(state, params).await,
        "study.delete" => handle_study_delete(state, params).await,
        "study.validate" => handle_study_validate(state, params).await,
        "study.save" => handle_study_save(state, params).await,
        // Stimuli
        "stimulus.list" => handle_stimulus_list(state, params).await,
        "stimulus.create" => handle_stimulus_create(state, params).await,
        "stimulus.update" => handle_stimulus_update(state, params).await,
        "stimulus.delete" => handle_stimulus_delete(state, params).await,
        // Participant sessions
        "session.start" => handle_session_start(state, params).await,
        "session.advance" => handle_session_advance(state, params).await,
        "session.retreat" => handle_session_retreat(state, params).await,
        "session.disqualify" => handle_session_disqualify(state, params).await,
        "session.skip_post_survey" => handle_session_skip_post_survey(state, params).await,
        _ => Err(RpcError::UnknownMethod {
            method: method.to_string(),
        }),
    }
}

/// Methods served besides `initialize` and `ping`.
pub const METHODS: &[&str] = &[
    "grid.get",
    "grid.save",
    "grid.preview",
    "study.create",
    "study.get",
    "study.delete",
    "study.validate",
    "study.save",
    "stimulus.list",
    "stimulus.create",
    "stimulus.update",
    "stimulus.delete",
    "session.start",
    "session.advance",
    "session.retreat",
    "session.disqualify",
    "session.skip_post_survey",
];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudyParams {
    study_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    session_id: String,
}

// ============================================================================
// Grid handlers
// ============================================================================

async fn handle_grid_get(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: StudyParams = parse_params("grid.get", params)?;
    let grid = state
        .storage
        .get_grid_configuration(&params.study_id)
        .await?;
    to_value(grid)
}

async fn handle_grid_save(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SaveParams {
        study_id: String,
        grid: GridConfiguration,
    }

    let params: SaveParams = parse_params("grid.save", params)?;
    let saved = state
        .storage
        .save_grid_configuration(&params.study_id, &params.grid)
        .await?;
    to_value(saved)
}

/// Generate a grid for the given range and shape without persisting it
fn handle_grid_preview(params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct PreviewParams {
        range_min: i32,
        range_max: i32,
        #[serde(default)]
        distribution: Distribution,
        total_cells: u32,
    }

    let params: PreviewParams = parse_params("grid.preview", params)?;
    let grid = GridConfiguration::from_preset(
        params.range_min,
        params.range_max,
        params.distribution,
        params.total_cells,
    )?;
    let validation = grid.validate();

    Ok(json!({ "grid": grid, "validation": validation }))
}

// ============================================================================
// Study handlers
// ============================================================================

async fn handle_study_create(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    struct CreateParams {
        title: String,
        #[serde(default)]
        description: String,
    }

    let params: CreateParams = parse_params("study.create", params)?;
    let study = Study::new(params.title).with_description(params.description);
    state.storage.create_study(&study).await?;
    to_value(study)
}

async fn handle_study_get(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: StudyParams = parse_params("study.get", params)?;
    let study = state
        .storage
        .get_study(&params.study_id)
        .await?
        .ok_or_else(|| StorageError::StudyNotFound {
            study_id: params.study_id.clone(),
        })?;
    let grid = state
        .storage
        .get_grid_configuration(&params.study_id)
        .await?;
    let stimuli = state.storage.list_stimuli(&params.study_id).await?;

    Ok(json!({ "study": study, "grid": grid, "stimuli": stimuli }))
}

async fn handle_study_delete(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: StudyParams = parse_params("study.delete", params)?;
    state.storage.delete_study(&params.study_id).await?;
    Ok(json!({ "deleted": true }))
}

/// Run the study-level checks against the persisted study
async fn handle_study_validate(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: StudyParams = parse_params("study.validate", params)?;
    let mut builder = StudyBuilder::load(state.storage.as_ref(), &params.study_id).await?;
    let valid = builder.validate_study();

    Ok(json!({ "valid": valid, "issues": builder.validation_errors() }))
}

/// Apply metadata and grid edits to a study and save it through the builder
async fn handle_study_save(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SaveParams {
        study_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        grid: Option<GridConfiguration>,
    }

    let params: SaveParams = parse_params("study.save", params)?;
    let mut builder = StudyBuilder::load(state.storage.as_ref(), &params.study_id).await?;
    builder.set_study_metadata(StudyMetadataPatch {
        title: params.title,
        description: params.description,
    });
    if let Some(grid) = params.grid {
        builder.edit_grid(|current| *current = grid);
    }
    builder.save(state.storage.as_ref(), &params.study_id).await?;

    Ok(json!({ "saved": true, "metadata": builder.metadata(), "grid": builder.grid() }))
}

// ============================================================================
// Stimulus handlers
// ============================================================================

async fn handle_stimulus_list(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: StudyParams = parse_params("stimulus.list", params)?;
    let stimuli = state.storage.list_stimuli(&params.study_id).await?;
    to_value(stimuli)
}

async fn handle_stimulus_create(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CreateParams {
        study_id: String,
        #[serde(flatten)]
        stimulus: NewStimulus,
    }

    let params: CreateParams = parse_params("stimulus.create", params)?;
    let created = state
        .storage
        .create_stimulus(&params.study_id, &params.stimulus)
        .await?;
    to_value(created)
}

async fn handle_stimulus_update(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct UpdateParams {
        study_id: String,
        stimulus_id: String,
        #[serde(flatten)]
        patch: StimulusPatch,
    }

    let params: UpdateParams = parse_params("stimulus.update", params)?;
    let updated = state
        .storage
        .update_stimulus(&params.study_id, &params.stimulus_id, &params.patch)
        .await?;
    to_value(updated)
}

async fn handle_stimulus_delete(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct DeleteParams {
        study_id: String,
        stimulus_id: String,
    }

    let params: DeleteParams = parse_params("stimulus.delete", params)?;
    state
        .storage
        .delete_stimulus(&params.study_id, &params.stimulus_id)
        .await?;
    Ok(json!({ "deleted": true }))
}

// ============================================================================
// Session handlers
// ============================================================================

/// Session snapshot plus the outcome of the call that produced it.
#[derive(Serialize)]
struct SessionReply<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<AdvanceOutcome>,
    session: &'a ParticipantSession,
}

async fn handle_session_start(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct StartParams {
        session_id: String,
        study_id: String,
        #[serde(default)]
        pre_screening: bool,
    }

    let params: StartParams = parse_params("session.start", params)?;
    let session = ParticipantSession::start(
        state.storage.as_ref(),
        &params.session_id,
        &params.study_id,
        params.pre_screening,
    )
    .await;

    let reply = to_value(SessionReply {
        outcome: None,
        session: &session,
    })?;
    let mut sessions = state.sessions.lock().await;
    if session.is_finished() {
        sessions.remove(&params.session_id);
    } else {
        sessions.insert(params.session_id, Arc::new(Mutex::new(session)));
    }
    Ok(reply)
}

async fn handle_session_advance(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct AdvanceParams {
        session_id: String,
        #[serde(default)]
        payload: Option<Value>,
    }

    let params: AdvanceParams = parse_params("session.advance", params)?;
    let handle = session_handle(state, &params.session_id).await?;
    let mut session = handle.lock().await;

    let outcome = session
        .advance(state.storage.as_ref(), params.payload)
        .await;
    session_reply(state, &params.session_id, Some(outcome), &session).await
}

async fn handle_session_retreat(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: SessionParams = parse_params("session.retreat", params)?;
    let handle = session_handle(state, &params.session_id).await?;
    let mut session = handle.lock().await;

    session.retreat();
    session_reply(state, &params.session_id, None, &session).await
}

async fn handle_session_disqualify(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: SessionParams = parse_params("session.disqualify", params)?;
    let handle = session_handle(state, &params.session_id).await?;
    let mut session = handle.lock().await;

    let outcome = session.disqualify(state.storage.as_ref()).await;
    session_reply(state, &params.session_id, Some(outcome), &session).await
}

async fn handle_session_skip_post_survey(
    state: &SharedState,
    params: Option<Value>,
) -> RpcResult<Value> {
    let params: SessionParams = parse_params("session.skip_post_survey", params)?;
    let handle = session_handle(state, &params.session_id).await?;
    let mut session = handle.lock().await;

    let outcome = session.skip_post_survey(state.storage.as_ref()).await;
    session_reply(state, &params.session_id, Some(outcome), &session).await
}

/// Look up a started session. The table lock is released before returning,
/// so gateway calls only ever hold the session's own lock.
async fn session_handle(
    state: &SharedState,
    session_id: &str,
) -> RpcResult<Arc<Mutex<ParticipantSession>>> {
    state
        .sessions
        .lock()
        .await
        .get(session_id)
        .cloned()
        .ok_or_else(|| session_not_started(session_id))
}

/// Build the reply and drop the session from the table once it reaches
/// thank-you.
async fn session_reply(
    state: &SharedState,
    session_id: &str,
    outcome: Option<AdvanceOutcome>,
    session: &ParticipantSession,
) -> RpcResult<Value> {
    let reply = to_value(SessionReply { outcome, session })?;
    if session.is_finished() {
        state.sessions.lock().await.remove(session_id);
        debug!(session_id = %session_id, "Finished session released");
    }
    Ok(reply)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse params with consistent error handling
fn parse_params<T: serde::de::DeserializeOwned>(method: &str, params: Option<Value>) -> RpcResult<T> {
    match params {
        Some(params) => serde_json::from_value(params).map_err(|e| RpcError::InvalidParameters {
            method: method.to_string(),
            message: e.to_string(),
        }),
        None => Err(RpcError::InvalidParameters {
            method: method.to_string(),
            message: "Missing params".to_string(),
        }),
    }
}

fn to_value<T: Serialize>(value: T) -> RpcResult<Value> {
    serde_json::to_value(value).map_err(RpcError::Json)
}

fn session_not_started(session_id: &str) -> RpcError {
    RpcError::ExecutionFailed {
        message: format!("Session not started: {}", session_id),
    }
}
