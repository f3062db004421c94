//! Participant session state machine.
//!
//! A [`ParticipantSession`] walks one participant through the fixed sequence
//! of [`ParticipantStep`]s. Each `advance` submits the current step's payload
//! to the gateway before moving on. A gateway *rejection* keeps the
//! participant where they are; any other gateway failure is logged and the
//! participant moves on with the payload recorded locally.

pub mod placement;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StorageResult;
use crate::storage::{ProgressUpdate, SessionProgress, Storage};

pub use placement::{reconcile, Placement, QSortPayload};

/// One stage of the participant flow, in flow order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantStep {
    /// Optional eligibility questions.
    PreScreening,
    /// Study introduction.
    Welcome,
    /// Informed consent.
    Consent,
    /// Reading through every stimulus once.
    Familiarization,
    /// Rough agree / neutral / disagree piles.
    PreSorting,
    /// Placing each stimulus on the grid.
    QSort,
    /// Free-text remarks on the extremes.
    Commentary,
    /// Optional closing questionnaire.
    PostSurvey,
    /// End of the flow.
    ThankYou,
}

impl ParticipantStep {
    /// All steps in flow order.
    pub const ALL: [ParticipantStep; 9] = [
        ParticipantStep::PreScreening,
        ParticipantStep::Welcome,
        ParticipantStep::Consent,
        ParticipantStep::Familiarization,
        ParticipantStep::PreSorting,
        ParticipantStep::QSort,
        ParticipantStep::Commentary,
        ParticipantStep::PostSurvey,
        ParticipantStep::ThankYou,
    ];

    /// Where a session starts.
    pub fn initial(pre_screening: bool) -> Self {
        if pre_screening {
            ParticipantStep::PreScreening
        } else {
            ParticipantStep::Welcome
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// The following step, or `None` at `thank-you`.
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// The preceding step, or `None` at `pre-screening`.
    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Whether the flow ends here.
    pub fn is_terminal(self) -> bool {
        self == ParticipantStep::ThankYou
    }
}

impl std::fmt::Display for ParticipantStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantStep::PreScreening => write!(f, "pre-screening"),
            ParticipantStep::Welcome => write!(f, "welcome"),
            ParticipantStep::Consent => write!(f, "consent"),
            ParticipantStep::Familiarization => write!(f, "familiarization"),
            ParticipantStep::PreSorting => write!(f, "pre-sorting"),
            ParticipantStep::QSort => write!(f, "q-sort"),
            ParticipantStep::Commentary => write!(f, "commentary"),
            ParticipantStep::PostSurvey => write!(f, "post-survey"),
            ParticipantStep::ThankYou => write!(f, "thank-you"),
        }
    }
}

impl std::str::FromStr for ParticipantStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pre-screening" => Ok(ParticipantStep::PreScreening),
            "welcome" => Ok(ParticipantStep::Welcome),
            "consent" => Ok(ParticipantStep::Consent),
            "familiarization" => Ok(ParticipantStep::Familiarization),
            "pre-sorting" => Ok(ParticipantStep::PreSorting),
            "q-sort" => Ok(ParticipantStep::QSort),
            "commentary" => Ok(ParticipantStep::Commentary),
            "post-survey" => Ok(ParticipantStep::PostSurvey),
            "thank-you" => Ok(ParticipantStep::ThankYou),
            _ => Err(format!("Unknown participant step: {}", s)),
        }
    }
}

/// Result of a step transition request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// Moved from `from` to `to`. `synced` is false when the gateway call
    /// failed and the payload only lives in the session.
    Advanced {
        /// Step that was left.
        from: ParticipantStep,
        /// Step now current.
        to: ParticipantStep,
        /// Whether the gateway recorded the transition.
        synced: bool,
    },
    /// Nothing changed; the participant must correct the step's input.
    Rejected {
        /// Step the session stays on.
        step: ParticipantStep,
        /// Why the input was refused.
        reason: String,
    },
    /// The session is over.
    Finished,
}

impl AdvanceOutcome {
    /// Whether the session moved to another step.
    pub fn is_advanced(&self) -> bool {
        matches!(self, AdvanceOutcome::Advanced { .. })
    }
}

/// One participant's progress through a study.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSession {
    session_id: String,
    study_id: String,
    pre_screening: bool,
    current_step: ParticipantStep,
    completed_steps: Vec<ParticipantStep>,
    step_payloads: BTreeMap<ParticipantStep, Value>,
    disqualified: bool,
}

impl ParticipantSession {
    /// A session at its initial step, without touching the gateway.
    pub fn new(
        session_id: impl Into<String>,
        study_id: impl Into<String>,
        pre_screening: bool,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            study_id: study_id.into(),
            pre_screening,
            current_step: ParticipantStep::initial(pre_screening),
            completed_steps: Vec::new(),
            step_payloads: BTreeMap::new(),
            disqualified: false,
        }
    }

    /// Open a session, adopting persisted progress when the gateway has it.
    ///
    /// A fresh session records its initial step with the gateway. Gateway
    /// failures are logged and the session starts locally.
    pub async fn start(
        storage: &dyn Storage,
        session_id: &str,
        study_id: &str,
        pre_screening: bool,
    ) -> Self {
        let mut session = Self::new(session_id, study_id, pre_screening);

        match storage.get_session_progress(session_id).await {
            Ok(Some(progress)) if progress.study_id == study_id => {
                session.resume(&progress);
                info!(
                    session_id = %session_id,
                    current_step = %session.current_step,
                    completed = session.completed_steps.len(),
                    "Resumed participant session"
                );
                return session;
            }
            Ok(Some(progress)) => {
                warn!(
                    session_id = %session_id,
                    expected_study = %study_id,
                    stored_study = %progress.study_id,
                    "Stored progress belongs to another study, starting fresh"
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "Could not load session progress, starting locally"
                );
                return session;
            }
        }

        let update = ProgressUpdate::new(study_id, session.current_step);
        if let Err(e) = storage.update_session_progress(session_id, &update).await {
            warn!(
                session_id = %session_id,
                error = %e,
                "Could not record session start"
            );
        }

        info!(
            session_id = %session_id,
            study_id = %study_id,
            current_step = %session.current_step,
            "Started participant session"
        );
        session
    }

    /// Replace local progress with the persisted one. Nothing is merged.
    pub fn resume(&mut self, progress: &SessionProgress) {
        self.current_step = progress.current_step;
        self.completed_steps = progress.completed_steps.clone();
        self.disqualified = progress.disqualified;
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Study the session belongs to.
    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    /// Step the participant is on.
    pub fn current_step(&self) -> ParticipantStep {
        self.current_step
    }

    /// Steps completed so far, in completion order.
    pub fn completed_steps(&self) -> &[ParticipantStep] {
        &self.completed_steps
    }

    /// Whether pre-screening ended the session.
    pub fn is_disqualified(&self) -> bool {
        self.disqualified
    }

    /// Whether the session reached thank-you.
    pub fn is_finished(&self) -> bool {
        self.current_step.is_terminal()
    }

    /// Last payload recorded for `step`.
    pub fn payload(&self, step: ParticipantStep) -> Option<&Value> {
        self.step_payloads.get(&step)
    }

    /// Submit the current step and move to the next one.
    pub async fn advance(
        &mut self,
        storage: &dyn Storage,
        payload: Option<Value>,
    ) -> AdvanceOutcome {
        let step = self.current_step;
        let Some(next) = step.next() else {
            return AdvanceOutcome::Finished;
        };

        if step == ParticipantStep::QSort && payload.is_none() {
            return AdvanceOutcome::Rejected {
                step,
                reason: "A q-sort payload is required".to_string(),
            };
        }

        let synced = match self.submit(storage, step, next, payload.as_ref()).await {
            Ok(()) => true,
            Err(e) if e.is_rejection() => {
                info!(
                    session_id = %self.session_id,
                    step = %step,
                    reason = %e,
                    "Step submission rejected"
                );
                return AdvanceOutcome::Rejected {
                    step,
                    reason: e.to_string(),
                };
            }
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    step = %step,
                    error = %e,
                    "Step submission failed, continuing with local progress"
                );
                false
            }
        };

        if let Some(payload) = payload {
            self.step_payloads.insert(step, payload);
        }
        self.mark_completed(step);
        self.current_step = next;

        debug!(
            session_id = %self.session_id,
            from = %step,
            to = %next,
            synced,
            "Advanced participant session"
        );
        AdvanceOutcome::Advanced {
            from: step,
            to: next,
            synced,
        }
    }

    /// Step back one stage. Completed steps and payloads are kept.
    ///
    /// No-op at the session's initial step and once the session is over.
    pub fn retreat(&mut self) -> ParticipantStep {
        let initial = ParticipantStep::initial(self.pre_screening);
        if self.current_step == initial || self.current_step.is_terminal() {
            return self.current_step;
        }
        if let Some(previous) = self.current_step.previous() {
            self.current_step = previous;
        }
        self.current_step
    }

    /// End the session after a failed pre-screening.
    pub async fn disqualify(&mut self, storage: &dyn Storage) -> AdvanceOutcome {
        let step = self.current_step;
        if step != ParticipantStep::PreScreening {
            return AdvanceOutcome::Rejected {
                step,
                reason: "Participants can only be disqualified during pre-screening".to_string(),
            };
        }

        self.disqualified = true;
        self.mark_completed(step);
        self.current_step = ParticipantStep::ThankYou;

        let update = ProgressUpdate::new(&self.study_id, self.current_step)
            .with_completed_step(step)
            .disqualified();
        let synced = self.persist(storage, &update).await;

        info!(session_id = %self.session_id, synced, "Participant disqualified");
        AdvanceOutcome::Advanced {
            from: step,
            to: ParticipantStep::ThankYou,
            synced,
        }
    }

    /// Jump from the post-survey straight to the end without completing it.
    pub async fn skip_post_survey(&mut self, storage: &dyn Storage) -> AdvanceOutcome {
        let step = self.current_step;
        if step != ParticipantStep::PostSurvey {
            return AdvanceOutcome::Rejected {
                step,
                reason: "Only the post-survey can be skipped".to_string(),
            };
        }

        self.current_step = ParticipantStep::ThankYou;
        let update = ProgressUpdate::new(&self.study_id, self.current_step);
        let synced = self.persist(storage, &update).await;

        debug!(session_id = %self.session_id, synced, "Post-survey skipped");
        AdvanceOutcome::Advanced {
            from: step,
            to: ParticipantStep::ThankYou,
            synced,
        }
    }

    async fn submit(
        &self,
        storage: &dyn Storage,
        step: ParticipantStep,
        next: ParticipantStep,
        payload: Option<&Value>,
    ) -> StorageResult<()> {
        match (step, payload) {
            (ParticipantStep::PreSorting, Some(payload)) => {
                storage.submit_pre_sort(&self.session_id, payload).await
            }
            (ParticipantStep::QSort, Some(payload)) => {
                storage.submit_q_sort(&self.session_id, payload).await
            }
            (ParticipantStep::Commentary, Some(payload)) => {
                storage.submit_commentary(&self.session_id, payload).await
            }
            _ => {
                let mut update =
                    ProgressUpdate::new(&self.study_id, next).with_completed_step(step);
                if let Some(payload) = payload {
                    update = update.with_step_data(payload.clone());
                }
                storage
                    .update_session_progress(&self.session_id, &update)
                    .await
            }
        }
    }

    async fn persist(&self, storage: &dyn Storage, update: &ProgressUpdate) -> bool {
        match storage
            .update_session_progress(&self.session_id, update)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "Could not persist session progress"
                );
                false
            }
        }
    }

    fn mark_completed(&mut self, step: ParticipantStep) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
    }
}
