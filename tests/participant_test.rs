//! End-to-end participant flow against an in-memory SQLite gateway.

use pretty_assertions::assert_eq;
use serde_json::json;

use qgrid_studio::grid::{Distribution, GridConfiguration};
use qgrid_studio::participant::{AdvanceOutcome, ParticipantSession, ParticipantStep};
use qgrid_studio::storage::{SqliteStorage, Storage, Study};
use qgrid_studio::study::{NewStimulus, StimulusType};

/// Storage holding one study with a -1..1 grid of one cell per column and
/// the given number of text stimuli.
async fn setup(stimuli: usize) -> (SqliteStorage, String, Vec<String>) {
    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");

    let study = Study::new("Participant flow");
    storage.create_study(&study).await.unwrap();
    let grid = GridConfiguration::from_preset(-1, 1, Distribution::Flat, 3).unwrap();
    storage
        .save_grid_configuration(&study.id, &grid)
        .await
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..stimuli {
        let created = storage
            .create_stimulus(
                &study.id,
                &NewStimulus::new(StimulusType::Text, format!("Statement {}", i)),
            )
            .await
            .unwrap();
        ids.push(created.id);
    }

    (storage, study.id, ids)
}

/// Advance until the session reaches `step`, without payloads.
async fn advance_to(session: &mut ParticipantSession, storage: &dyn Storage, step: ParticipantStep) {
    while session.current_step() != step {
        let outcome = session.advance(storage, None).await;
        assert!(outcome.is_advanced(), "unexpected outcome: {:?}", outcome);
    }
}

#[tokio::test]
async fn test_six_advances_from_pre_screening_reach_commentary() {
    let (storage, study_id, ids) = setup(3).await;
    let mut session = ParticipantSession::start(&storage, "sess-1", &study_id, true).await;
    assert_eq!(session.current_step(), ParticipantStep::PreScreening);

    let q_sort = json!({"placements": [
        {"stimulusId": ids[0], "column": -1},
        {"stimulusId": ids[1], "column": 0},
        {"stimulusId": ids[2], "column": 1},
    ]});

    for _ in 0..6 {
        let payload = if session.current_step() == ParticipantStep::QSort {
            Some(q_sort.clone())
        } else {
            None
        };
        let outcome = session.advance(&storage, payload).await;
        assert!(matches!(
            outcome,
            AdvanceOutcome::Advanced { synced: true, .. }
        ));
    }

    assert_eq!(session.current_step(), ParticipantStep::Commentary);
    assert_eq!(session.completed_steps(), &ParticipantStep::ALL[..6]);

    let progress = storage.get_session_progress("sess-1").await.unwrap().unwrap();
    assert_eq!(progress.current_step, ParticipantStep::Commentary);
    assert_eq!(progress.completed_steps, ParticipantStep::ALL[..6].to_vec());
    assert_eq!(
        storage
            .get_step_data("sess-1", ParticipantStep::QSort)
            .await
            .unwrap(),
        Some(q_sort)
    );
}

#[tokio::test]
async fn test_over_capacity_q_sort_keeps_step() {
    let (storage, study_id, ids) = setup(2).await;
    let mut session = ParticipantSession::start(&storage, "sess-1", &study_id, false).await;
    advance_to(&mut session, &storage, ParticipantStep::QSort).await;

    let outcome = session
        .advance(
            &storage,
            Some(json!({"placements": [
                {"stimulusId": ids[0], "column": 0},
                {"stimulusId": ids[1], "column": 0},
            ]})),
        )
        .await;

    match outcome {
        AdvanceOutcome::Rejected { step, reason } => {
            assert_eq!(step, ParticipantStep::QSort);
            assert!(reason.contains("only has 1 cells"), "reason: {}", reason);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(session.current_step(), ParticipantStep::QSort);
    assert!(!session.completed_steps().contains(&ParticipantStep::QSort));
    assert!(session.payload(ParticipantStep::QSort).is_none());

    let progress = storage.get_session_progress("sess-1").await.unwrap().unwrap();
    assert_eq!(progress.current_step, ParticipantStep::QSort);
}

#[tokio::test]
async fn test_restart_resumes_persisted_progress() {
    let (storage, study_id, _) = setup(0).await;
    let mut session = ParticipantSession::start(&storage, "sess-1", &study_id, false).await;
    advance_to(&mut session, &storage, ParticipantStep::Familiarization).await;

    let resumed = ParticipantSession::start(&storage, "sess-1", &study_id, false).await;

    assert_eq!(resumed.current_step(), ParticipantStep::Familiarization);
    assert_eq!(
        resumed.completed_steps(),
        &[ParticipantStep::Welcome, ParticipantStep::Consent]
    );
}

#[tokio::test]
async fn test_commentary_and_post_survey_skip() {
    let (storage, study_id, ids) = setup(1).await;
    let mut session = ParticipantSession::start(&storage, "sess-1", &study_id, false).await;
    advance_to(&mut session, &storage, ParticipantStep::QSort).await;

    let outcome = session
        .advance(
            &storage,
            Some(json!({"placements": [{"stimulusId": ids[0], "column": 1}]})),
        )
        .await;
    assert!(outcome.is_advanced());

    let commentary = json!({"mostAgree": "It matters"});
    session.advance(&storage, Some(commentary.clone())).await;
    assert_eq!(session.current_step(), ParticipantStep::PostSurvey);

    let outcome = session.skip_post_survey(&storage).await;
    assert_eq!(
        outcome,
        AdvanceOutcome::Advanced {
            from: ParticipantStep::PostSurvey,
            to: ParticipantStep::ThankYou,
            synced: true
        }
    );
    assert!(session.is_finished());
    assert!(!session
        .completed_steps()
        .contains(&ParticipantStep::PostSurvey));
    assert_eq!(session.advance(&storage, None).await, AdvanceOutcome::Finished);

    assert_eq!(
        storage
            .get_step_data("sess-1", ParticipantStep::Commentary)
            .await
            .unwrap(),
        Some(commentary)
    );
    let progress = storage.get_session_progress("sess-1").await.unwrap().unwrap();
    assert_eq!(progress.current_step, ParticipantStep::ThankYou);
}

#[tokio::test]
async fn test_disqualified_participant_is_persisted() {
    let (storage, study_id, _) = setup(0).await;
    let mut session = ParticipantSession::start(&storage, "sess-1", &study_id, true).await;

    let outcome = session.disqualify(&storage).await;
    assert!(outcome.is_advanced());
    assert!(session.is_disqualified());

    let resumed = ParticipantSession::start(&storage, "sess-1", &study_id, true).await;
    assert!(resumed.is_disqualified());
    assert_eq!(resumed.current_step(), ParticipantStep::ThankYou);
    assert_eq!(resumed.completed_steps(), &[ParticipantStep::PreScreening]);
}
