//! Integration tests for the remote gateway client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use qgrid_studio::config::{GatewayConfig, RequestConfig, StorageBackend};
use qgrid_studio::error::{BuilderError, RemoteError, StorageError};
use qgrid_studio::grid::GridConfiguration;
use qgrid_studio::participant::ParticipantStep;
use qgrid_studio::remote::RemoteStorage;
use qgrid_studio::storage::{ProgressUpdate, Storage, Study};
use qgrid_studio::study::{
    NewStimulus, Stimulus, StimulusType, StudyBuilder, StudyMetadataPatch, UploadStatus,
};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str, max_retries: u32) -> RemoteStorage {
    let config = GatewayConfig {
        backend: StorageBackend::Remote,
        base_url: base_url.to_string(),
        api_key: Some("test-api-key".to_string()),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    RemoteStorage::new(&config, request_config).expect("Failed to create client")
}

#[cfg(test)]
mod study_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_study_sends_bearer_token() {
        let mock_server = MockServer::start().await;
        let study = Study::new("Remote study").with_id("study-1");

        Mock::given(method("POST"))
            .and(path("/studies"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(body_json(serde_json::to_value(&study).unwrap()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        client.create_study(&study).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_study_not_found_is_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/studies/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "no such study"})),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let study = client.get_study("missing").await.unwrap();

        assert!(study.is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_study() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/studies/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let result = client.delete_study("missing").await;

        assert!(matches!(result, Err(StorageError::StudyNotFound { .. })));
    }
}

#[cfg(test)]
mod grid_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_grid_falls_back_to_default() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/studies/study-1/grid"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let grid = client.get_grid_configuration("study-1").await.unwrap();

        assert_eq!(grid, GridConfiguration::default());
    }

    #[tokio::test]
    async fn test_invalid_grid_never_reaches_gateway() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/studies/study-1/grid"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut grid = GridConfiguration::default();
        grid.total_cells = 3;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client
            .save_grid_configuration("study-1", &grid)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_gateway_validation_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/studies/study-1/grid"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"error": "grid locked"})),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client
            .save_grid_configuration("study-1", &GridConfiguration::default())
            .await
            .unwrap_err();

        match err {
            StorageError::Validation { message } => assert_eq!(message, "grid locked"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod builder_tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_grid_keeps_stored_title() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/studies/study-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::to_value(Study::new("Old title").with_id("study-1")).unwrap()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/studies/study-1/grid"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"error": "grid locked"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/studies/study-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut builder = StudyBuilder::new();
        builder.set_study_metadata(StudyMetadataPatch {
            title: Some("New title".to_string()),
            ..Default::default()
        });
        for i in 0..builder.grid().total_cells {
            builder.add_stimulus(Stimulus::new(StimulusType::Text, format!("s{}", i)));
        }

        let client = create_test_client(&mock_server.uri(), 0);
        let err = builder.save(&client, "study-1").await.unwrap_err();

        assert!(matches!(
            err,
            BuilderError::Save(StorageError::Validation { .. })
        ));
        assert!(builder.is_dirty());
    }
}

#[cfg(test)]
mod stimulus_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_stimulus() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/studies/study-1/stimuli"))
            .and(body_json(json!({"type": "TEXT", "content": "Bikes are fast"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "stim-1",
                "type": "TEXT",
                "content": "Bikes are fast",
                "uploadStatus": "complete"
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let stimulus = client
            .create_stimulus(
                "study-1",
                &NewStimulus::new(StimulusType::Text, "Bikes are fast"),
            )
            .await
            .unwrap();

        assert_eq!(stimulus.id, "stim-1");
        assert_eq!(stimulus.upload_status, UploadStatus::Complete);
    }

    #[tokio::test]
    async fn test_invalid_response_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/studies/study-1/stimuli"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client.list_stimuli("study-1").await.unwrap_err();

        assert!(matches!(
            err,
            StorageError::Remote(RemoteError::InvalidResponse { .. })
        ));
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_progress_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/sessions/sess-1/progress"))
            .and(body_json(json!({
                "studyId": "study-1",
                "currentStep": "consent",
                "completedStep": "welcome",
                "disqualified": false
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let update = ProgressUpdate::new("study-1", ParticipantStep::Consent)
            .with_completed_step(ParticipantStep::Welcome);

        client
            .update_session_progress("sess-1", &update)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ids_are_encoded_as_single_segments() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/sessions/a%2Fb%3Fc/progress"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/studies/x%2Fy/stimuli"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        client
            .update_session_progress(
                "a/b?c",
                &ProgressUpdate::new("study-1", ParticipantStep::Welcome),
            )
            .await
            .unwrap();
        assert!(client.list_stimuli("x/y").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_step_data_path() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sessions/sess-1/steps/pre-sorting"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"agree": ["a"]})))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let data = client
            .get_step_data("sess-1", ParticipantStep::PreSorting)
            .await
            .unwrap();

        assert_eq!(data, Some(json!({"agree": ["a"]})));
    }

    #[tokio::test]
    async fn test_q_sort_rejection() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sessions/sess-1/q-sort"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(json!({"message": "Column 0 is over capacity"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 3);
        let err = client
            .submit_q_sort("sess-1", &json!({"placements": []}))
            .await
            .unwrap_err();

        assert!(err.is_rejection());
        assert!(matches!(err, StorageError::Rejected { .. }));
    }
}

#[cfg(test)]
mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sessions/sess-1/commentary"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let err = client
            .submit_commentary("sess-1", &json!({"text": "thoughts"}))
            .await
            .unwrap_err();

        assert!(!err.is_rejection());
        assert!(matches!(
            err,
            StorageError::Remote(RemoteError::Unavailable { retries: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/studies/study-1"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/studies/study-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::to_value(Study::new("Back").with_id("study-1")).unwrap()),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let study = client.get_study("study-1").await.unwrap().unwrap();

        assert_eq!(study.title, "Back");
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sessions/sess-1/progress"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 3);
        let err = client.get_session_progress("sess-1").await.unwrap_err();

        assert!(matches!(
            err,
            StorageError::Remote(RemoteError::Api { status: 403, .. })
        ));
    }
}
