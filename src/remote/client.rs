use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::error_message;
use crate::config::{GatewayConfig, RequestConfig};
use crate::error::{RemoteError, RemoteResult, StorageError, StorageResult};
use crate::grid::GridConfiguration;
use crate::participant::ParticipantStep;
use crate::storage::{ensure_valid_grid, ProgressUpdate, SessionProgress, Storage, Study};
use crate::study::{NewStimulus, Stimulus, StimulusPatch};

/// Persistence gateway reached over HTTP.
#[derive(Clone)]
pub struct RemoteStorage {
    client: Client,
    base_url: String,
    base: Url,
    api_key: Option<String>,
    request_config: RequestConfig,
}

impl RemoteStorage {
    /// Create a new gateway client
    pub fn new(config: &GatewayConfig, request_config: RequestConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(RemoteError::Http)?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url).map_err(|e| RemoteError::InvalidUrl {
            message: format!("{}: {}", base_url, e),
        })?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl {
                message: format!("{} cannot hold a path", base_url),
            });
        }

        Ok(Self {
            client,
            base_url,
            base,
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Gateway URL for `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request, retrying server and transport failures with
    /// exponential backoff. Returns the response body.
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Value>,
    ) -> RemoteResult<String> {
        let url = self.endpoint(segments);
        let path = url.path();

        let mut last_error = None;
        let mut attempt = 0;

        while attempt <= self.request_config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(attempt - 1)),
                );
                warn!(
                    method = %method,
                    path = %path,
                    retry = attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying gateway request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&method, &url, body.as_ref()).await {
                Ok(text) => {
                    debug!(
                        method = %method,
                        path = %path,
                        latency_ms = start.elapsed().as_millis(),
                        "Gateway request succeeded"
                    );
                    return Ok(text);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    error!(
                        method = %method,
                        path = %path,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = attempt,
                        "Gateway request failed"
                    );
                    last_error = Some(e);
                    attempt += 1;
                }
            }
        }

        Err(RemoteError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries: self.request_config.max_retries,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
    ) -> RemoteResult<String> {
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout {
                    timeout_ms: self.request_config.timeout_ms,
                }
            } else {
                RemoteError::Http(e)
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(RemoteError::Http)?;

        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        Ok(text)
    }

    async fn fetch<T: DeserializeOwned>(&self, segments: &[&str]) -> RemoteResult<T> {
        let text = self.send(Method::GET, segments, None).await?;
        parse(&text)
    }

    /// GET that treats 404 as absence.
    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> RemoteResult<Option<T>> {
        match self.send(Method::GET, segments, None).await {
            Ok(text) => parse(&text).map(Some),
            Err(RemoteError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn exchange<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> RemoteResult<T> {
        let text = self
            .send(method, segments, Some(serde_json::to_value(body)?))
            .await?;
        parse(&text)
    }

    /// Request whose response body is ignored.
    async fn command<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> RemoteResult<()> {
        let body = body.map(serde_json::to_value).transpose()?;
        self.send(method, segments, body).await?;
        Ok(())
    }
}

fn parse<T: DeserializeOwned>(text: &str) -> RemoteResult<T> {
    serde_json::from_str(text).map_err(|e| RemoteError::InvalidResponse {
        message: format!("Failed to parse response: {}", e),
    })
}

/// Map gateway statuses onto storage errors: 404 to `not_found`, 400 and 422
/// to a validation rejection, everything else stays a remote failure.
fn classify(err: RemoteError, not_found: impl FnOnce() -> StorageError) -> StorageError {
    match err {
        RemoteError::Api { status: 404, .. } => not_found(),
        RemoteError::Api {
            status: 400 | 422,
            message,
        } => StorageError::Validation { message },
        other => StorageError::Remote(other),
    }
}

fn study_not_found(id: &str) -> impl FnOnce() -> StorageError + '_ {
    move || StorageError::StudyNotFound {
        study_id: id.to_string(),
    }
}

fn session_not_found(id: &str) -> impl FnOnce() -> StorageError + '_ {
    move || StorageError::SessionNotFound {
        session_id: id.to_string(),
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn create_study(&self, study: &Study) -> StorageResult<()> {
        self.command(Method::POST, &["studies"], Some(study))
            .await
            .map_err(|e| classify(e, study_not_found(&study.id)))?;
        info!(study_id = %study.id, "Created study on gateway");
        Ok(())
    }

    async fn get_study(&self, id: &str) -> StorageResult<Option<Study>> {
        self.fetch_optional(&["studies", id])
            .await
            .map_err(|e| classify(e, study_not_found(id)))
    }

    async fn update_study(&self, study: &Study) -> StorageResult<()> {
        self.command(Method::PUT, &["studies", &study.id], Some(study))
            .await
            .map_err(|e| classify(e, study_not_found(&study.id)))
    }

    async fn delete_study(&self, id: &str) -> StorageResult<()> {
        self.command::<()>(Method::DELETE, &["studies", id], None)
            .await
            .map_err(|e| classify(e, study_not_found(id)))
    }

    async fn get_grid_configuration(&self, study_id: &str) -> StorageResult<GridConfiguration> {
        let grid: Option<GridConfiguration> = self
            .fetch_optional(&["studies", study_id, "grid"])
            .await
            .map_err(|e| classify(e, study_not_found(study_id)))?;
        Ok(grid.unwrap_or_default())
    }

    async fn save_grid_configuration(
        &self,
        study_id: &str,
        grid: &GridConfiguration,
    ) -> StorageResult<GridConfiguration> {
        ensure_valid_grid(grid)?;
        self.exchange(Method::PUT, &["studies", study_id, "grid"], grid)
            .await
            .map_err(|e| classify(e, study_not_found(study_id)))
    }

    async fn list_stimuli(&self, study_id: &str) -> StorageResult<Vec<Stimulus>> {
        self.fetch(&["studies", study_id, "stimuli"])
            .await
            .map_err(|e| classify(e, study_not_found(study_id)))
    }

    async fn create_stimulus(
        &self,
        study_id: &str,
        stimulus: &NewStimulus,
    ) -> StorageResult<Stimulus> {
        self.exchange(
            Method::POST,
            &["studies", study_id, "stimuli"],
            stimulus,
        )
        .await
        .map_err(|e| classify(e, study_not_found(study_id)))
    }

    async fn update_stimulus(
        &self,
        study_id: &str,
        stimulus_id: &str,
        patch: &StimulusPatch,
    ) -> StorageResult<Stimulus> {
        self.exchange(
            Method::PATCH,
            &["studies", study_id, "stimuli", stimulus_id],
            patch,
        )
        .await
        .map_err(|e| {
            classify(e, || StorageError::StimulusNotFound {
                stimulus_id: stimulus_id.to_string(),
            })
        })
    }

    async fn delete_stimulus(&self, study_id: &str, stimulus_id: &str) -> StorageResult<()> {
        self.command::<()>(
            Method::DELETE,
            &["studies", study_id, "stimuli", stimulus_id],
            None,
        )
        .await
        .map_err(|e| {
            classify(e, || StorageError::StimulusNotFound {
                stimulus_id: stimulus_id.to_string(),
            })
        })
    }

    async fn get_session_progress(
        &self,
        session_id: &str,
    ) -> StorageResult<Option<SessionProgress>> {
        self.fetch_optional(&["sessions", session_id, "progress"])
            .await
            .map_err(|e| classify(e, session_not_found(session_id)))
    }

    async fn update_session_progress(
        &self,
        session_id: &str,
        update: &ProgressUpdate,
    ) -> StorageResult<()> {
        self.command(
            Method::PUT,
            &["sessions", session_id, "progress"],
            Some(update),
        )
        .await
        .map_err(|e| classify(e, session_not_found(session_id)))
    }

    async fn get_step_data(
        &self,
        session_id: &str,
        step: ParticipantStep,
    ) -> StorageResult<Option<Value>> {
        self.fetch_optional(&["sessions", session_id, "steps", &step.to_string()])
            .await
            .map_err(|e| classify(e, session_not_found(session_id)))
    }

    async fn submit_pre_sort(&self, session_id: &str, payload: &Value) -> StorageResult<()> {
        self.command(
            Method::POST,
            &["sessions", session_id, "pre-sort"],
            Some(payload),
        )
        .await
        .map_err(|e| classify(e, session_not_found(session_id)))
    }

    async fn submit_q_sort(&self, session_id: &str, payload: &Value) -> StorageResult<()> {
        self.command(
            Method::POST,
            &["sessions", session_id, "q-sort"],
            Some(payload),
        )
        .await
        .map_err(|e| match classify(e, session_not_found(session_id)) {
            StorageError::Validation { message } => StorageError::Rejected { message },
            other => other,
        })
    }

    async fn submit_commentary(&self, session_id: &str, payload: &Value) -> StorageResult<()> {
        self.command(
            Method::POST,
            &["sessions", session_id, "commentary"],
            Some(payload),
        )
        .await
        .map_err(|e| classify(e, session_not_found(session_id)))
    }
}
