use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{ensure_valid_grid, ProgressUpdate, SessionProgress, Storage, Study};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::grid::GridConfiguration;
use crate::participant::{placement, ParticipantStep, QSortPayload};
use crate::study::{NewStimulus, Stimulus, StimulusPatch, UploadStatus};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a storage instance backed by a private in-memory database.
    ///
    /// The pool holds exactly one connection that is never recycled, since
    /// every new connection to `:memory:` opens an empty database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn require_study(&self, study_id: &str) -> StorageResult<()> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM studies WHERE id = ?")
            .bind(study_id)
            .fetch_optional(&self.pool)
            .await?;

        match exists {
            Some(_) => Ok(()),
            None => Err(StorageError::StudyNotFound {
                study_id: study_id.to_string(),
            }),
        }
    }

    async fn get_stimulus(&self, study_id: &str, stimulus_id: &str) -> StorageResult<Stimulus> {
        let row: Option<StimulusRow> = sqlx::query_as(
            r#"
            SELECT id, stimulus_type, content, metadata, upload_status
            FROM stimuli
            WHERE id = ? AND study_id = ?
            "#,
        )
        .bind(stimulus_id)
        .bind(study_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StorageError::StimulusNotFound {
                stimulus_id: stimulus_id.to_string(),
            }),
        }
    }

    /// Store a dedicated step submission and move progress past `step`.
    async fn record_submission(
        &self,
        mut progress: SessionProgress,
        step: ParticipantStep,
        payload: &Value,
    ) -> StorageResult<()> {
        if !progress.completed_steps.contains(&step) {
            progress.completed_steps.push(step);
        }
        if progress.current_step <= step {
            if let Some(next) = step.next() {
                progress.current_step = next;
            }
        }
        progress.updated_at = Utc::now();

        let mut tx = self.pool.begin().await?;
        upsert_step_data(&mut tx, &progress.session_id, step, payload).await?;
        upsert_progress(&mut tx, &progress).await?;
        tx.commit().await?;

        debug!(
            session_id = %progress.session_id,
            step = %step,
            current_step = %progress.current_step,
            "Recorded step submission"
        );
        Ok(())
    }

    async fn require_progress(&self, session_id: &str) -> StorageResult<SessionProgress> {
        self.get_session_progress(session_id)
            .await?
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_study(&self, study: &Study) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO studies (id, title, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&study.id)
        .bind(&study.title)
        .bind(&study.description)
        .bind(study.created_at.to_rfc3339())
        .bind(study.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_study(&self, id: &str) -> StorageResult<Option<Study>> {
        let row: Option<StudyRow> = sqlx::query_as(
            r#"
            SELECT id, title, description, created_at, updated_at
            FROM studies
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_study(&self, study: &Study) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE studies
            SET title = ?, description = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&study.title)
        .bind(&study.description)
        .bind(study.updated_at.to_rfc3339())
        .bind(&study.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::StudyNotFound {
                study_id: study.id.clone(),
            });
        }

        Ok(())
    }

    async fn delete_study(&self, id: &str) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM stimuli WHERE study_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM grid_configurations WHERE study_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM studies WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::StudyNotFound {
                study_id: id.to_string(),
            });
        }

        tx.commit().await?;
        info!(study_id = %id, "Deleted study");
        Ok(())
    }

    async fn get_grid_configuration(&self, study_id: &str) -> StorageResult<GridConfiguration> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT config FROM grid_configurations WHERE study_id = ?")
                .bind(study_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((config,)) => serde_json::from_str(&config).map_err(|e| StorageError::Query {
                message: format!("Corrupt grid configuration for {}: {}", study_id, e),
            }),
            None => Ok(GridConfiguration::default()),
        }
    }

    async fn save_grid_configuration(
        &self,
        study_id: &str,
        grid: &GridConfiguration,
    ) -> StorageResult<GridConfiguration> {
        ensure_valid_grid(grid)?;
        self.require_study(study_id).await?;

        let config = serde_json::to_string(grid).map_err(|e| StorageError::Query {
            message: format!("Failed to encode grid configuration: {}", e),
        })?;

        sqlx::query(
            r#"
            INSERT INTO grid_configurations (study_id, config, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(study_id) DO UPDATE SET
                config = excluded.config,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(study_id)
        .bind(&config)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(study_id = %study_id, total_cells = grid.total_cells, "Saved grid configuration");
        Ok(grid.clone())
    }

    async fn list_stimuli(&self, study_id: &str) -> StorageResult<Vec<Stimulus>> {
        let rows: Vec<StimulusRow> = sqlx::query_as(
            r#"
            SELECT id, stimulus_type, content, metadata, upload_status
            FROM stimuli
            WHERE study_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(study_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Stimulus::try_from).collect()
    }

    async fn create_stimulus(
        &self,
        study_id: &str,
        stimulus: &NewStimulus,
    ) -> StorageResult<Stimulus> {
        self.require_study(study_id).await?;

        let mut created = Stimulus::new(stimulus.stimulus_type, stimulus.content.clone());
        created.metadata = stimulus.metadata.clone();
        let metadata = created.metadata.as_ref().map(|m| m.to_string());

        sqlx::query(
            r#"
            INSERT INTO stimuli (id, study_id, position, stimulus_type, content, metadata, upload_status, created_at)
            VALUES (?, ?, (SELECT COALESCE(MAX(position), -1) + 1 FROM stimuli WHERE study_id = ?), ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&created.id)
        .bind(study_id)
        .bind(study_id)
        .bind(created.stimulus_type.to_string())
        .bind(&created.content)
        .bind(&metadata)
        .bind(created.upload_status.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update_stimulus(
        &self,
        study_id: &str,
        stimulus_id: &str,
        patch: &StimulusPatch,
    ) -> StorageResult<Stimulus> {
        let mut stimulus = self.get_stimulus(study_id, stimulus_id).await?;
        stimulus.apply_patch(patch);
        let metadata = stimulus.metadata.as_ref().map(|m| m.to_string());

        sqlx::query(
            r#"
            UPDATE stimuli
            SET content = ?, metadata = ?, upload_status = ?
            WHERE id = ? AND study_id = ?
            "#,
        )
        .bind(&stimulus.content)
        .bind(&metadata)
        .bind(stimulus.upload_status.to_string())
        .bind(stimulus_id)
        .bind(study_id)
        .execute(&self.pool)
        .await?;

        Ok(stimulus)
    }

    async fn delete_stimulus(&self, study_id: &str, stimulus_id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM stimuli WHERE id = ? AND study_id = ?")
            .bind(stimulus_id)
            .bind(study_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::StimulusNotFound {
                stimulus_id: stimulus_id.to_string(),
            });
        }

        Ok(())
    }

    async fn get_session_progress(
        &self,
        session_id: &str,
    ) -> StorageResult<Option<SessionProgress>> {
        let row: Option<ProgressRow> = sqlx::query_as(
            r#"
            SELECT session_id, study_id, current_step, completed_steps, disqualified, updated_at
            FROM session_progress
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionProgress::try_from).transpose()
    }

    async fn update_session_progress(
        &self,
        session_id: &str,
        update: &ProgressUpdate,
    ) -> StorageResult<()> {
        let mut progress = match self.get_session_progress(session_id).await? {
            Some(existing) => existing,
            None => SessionProgress {
                session_id: session_id.to_string(),
                study_id: update.study_id.clone(),
                current_step: update.current_step,
                completed_steps: Vec::new(),
                disqualified: false,
                updated_at: Utc::now(),
            },
        };

        progress.study_id = update.study_id.clone();
        progress.current_step = update.current_step;
        progress.disqualified |= update.disqualified;
        progress.updated_at = Utc::now();
        if let Some(step) = update.completed_step {
            if !progress.completed_steps.contains(&step) {
                progress.completed_steps.push(step);
            }
        }

        let mut tx = self.pool.begin().await?;
        if let Some(data) = &update.step_data {
            let step = update.completed_step.unwrap_or(update.current_step);
            upsert_step_data(&mut tx, session_id, step, data).await?;
        }
        upsert_progress(&mut tx, &progress).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn get_step_data(
        &self,
        session_id: &str,
        step: ParticipantStep,
    ) -> StorageResult<Option<Value>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM step_data WHERE session_id = ? AND step = ?")
                .bind(session_id)
                .bind(step.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(payload,)| {
            serde_json::from_str(&payload).map_err(|e| StorageError::Query {
                message: format!("Corrupt step data for {}: {}", session_id, e),
            })
        })
        .transpose()
    }

    async fn submit_pre_sort(&self, session_id: &str, payload: &Value) -> StorageResult<()> {
        let progress = self.require_progress(session_id).await?;
        self.record_submission(progress, ParticipantStep::PreSorting, payload)
            .await
    }

    async fn submit_q_sort(&self, session_id: &str, payload: &Value) -> StorageResult<()> {
        let progress = self.require_progress(session_id).await?;

        let sort = QSortPayload::from_value(payload)?;
        let grid = self.get_grid_configuration(&progress.study_id).await?;
        let stimuli = self.list_stimuli(&progress.study_id).await?;
        placement::reconcile(&grid, &stimuli, &sort)?;

        self.record_submission(progress, ParticipantStep::QSort, payload)
            .await
    }

    async fn submit_commentary(&self, session_id: &str, payload: &Value) -> StorageResult<()> {
        let progress = self.require_progress(session_id).await?;
        self.record_submission(progress, ParticipantStep::Commentary, payload)
            .await
    }
}

async fn upsert_step_data(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: &str,
    step: ParticipantStep,
    payload: &Value,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO step_data (session_id, step, payload, submitted_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(session_id, step) DO UPDATE SET
            payload = excluded.payload,
            submitted_at = excluded.submitted_at
        "#,
    )
    .bind(session_id)
    .bind(step.to_string())
    .bind(payload.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn upsert_progress(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    progress: &SessionProgress,
) -> StorageResult<()> {
    let completed: Vec<String> = progress
        .completed_steps
        .iter()
        .map(|s| s.to_string())
        .collect();
    let completed = serde_json::to_string(&completed).map_err(|e| StorageError::Query {
        message: format!("Failed to encode completed steps: {}", e),
    })?;

    sqlx::query(
        r#"
        INSERT INTO session_progress (session_id, study_id, current_step, completed_steps, disqualified, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            study_id = excluded.study_id,
            current_step = excluded.current_step,
            completed_steps = excluded.completed_steps,
            disqualified = excluded.disqualified,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&progress.session_id)
    .bind(&progress.study_id)
    .bind(progress.current_step.to_string())
    .bind(&completed)
    .bind(progress.disqualified)
    .bind(progress.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> StorageResult<T> {
    value
        .parse()
        .map_err(|message: String| StorageError::Query { message })
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct StudyRow {
    id: String,
    title: String,
    description: String,
    created_at: String,
    updated_at: String,
}

impl From<StudyRow> for Study {
    fn from(row: StudyRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct StimulusRow {
    id: String,
    stimulus_type: String,
    content: String,
    metadata: Option<String>,
    upload_status: String,
}

impl TryFrom<StimulusRow> for Stimulus {
    type Error = StorageError;

    fn try_from(row: StimulusRow) -> Result<Self, Self::Error> {
        let upload_status: UploadStatus = parse_column(&row.upload_status)?;
        Ok(Self {
            id: row.id,
            stimulus_type: parse_column(&row.stimulus_type)?,
            content: row.content,
            metadata: row.metadata.and_then(|s| serde_json::from_str(&s).ok()),
            upload_status,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    session_id: String,
    study_id: String,
    current_step: String,
    completed_steps: String,
    disqualified: bool,
    updated_at: String,
}

impl TryFrom<ProgressRow> for SessionProgress {
    type Error = StorageError;

    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        let names: Vec<String> =
            serde_json::from_str(&row.completed_steps).map_err(|e| StorageError::Query {
                message: format!("Corrupt completed steps for {}: {}", row.session_id, e),
            })?;
        let completed_steps = names
            .iter()
            .map(|name| parse_column(name))
            .collect::<StorageResult<Vec<ParticipantStep>>>()?;

        Ok(Self {
            current_step: parse_column(&row.current_step)?,
            session_id: row.session_id,
            study_id: row.study_id,
            completed_steps,
            disqualified: row.disqualified,
            updated_at: parse_timestamp(&row.updated_at),
        })
    }
}
