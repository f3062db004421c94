//! Study authoring state.
//!
//! [`StudyBuilder`] is the aggregate a researcher edits while configuring a
//! study: metadata, the grid, and the stimulus list. It is an ordinary value
//! owned by the authoring context; nothing here is global. Every mutation
//! marks the builder dirty and bumps a revision number that observers can
//! follow through [`StudyBuilder::subscribe`].

mod stimulus;

pub use stimulus::*;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::BuilderError;
use crate::grid::{GridConfiguration, GridPatch};
use crate::storage::{Storage, Study};

/// Title and description of a study.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyMetadata {
    /// Required before a save.
    pub title: String,
    /// Free text, may be empty.
    #[serde(default)]
    pub description: String,
}

/// Partial update for [`StudyMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyMetadataPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One entry of the study-level validation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// `title`, `grid` or `stimuli`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationIssue {
    /// Issue for `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Mutable authoring aggregate for one study.
#[derive(Debug)]
pub struct StudyBuilder {
    metadata: StudyMetadata,
    grid: GridConfiguration,
    stimuli: Vec<Stimulus>,
    is_dirty: bool,
    validation_errors: Vec<ValidationIssue>,
    revision: watch::Sender<u64>,
}

impl Default for StudyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StudyBuilder {
    /// Fresh builder with the default grid and no stimuli.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            metadata: StudyMetadata::default(),
            grid: GridConfiguration::default(),
            stimuli: Vec::new(),
            is_dirty: false,
            validation_errors: Vec::new(),
            revision,
        }
    }

    /// Load the persisted state of `study_id`.
    pub async fn load(storage: &dyn Storage, study_id: &str) -> Result<Self, BuilderError> {
        let study = storage.get_study(study_id).await?;
        let grid = storage.get_grid_configuration(study_id).await?;
        let stimuli = storage.list_stimuli(study_id).await?;

        let mut builder = Self::new();
        if let Some(study) = study {
            builder.metadata = StudyMetadata {
                title: study.title,
                description: study.description,
            };
        }
        builder.grid = grid;
        builder.stimuli = stimuli;

        debug!(
            study_id = %study_id,
            stimuli = builder.stimuli.len(),
            "Loaded study into builder"
        );
        Ok(builder)
    }

    /// Drop all edits and return to the initial state. Observers stay
    /// subscribed and see a new revision.
    pub fn reset(&mut self) {
        self.metadata = StudyMetadata::default();
        self.grid = GridConfiguration::default();
        self.stimuli.clear();
        self.is_dirty = false;
        self.validation_errors.clear();
        self.bump();
    }

    /// Current title and description.
    pub fn metadata(&self) -> &StudyMetadata {
        &self.metadata
    }

    /// Grid being edited.
    pub fn grid(&self) -> &GridConfiguration {
        &self.grid
    }

    /// Stimuli in authoring order.
    pub fn stimuli(&self) -> &[Stimulus] {
        &self.stimuli
    }

    /// Whether there are edits since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Issues from the last [`validate_study`](Self::validate_study) call.
    pub fn validation_errors(&self) -> &[ValidationIssue] {
        &self.validation_errors
    }

    /// Current revision number.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receive the revision number after every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Shallow-merge into the metadata.
    pub fn set_study_metadata(&mut self, patch: StudyMetadataPatch) {
        if let Some(title) = patch.title {
            self.metadata.title = title;
        }
        if let Some(description) = patch.description {
            self.metadata.description = description;
        }
        self.touch();
    }

    /// Shallow-merge into the grid. The result is not validated here.
    pub fn update_grid(&mut self, patch: GridPatch) {
        self.grid.apply_patch(patch);
        self.touch();
    }

    /// Run a grid mutation (`set_range`, `set_cell`, ...) and mark the
    /// builder dirty.
    pub fn edit_grid<T>(&mut self, edit: impl FnOnce(&mut GridConfiguration) -> T) -> T {
        let result = edit(&mut self.grid);
        self.touch();
        result
    }

    /// Append a stimulus.
    pub fn add_stimulus(&mut self, stimulus: Stimulus) {
        self.stimuli.push(stimulus);
        self.touch();
    }

    /// Remove the stimulus with `id`, keeping the order of the rest.
    pub fn remove_stimulus(&mut self, id: &str) {
        self.stimuli.retain(|s| s.id != id);
        self.touch();
    }

    /// Number of stimuli ready to be placed.
    pub fn completed_stimuli(&self) -> usize {
        self.stimuli.iter().filter(|s| s.is_complete()).count()
    }

    /// Rebuild `validation_errors` and report whether the study is ready to
    /// save.
    pub fn validate_study(&mut self) -> bool {
        let mut issues = Vec::new();

        if self.metadata.title.trim().is_empty() {
            issues.push(ValidationIssue::new("title", "Title is required"));
        }

        let grid = self.grid.validate();
        if !grid.valid {
            issues.push(ValidationIssue::new(
                "grid",
                grid.error.unwrap_or_else(|| "Invalid grid".to_string()),
            ));
        }

        let actual = self.completed_stimuli();
        let expected = self.grid.total_cells as usize;
        if actual != expected {
            issues.push(ValidationIssue::new(
                "stimuli",
                format!(
                    "Stimulus count must match grid cells ({} vs {})",
                    actual, expected
                ),
            ));
        }

        self.validation_errors = issues;
        self.validation_errors.is_empty()
    }

    /// Persist metadata and grid for `study_id`.
    ///
    /// Refuses when the study does not validate. The grid goes first so a
    /// gateway rejection of it leaves the stored title and description
    /// untouched; a study created by this call is deleted again when its
    /// grid is refused. Gateway failures are returned as-is so the
    /// researcher knows the edits did not persist.
    pub async fn save(&mut self, storage: &dyn Storage, study_id: &str) -> Result<(), BuilderError> {
        if !self.validate_study() {
            return Err(BuilderError::Invalid {
                issues: self.validation_errors.clone(),
            });
        }

        let saved = match storage.get_study(study_id).await? {
            Some(mut study) => {
                let grid = storage.save_grid_configuration(study_id, &self.grid).await?;
                study.title = self.metadata.title.clone();
                study.description = self.metadata.description.clone();
                study.updated_at = chrono::Utc::now();
                storage.update_study(&study).await?;
                grid
            }
            None => {
                let study = Study::new(&self.metadata.title)
                    .with_id(study_id)
                    .with_description(&self.metadata.description);
                storage.create_study(&study).await?;
                match storage.save_grid_configuration(study_id, &self.grid).await {
                    Ok(grid) => grid,
                    Err(e) => {
                        if let Err(cleanup) = storage.delete_study(study_id).await {
                            warn!(
                                study_id = %study_id,
                                error = %cleanup,
                                "Failed to remove study after its grid was refused"
                            );
                        }
                        return Err(e.into());
                    }
                }
            }
        };

        self.grid = saved;
        self.is_dirty = false;
        self.bump();

        info!(
            study_id = %study_id,
            total_cells = self.grid.total_cells,
            "Study saved"
        );
        Ok(())
    }

    fn touch(&mut self) {
        self.is_dirty = true;
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Distribution;
    use crate::storage::MockStorage;
    use pretty_assertions::assert_eq;

    fn text(id: &str) -> Stimulus {
        Stimulus::new(StimulusType::Text, format!("statement {id}")).with_id(id)
    }

    fn ready_builder() -> StudyBuilder {
        let mut builder = StudyBuilder::new();
        builder.set_study_metadata(StudyMetadataPatch {
            title: Some("Attitudes to cycling".to_string()),
            description: None,
        });
        for i in 0..16 {
            builder.add_stimulus(text(&format!("s-{i}")));
        }
        builder
    }

    #[test]
    fn test_new_builder_is_clean() {
        let builder = StudyBuilder::new();
        assert!(!builder.is_dirty());
        assert!(builder.stimuli().is_empty());
        assert_eq!(builder.grid(), &GridConfiguration::default());
        assert_eq!(builder.revision(), 0);
    }

    #[test]
    fn test_add_then_remove_stimulus() {
        let mut builder = StudyBuilder::new();
        builder.add_stimulus(
            Stimulus::new(StimulusType::Text, "")
                .with_id("test-1")
                .with_status(UploadStatus::Complete),
        );
        assert!(builder.is_dirty());
        builder.remove_stimulus("test-1");
        assert!(builder.stimuli().is_empty());
        assert!(builder.is_dirty());
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut builder = StudyBuilder::new();
        for id in ["a", "b", "c", "d"] {
            builder.add_stimulus(text(id));
        }
        builder.remove_stimulus("b");
        let ids: Vec<&str> = builder.stimuli().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_metadata_merge_is_shallow() {
        let mut builder = StudyBuilder::new();
        builder.set_study_metadata(StudyMetadataPatch {
            title: Some("T".to_string()),
            description: Some("D".to_string()),
        });
        builder.set_study_metadata(StudyMetadataPatch {
            title: Some("T2".to_string()),
            description: None,
        });
        assert_eq!(builder.metadata().title, "T2");
        assert_eq!(builder.metadata().description, "D");
    }

    #[test]
    fn test_update_grid_does_not_validate() {
        let mut builder = StudyBuilder::new();
        builder.update_grid(GridPatch {
            range_max: Some(12),
            ..Default::default()
        });
        assert_eq!(builder.grid().range_max, 12);
        assert!(builder.is_dirty());
        assert!(builder.validation_errors().is_empty());
    }

    #[test]
    fn test_validate_requires_title() {
        let mut builder = StudyBuilder::new();
        assert!(!builder.validate_study());
        assert!(builder
            .validation_errors()
            .contains(&ValidationIssue::new("title", "Title is required")));
    }

    #[test]
    fn test_validate_stimulus_count() {
        let mut builder = ready_builder();
        builder.add_stimulus(text("extra").with_status(UploadStatus::Pending));
        assert!(builder.validate_study());

        builder.remove_stimulus("s-0");
        assert!(!builder.validate_study());
        let issue = &builder.validation_errors()[0];
        assert_eq!(issue.field, "stimuli");
        assert!(issue.message.contains("must match grid cells"));
        assert_eq!(
            issue.message,
            "Stimulus count must match grid cells (15 vs 16)"
        );
    }

    #[test]
    fn test_validate_reports_grid_message() {
        let mut builder = ready_builder();
        builder.update_grid(GridPatch {
            total_cells: Some(17),
            ..Default::default()
        });
        assert!(!builder.validate_study());
        let fields: Vec<&str> = builder
            .validation_errors()
            .iter()
            .map(|i| i.field.as_str())
            .collect();
        assert_eq!(fields, vec!["grid", "stimuli"]);
        assert_eq!(
            builder.validation_errors()[0].message,
            "Column cells sum to 16 but totalCells is 17"
        );
    }

    #[test]
    fn test_validate_does_not_accumulate() {
        let mut builder = StudyBuilder::new();
        assert!(!builder.validate_study());
        let first = builder.validation_errors().len();
        assert!(!builder.validate_study());
        assert_eq!(builder.validation_errors().len(), first);

        let mut ready = ready_builder();
        assert!(ready.validate_study());
        assert!(ready.validation_errors().is_empty());
    }

    #[test]
    fn test_edit_grid_marks_dirty() {
        let mut builder = StudyBuilder::new();
        builder
            .edit_grid(|g| g.set_distribution(Distribution::Flat))
            .unwrap();
        assert!(builder.is_dirty());
        assert_eq!(builder.grid().distribution, Distribution::Flat);
    }

    #[test]
    fn test_subscribers_see_revisions() {
        let mut builder = StudyBuilder::new();
        let mut rx = builder.subscribe();
        builder.add_stimulus(text("a"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
        builder.reset();
        assert_eq!(*rx.borrow_and_update(), 2);
        assert!(!builder.is_dirty());
        assert!(builder.stimuli().is_empty());
    }

    #[tokio::test]
    async fn test_save_refuses_invalid_study() {
        let storage = MockStorage::new();
        let mut builder = StudyBuilder::new();
        let err = builder.save(&storage, "study-1").await.unwrap_err();
        assert!(matches!(err, BuilderError::Invalid { .. }));
        assert!(!builder.validation_errors().is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_study_and_clears_dirty() {
        let mut storage = MockStorage::new();
        storage.expect_get_study().returning(|_| Ok(None));
        storage
            .expect_create_study()
            .withf(|study| study.id == "study-1" && study.title == "Attitudes to cycling")
            .times(1)
            .returning(|_| Ok(()));
        storage
            .expect_save_grid_configuration()
            .times(1)
            .returning(|_, grid| Ok(grid.clone()));

        let mut builder = ready_builder();
        builder.save(&storage, "study-1").await.unwrap();
        assert!(!builder.is_dirty());
    }

    #[tokio::test]
    async fn test_save_existing_study_writes_grid_before_metadata() {
        let mut storage = MockStorage::new();
        storage
            .expect_get_study()
            .returning(|_| Ok(Some(Study::new("Old title").with_id("study-1"))));
        storage.expect_save_grid_configuration().returning(|_, _| {
            Err(crate::error::StorageError::Validation {
                message: "grid locked".to_string(),
            })
        });
        storage.expect_update_study().times(0);

        let mut builder = ready_builder();
        let err = builder.save(&storage, "study-1").await.unwrap_err();
        assert!(matches!(
            err,
            BuilderError::Save(crate::error::StorageError::Validation { .. })
        ));
        assert!(builder.is_dirty());
    }

    #[tokio::test]
    async fn test_save_new_study_removed_when_grid_refused() {
        let mut storage = MockStorage::new();
        storage.expect_get_study().returning(|_| Ok(None));
        storage.expect_create_study().times(1).returning(|_| Ok(()));
        storage.expect_save_grid_configuration().returning(|_, _| {
            Err(crate::error::StorageError::Validation {
                message: "grid locked".to_string(),
            })
        });
        storage
            .expect_delete_study()
            .withf(|id| id == "study-1")
            .times(1)
            .returning(|_| Ok(()));

        let mut builder = ready_builder();
        assert!(builder.save(&storage, "study-1").await.is_err());
        assert!(builder.is_dirty());
    }

    #[tokio::test]
    async fn test_save_propagates_gateway_failure() {
        let mut storage = MockStorage::new();
        storage.expect_get_study().returning(|_| {
            Err(crate::error::StorageError::Connection {
                message: "offline".to_string(),
            })
        });

        let mut builder = ready_builder();
        let err = builder.save(&storage, "study-1").await.unwrap_err();
        assert!(matches!(err, BuilderError::Save(_)));
        assert!(builder.is_dirty());
    }
}
