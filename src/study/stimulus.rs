use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Media kind of a stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StimulusType {
    /// Written statement.
    Text,
    /// Picture.
    Image,
    /// Video clip.
    Video,
    /// Audio clip.
    Audio,
    /// Uploaded file such as a PDF.
    Document,
}

impl std::fmt::Display for StimulusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StimulusType::Text => write!(f, "TEXT"),
            StimulusType::Image => write!(f, "IMAGE"),
            StimulusType::Video => write!(f, "VIDEO"),
            StimulusType::Audio => write!(f, "AUDIO"),
            StimulusType::Document => write!(f, "DOCUMENT"),
        }
    }
}

impl std::str::FromStr for StimulusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TEXT" => Ok(StimulusType::Text),
            "IMAGE" => Ok(StimulusType::Image),
            "VIDEO" => Ok(StimulusType::Video),
            "AUDIO" => Ok(StimulusType::Audio),
            "DOCUMENT" => Ok(StimulusType::Document),
            _ => Err(format!("Unknown stimulus type: {}", s)),
        }
    }
}

/// Processing state of a stimulus' content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Waiting for the upload.
    #[default]
    Pending,
    /// Uploaded, still being processed.
    Processing,
    /// Ready to sort.
    Complete,
    /// Upload or processing failed.
    Failed,
}

impl UploadStatus {
    /// Status a freshly created stimulus starts in. Text needs no upload.
    pub fn initial_for(stimulus_type: StimulusType) -> Self {
        match stimulus_type {
            StimulusType::Text => UploadStatus::Complete,
            _ => UploadStatus::Pending,
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Pending => write!(f, "pending"),
            UploadStatus::Processing => write!(f, "processing"),
            UploadStatus::Complete => write!(f, "complete"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(UploadStatus::Pending),
            "processing" => Ok(UploadStatus::Processing),
            "complete" => Ok(UploadStatus::Complete),
            "failed" => Ok(UploadStatus::Failed),
            _ => Err(format!("Unknown upload status: {}", s)),
        }
    }
}

/// A single item participants sort onto the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stimulus {
    /// Stimulus identifier.
    pub id: String,
    /// Media kind.
    #[serde(rename = "type")]
    pub stimulus_type: StimulusType,
    /// Statement text, or the storage reference of the uploaded media.
    #[serde(default)]
    pub content: String,
    /// Free-form media details (dimensions, duration, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Processing state of the content.
    #[serde(default)]
    pub upload_status: UploadStatus,
}

impl Stimulus {
    /// Create a stimulus with a fresh id.
    pub fn new(stimulus_type: StimulusType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            stimulus_type,
            content: content.into(),
            metadata: None,
            upload_status: UploadStatus::initial_for(stimulus_type),
        }
    }

    /// Override the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the upload status
    pub fn with_status(mut self, status: UploadStatus) -> Self {
        self.upload_status = status;
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether the stimulus is ready to be placed on the grid.
    pub fn is_complete(&self) -> bool {
        self.upload_status == UploadStatus::Complete
    }

    /// Apply a partial update.
    pub fn apply_patch(&mut self, patch: &StimulusPatch) {
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(metadata) = &patch.metadata {
            self.metadata = Some(metadata.clone());
        }
        if let Some(status) = patch.upload_status {
            self.upload_status = status;
        }
    }
}

/// Request body for creating a stimulus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStimulus {
    /// Media kind.
    #[serde(rename = "type")]
    pub stimulus_type: StimulusType,
    /// Statement text or media reference.
    #[serde(default)]
    pub content: String,
    /// Free-form media details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl NewStimulus {
    /// Request body without metadata.
    pub fn new(stimulus_type: StimulusType, content: impl Into<String>) -> Self {
        Self {
            stimulus_type,
            content: content.into(),
            metadata: None,
        }
    }
}

/// Partial update for a stimulus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StimulusPatch {
    /// New content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Replacement metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// New upload status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<UploadStatus>,
}
