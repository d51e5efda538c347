use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document lifecycle. The processor only ever moves documents between
/// `imported`/`ready`/`failed` and `processing`; `filling`/`filled` belong
/// to the downstream fill stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Imported,
    Processing,
    Ready,
    Filling,
    Filled,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Imported => "imported",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Filling => "filling",
            DocumentStatus::Filled => "filled",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "imported" => Some(DocumentStatus::Imported),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "filling" => Some(DocumentStatus::Filling),
            "filled" => Some(DocumentStatus::Filled),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub storage_key_original: String,
    pub storage_key_filled: Option<String>,
    pub status: DocumentStatus,
    pub page_count: Option<i64>,
    pub hash_fingerprint: Option<String>,
    pub acroform: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A freshly imported document with everything downstream unset.
    pub fn new_imported(
        user_id: Uuid,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        storage_key_original: impl Into<String>,
        hash_fingerprint: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            storage_key_original: storage_key_original.into(),
            storage_key_filled: None,
            status: DocumentStatus::Imported,
            page_count: None,
            hash_fingerprint,
            acroform: false,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted mirror of a `FieldDetection`, owned by one document.
#[derive(Debug, Clone, Serialize)]
pub struct FieldRegionRow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub page_index: i64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub field_type: String,
    pub label: String,
    pub confidence: f64,
    pub template_key: Option<String>,
    pub created_at: DateTime<Utc>,
}
