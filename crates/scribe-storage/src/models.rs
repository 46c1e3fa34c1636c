// Row and input types for the main datastore

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Ownership container for ingested artifacts
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DossierRow {
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDossier {
    /// Pre-minted opaque id (never derived from the owner)
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
}

/// Resumable upload row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UploadRow {
    pub id: String,
    pub dossier_id: String,
    pub owner_id: String,
    pub total_size: i64,
    pub offset_bytes: i64,
    pub blob_path: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub deduplicated: bool,
}

impl UploadRow {
    /// Receiving: created but not yet completed.
    pub fn is_receiving(&self) -> bool {
        self.completed_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CreateUpload {
    pub id: String,
    pub dossier_id: String,
    pub owner_id: String,
    pub total_size: i64,
    pub blob_path: String,
}

/// Content-addressed blob registration (owner-scoped dedup table)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BlobRow {
    pub content_hash: String,
    pub owner_id: String,
    pub blob_path: String,
    pub size: i64,
    /// Workflow run that ingested this content, once submitted
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateBlob {
    pub content_hash: String,
    pub owner_id: String,
    pub blob_path: String,
    pub size: i64,
}

/// Final OCR output registered by the terminal workflow step
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DocumentRow {
    pub id: String,
    pub dossier_id: String,
    pub owner_id: String,
    pub run_id: String,
    pub page: i64,
    pub text_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub dossier_id: String,
    pub owner_id: String,
    pub run_id: String,
    pub page: i64,
    pub text_path: String,
}
