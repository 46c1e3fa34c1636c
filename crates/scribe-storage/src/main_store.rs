// Main datastore: dossiers, uploads, blobs, documents

use chrono::Utc;
use sqlx::SqlitePool;

use scribe_core::{Error, Result};

use crate::db::{ensure_column, open_pool};
use crate::models::*;

/// Repository facade over the main SQLite database.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the main database and initialize its schema.
    pub async fn from_url(database_url: &str) -> Result<Self> {
        Self::with_pool(open_pool(database_url).await?).await
    }

    /// Build the facade on an existing pool and initialize its schema.
    ///
    /// The job queue shares this pool when its table is co-located in the
    /// main file, so the file keeps exactly one writer.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS dossiers (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                dossier_id TEXT NOT NULL REFERENCES dossiers(id) ON DELETE CASCADE,
                owner_id TEXT NOT NULL,
                total_size INTEGER NOT NULL,
                offset_bytes INTEGER NOT NULL DEFAULT 0,
                blob_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                content_hash TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                blob_path TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (owner_id, content_hash)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                dossier_id TEXT NOT NULL REFERENCES dossiers(id) ON DELETE CASCADE,
                owner_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                text_path TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_uploads_owner ON uploads (owner_id, completed_at)",
            "CREATE INDEX IF NOT EXISTS idx_documents_dossier ON documents (dossier_id)",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::storage(e.to_string()))?;
        }

        // Additive migrations, keyed on column presence
        ensure_column(
            &self.pool,
            "uploads",
            "content_hash",
            "content_hash TEXT",
        )
        .await?;
        ensure_column(
            &self.pool,
            "uploads",
            "deduplicated",
            "deduplicated INTEGER NOT NULL DEFAULT 0",
        )
        .await?;
        ensure_column(&self.pool, "blobs", "run_id", "run_id TEXT").await?;

        Ok(())
    }

    // ============================================
    // Dossiers
    // ============================================

    pub async fn create_dossier(&self, input: CreateDossier) -> Result<DossierRow> {
        let row = sqlx::query_as::<_, DossierRow>(
            r#"
            INSERT INTO dossiers (id, owner_id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            RETURNING id, owner_id, title, created_at, updated_at
            "#,
        )
        .bind(&input.id)
        .bind(&input.owner_id)
        .bind(&input.title)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(row)
    }

    pub async fn get_dossier(&self, id: &str) -> Result<Option<DossierRow>> {
        let row = sqlx::query_as::<_, DossierRow>(
            "SELECT id, owner_id, title, created_at, updated_at FROM dossiers WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(row)
    }

    /// Delete a dossier; uploads and documents cascade.
    pub async fn delete_dossier(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dossiers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Uploads
    // ============================================

    pub async fn create_upload(&self, input: CreateUpload) -> Result<UploadRow> {
        let row = sqlx::query_as::<_, UploadRow>(
            r#"
            INSERT INTO uploads (id, dossier_id, owner_id, total_size, offset_bytes,
                                 blob_path, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)
            RETURNING id, dossier_id, owner_id, total_size, offset_bytes, blob_path,
                      created_at, completed_at, content_hash, deduplicated
            "#,
        )
        .bind(&input.id)
        .bind(&input.dossier_id)
        .bind(&input.owner_id)
        .bind(input.total_size)
        .bind(&input.blob_path)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(row)
    }

    pub async fn get_upload(&self, id: &str) -> Result<Option<UploadRow>> {
        let row = sqlx::query_as::<_, UploadRow>(
            r#"
            SELECT id, dossier_id, owner_id, total_size, offset_bytes, blob_path,
                   created_at, completed_at, content_hash, deduplicated
            FROM uploads
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(row)
    }

    /// Advance the persisted offset checkpoint. Offsets only move forward.
    pub async fn update_upload_offset(&self, id: &str, offset_bytes: i64) -> Result<()> {
        sqlx::query(
            "UPDATE uploads SET offset_bytes = ?2 WHERE id = ?1 AND offset_bytes < ?2",
        )
        .bind(id)
        .bind(offset_bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(())
    }

    /// Mark an upload complete. First writer wins; returns the row either way.
    pub async fn complete_upload(
        &self,
        id: &str,
        content_hash: &str,
        deduplicated: bool,
    ) -> Result<Option<UploadRow>> {
        sqlx::query(
            r#"
            UPDATE uploads
            SET completed_at = ?2, content_hash = ?3, deduplicated = ?4
            WHERE id = ?1 AND completed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .bind(content_hash)
        .bind(deduplicated)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        self.get_upload(id).await
    }

    /// Receiving uploads whose last activity predates `cutoff` (boot sweep).
    pub async fn list_stale_uploads(
        &self,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Vec<UploadRow>> {
        let rows = sqlx::query_as::<_, UploadRow>(
            r#"
            SELECT id, dossier_id, owner_id, total_size, offset_bytes, blob_path,
                   created_at, completed_at, content_hash, deduplicated
            FROM uploads
            WHERE completed_at IS NULL AND created_at < ?1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(rows)
    }

    // ============================================
    // Blobs (owner-scoped content-addressed dedup)
    // ============================================

    pub async fn find_blob(
        &self,
        owner_id: &str,
        content_hash: &str,
    ) -> Result<Option<BlobRow>> {
        let row = sqlx::query_as::<_, BlobRow>(
            r#"
            SELECT content_hash, owner_id, blob_path, size, run_id, created_at
            FROM blobs
            WHERE owner_id = ?1 AND content_hash = ?2
            "#,
        )
        .bind(owner_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(row)
    }

    pub async fn register_blob(&self, input: CreateBlob) -> Result<BlobRow> {
        let row = sqlx::query_as::<_, BlobRow>(
            r#"
            INSERT INTO blobs (content_hash, owner_id, blob_path, size, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (owner_id, content_hash) DO NOTHING
            RETURNING content_hash, owner_id, blob_path, size, run_id, created_at
            "#,
        )
        .bind(&input.content_hash)
        .bind(&input.owner_id)
        .bind(&input.blob_path)
        .bind(input.size)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        match row {
            Some(row) => Ok(row),
            // Lost an insert race: the existing registration wins
            None => self
                .find_blob(&input.owner_id, &input.content_hash)
                .await?
                .ok_or_else(|| Error::storage("blob vanished after conflict")),
        }
    }

    /// Attach the ingest run id to a registered blob.
    pub async fn set_blob_run(
        &self,
        owner_id: &str,
        content_hash: &str,
        run_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE blobs SET run_id = ?3 WHERE owner_id = ?1 AND content_hash = ?2",
        )
        .bind(owner_id)
        .bind(content_hash)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(())
    }

    // ============================================
    // Documents
    // ============================================

    pub async fn create_document(&self, input: CreateDocument) -> Result<DocumentRow> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO documents (id, dossier_id, owner_id, run_id, page, text_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            RETURNING id, dossier_id, owner_id, run_id, page, text_path, created_at
            "#,
        )
        .bind(scribe_core::mint_id())
        .bind(&input.dossier_id)
        .bind(&input.owner_id)
        .bind(&input.run_id)
        .bind(input.page)
        .bind(&input.text_path)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(row)
    }

    pub async fn list_documents(&self, dossier_id: &str) -> Result<Vec<DocumentRow>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, dossier_id, owner_id, run_id, page, text_path, created_at
            FROM documents
            WHERE dossier_id = ?1
            ORDER BY run_id ASC, page ASC
            "#,
        )
        .bind(dossier_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

        Ok(rows)
    }
}
