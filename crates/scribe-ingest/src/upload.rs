//! Resumable upload state machine (tus-style)
//!
//! States: created -> receiving -> complete (-> deduplicated | -> ingested).
//! Bytes land in a blob file under `<chunks_dir>/<dossier_id>/<upload_id>`;
//! the persisted offset is a checkpoint flushed periodically, so a crash
//! mid-patch loses at most one checkpoint window and the client resumes
//! from HEAD.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use scribe_core::{Caller, Error, Result};
use scribe_storage::{BlobRow, CreateBlob, CreateUpload, Database, UploadRow};

/// Bytes written between offset checkpoints
const CHECKPOINT_BYTES: i64 = 4 * 1024 * 1024;

/// I/O buffer size for patch streaming
const COPY_BUF_BYTES: usize = 64 * 1024;

/// Result of completing an upload
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub upload: UploadRow,
    pub content_hash: String,
    /// Path of the canonical blob (the prior one on a dedup hit)
    pub blob_path: String,
    pub deduplicated: bool,
    /// The workflow run that previously ingested this content, if any
    pub prior_run_id: Option<String>,
}

/// Progress of one PATCH
#[derive(Debug, Clone, Copy)]
pub struct PatchOutcome {
    pub new_offset: i64,
    pub total_size: i64,
}

impl PatchOutcome {
    pub fn is_final(&self) -> bool {
        self.new_offset == self.total_size
    }
}

/// Manages resumable uploads over the main datastore and the chunks dir.
#[derive(Clone)]
pub struct UploadManager {
    db: Database,
    chunks_dir: PathBuf,
    max_upload_size: i64,
    // Serializes patch/complete per upload id; entries are cheap and pruned
    // when the upload completes
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl UploadManager {
    pub fn new(db: Database, chunks_dir: PathBuf, max_upload_size: i64) -> Self {
        Self {
            db,
            chunks_dir,
            max_upload_size,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn max_upload_size(&self) -> i64 {
        self.max_upload_size
    }

    fn lock_for(&self, upload_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create an upload row and allocate its blob file.
    pub async fn create(
        &self,
        caller: &Caller,
        dossier_id: &str,
        total_size: i64,
    ) -> Result<UploadRow> {
        if total_size <= 0 {
            return Err(Error::validation("Upload-Length must be positive"));
        }
        if total_size > self.max_upload_size {
            return Err(Error::validation(format!(
                "upload of {total_size} bytes exceeds cap of {}",
                self.max_upload_size
            )));
        }

        let dossier = self
            .db
            .get_dossier(dossier_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("dossier {dossier_id}")))?;
        caller.check_owner(&dossier.owner_id)?;

        let upload_id = scribe_core::mint_id();
        let blob_path = self.chunks_dir.join(dossier_id).join(&upload_id);
        if let Some(parent) = blob_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(format!("create chunks dir: {e}")))?;
        }
        tokio::fs::File::create(&blob_path)
            .await
            .map_err(|e| Error::storage(format!("allocate blob: {e}")))?;

        let row = self
            .db
            .create_upload(CreateUpload {
                id: upload_id,
                dossier_id: dossier_id.to_string(),
                owner_id: dossier.owner_id,
                total_size,
                blob_path: blob_path.to_string_lossy().to_string(),
            })
            .await?;

        debug!(upload_id = %row.id, dossier_id, total_size, "Upload created");
        Ok(row)
    }

    /// Current offset and length, for HEAD/resume.
    pub async fn offset(&self, caller: &Caller, upload_id: &str) -> Result<(i64, i64)> {
        let row = self.fetch_owned(caller, upload_id).await?;
        Ok((row.offset_bytes, row.total_size))
    }

    /// Append bytes at `client_offset`.
    ///
    /// The offset must equal the server's checkpoint or the call conflicts.
    /// Bytes past `total_size` are not written; the upload is then ready to
    /// complete.
    pub async fn patch(
        &self,
        caller: &Caller,
        upload_id: &str,
        client_offset: i64,
        mut body: impl AsyncRead + Unpin,
    ) -> Result<PatchOutcome> {
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;

        let row = self.fetch_owned(caller, upload_id).await?;
        if !row.is_receiving() {
            return Err(Error::conflict("upload already complete"));
        }
        if client_offset != row.offset_bytes {
            return Err(Error::conflict(format!(
                "offset mismatch: client {client_offset}, server {}",
                row.offset_bytes
            )));
        }

        // Drop any bytes past the last checkpoint (left by a crash mid-patch)
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&row.blob_path)
            .await
            .map_err(|e| Error::storage(format!("open blob: {e}")))?;
        file.set_len(row.offset_bytes as u64)
            .await
            .map_err(|e| Error::storage(format!("truncate blob: {e}")))?;
        let mut writer = tokio::io::BufWriter::new(file);
        // Position at the end after the truncate
        writer
            .seek(std::io::SeekFrom::Start(row.offset_bytes as u64))
            .await
            .map_err(|e| Error::storage(format!("seek blob: {e}")))?;

        let mut offset = row.offset_bytes;
        let mut since_checkpoint: i64 = 0;
        let mut buf = vec![0u8; COPY_BUF_BYTES];

        loop {
            let remaining = row.total_size - offset;
            if remaining == 0 {
                break;
            }
            let want = remaining.min(buf.len() as i64) as usize;
            let n = body
                .read(&mut buf[..want])
                .await
                .map_err(|e| Error::storage(format!("read body: {e}")))?;
            if n == 0 {
                break;
            }

            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| Error::storage(format!("write blob: {e}")))?;
            offset += n as i64;
            since_checkpoint += n as i64;

            if since_checkpoint >= CHECKPOINT_BYTES {
                writer
                    .flush()
                    .await
                    .map_err(|e| Error::storage(format!("flush blob: {e}")))?;
                self.db.update_upload_offset(upload_id, offset).await?;
                since_checkpoint = 0;
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| Error::storage(format!("flush blob: {e}")))?;
        self.db.update_upload_offset(upload_id, offset).await?;

        debug!(upload_id, offset, total = row.total_size, "Patch applied");
        Ok(PatchOutcome {
            new_offset: offset,
            total_size: row.total_size,
        })
    }

    /// Complete the upload: hash, dedup against the owner's blobs, register.
    ///
    /// Idempotent: repeated completes return the same result.
    pub async fn complete(&self, caller: &Caller, upload_id: &str) -> Result<CompletedUpload> {
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;

        let row = self.fetch_owned(caller, upload_id).await?;

        if let Some(hash) = row.content_hash.clone() {
            // Already completed: reconstruct the original outcome
            let prior = self.db.find_blob(&row.owner_id, &hash).await?;
            let (blob_path, prior_run_id) = match &prior {
                Some(blob) => (blob.blob_path.clone(), blob.run_id.clone()),
                None => (row.blob_path.clone(), None),
            };
            return Ok(CompletedUpload {
                deduplicated: row.deduplicated,
                content_hash: hash,
                blob_path,
                prior_run_id,
                upload: row,
            });
        }

        if row.offset_bytes != row.total_size {
            return Err(Error::validation(format!(
                "upload incomplete: {} of {} bytes",
                row.offset_bytes, row.total_size
            )));
        }

        let content_hash = hash_file(&row.blob_path).await?;

        let prior: Option<BlobRow> = self.db.find_blob(&row.owner_id, &content_hash).await?;
        let completed = match prior {
            Some(blob) => {
                // Same bytes already ingested for this owner: discard ours
                if blob.blob_path != row.blob_path {
                    if let Err(e) = tokio::fs::remove_file(&row.blob_path).await {
                        warn!(upload_id, "Failed to discard duplicate blob: {}", e);
                    }
                }
                let upload = self
                    .db
                    .complete_upload(upload_id, &content_hash, true)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("upload {upload_id}")))?;
                info!(upload_id, content_hash = %content_hash, "Upload deduplicated");
                CompletedUpload {
                    upload,
                    content_hash,
                    blob_path: blob.blob_path.clone(),
                    deduplicated: true,
                    prior_run_id: blob.run_id,
                }
            }
            None => {
                self.db
                    .register_blob(CreateBlob {
                        content_hash: content_hash.clone(),
                        owner_id: row.owner_id.clone(),
                        blob_path: row.blob_path.clone(),
                        size: row.total_size,
                    })
                    .await?;
                let upload = self
                    .db
                    .complete_upload(upload_id, &content_hash, false)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("upload {upload_id}")))?;
                info!(upload_id, content_hash = %content_hash, "Upload complete");
                CompletedUpload {
                    blob_path: upload.blob_path.clone(),
                    upload,
                    content_hash,
                    deduplicated: false,
                    prior_run_id: None,
                }
            }
        };

        self.locks.remove(upload_id);
        Ok(completed)
    }

    async fn fetch_owned(&self, caller: &Caller, upload_id: &str) -> Result<UploadRow> {
        let row = self
            .db
            .get_upload(upload_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("upload {upload_id}")))?;
        caller.check_owner(&row.owner_id)?;
        Ok(row)
    }
}

/// Stream the file through sha256 without loading it whole.
async fn hash_file(path: &str) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::storage(format!("open blob for hashing: {e}")))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUF_BYTES];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| Error::storage(format!("read blob: {e}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
