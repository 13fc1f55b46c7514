//! Upload session lifecycle: staging directory per session, progress state,
//! and TTL-based reaping. Generalized from the teacher's `UploadSession` —
//! a single package tarball assembled from chunks — into a session that
//! also tracks a multi-phase progress record, since a photo upload has
//! more visible phases than a package upload does.

use crate::error::{Error, Result, ResultIoExt};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Upload sessions are reaped 24h after creation.
pub const SESSION_TTL: Duration = Duration::hours(24);
/// Terminal progress records are reaped 5 minutes after `completedAt`.
pub const PROGRESS_TTL: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadPhase {
    ClientUpload,
    ServerAssemble,
    ServerZipExtract,
    ServerUpload,
}

/// Observable partial progress counters. Any field may be unknown until
/// the phase that populates it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub total_bytes: Option<u64>,
    pub uploaded_bytes: Option<u64>,
    pub total_files: Option<u32>,
    pub processed_files: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProgress {
    pub status: UploadStatus,
    pub phase: UploadPhase,
    pub progress: ProgressCounters,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub phase_started_at: DateTime<Utc>,
}

impl UploadProgress {
    fn new(now: DateTime<Utc>, total_bytes: u64) -> Self {
        Self {
            status: UploadStatus::Pending,
            phase: UploadPhase::ClientUpload,
            progress: ProgressCounters {
                total_bytes: Some(total_bytes),
                uploaded_bytes: Some(0),
                total_files: None,
                processed_files: None,
            },
            error: None,
            completed_at: None,
            phase_started_at: now,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.status, UploadStatus::Completed | UploadStatus::Failed)
    }

    fn is_reapable(&self, now: DateTime<Utc>) -> bool {
        self.completed_at
            .is_some_and(|at| now - at > PROGRESS_TTL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub file_name: String,
    pub file_type: String,
    pub gallery_name: String,
    pub guild_id: String,
    pub temp_dir: PathBuf,
    pub total_size: u64,
    pub created_at: DateTime<Utc>,
    /// MIME type sniffed from the assembled file's magic bytes, used only
    /// by the archive-signature check in `ChunkAssembler` step 5.
    pub content_sniffed_type: Option<String>,
}

impl UploadSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > SESSION_TTL
    }
}

/// Request shape accepted by `initiate`.
pub struct InitiateUpload {
    pub file_name: String,
    pub file_type: String,
    pub gallery_name: String,
    pub guild_id: String,
    pub total_size: u64,
}

/// Reduce a client-supplied filename to a safe basename: strip any
/// directory components, reject `.`/`..`/empty results, and fall back to a
/// uuid-derived name rather than ever trusting unsafe input through to a
/// path join.
pub fn sanitize_file_name(raw: &str) -> String {
    let candidate = std::path::Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let is_unsafe = candidate.is_empty()
        || candidate == "."
        || candidate == ".."
        || candidate.contains(['/', '\\', '\0']);

    if is_unsafe {
        format!("upload-{}", Uuid::new_v4())
    } else {
        candidate.to_string()
    }
}

struct SessionEntry {
    session: UploadSession,
    progress: UploadProgress,
}

/// Holds sessions in process memory, each owning a staging directory under
/// the OS temp dir. Single-writer per `uploadId` is the caller's
/// discipline, not enforced here (spec §4.2, §5).
#[derive(Clone)]
pub struct UploadSessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl Default for UploadSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadSessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn staging_dir_for(upload_id: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chunked-upload-{upload_id}"))
    }

    pub async fn initiate(&self, req: InitiateUpload) -> Result<String> {
        let upload_id = Uuid::new_v4().to_string();
        let temp_dir = Self::staging_dir_for(&upload_id);

        fs::create_dir_all(&temp_dir).await.map_io_err(&temp_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_dir, std::fs::Permissions::from_mode(0o700))
                .await
                .map_io_err(&temp_dir)?;
        }

        let now = Utc::now();
        let session = UploadSession {
            upload_id: upload_id.clone(),
            file_name: sanitize_file_name(&req.file_name),
            file_type: req.file_type,
            gallery_name: req.gallery_name,
            guild_id: req.guild_id,
            temp_dir,
            total_size: req.total_size,
            created_at: now,
            content_sniffed_type: None,
        };

        let progress = UploadProgress::new(now, req.total_size);

        self.sessions.write().await.insert(
            upload_id.clone(),
            SessionEntry { session, progress },
        );

        Ok(upload_id)
    }

    pub async fn get_metadata(&self, upload_id: &str) -> Result<UploadSession> {
        self.sessions
            .read()
            .await
            .get(upload_id)
            .map(|e| e.session.clone())
            .ok_or_else(|| Error::not_found(format!("upload session {upload_id}")))
    }

    pub async fn get_progress(&self, upload_id: &str) -> Result<UploadProgress> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(upload_id)
            .ok_or_else(|| Error::not_found(format!("upload session {upload_id}")))?;

        if entry.progress.is_reapable(Utc::now()) {
            return Err(Error::not_found(format!("upload session {upload_id}")));
        }

        Ok(entry.progress.clone())
    }

    /// Write `chunk-<index>` atomically (write to a sibling temp name, then
    /// rename) and bump `uploadedBytes`.
    pub async fn save_chunk(&self, upload_id: &str, index: u32, data: &[u8]) -> Result<()> {
        let temp_dir = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(upload_id)
                .ok_or_else(|| Error::not_found(format!("upload session {upload_id}")))?;
            entry.session.temp_dir.clone()
        };

        if !fs::try_exists(&temp_dir).await.unwrap_or(false) {
            return Err(Error::not_found(format!("staging dir for {upload_id}")));
        }

        let final_path = temp_dir.join(format!("chunk-{index}"));
        let tmp_path = temp_dir.join(format!(".chunk-{index}.part"));

        fs::write(&tmp_path, data).await.map_io_err(&tmp_path)?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_io_err(&final_path)?;

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(upload_id)
            .ok_or_else(|| Error::not_found(format!("upload session {upload_id}")))?;

        entry.progress.status = UploadStatus::Uploading;
        entry.progress.progress.uploaded_bytes =
            Some(entry.progress.progress.uploaded_bytes.unwrap_or(0) + data.len() as u64);

        Ok(())
    }

    pub async fn update_progress(
        &self,
        upload_id: &str,
        status: UploadStatus,
        phase: UploadPhase,
        partial: ProgressCounters,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(upload_id)
            .ok_or_else(|| Error::not_found(format!("upload session {upload_id}")))?;

        if entry.progress.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        if entry.progress.phase != phase {
            entry.progress.phase_started_at = now;
        }

        entry.progress.status = status;
        entry.progress.phase = phase;
        if let Some(v) = partial.total_bytes {
            entry.progress.progress.total_bytes = Some(v);
        }
        if let Some(v) = partial.uploaded_bytes {
            entry.progress.progress.uploaded_bytes = Some(v);
        }
        if let Some(v) = partial.total_files {
            entry.progress.progress.total_files = Some(v);
        }
        if let Some(v) = partial.processed_files {
            entry.progress.progress.processed_files = Some(v);
        }

        if matches!(status, UploadStatus::Completed | UploadStatus::Failed)
            && entry.progress.completed_at.is_none()
        {
            entry.progress.completed_at = Some(now);
        }

        Ok(())
    }

    pub async fn mark_completed(&self, upload_id: &str, processed_files: u32) -> Result<()> {
        self.update_progress(
            upload_id,
            UploadStatus::Completed,
            UploadPhase::ServerUpload,
            ProgressCounters {
                processed_files: Some(processed_files),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn mark_failed(&self, upload_id: &str, err: impl Into<String>) -> Result<()> {
        let message = err.into();
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(upload_id)
            .ok_or_else(|| Error::not_found(format!("upload session {upload_id}")))?;

        if entry.progress.is_terminal() {
            return Ok(());
        }

        entry.progress.status = UploadStatus::Failed;
        entry.progress.error = Some(message);
        entry.progress.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Remove staging dir and session; idempotent.
    pub async fn cleanup(&self, upload_id: &str) -> Result<()> {
        let temp_dir = self
            .sessions
            .read()
            .await
            .get(upload_id)
            .map(|e| e.session.temp_dir.clone());

        if let Some(temp_dir) = temp_dir {
            if fs::try_exists(&temp_dir).await.unwrap_or(false) {
                fs::remove_dir_all(&temp_dir).await.map_io_err(&temp_dir)?;
            }
        }

        self.sessions.write().await.remove(upload_id);
        Ok(())
    }

    /// Remove sessions older than 24h; drop terminal progress records more
    /// than 5 min past `completedAt`.
    pub async fn cleanup_expired(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.session.is_expired(now) || entry.progress.is_reapable(now))
            .map(|(id, _)| id.clone())
            .collect();

        for upload_id in &expired {
            if let Err(e) = self.cleanup(upload_id).await {
                tracing::warn!(upload_id, error = %e, "failed to clean up expired upload session");
            }
        }

        Ok(expired)
    }
}

/// Spawn a background task that periodically reaps expired sessions and
/// stale terminal progress records.
pub fn spawn_cleanup_task(store: UploadSessionStore, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            match store.cleanup_expired().await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!(count = expired.len(), "reaped expired upload sessions");
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to reap expired upload sessions");
                }
                _ => {}
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(total_size: u64) -> InitiateUpload {
        InitiateUpload {
            file_name: "p.jpg".to_string(),
            file_type: "image/jpeg".to_string(),
            gallery_name: "Summer Trip".to_string(),
            guild_id: "g1".to_string(),
            total_size,
        }
    }

    #[test]
    fn sanitize_file_name_rejects_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert!(sanitize_file_name("..").starts_with("upload-"));
        assert!(sanitize_file_name(".").starts_with("upload-"));
        assert_eq!(sanitize_file_name("photo.jpg"), "photo.jpg");
    }

    #[tokio::test]
    async fn initiate_creates_pending_session_with_staging_dir() {
        let store = UploadSessionStore::new();
        let upload_id = store.initiate(req(12)).await.unwrap();

        let session = store.get_metadata(&upload_id).await.unwrap();
        assert!(fs::try_exists(&session.temp_dir).await.unwrap());

        let progress = store.get_progress(&upload_id).await.unwrap();
        assert_eq!(progress.status, UploadStatus::Pending);
        assert_eq!(progress.progress.total_bytes, Some(12));

        store.cleanup(&upload_id).await.unwrap();
        assert!(!fs::try_exists(&session.temp_dir).await.unwrap());
    }

    #[tokio::test]
    async fn save_chunk_updates_uploaded_bytes_and_status() {
        let store = UploadSessionStore::new();
        let upload_id = store.initiate(req(6)).await.unwrap();

        store.save_chunk(&upload_id, 0, b"abc").await.unwrap();
        store.save_chunk(&upload_id, 1, b"def").await.unwrap();

        let progress = store.get_progress(&upload_id).await.unwrap();
        assert_eq!(progress.status, UploadStatus::Uploading);
        assert_eq!(progress.progress.uploaded_bytes, Some(6));

        store.cleanup(&upload_id).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_progress_is_sticky() {
        let store = UploadSessionStore::new();
        let upload_id = store.initiate(req(3)).await.unwrap();

        store.mark_completed(&upload_id, 1).await.unwrap();
        store.mark_failed(&upload_id, "should not apply").await.unwrap();

        let progress = store.get_progress(&upload_id).await.unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
        assert!(progress.error.is_none());

        store.cleanup(&upload_id).await.unwrap();
    }

    #[tokio::test]
    async fn save_chunk_unknown_session_is_not_found() {
        let store = UploadSessionStore::new();
        let err = store.save_chunk("missing", 0, b"x").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
