//! Orchestrates the assembled-file → ObjectStore put → checksum
//! round-trip → gradient enqueue → progress-completion pipeline.
//! Grounded on the teacher's `api/upload.rs::complete_upload` orchestration
//! shape: assemble, move to permanent storage, run side effects, then
//! clean up regardless of outcome.

use crate::error::{Error, Result};
use crate::gallery::{GalleryDirectory, resolve_slug};
use crate::gradient::{GradientEnqueuer, NewGradientJob};
use crate::meta_store::MetaStore;
use crate::object_store::{ObjectStore, PutOptions};
use crate::upload::assembler;
use crate::upload::session::{ProgressCounters, UploadPhase, UploadSessionStore, UploadStatus};
use chrono::Utc;
use std::sync::Arc;
use tokio::fs;

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "image/bmp",
    "image/tiff",
    "image/x-icon",
];

#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub storage_key: String,
    pub crc32_base64: String,
    pub md5_base64: String,
    pub gradient_job_id: Option<String>,
}

pub struct FinalizePipeline {
    pub sessions: UploadSessionStore,
    pub gallery_directory: Arc<dyn GalleryDirectory>,
    pub object_store: Arc<dyn ObjectStore>,
    pub meta_store: Arc<dyn MetaStore>,
    pub gradient_enqueuer: Arc<dyn GradientEnqueuer>,
}

impl FinalizePipeline {
    pub async fn finalize(&self, upload_id: &str) -> Result<FinalizeOutcome> {
        let result = self.run(upload_id).await;

        if let Err(e) = self.sessions.cleanup(upload_id).await {
            tracing::warn!(upload_id, error = %e, "failed to release upload session after finalize");
        }

        result
    }

    async fn run(&self, upload_id: &str) -> Result<FinalizeOutcome> {
        let session = self.sessions.get_metadata(upload_id).await?;

        let assembled = assembler::assemble(
            &session.temp_dir,
            upload_id,
            &session.file_name,
            session.total_size,
        )
        .await;

        let assembled = match assembled {
            Ok(a) => a,
            Err(e) => {
                let _ = self.sessions.mark_failed(upload_id, e.to_string()).await;
                return Err(e);
            }
        };

        if let Err(e) = self.validate_content_type(upload_id, &session.file_type, &assembled.path).await {
            return Err(e);
        }

        self.sessions
            .update_progress(
                upload_id,
                UploadStatus::Processing,
                UploadPhase::ServerUpload,
                ProgressCounters {
                    total_files: Some(1),
                    processed_files: Some(0),
                    ..Default::default()
                },
            )
            .await?;

        let gallery_slug = resolve_slug(self.gallery_directory.as_ref(), &session.guild_id, &session.gallery_name)?;
        let date = Utc::now().format("%Y-%m-%d");
        let object_name = format!("uploads/{date}/{}", session.file_name);
        let storage_key = format!("{gallery_slug}/{object_name}");

        let file_bytes = fs::read(&assembled.path).await.map_err(|e| {
            Error::Io { error: e, path: assembled.path.display().to_string() }
        })?;

        let put_result = self
            .object_store
            .put(
                &storage_key,
                file_bytes,
                PutOptions {
                    content_type: Some(session.file_type.clone()),
                    crc32_base64: Some(assembled.checksums.crc32_base64.clone()),
                },
            )
            .await;

        fs::remove_file(&assembled.path).await.ok();

        put_result?;

        if let Err(e) = self.verify_checksum_round_trip(upload_id, &storage_key, &assembled.checksums.crc32_base64).await {
            return Err(e);
        }

        let gradient_job_id = self
            .gradient_enqueuer
            .enqueue(NewGradientJob {
                guild_id: session.guild_id.clone(),
                gallery_name: session.gallery_name.clone(),
                storage_key: storage_key.clone(),
                item_id: session.file_name.clone(),
            })
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(upload_id, error = %e, "gradient enqueue failed, continuing");
                None
            });

        self.sessions.mark_completed(upload_id, 1).await?;

        let counter_key = format!("gallery:{}:{}:itemCount", session.guild_id, gallery_slug);
        if let Err(e) = self.meta_store.incr_by(&counter_key, 1).await {
            tracing::warn!(upload_id, error = %e, "failed to increment gallery item count");
        }

        Ok(FinalizeOutcome {
            storage_key,
            crc32_base64: assembled.checksums.crc32_base64,
            md5_base64: assembled.checksums.md5_base64,
            gradient_job_id,
        })
    }

    async fn validate_content_type(&self, upload_id: &str, file_type: &str, assembled_path: &std::path::Path) -> Result<()> {
        if ALLOWED_CONTENT_TYPES.contains(&file_type) {
            return Ok(());
        }

        fs::remove_file(assembled_path).await.ok();
        let message = format!("unsupported file type: {file_type}");
        let _ = self.sessions.mark_failed(upload_id, &message).await;
        Err(Error::invalid(message))
    }

    /// Step 7 of the finalize pipeline: a missing remote checksum is only
    /// a warning (the store may not support it), a mismatch is a hard
    /// integrity failure that rolls back the just-written object.
    async fn verify_checksum_round_trip(&self, upload_id: &str, storage_key: &str, local_crc32: &str) -> Result<()> {
        let remote = self.object_store.get_checksums(storage_key).await?;

        match remote.crc32_base64 {
            None => {
                tracing::warn!(upload_id, storage_key, "remote store did not echo a crc32, skipping verification");
                Ok(())
            }
            Some(remote_crc32) if remote_crc32 == local_crc32 => Ok(()),
            Some(_) => {
                if let Err(e) = self.object_store.delete(storage_key).await {
                    tracing::error!(upload_id, storage_key, error = %e, "failed to delete object after checksum mismatch");
                }
                let message = format!("Checksum mismatch for {storage_key}");
                let _ = self.sessions.mark_failed(upload_id, &message).await;
                Err(Error::integrity(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::Gallery;
    use crate::meta_store::fake::FakeMetaStore;
    use crate::object_store::{Checksums, GetObject};
    use crate::upload::session::InitiateUpload;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    struct FakeDirectory;
    impl GalleryDirectory for FakeDirectory {
        fn galleries_in_guild(&self, guild_id: &str) -> Vec<Gallery> {
            vec![Gallery { guild_id: guild_id.to_string(), name: "Summer Trip".to_string() }]
        }
    }

    #[derive(Default)]
    struct FakeObjectStore {
        put_bodies: Mutex<Vec<(String, Vec<u8>)>>,
        deleted: Mutex<Vec<String>>,
        remote_crc32: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn put(&self, key: &str, body: Vec<u8>, opts: PutOptions) -> Result<()> {
            *self.remote_crc32.lock().unwrap() = opts.crc32_base64;
            self.put_bodies.lock().unwrap().push((key.to_string(), body));
            Ok(())
        }
        async fn get(&self, _key: &str) -> Result<GetObject> {
            unimplemented!()
        }
        async fn get_checksums(&self, _key: &str) -> Result<Checksums> {
            Ok(Checksums { crc32_base64: self.remote_crc32.lock().unwrap().clone() })
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }
        async fn list_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct NoopEnqueuer;
    #[async_trait]
    impl GradientEnqueuer for NoopEnqueuer {
        async fn enqueue(&self, _job: NewGradientJob) -> Result<Option<String>> {
            Ok(Some("gradient-test".to_string()))
        }
    }

    async fn write_chunks(sessions: &UploadSessionStore, upload_id: &str, data: &[u8], chunk_size: usize) {
        let session = sessions.get_metadata(upload_id).await.unwrap();
        for (i, chunk) in data.chunks(chunk_size).enumerate() {
            let path = session.temp_dir.join(format!("chunk-{i}"));
            let mut f = tokio::fs::File::create(&path).await.unwrap();
            f.write_all(chunk).await.unwrap();
        }
    }

    fn pipeline(object_store: Arc<FakeObjectStore>, sessions: UploadSessionStore) -> FinalizePipeline {
        FinalizePipeline {
            sessions,
            gallery_directory: Arc::new(FakeDirectory),
            object_store,
            meta_store: Arc::new(FakeMetaStore::default()),
            gradient_enqueuer: Arc::new(NoopEnqueuer),
        }
    }

    #[tokio::test]
    async fn happy_path_finalizes_and_enqueues_gradient() {
        let sessions = UploadSessionStore::new();
        let upload_id = sessions
            .initiate(InitiateUpload {
                file_name: "p.jpg".to_string(),
                file_type: "image/jpeg".to_string(),
                gallery_name: "Summer Trip".to_string(),
                guild_id: "g1".to_string(),
                total_size: 9,
            })
            .await
            .unwrap();

        write_chunks(&sessions, &upload_id, b"abcdefghi", 3).await;

        let object_store = Arc::new(FakeObjectStore::default());
        let outcome = pipeline(object_store.clone(), sessions.clone())
            .finalize(&upload_id)
            .await
            .unwrap();

        assert!(outcome.storage_key.starts_with("summer-trip/uploads/"));
        assert!(outcome.storage_key.ends_with("/p.jpg"));
        assert_eq!(outcome.gradient_job_id.as_deref(), Some("gradient-test"));
        assert_eq!(object_store.put_bodies.lock().unwrap().len(), 1);

        let progress = sessions.get_progress(&upload_id).await.unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
    }

    #[tokio::test]
    async fn checksum_mismatch_deletes_object_and_fails_session() {
        let sessions = UploadSessionStore::new();
        let upload_id = sessions
            .initiate(InitiateUpload {
                file_name: "p.jpg".to_string(),
                file_type: "image/jpeg".to_string(),
                gallery_name: "Summer Trip".to_string(),
                guild_id: "g1".to_string(),
                total_size: 9,
            })
            .await
            .unwrap();

        write_chunks(&sessions, &upload_id, b"abcdefghi", 3).await;

        let object_store = Arc::new(FakeObjectStore::default());
        *object_store.remote_crc32.lock().unwrap() = Some("tampered".to_string());

        let pipeline = FinalizePipeline {
            sessions: sessions.clone(),
            gallery_directory: Arc::new(FakeDirectory),
            object_store: object_store.clone(),
            meta_store: Arc::new(FakeMetaStore::default()),
            gradient_enqueuer: Arc::new(NoopEnqueuer),
        };

        let err = pipeline.finalize(&upload_id).await.unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(err.to_string().contains("Checksum"));
        assert_eq!(object_store.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_content_type_fails_before_upload() {
        let sessions = UploadSessionStore::new();
        let upload_id = sessions
            .initiate(InitiateUpload {
                file_name: "p.exe".to_string(),
                file_type: "application/octet-stream".to_string(),
                gallery_name: "Summer Trip".to_string(),
                guild_id: "g1".to_string(),
                total_size: 3,
            })
            .await
            .unwrap();

        write_chunks(&sessions, &upload_id, b"abc", 3).await;

        let object_store = Arc::new(FakeObjectStore::default());
        let err = pipeline(object_store.clone(), sessions).finalize(&upload_id).await.unwrap_err();

        assert!(matches!(err, Error::InvalidInput { .. }));
        assert!(object_store.put_bodies.lock().unwrap().is_empty());
    }
}
