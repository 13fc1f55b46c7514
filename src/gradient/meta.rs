//! State machine over per-object gradient records, stored as JSON under
//! `gradient:<storageKey>` in `MetaStore` with a 30-day TTL refreshed on
//! every read and write. New module — the teacher has no equivalent
//! durable-metadata state machine — modeled on the same
//! fetch-then-typed-mutate discipline `db_actor.rs` uses around its own
//! state.

use crate::error::Result;
use crate::meta_store::MetaStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientData {
    pub palette: Vec<String>,
    pub primary: String,
    pub secondary: String,
    pub foreground: String,
    pub css: String,
    pub blur_data_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientRecord {
    pub status: GradientStatus,
    pub gradient: Option<GradientData>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Duration of the last completed processing attempt, feeding the
    /// worker's `avgProcessingTimeMs` metric.
    pub duration_ms: Option<u64>,
}

impl GradientRecord {
    fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: GradientStatus::Pending,
            gradient: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            duration_ms: None,
        }
    }
}

fn record_key(storage_key: &str) -> String {
    format!("gradient:{storage_key}")
}

pub struct GradientMeta<'a> {
    store: &'a dyn MetaStore,
}

impl<'a> GradientMeta<'a> {
    pub fn new(store: &'a dyn MetaStore) -> Self {
        Self { store }
    }

    /// Records that fail schema parsing are treated as absent, never
    /// partially usable.
    pub async fn get(&self, storage_key: &str) -> Result<Option<GradientRecord>> {
        let raw = self.store.get(&record_key(storage_key)).await?;
        Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
    }

    pub async fn get_many(&self, storage_keys: &[String]) -> Result<Vec<Option<GradientRecord>>> {
        let mut out = Vec::with_capacity(storage_keys.len());
        for key in storage_keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn put(&self, storage_key: &str, record: &GradientRecord) -> Result<()> {
        let json = serde_json::to_string(record).map_err(|e| {
            crate::error::Error::internal(format!("gradient record serialize failed: {e}"))
        })?;
        self.store.set_ex(&record_key(storage_key), &json, TTL_SECS).await
    }

    /// No-op if the current record is already `completed` — never
    /// regresses a good record back to pending.
    pub async fn mark_pending(&self, storage_key: &str) -> Result<()> {
        if let Some(existing) = self.get(storage_key).await? {
            if existing.status == GradientStatus::Completed {
                return Ok(());
            }
        }
        self.put(storage_key, &GradientRecord::pending(Utc::now())).await
    }

    /// No-op if no record exists yet (enqueue always creates one via
    /// `mark_pending` first).
    pub async fn mark_processing(&self, storage_key: &str) -> Result<()> {
        let Some(mut record) = self.get(storage_key).await? else {
            return Ok(());
        };
        record.status = GradientStatus::Processing;
        record.updated_at = Utc::now();
        self.put(storage_key, &record).await
    }

    pub async fn bump_attempts(&self, storage_key: &str) -> Result<u32> {
        let mut record = self
            .get(storage_key)
            .await?
            .unwrap_or_else(|| GradientRecord::pending(Utc::now()));
        record.attempts += 1;
        record.updated_at = Utc::now();
        let attempts = record.attempts;
        self.put(storage_key, &record).await?;
        Ok(attempts)
    }

    pub async fn mark_completed(
        &self,
        storage_key: &str,
        gradient: GradientData,
        duration_ms: u64,
    ) -> Result<()> {
        let now = Utc::now();
        let mut record = self
            .get(storage_key)
            .await?
            .unwrap_or_else(|| GradientRecord::pending(now));
        record.status = GradientStatus::Completed;
        record.gradient = Some(gradient);
        record.last_error = None;
        record.updated_at = now;
        record.duration_ms = Some(duration_ms);
        self.put(storage_key, &record).await
    }

    pub async fn mark_failed(&self, storage_key: &str, err: impl Into<String>) -> Result<()> {
        let now = Utc::now();
        let mut record = self
            .get(storage_key)
            .await?
            .unwrap_or_else(|| GradientRecord::pending(now));
        record.status = GradientStatus::Failed;
        record.last_error = Some(err.into());
        record.updated_at = now;
        self.put(storage_key, &record).await
    }

    pub async fn delete(&self, storage_key: &str) -> Result<()> {
        self.store.delete(&record_key(storage_key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta_store::fake::FakeMetaStore;

    #[tokio::test]
    async fn mark_pending_does_not_regress_completed_record() {
        let store = FakeMetaStore::default();
        let meta = GradientMeta::new(&store);

        meta.mark_pending("k").await.unwrap();
        meta.mark_completed(
            "k",
            GradientData {
                palette: vec!["#fff".into()],
                primary: "#fff".into(),
                secondary: "#000".into(),
                foreground: "#000".into(),
                css: "linear-gradient(#fff, #000)".into(),
                blur_data_url: "data:image/png;base64,".into(),
            },
            12,
        )
        .await
        .unwrap();

        meta.mark_pending("k").await.unwrap();
        let record = meta.get("k").await.unwrap().unwrap();
        assert_eq!(record.status, GradientStatus::Completed);
    }

    #[tokio::test]
    async fn mark_processing_is_noop_without_existing_record() {
        let store = FakeMetaStore::default();
        let meta = GradientMeta::new(&store);

        meta.mark_processing("missing").await.unwrap();
        assert!(meta.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unparseable_record_is_treated_as_absent() {
        let store = FakeMetaStore::default();
        store.set(&record_key("k"), "not json").await.unwrap();

        let meta = GradientMeta::new(&store);
        assert!(meta.get("k").await.unwrap().is_none());
    }
}
