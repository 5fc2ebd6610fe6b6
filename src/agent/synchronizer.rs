use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::profile_store::ProfileStore;
use super::{RecordUploader, Synchronizer};
use crate::error::AgentResult;
use crate::models::profile::Profile;
use crate::storage::sqlite::SqliteStorage;

/// Uploads locally stored lite-mode records to the gateway in batches.
///
/// Only one run is active at a time; a nudge that arrives while a run is in
/// progress is skipped.
pub struct GatewaySynchronizer {
    storage: Arc<SqliteStorage>,
    uploader: Arc<dyn RecordUploader>,
    profiles: Arc<ProfileStore>,
    batch_size: usize,
    running: Mutex<()>,
}

impl GatewaySynchronizer {
    pub fn new(
        storage: Arc<SqliteStorage>,
        uploader: Arc<dyn RecordUploader>,
        profiles: Arc<ProfileStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            storage,
            uploader,
            profiles,
            batch_size: batch_size.max(1),
            running: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Synchronizer for GatewaySynchronizer {
    async fn synchronize(&self, profile: &Profile) -> AgentResult<()> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("synchronization already in progress");
            return Ok(());
        };

        let mut uploaded = 0;
        loop {
            let batch = self.storage.pending(self.batch_size)?;
            if batch.is_empty() {
                break;
            }
            self.uploader.upload(&batch).await?;

            let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
            self.storage.mark_synchronized(&ids)?;
            uploaded += batch.len();

            if batch.len() < self.batch_size {
                break;
            }
        }

        self.storage.purge_synchronized()?;
        self.profiles.mark_lite_synchronized();
        info!(
            uploaded = uploaded,
            running_mode = %profile.running_mode,
            "lite mode data synchronized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ProfileSource;
    use crate::error::AgentError;
    use crate::models::metadata::fixtures;
    use crate::models::profile::{RunningMode, SyncStatus};
    use crate::storage::sqlite::StoredRecord;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingUploader {
        batches: parking_lot::Mutex<Vec<Vec<i64>>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl RecordUploader for RecordingUploader {
        async fn upload(&self, records: &[StoredRecord]) -> AgentResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AgentError::GatewayStatus {
                    status: 502,
                    message: "bad gateway".to_string(),
                });
            }
            self.batches.lock().push(records.iter().map(|r| r.id).collect());
            Ok(())
        }
    }

    fn lite_exit_profile() -> Profile {
        let mut profile = Profile::with_mode(RunningMode::Protection);
        profile.last_run_mode = RunningMode::Lite;
        profile
    }

    fn setup(rows: usize, batch: usize) -> (GatewaySynchronizer, Arc<SqliteStorage>, Arc<RecordingUploader>, Arc<ProfileStore>) {
        let storage = Arc::new(SqliteStorage::open(":memory:").unwrap());
        for i in 0..rows {
            storage.insert(&fixtures::snapshot(&format!("10.0.0.{}", i))).unwrap();
        }
        let uploader = Arc::new(RecordingUploader::default());
        let profiles = Arc::new(ProfileStore::with_profile(lite_exit_profile()));
        let sync = GatewaySynchronizer::new(storage.clone(), uploader.clone(), profiles.clone(), batch);
        (sync, storage, uploader, profiles)
    }

    #[tokio::test]
    async fn uploads_in_batches_and_marks_profile() {
        let (sync, storage, uploader, profiles) = setup(5, 2);

        sync.synchronize(&lite_exit_profile()).await.unwrap();

        let batches = uploader.batches.lock().clone();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(storage.pending_count().unwrap(), 0);
        assert!(storage.pending(10).unwrap().is_empty());

        let current = profiles.current().unwrap();
        assert_eq!(current.lite_mode_data_synchronize_status, SyncStatus::Success);
        assert!(!current.needs_lite_sync());
    }

    #[tokio::test]
    async fn upload_failure_keeps_records_and_flags() {
        let (sync, storage, uploader, profiles) = setup(3, 10);
        uploader.fail.store(true, Ordering::SeqCst);

        assert!(sync.synchronize(&lite_exit_profile()).await.is_err());
        assert_eq!(storage.pending_count().unwrap(), 3);
        assert!(profiles.current().unwrap().needs_lite_sync());
    }

    #[tokio::test]
    async fn nothing_pending_still_marks_synchronized() {
        let (sync, _, uploader, profiles) = setup(0, 10);

        sync.synchronize(&lite_exit_profile()).await.unwrap();
        assert!(uploader.batches.lock().is_empty());
        assert!(profiles.current().unwrap().lite_mode_data_is_synchronized);
    }
}
