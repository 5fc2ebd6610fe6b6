//! Collaborators of the protection pipeline: where profiles come from, who
//! scores requests, and where captured metadata goes.

pub mod background;
pub mod gateway;
pub mod profile_store;
pub mod synchronizer;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentResult;
use crate::models::detection::DetectionResult;
use crate::models::metadata::MetadataSnapshot;
use crate::models::profile::Profile;
use crate::storage::sqlite::StoredRecord;

/// Current policy profile. Must not block: it is called on every request.
pub trait ProfileSource: Send + Sync {
    fn current(&self) -> Option<Arc<Profile>>;
}

#[async_trait]
pub trait DetectionService: Send + Sync {
    /// `Ok(None)` when the service answered without a usable result.
    async fn detect(&self, snapshot: &MetadataSnapshot) -> AgentResult<Option<DetectionResult>>;
}

#[async_trait]
pub trait StorageWriter: Send + Sync {
    async fn persist(&self, snapshot: &MetadataSnapshot) -> AgentResult<()>;
}

#[async_trait]
pub trait Synchronizer: Send + Sync {
    async fn synchronize(&self, profile: &Profile) -> AgentResult<()>;
}

/// Fetches the agent's profile from its authority.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch_profile(&self) -> AgentResult<Option<Profile>>;
}

/// Ships stored records back to the gateway.
#[async_trait]
pub trait RecordUploader: Send + Sync {
    async fn upload(&self, records: &[StoredRecord]) -> AgentResult<()>;
}
