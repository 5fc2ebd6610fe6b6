use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{debug, info, warn};

use super::{ProfileFetcher, ProfileSource};
use crate::error::AgentResult;
use crate::models::profile::{Profile, SyncStatus};

/// Lock-free holder of the current profile.
///
/// Readers on the request path get an `Arc` snapshot; a refresh swaps the
/// whole profile at once, so a request never sees a half-updated one.
#[derive(Default)]
pub struct ProfileStore {
    current: ArcSwapOption<Profile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: Profile) -> Self {
        let store = Self::new();
        store.set(Some(profile));
        store
    }

    pub fn set(&self, profile: Option<Profile>) {
        self.current.store(profile.map(Arc::new));
    }

    /// Fetch a fresh profile. Errors and empty answers keep the previous one.
    /// Returns whether the profile was replaced.
    pub async fn refresh(&self, fetcher: &dyn ProfileFetcher) -> AgentResult<bool> {
        match fetcher.fetch_profile().await? {
            Some(profile) => {
                let changed = self.current.load().as_deref() != Some(&profile);
                if changed {
                    info!(
                        running_mode = %profile.running_mode,
                        last_run_mode = %profile.last_run_mode,
                        "profile updated"
                    );
                }
                self.set(Some(profile));
                Ok(changed)
            }
            None => {
                debug!("gateway returned no profile, keeping current");
                Ok(false)
            }
        }
    }

    /// Refresh on a fixed interval until the task is aborted.
    pub async fn run_refresh_loop(self: Arc<Self>, fetcher: Arc<dyn ProfileFetcher>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = self.refresh(fetcher.as_ref()).await {
                warn!(error = %e, "profile refresh failed, keeping previous profile");
            }
        }
    }

    /// Record locally that lite-mode data reached the gateway.
    pub fn mark_lite_synchronized(&self) {
        self.current.rcu(|current| {
            current.as_ref().map(|profile| {
                let mut updated = Profile::clone(profile);
                updated.lite_mode_data_is_synchronized = true;
                updated.lite_mode_data_synchronize_status = SyncStatus::Success;
                Arc::new(updated)
            })
        });
    }
}

impl ProfileSource for ProfileStore {
    fn current(&self) -> Option<Arc<Profile>> {
        self.current.load_full()
    }
}
