pub mod detection;
pub mod lenient;
pub mod metadata;
pub mod profile;

pub use detection::{DetectionMetrics, DetectionResult, Verdict};
pub use metadata::MetadataSnapshot;
pub use profile::{Profile, RunningMode, SyncStatus};
