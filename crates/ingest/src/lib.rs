pub mod outcome;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod transform;

pub use outcome::{resolve_status, FailureStage, ItemFailure, SyncCounts, SyncOutcome};
pub use rate_limit::RateLimiter;
pub use retry::{Attempted, RetryPolicy, Retryable};
pub use scheduler::{
    BatchReport, ItemOutcome, ItemResult, SchedulerConfig, UploadFailure, UploadScheduler,
};
pub use session::{SyncEngine, SyncError};
pub use transform::{TransformError, Transformer};
