//! Job Worker
//!
//! A generic background job engine: typed handlers registered per job type, a
//! bounded queue drained by a fixed worker pool, bounded execution time, and
//! retries parked in a store instead of in-memory timers.
//!
//! ## Features
//!
//! - **Registry**: `JobRegistry` maps a job type tag to a `JobHandler`
//! - **Worker pool**: `JobProcessor::start` runs N loops over one bounded queue
//! - **Timeouts**: every attempt is aborted after `job_timeout` (5 minutes by default)
//! - **Retries**: `attempts²` seconds by default, per-handler `RetryPolicy` override
//! - **Durability**: `JobStore` (in-memory or PostgreSQL) with `visible_at` re-offers
//! - **Prometheus metrics**: enqueue/drop/outcome counters and duration histogram
//!
//! ## Example
//!
//! ```ignore
//! use job_worker::{JobProcessor, JobPriority, ProcessorConfig, InMemoryJobStore};
//!
//! let mut processor = JobProcessor::new(ProcessorConfig::default(), Arc::new(InMemoryJobStore::new()));
//! processor.register_handler("search_index", |_ctx, job: Job| async move {
//!     let doc: DocRef = job.payload_as()?;
//!     reindex(doc).await.map_err(|e| JobError::transient(e.to_string()))
//! });
//!
//! let processor = Arc::new(processor);
//! let handle = processor.start(4, shutdown_rx)?;
//! processor.enqueue("search_index", &doc, JobPriority::HIGH).await?;
//! ```

mod config;
mod error;
mod job;
pub mod metrics;
#[cfg(feature = "postgres")]
mod postgres;
mod processor;
mod registry;
mod retry;
mod store;

pub use config::ProcessorConfig;
pub use error::{ErrorCategory, JobError, JobResult};
pub use job::{Job, JobPriority, JobStatus, JobType, DEFAULT_MAX_ATTEMPTS};
pub use metrics::{init_metrics, render_metrics, JobMetrics};
#[cfg(feature = "postgres")]
pub use postgres::PgJobStore;
pub use processor::{JobProcessor, ProcessorHandle};
pub use registry::{JobContext, JobHandler, JobRegistry};
pub use retry::RetryPolicy;
pub use store::{InMemoryJobStore, JobStore};
