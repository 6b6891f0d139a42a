pub mod abilities;
pub mod committer;
pub mod discovery;
pub mod fetcher;
pub mod pipeline;
pub mod rows;
pub mod scheduler;

pub use abilities::{AbilityCatalog, AbilityFeed, AbilityTable, HttpAbilityFeed};
pub use committer::{ChunkCommitter, ChunkWriteStats, FactStore, WriteRetryPolicy};
pub use discovery::{Discoverer, DiscoverySettings};
pub use fetcher::{FetchRetryPolicy, Fetcher};
pub use pipeline::{IngestSettings, IngestSummary, Ingestor};
pub use rows::ChunkRows;
pub use scheduler::{PassReport, ScheduleSettings, Scheduler, TrackedAccounts};
