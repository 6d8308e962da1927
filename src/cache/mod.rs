pub mod atomic;
pub mod executor;
pub mod key;
pub mod orchestrator;
pub mod refresh;
pub mod store;

pub use executor::{Executor, ExitOutcome, StreamSinks};
pub use key::{compute_key, CacheKey, CACHE_STRUCTURE_VERSION};
pub use orchestrator::{CacheCmd, CacheSource, Outcome};
pub use refresh::{DetachedLauncher, ProcessLauncher, RefreshRequest, RefreshScheduler};
pub use store::{is_fresh, read_exit_code, CacheRecord, CacheStore, RecordPaths, StagedRecord};
