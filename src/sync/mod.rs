mod syncer;

pub use syncer::{DEFAULT_RETRY_DELAY, Syncer};
