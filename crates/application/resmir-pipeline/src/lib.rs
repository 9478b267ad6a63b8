pub mod context;
pub mod discover;
pub mod dump;
pub mod error;
pub mod listener;
pub mod processor;
pub mod report;
pub mod state;
pub mod sync;

pub use context::{Context, Settings};
pub use discover::{well_known_uri, Discoverer};
pub use error::ProcError;
pub use processor::{ProcStatus, Processor, SourceWalk, WalkOutcome};
pub use report::{Reporter, SyncStatus};
pub use state::StateStore;
pub use sync::Syncer;
