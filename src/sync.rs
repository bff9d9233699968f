/// Bundle reconciliation.
pub mod bundle;
/// Engine context.
pub mod engine;
/// Host and connectivity interfaces.
pub mod host;
/// Library manifest reconciliation.
pub mod library;
/// Reading progress.
pub mod progress;
/// Periodic auto-sync.
pub mod scheduler;

pub use bundle::{BundleAction, BundleReport, BundleSyncer};
pub use engine::{OpenOutcome, SyncEngine};
pub use host::{
    AlwaysOnline, Connectivity, HeadlessHost, Host, ProgressChoice, TcpReachability,
};
pub use library::{LibraryReport, LibrarySyncer};
pub use progress::{ProgressDecision, ProgressRecord, ProgressSyncer, ReadingStatus};
pub use scheduler::{CycleOutcome, Scheduler};
