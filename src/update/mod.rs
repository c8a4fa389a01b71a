//! Self-update for aido.
//!
//! Checks the release feed for newer versions, downloads and installs them
//! over the current installation with a full backup, reconciles settings,
//! and rolls back when installing fails.

pub mod applier;
pub mod archive;
pub mod backup;
pub mod checker;
pub mod release;
pub mod state;

pub use applier::{InstallHealth, UpdateOutcome, UpdatePhase, Updater};
pub use checker::{CheckResult, ReleaseChecker};
pub use release::{FeedResult, ReleaseDescriptor};
pub use state::{CheckStore, Clock, FileCheckStore, SystemClock, UpdateJournal};
