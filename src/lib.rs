//! aido: natural-language shell assistant, self-update core.
//!
//! The assistant itself is thin glue around a chat-completion API. This
//! crate holds the part that must not break an installation:
//!
//! - **Release checks**: rate-limited polling of one release feed
//! - **Config reconciliation**: merging the user's `key=value` settings into
//!   each release's example file without losing customizations
//! - **Updates**: download, backup, overlay, rollback on failure
//! - **Backup retention**: backups live until the operator confirms

pub mod aido_dirs;
pub mod config;
pub mod envfile;
pub mod error;
pub mod prompt;
pub mod reconcile;
pub mod update;

pub use config::AidoConfig;
pub use error::{AidoError, Result};
pub use prompt::{AssumeNo, AssumeYes, Confirm, Decision, TerminalPrompt};
pub use reconcile::{CommitOutcome, ConfigReconciler};
pub use update::{InstallHealth, UpdateOutcome, Updater};
