//! Yes/no decision points raised by the updater.
//!
//! The core never talks to a terminal directly. Frontends implement
//! [`Confirm`]: interactively ([`TerminalPrompt`]) or with a fixed policy for
//! unattended runs ([`AssumeYes`], [`AssumeNo`]).

use crate::update::release::ReleaseDescriptor;
use std::io::{BufRead, Write};

/// A question the operator must answer before the updater continues.
#[derive(Debug, Clone, Copy)]
pub enum Decision<'a> {
    /// Local settings differ from the newly shipped defaults.
    ProceedDespiteConflicts { keys: &'a [String] },
    /// A newer release is available.
    ProceedWithUpdate {
        current: &'a str,
        release: &'a ReleaseDescriptor,
    },
    /// The update was applied; does the new version work?
    NewVersionWorks { version: &'a str },
}

impl Decision<'_> {
    /// Human-readable question, including any context the operator needs.
    pub fn describe(&self) -> String {
        match self {
            Self::ProceedDespiteConflicts { keys } => {
                let mut text = String::from("Configuration differs from the new defaults:\n");
                for key in *keys {
                    text.push_str(&format!("  {key} has a new default in this release\n"));
                }
                text.push_str("Your values are kept; the new defaults are recorded as comments.\n");
                text.push_str("Continue updating the configuration?");
                text
            }
            Self::ProceedWithUpdate { current, release } => format!(
                "{}\n\nInstall {} now?",
                release.changelog_message(current),
                release.version
            ),
            Self::NewVersionWorks { version } => {
                format!("Is {version} working correctly? Confirming removes all backups.")
            }
        }
    }
}

/// Answers [`Decision`]s.
pub trait Confirm {
    /// Returns `true` to proceed.
    fn confirm(&self, decision: &Decision<'_>) -> bool;
}

/// Approves everything; for automated environments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, decision: &Decision<'_>) -> bool {
        tracing::info!(question = %decision.describe(), "auto-approved");
        true
    }
}

/// Declines everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeNo;

impl Confirm for AssumeNo {
    fn confirm(&self, decision: &Decision<'_>) -> bool {
        tracing::info!(question = %decision.describe(), "auto-declined");
        false
    }
}

/// Asks on stderr and reads the answer from stdin.
///
/// Only `y` or `yes` (any case) approve. End of input declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&self, decision: &Decision<'_>) -> bool {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\n{} (y/n): ", decision.describe());
        let _ = stderr.flush();

        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => is_yes(&answer),
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
