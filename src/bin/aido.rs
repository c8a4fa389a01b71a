//! CLI binary for aido's self-update.

use aido::aido_dirs::{self, InstallLayout};
use aido::envfile::ConfigFile;
use aido::update::backup;
use aido::update::{FeedResult, InstallHealth, UpdateOutcome, Updater};
use aido::{
    AidoConfig, AssumeNo, AssumeYes, CommitOutcome, ConfigReconciler, Confirm, Decision,
    TerminalPrompt,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// aido: keep an installation current with its release feed.
#[derive(Parser)]
#[command(name = "aido", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Answer yes to every question.
    #[arg(short, long, global = true, conflicts_with = "no")]
    yes: bool,

    /// Answer no to every question.
    #[arg(long, global = true)]
    no: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Check the release feed for a newer version.
    Check {
        /// Ignore the check interval.
        #[arg(long)]
        force: bool,
    },

    /// Download and install the latest release.
    Update,

    /// Confirm that the installed version works and delete backups.
    Confirm,

    /// Restore the installation from the latest backup.
    Rollback,

    /// Show version, last check and backup state.
    Status,

    /// Manage the local settings file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Merge an example settings file into the local one.
    Sync {
        /// Example settings file to merge from.
        example: PathBuf,

        /// Print the merged file instead of writing it.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = AidoConfig::load(cli.config.as_deref())?;
    let layout = InstallLayout::new(aido_dirs::install_home()?, config.install.clone());
    init_tracing(cli.debug, &layout);

    let confirm: Box<dyn Confirm> = if cli.yes {
        Box::new(AssumeYes)
    } else if cli.no {
        Box::new(AssumeNo)
    } else {
        Box::new(TerminalPrompt)
    };

    let mut updater = Updater::new(layout, &config.update);
    let command = cli.command.unwrap_or(Command::Check { force: false });

    if !matches!(command, Command::Status | Command::Rollback | Command::Confirm) {
        report_health(&updater.health());
    }

    match command {
        Command::Check { force } => run_check(&mut updater, force),
        Command::Update => run_update(&mut updater, confirm.as_ref()),
        Command::Confirm => run_confirm(&mut updater, confirm.as_ref()),
        Command::Rollback => run_rollback(&mut updater),
        Command::Status => run_status(&updater),
        Command::Config {
            action: ConfigAction::Sync { example, dry_run },
        } => run_config_sync(updater.layout(), &example, dry_run, confirm.as_ref()),
    }
}

/// `--debug` wins, then `RUST_LOG`, then `LOG_LEVEL` from the local
/// settings file, then `info`.
fn init_tracing(debug: bool, layout: &InstallLayout) {
    let mut rejected = None;
    let filter = if debug {
        EnvFilter::new("aido=debug")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        let level = ConfigFile::parse(&layout.local_config())
            .ok()
            .and_then(|settings| settings.get("LOG_LEVEL").map(|e| e.value.clone()));
        let directive = match level.as_deref() {
            Some(value) => aido::config::log_level_directive(value).unwrap_or_else(|| {
                rejected = Some(value.to_owned());
                "info"
            }),
            None => "info",
        };
        EnvFilter::new(format!("aido={directive}"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if let Some(value) = rejected {
        tracing::warn!(value = %value, "invalid LOG_LEVEL in local settings; using INFO");
    }
}

fn report_health(health: &InstallHealth) {
    match health {
        InstallHealth::Clean => {}
        InstallHealth::AwaitingConfirmation { journal } => {
            eprintln!(
                "Updated {} -> {}. Run `aido confirm` once the new version works.",
                journal.from_version, journal.target_version
            );
        }
        InstallHealth::Interrupted { journal, backups } => {
            let backup = journal
                .as_ref()
                .map(|j| j.backup.clone())
                .or_else(|| backups.last().cloned());
            match backup {
                Some(path) => eprintln!(
                    "A previous update did not finish. Run `aido rollback` to restore {}.",
                    path.display()
                ),
                None => eprintln!("A previous update did not finish and no backup was found."),
            }
        }
        InstallHealth::UnverifiedBackups { backups } => {
            eprintln!(
                "{} backup(s) are waiting. Run `aido confirm` if the installed version works.",
                backups.len()
            );
        }
    }
}

fn run_check(updater: &mut Updater, force: bool) -> anyhow::Result<ExitCode> {
    let result = if force {
        updater.check_now()
    } else {
        updater.check_update()
    };
    if !result.message.is_empty() {
        println!("{}", result.message);
    }
    if result.has_update {
        println!("\nRun `aido update` to install it.");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_update(updater: &mut Updater, confirm: &dyn Confirm) -> anyhow::Result<ExitCode> {
    if let InstallHealth::Interrupted { .. } = updater.health() {
        eprintln!("Refusing to update until the interrupted update is rolled back.");
        return Ok(ExitCode::FAILURE);
    }

    let release = match updater.latest_release() {
        FeedResult::Parsed(release) => release,
        FeedResult::Unavailable(e) => {
            eprintln!("update check failed: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let current = updater.layout().installed_version();
    if !release.is_newer_than(&current) {
        println!("current version {current} is already the latest");
        return Ok(ExitCode::SUCCESS);
    }

    let decision = Decision::ProceedWithUpdate {
        current: &current,
        release: &release,
    };
    if !confirm.confirm(&decision) {
        println!("Update cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    match updater.perform_update(&release, confirm)? {
        UpdateOutcome::Applied { version, backup } => {
            println!("Updated to {version}. Previous version saved at {}.", backup.display());
            println!("Run `aido confirm` once the new version works.");
            Ok(ExitCode::SUCCESS)
        }
        UpdateOutcome::Aborted { phase, reason } => {
            eprintln!("Update stopped during {phase}: {reason}");
            eprintln!("The installation was not changed.");
            Ok(ExitCode::FAILURE)
        }
        UpdateOutcome::RolledBack { reason, backup } => {
            eprintln!("Update failed: {reason}");
            eprintln!("The previous version was restored from {}.", backup.display());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_confirm(updater: &mut Updater, confirm: &dyn Confirm) -> anyhow::Result<ExitCode> {
    if let InstallHealth::Clean = updater.health() {
        println!("Nothing to confirm.");
        return Ok(ExitCode::SUCCESS);
    }
    if updater.confirm_success(confirm)? {
        println!("Backups deleted.");
    } else {
        println!("Backups kept. Run `aido rollback` to restore the previous version.");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_rollback(updater: &mut Updater) -> anyhow::Result<ExitCode> {
    let backup = updater.rollback()?;
    println!(
        "Restored {} from {}.",
        updater.layout().home().display(),
        backup.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn run_status(updater: &Updater) -> anyhow::Result<ExitCode> {
    let layout = updater.layout();
    println!("aido {}", layout.installed_version());
    println!("  home:        {}", layout.home().display());
    match updater.checker().last_check() {
        Some(at) => println!("  last check:  {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  last check:  never"),
    }

    let backups = backup::list_backups(layout)?;
    if backups.is_empty() {
        println!("  backups:     none");
    } else {
        println!("  backups:");
        for path in &backups {
            println!("    {}", path.display());
        }
    }
    report_health(&updater.health());
    Ok(ExitCode::SUCCESS)
}

fn run_config_sync(
    layout: &InstallLayout,
    example: &Path,
    dry_run: bool,
    confirm: &dyn Confirm,
) -> anyhow::Result<ExitCode> {
    let reconciler = ConfigReconciler::new(layout.local_config(), example);

    if dry_run {
        let merged = reconciler.preview()?;
        println!("{}", merged.render());
        if merged.has_conflicts() {
            eprintln!("\nConflicting keys: {}", merged.conflicts.join(", "));
        }
        return Ok(ExitCode::SUCCESS);
    }

    match reconciler.commit(confirm) {
        CommitOutcome::Bootstrapped => {
            println!("Created {} from {}.", reconciler.local_path().display(), example.display());
        }
        CommitOutcome::Merged { conflicts, backup } => {
            println!(
                "Updated {} (previous contents in {}).",
                reconciler.local_path().display(),
                backup.display()
            );
            if !conflicts.is_empty() {
                println!("Review the values marked for: {}", conflicts.join(", "));
            }
        }
        CommitOutcome::Declined { conflicts } => {
            eprintln!(
                "Left {} unchanged; migrate {} manually.",
                reconciler.local_path().display(),
                conflicts.join(", ")
            );
            return Ok(ExitCode::FAILURE);
        }
        CommitOutcome::Failed(reason) => {
            eprintln!("Configuration update failed: {reason}");
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}
