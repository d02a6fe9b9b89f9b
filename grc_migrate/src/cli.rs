//! Command line interface of `grc-migrate`.

use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};

use grc_migrate_core::{
    GuardPolicy, LockMode, MigrationReport, MigrationStatus, MigrationStore, Migrator,
    MigratorConfig, OutOfOrderPolicy, Resolution, Reversibility, RollbackReport, Version,
};
use grc_migrate_mem::{InMemoryMigrator, InMemoryStore};
use grc_migrate_pg::{PgMigrator, PgStore};

use crate::migrations;

/// Guarded schema migrations for the ISMS database.
#[derive(Parser, Debug)]
#[command(name = "grc-migrate", version)]
#[command(about = "Apply and roll back ISMS schema migrations", long_about = None)]
pub struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Fail instead of waiting when another runner holds the lock
    #[arg(long, global = true)]
    pub no_wait: bool,

    /// Treat a failed catalog probe as "object absent" instead of aborting
    #[arg(long, global = true)]
    pub assume_absent_on_probe_error: bool,

    /// Refuse pending migrations older than the latest applied one
    #[arg(long, global = true)]
    pub strict_order: bool,

    /// Statement timeout for the migration session
    #[arg(long, value_name = "SECS", global = true)]
    pub statement_timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Stop after this version
        #[arg(long, value_name = "VERSION")]
        to: Option<String>,
    },
    /// Roll back the most recently applied migrations
    Rollback {
        /// How many migrations to roll back
        #[arg(long, default_value_t = 1)]
        steps: usize,

        /// Go ahead even when a rollback deletes data
        #[arg(long)]
        accept_lossy: bool,
    },
    /// Show the state of every known migration
    Status {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Record an interrupted migration as applied or pending after fixing it by hand
    Resolve {
        /// The interrupted migration
        #[arg(value_name = "VERSION")]
        version: String,

        /// Which side the schema ended up on
        #[arg(long = "as", value_enum)]
        outcome: Outcome,
    },
    /// Run the whole history up, down and up again on an in-memory database
    Verify,
}

/// Output format of `status`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable table
    Text,
    /// JSON document
    Json,
}

/// Outcome given to `resolve`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The changes are in place
    Applied,
    /// The changes are absent
    Pending,
}

impl From<Outcome> for Resolution {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Applied => Resolution::Applied,
            Outcome::Pending => Resolution::Pending,
        }
    }
}

impl Cli {
    /// The runner configuration selected by the flags.
    pub fn config(&self) -> MigratorConfig {
        MigratorConfig {
            guard_policy: if self.assume_absent_on_probe_error {
                GuardPolicy::AssumeAbsent
            } else {
                GuardPolicy::Strict
            },
            lock_mode: if self.no_wait {
                LockMode::NoWait
            } else {
                LockMode::Wait
            },
            out_of_order: if self.strict_order {
                OutOfOrderPolicy::Reject
            } else {
                OutOfOrderPolicy::Allow
            },
            statement_timeout: self.statement_timeout.map(Duration::from_secs),
            ..MigratorConfig::default()
        }
    }

    /// The default `env_logger` filter.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

/// Runs the parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    match cli.command {
        Commands::Verify => verify(config).await,
        command => {
            let url = cli
                .database_url
                .as_deref()
                .context("no database given; pass --database-url or set DATABASE_URL")?;
            let store = PgStore::connect_url(url)
                .await
                .context("failed to connect to the database")?;
            let migrator = PgMigrator::with_config(store, migrations::registry()?, config);
            execute(&migrator, command).await
        }
    }
}

async fn execute<S: MigrationStore>(
    migrator: &Migrator<S>,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Migrate { to } => {
            let target = to.as_deref().map(Version::parse).transpose()?;
            let report = migrator.migrate(target.as_ref()).await?;
            print_migration(&report);
        }
        Commands::Rollback {
            steps,
            accept_lossy,
        } => rollback(migrator, steps, accept_lossy).await?,
        Commands::Status { format } => {
            let status = migrator.status().await?;
            match format {
                OutputFormat::Text => print_status(&status),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            }
        }
        Commands::Resolve { version, outcome } => {
            let version = Version::parse(&version)?;
            migrator.resolve_dirty(&version, outcome.into()).await?;
            println!("Resolved migration {version} as {outcome:?}");
        }
        Commands::Verify => verify(migrator.config().clone()).await?,
    }
    Ok(())
}

async fn rollback<S: MigrationStore>(
    migrator: &Migrator<S>,
    steps: usize,
    accept_lossy: bool,
) -> anyhow::Result<()> {
    let plan = migrator.plan_rollback(steps).await?;
    if plan.is_empty() {
        println!("Nothing to roll back");
        return Ok(());
    }

    for step in &plan {
        if let Reversibility::Irreversible(reason) = step.reversibility {
            bail!("migration {} ({}) cannot be rolled back: {reason}", step.version, step.name);
        }
    }

    let lossy: Vec<_> = plan.iter().filter_map(|s| s.loss().map(|l| (s, l))).collect();
    if !lossy.is_empty() {
        for (step, loss) in &lossy {
            println!("  {} {}: {loss}", step.version, step.name);
        }
        if !accept_lossy {
            bail!(
                "{} of the {} migrations to roll back lose data; pass --accept-lossy to continue",
                lossy.len(),
                plan.len()
            );
        }
    }

    let report = migrator.rollback_plan(&plan).await?;
    print_rollback(&report);
    Ok(())
}

/// Applies the history to an empty in-memory database, rolls all of it back
/// and applies it again, checking that the catalog ends where it started.
async fn verify(config: MigratorConfig) -> anyhow::Result<()> {
    let store = InMemoryStore::new();
    let migrator = InMemoryMigrator::with_config(store.clone(), migrations::registry()?, config);
    verify_on(&migrator, &store).await
}

async fn verify_on(migrator: &InMemoryMigrator, store: &InMemoryStore) -> anyhow::Result<()> {
    let up = migrator.migrate(None).await?;
    let applied = store.catalog();

    let down = migrator.rollback(migrator.registry().len()).await?;
    if let Some(version) = &down.current_version {
        bail!("rollback stopped with {version} still applied");
    }
    let empty = store.catalog();
    if !empty.tables.is_empty() || !empty.indexes.is_empty() {
        bail!(
            "rolling back every migration left tables behind: {:?}",
            empty.tables.keys().collect::<Vec<_>>()
        );
    }

    let again = migrator.migrate(None).await?;
    if store.catalog() != applied {
        bail!("re-applying the history produced a different schema");
    }

    println!(
        "Verified {} migrations: applied {}, rolled back {} ({} lossy), re-applied {}",
        migrator.registry().len(),
        up.applied.len(),
        down.rolled_back.len(),
        down.warnings.len(),
        again.applied.len()
    );
    Ok(())
}

fn print_migration(report: &MigrationReport) {
    if report.applied.is_empty() {
        println!("Nothing to migrate");
    }
    for unit in &report.applied {
        println!(
            "Applied {} {} ({} statements, {} guards skipped)",
            unit.version, unit.name, unit.statements_executed, unit.guards_skipped
        );
        for backfill in &unit.backfills {
            match &backfill.skipped {
                Some(reason) => println!("  backfill into {} skipped: {reason}", backfill.target),
                None => println!(
                    "  backfilled {} rows into {}{}",
                    backfill.rows_migrated,
                    backfill.target,
                    backfill
                        .tenant
                        .map(|t| format!(" for tenant {t}"))
                        .unwrap_or_default()
                ),
            }
            if backfill.tenants_without_rows > 0 {
                println!(
                    "  {} other tenant(s) received no rows",
                    backfill.tenants_without_rows
                );
            }
        }
    }
    for version in &report.out_of_order {
        println!("Applied {version} out of order");
    }
    print_current(report.last_applied.as_ref());
}

fn print_rollback(report: &RollbackReport) {
    for unit in &report.rolled_back {
        println!("Rolled back {} {}", unit.version, unit.name);
    }
    for warning in &report.warnings {
        println!("  {warning}");
    }
    print_current(report.current_version.as_ref());
}

fn print_status(status: &MigrationStatus) {
    for entry in &status.entries {
        let applied_at = entry
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{:<16} {:<36} {:<12} {applied_at}",
            entry.version.as_str(),
            entry.name,
            entry.state.to_string()
        );
    }
    for record in &status.orphaned {
        println!(
            "{:<16} {:<36} {:<12} recorded but unknown to this build",
            record.version.as_str(),
            record.description,
            "orphaned"
        );
    }
    for marker in &status.dirty {
        println!(
            "Migration {} was interrupted while running {} at {}; fix it and run `grc-migrate resolve`",
            marker.version, marker.direction, marker.started_at
        );
    }
}

fn print_current(version: Option<&Version>) {
    match version {
        Some(version) => println!("Current version: {version}"),
        None => println!("Current version: none"),
    }
}
