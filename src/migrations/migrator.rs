//! # Migration Orchestrator
//!
//! Resolves a target version, computes the plan and drives one executor per
//! planned version. There is no rollback of a partially applied plan: the
//! first failure stops the run and every version before it stays applied.

use std::time::Instant;

use tracing::{debug, info};

use super::configuration::Configuration;
use super::errors::{MigrationError, MigrationResult};
use super::migration::Direction;
use super::version::Version;
use super::version_id::VersionId;

/// Runs migrations for one registry.
pub struct Migrator<'a> {
    configuration: &'a Configuration,
}

/// One executed version of a run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedMigration {
    pub version: VersionId,
    pub time: f64,
}

/// Outcome of [`Migrator::migrate`].
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub direction: Direction,
    pub from: VersionId,
    pub to: VersionId,
    pub executed: Vec<ExecutedMigration>,
    /// Sum of the executor times, in seconds
    pub time: f64,
}

impl MigrationReport {
    /// True when the registry was already at the target.
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

impl<'a> Migrator<'a> {
    pub fn new(configuration: &'a Configuration) -> Self {
        Self { configuration }
    }

    /// Migrate to `to`, or to the latest registered version.
    pub fn migrate(&self, to: Option<VersionId>) -> MigrationResult<MigrationReport> {
        let configuration = self.configuration;
        let output = configuration.output();

        let to = to.unwrap_or_else(|| configuration.latest_version());
        let from = configuration.current_version()?;

        if !to.is_zero() && !configuration.has_version(&to) {
            return Err(MigrationError::UnknownVersion(to.to_string()));
        }

        let direction = if from > to {
            Direction::Down
        } else {
            Direction::Up
        };
        let plan = configuration.migrations_to_execute(direction, &to)?;

        let mut report = MigrationReport {
            direction,
            from,
            to,
            executed: Vec::with_capacity(plan.len()),
            time: 0.0,
        };

        if from == to && plan.is_empty() && !configuration.migrations().is_empty() {
            debug!(version = %to, "Already at target version");
            return Ok(report);
        }

        output.write(&format!("Migrating {} to {} from {}", direction, to, from));

        if plan.is_empty() {
            return Err(MigrationError::NoMigrationsToExecute);
        }

        info!(
            direction = %direction,
            from = %from,
            to = %to,
            planned = plan.len(),
            "Starting migration run"
        );

        let start = Instant::now();
        for entry in &plan {
            let mut version = Version::new(configuration, entry);
            version.execute(direction, false)?;

            let time = version.time().unwrap_or_default();
            report.time += time;
            report.executed.push(ExecutedMigration {
                version: entry.version(),
                time,
            });
        }

        output.write("\n  ------------------------\n");
        output.write(&format!("  ++ finished in {:.2}s", report.time));
        output.write(&format!("  ++ {} migrations executed", report.executed.len()));

        info!(
            executed = report.executed.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Migration run finished"
        );
        Ok(report)
    }
}
