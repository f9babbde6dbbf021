//! # Migration Bodies
//!
//! A migration is a versioned unit of change with an `up` and a `down` body
//! plus optional pre/post hooks for each direction. Hooks receive a
//! [`MigrationContext`] giving access to the target database and to the
//! authoring helpers (statistics, scripts, skip/abort/warn).
//!
//! Control flow is expressed through the returned `Result`:
//!
//! - `Err(MigrationError::Skip(_))` skips this version but records it as
//!   applied (or reverted) and lets the run continue
//! - `Err(MigrationError::Abort(_))` and any other error stop the run

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::configuration::Configuration;
use super::errors::{MigrationError, MigrationResult};
use super::statistics::Statistics;
use super::version::{analyze_collection, run_script, ExecutionState};
use super::version_id::VersionId;
use crate::store::{Collection, Database, Document};

const UNKNOWN_REASON: &str = "Unknown Reason";
const IRREVERSIBLE: &str = "This migration is irreversible and cannot be reverted.";

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply forward
    Up,
    /// Revert
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(MigrationError::invalid_argument(format!(
                "Unknown migration direction '{}'. Use 'up' or 'down'.",
                other
            ))),
        }
    }
}

/// A migration body.
pub trait Migration: Send {
    /// Human-readable summary of the change
    fn description(&self) -> String;

    /// Apply the change.
    fn up(&mut self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()>;

    /// Revert the change. Return `ctx.irreversible(..)` if that is impossible.
    fn down(&mut self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()>;

    fn pre_up(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        Ok(())
    }

    fn post_up(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        Ok(())
    }

    fn pre_down(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        Ok(())
    }

    fn post_down(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        Ok(())
    }
}

/// What a running hook can see and do.
pub struct MigrationContext<'a> {
    configuration: &'a Configuration,
    database: &'a Arc<dyn Database>,
    version: VersionId,
    state: ExecutionState,
    statistics: &'a mut BTreeMap<String, Statistics>,
}

impl<'a> MigrationContext<'a> {
    pub(crate) fn new(
        configuration: &'a Configuration,
        database: &'a Arc<dyn Database>,
        version: VersionId,
        state: ExecutionState,
        statistics: &'a mut BTreeMap<String, Statistics>,
    ) -> Self {
        Self {
            configuration,
            database,
            version,
            state,
            statistics,
        }
    }

    /// Target database
    pub fn database(&self) -> &dyn Database {
        self.database.as_ref()
    }

    /// Select a collection of the target database.
    pub fn collection(&self, name: &str) -> MigrationResult<Arc<dyn Collection>> {
        Ok(self.database.select_collection(name)?)
    }

    /// Version being executed
    pub fn version(&self) -> VersionId {
        self.version
    }

    /// Phase the hook runs in
    pub fn execution_state(&self) -> ExecutionState {
        self.state
    }

    pub fn configuration(&self) -> &Configuration {
        self.configuration
    }

    /// Track before/after statistics for a collection.
    pub fn analyze(&mut self, collection: &str) {
        analyze_collection(
            self.configuration,
            self.database.as_ref(),
            self.statistics,
            self.state,
            collection,
        );
    }

    /// Run a script from the configured script directory.
    pub fn execute_script(&self, file: &str) -> MigrationResult<Document> {
        run_script(self.configuration, self.database.as_ref(), file)
    }

    /// Write a progress message.
    pub fn write(&self, message: &str) {
        self.configuration.output().write(message);
    }

    /// Write a warning when `condition` holds.
    pub fn warn_if(&self, condition: bool, message: &str) {
        if condition {
            let message = if message.is_empty() { UNKNOWN_REASON } else { message };
            self.write(&format!("    Warning during {}: {}", self.state, message));
        }
    }

    /// Abort the run when `condition` holds.
    pub fn abort_if(&self, condition: bool, message: &str) -> MigrationResult<()> {
        if condition {
            return Err(MigrationError::abort(reason_or_default(message)));
        }
        Ok(())
    }

    /// Skip this version (but not the following ones) when `condition` holds.
    pub fn skip_if(&self, condition: bool, message: &str) -> MigrationResult<()> {
        if condition {
            return Err(MigrationError::skip(reason_or_default(message)));
        }
        Ok(())
    }

    /// Error to return from `down` when the change cannot be reverted.
    pub fn irreversible(&self, message: Option<&str>) -> MigrationError {
        MigrationError::Irreversible(message.unwrap_or(IRREVERSIBLE).to_string())
    }
}

fn reason_or_default(message: &str) -> String {
    if message.is_empty() {
        UNKNOWN_REASON.to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputWriter;
    use crate::store::{DocumentStore, MemoryStore};
    use std::sync::Mutex;

    fn configuration(captured: Arc<Mutex<Vec<String>>>) -> Configuration {
        let store = Arc::new(MemoryStore::new());
        let output = OutputWriter::new(move |m| captured.lock().unwrap().push(m.to_string()));
        let mut config = Configuration::new(store, output);
        config.set_migrations_database_name("app");
        config
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("down".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Down.to_string(), "down");
    }

    #[test]
    fn test_skip_and_abort_helpers() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let config = configuration(captured);
        let database = MemoryStore::new().select_database("app").unwrap();
        let mut statistics = BTreeMap::new();
        let ctx = MigrationContext::new(
            &config,
            &database,
            VersionId::ZERO,
            ExecutionState::Exec,
            &mut statistics,
        );

        assert!(ctx.skip_if(false, "nope").is_ok());
        assert!(matches!(ctx.skip_if(true, ""), Err(MigrationError::Skip(r)) if r == UNKNOWN_REASON));
        assert!(matches!(ctx.abort_if(true, "stop"), Err(MigrationError::Abort(r)) if r == "stop"));
        assert!(matches!(ctx.irreversible(None), MigrationError::Irreversible(r) if r == IRREVERSIBLE));
    }

    #[test]
    fn test_warn_if_names_phase() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let config = configuration(Arc::clone(&captured));
        let database = MemoryStore::new().select_database("app").unwrap();
        let mut statistics = BTreeMap::new();
        let ctx = MigrationContext::new(
            &config,
            &database,
            VersionId::ZERO,
            ExecutionState::Pre,
            &mut statistics,
        );

        ctx.warn_if(false, "quiet");
        ctx.warn_if(true, "index missing");

        let messages = captured.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Warning during Pre-Checks: index missing"));
    }
}
