//! # Version Executor
//!
//! Drives one migration through its lifecycle:
//!
//! ```text
//! None -> Pre-Checks -> Execution -> Post-Checks -> None
//! ```
//!
//! The execution state only has meaning during `execute`; it is reset to
//! `None` on every exit path. A skip raised from any phase is consumed here
//! and turned into a tracking-record change plus a message. Every other
//! error is reported with the phase it happened in and returned.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info, warn};

use super::configuration::{Configuration, RegisteredMigration};
use super::errors::{MigrationError, MigrationResult};
use super::migration::{Direction, Migration, MigrationContext};
use super::statistics::Statistics;
use super::version_id::VersionId;
use crate::store::{doc, Database, Document};

/// Lifecycle phase of a running migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionState {
    #[default]
    None,
    Pre,
    Exec,
    Post,
}

impl ExecutionState {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionState::None => "No State",
            ExecutionState::Pre => "Pre-Checks",
            ExecutionState::Exec => "Execution",
            ExecutionState::Post => "Post-Checks",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Pre,
    Main,
    Post,
}

/// Executor for one registered migration.
pub struct Version<'a> {
    configuration: &'a Configuration,
    version: VersionId,
    class: String,
    migration: Box<dyn Migration>,
    statistics: BTreeMap<String, Statistics>,
    state: ExecutionState,
    time: Option<f64>,
    recorded: bool,
}

impl<'a> Version<'a> {
    pub fn new(configuration: &'a Configuration, entry: &RegisteredMigration) -> Self {
        Self {
            configuration,
            version: entry.version(),
            class: entry.class().to_string(),
            migration: (entry.factory())(),
            statistics: BTreeMap::new(),
            state: ExecutionState::None,
            time: None,
            recorded: false,
        }
    }

    pub fn version(&self) -> VersionId {
        self.version
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn description(&self) -> String {
        self.migration.description()
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.state
    }

    /// Seconds taken by the last `execute`, rounded to two decimals.
    pub fn time(&self) -> Option<f64> {
        self.time
    }

    /// Statistics tracked during the last `execute`, by collection.
    pub fn statistics(&self) -> &BTreeMap<String, Statistics> {
        &self.statistics
    }

    pub fn is_migrated(&self) -> MigrationResult<bool> {
        self.configuration.has_version_migrated(&self.version)
    }

    /// Track before/after statistics for `collection`.
    pub fn analyze(&mut self, collection: &str) -> MigrationResult<()> {
        let database = self.configuration.database()?;
        analyze_collection(
            self.configuration,
            database.as_ref(),
            &mut self.statistics,
            self.state,
            collection,
        );
        Ok(())
    }

    /// Run a script file from the configured script directory.
    pub fn execute_script(&self, file: &str) -> MigrationResult<Document> {
        let database = self.configuration.database()?;
        run_script(self.configuration, database.as_ref(), file)
    }

    pub fn mark_migrated(&self, replay: bool) -> MigrationResult<()> {
        self.configuration
            .mark_version_migrated(&self.version, replay)
    }

    pub fn mark_not_migrated(&self) -> MigrationResult<()> {
        self.configuration.mark_version_not_migrated(&self.version)
    }

    /// Run the migration in `direction`.
    ///
    /// `replay` upserts the tracking record instead of inserting it and is
    /// only valid going up.
    pub fn execute(&mut self, direction: Direction, replay: bool) -> MigrationResult<()> {
        if direction == Direction::Down && replay {
            return Err(MigrationError::abort(
                "Cannot run 'down' and replay it. Use replay with 'up'",
            ));
        }

        self.statistics.clear();
        self.recorded = false;
        self.time = None;

        let start = Instant::now();
        let outcome = self.run(direction, replay, start);
        let failed_during = mem::take(&mut self.state);
        if self.time.is_none() {
            self.time = Some(elapsed(start));
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(MigrationError::Skip(reason)) => {
                if !self.recorded && !self.configuration.is_dry_run() {
                    if let Err(e) = self.record(direction, replay) {
                        return Err(self.report_failure(failed_during, e));
                    }
                }
                info!(version = %self.version, reason = %reason, "Migration skipped");
                self.configuration
                    .output()
                    .write(&format!("\n  SS skipped (Reason: {})", reason));
                Ok(())
            }
            Err(e) => Err(self.report_failure(failed_during, e)),
        }
    }

    fn report_failure(&self, phase: ExecutionState, error: MigrationError) -> MigrationError {
        warn!(
            version = %self.version,
            phase = %phase,
            error = %error,
            "Migration failed"
        );
        self.configuration.output().write(&format!(
            "\n  Migration {} failed during {}. Error {}",
            self.version, phase, error
        ));
        error
    }

    fn run(&mut self, direction: Direction, replay: bool, start: Instant) -> MigrationResult<()> {
        let configuration = self.configuration;
        let output = configuration.output();
        let database = configuration.database()?;

        self.state = ExecutionState::Pre;
        self.call(Stage::Pre, direction, &database)?;

        match direction {
            Direction::Up => output.write(&format!("\n  ++ migrating {}\n", self.version)),
            Direction::Down => output.write(&format!("\n  -- reverting {}\n", self.version)),
        }

        self.state = ExecutionState::Exec;
        self.call(Stage::Main, direction, &database)?;
        self.update_statistics_after(database.as_ref());

        if !configuration.is_dry_run() {
            self.record(direction, replay)?;
        }

        self.summarize_statistics();

        self.state = ExecutionState::Post;
        self.call(Stage::Post, direction, &database)?;

        let time = elapsed(start);
        self.time = Some(time);
        match direction {
            Direction::Up => output.write(&format!("\n  ++ migrated ({}s)", time)),
            Direction::Down => output.write(&format!("\n  -- reverted ({}s)", time)),
        }

        debug!(version = %self.version, direction = %direction, time, "Migration executed");
        Ok(())
    }

    fn record(&mut self, direction: Direction, replay: bool) -> MigrationResult<()> {
        match direction {
            Direction::Up => self.mark_migrated(replay)?,
            Direction::Down => self.mark_not_migrated()?,
        }
        self.recorded = true;
        Ok(())
    }

    fn call(
        &mut self,
        stage: Stage,
        direction: Direction,
        database: &Arc<dyn Database>,
    ) -> MigrationResult<()> {
        let mut ctx = MigrationContext::new(
            self.configuration,
            database,
            self.version,
            self.state,
            &mut self.statistics,
        );
        let migration = &mut self.migration;

        match (stage, direction) {
            (Stage::Pre, Direction::Up) => migration.pre_up(&mut ctx),
            (Stage::Pre, Direction::Down) => migration.pre_down(&mut ctx),
            (Stage::Main, Direction::Up) => migration.up(&mut ctx),
            (Stage::Main, Direction::Down) => migration.down(&mut ctx),
            (Stage::Post, Direction::Up) => migration.post_up(&mut ctx),
            (Stage::Post, Direction::Down) => migration.post_down(&mut ctx),
        }
    }

    fn update_statistics_after(&mut self, database: &dyn Database) {
        let collector = self.configuration.statistics_collector();
        for stats in self.statistics.values_mut() {
            if let Err(e) = stats.update_after(collector, database) {
                statistics_warning(self.configuration, self.state, stats.collection(), &e);
            }
        }
    }

    fn summarize_statistics(&self) {
        let output = self.configuration.output();
        for (collection, stats) in &self.statistics {
            output.write(&format!("\n     Collection {}\n", collection));
            for line in stats.summary_lines() {
                output.write(&line);
            }
        }
    }
}

impl fmt::Debug for Version<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("version", &self.version)
            .field("class", &self.class)
            .field("state", &self.state)
            .field("time", &self.time)
            .finish()
    }
}

/// Start tracking `collection` and capture its "before" metrics.
pub(crate) fn analyze_collection(
    configuration: &Configuration,
    database: &dyn Database,
    statistics: &mut BTreeMap<String, Statistics>,
    state: ExecutionState,
    collection: &str,
) {
    let mut stats = Statistics::new(collection);
    if let Err(e) = stats.update_before(configuration.statistics_collector(), database) {
        statistics_warning(configuration, state, collection, &e);
    }
    statistics.insert(collection.to_string(), stats);
}

fn statistics_warning(
    configuration: &Configuration,
    state: ExecutionState,
    collection: &str,
    error: &MigrationError,
) {
    warn!(collection, error = %error, "Statistics collection failed");
    configuration
        .output()
        .write(&format!("     Warning during {}: {}", state, error));
}

/// Evaluate a script from the script directory through `$eval`.
pub(crate) fn run_script(
    configuration: &Configuration,
    database: &dyn Database,
    file: &str,
) -> MigrationResult<Document> {
    let directory = configuration
        .migrations_script_directory()
        .ok_or(MigrationError::MissingScriptDirectory)?;

    let path = directory.join(file);
    if !path.is_file() {
        return Err(MigrationError::invalid_argument(format!(
            "Could not execute {}. File does not exist.",
            path.display()
        )));
    }

    let script = fs::read_to_string(&path).map_err(|e| MigrationError::FileRead {
        path: path.clone(),
        source: e,
    })?;

    debug!(script = %path.display(), "Executing script");
    let command = doc([("$eval", json!(script)), ("nolock", json!(true))]);
    Ok(database.command(&command)?)
}

fn elapsed(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::catalog::factory;
    use crate::output::OutputWriter;
    use crate::store::{Collection, DocumentStore, FindOptions, MemoryStore};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Scripted {
        skip_in_up: bool,
        fail_in_up: bool,
        skip_in_post: bool,
        skip_in_down: bool,
        fail_in_pre: bool,
        fail_in_post: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Scripted {
        fn called(&self, hook: &'static str) {
            self.calls.lock().unwrap().push(hook);
        }
    }

    impl Migration for Scripted {
        fn description(&self) -> String {
            "scripted".to_string()
        }

        fn pre_up(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            self.called("pre_up");
            if self.fail_in_pre {
                return Err(MigrationError::Domain("not ready".to_string()));
            }
            Ok(())
        }

        fn up(&mut self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            self.called("up");
            ctx.analyze("users");
            ctx.skip_if(self.skip_in_up, "already seeded")?;
            if self.fail_in_up {
                return Err(MigrationError::Domain("boom".to_string()));
            }
            ctx.collection("users")?
                .insert_one(doc([("name", json!("ada"))]))?;
            Ok(())
        }

        fn post_up(&mut self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            self.called("post_up");
            ctx.skip_if(self.skip_in_post, "late skip")?;
            if self.fail_in_post {
                return Err(MigrationError::Domain("verification failed".to_string()));
            }
            Ok(())
        }

        fn pre_down(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            self.called("pre_down");
            Ok(())
        }

        fn down(&mut self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            self.called("down");
            ctx.skip_if(self.skip_in_down, "nothing to revert")?;
            ctx.collection("users")?.delete_one(&doc([("name", json!("ada"))]))?;
            Ok(())
        }

        fn post_down(&mut self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            self.called("post_down");
            Ok(())
        }
    }

    struct Harness {
        store: MemoryStore,
        messages: Arc<Mutex<Vec<String>>>,
        config: Configuration,
    }

    fn harness(migration: Scripted) -> Harness {
        let store = MemoryStore::new();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let output = OutputWriter::new(move |m| sink.lock().unwrap().push(m.to_string()));

        let mut config = Configuration::new(Arc::new(store.clone()), output);
        config.set_migrations_database_name("app");
        config.set_migrations_namespace("app::migrations");
        config.set_migrations_directory("/tmp/migrations");
        config
            .register_factory("20140101000000", "scripted", factory(move || migration.clone()))
            .unwrap();

        Harness {
            store,
            messages,
            config,
        }
    }

    fn users(store: &MemoryStore) -> Arc<dyn Collection> {
        store
            .select_database("app")
            .unwrap()
            .select_collection("users")
            .unwrap()
    }

    fn v() -> VersionId {
        VersionId::parse("20140101000000").unwrap()
    }

    #[test]
    fn test_up_then_down() {
        let h = harness(Scripted::default());
        let mut version = h.config.version(&v()).unwrap();

        version.execute(Direction::Up, false).unwrap();
        assert!(version.is_migrated().unwrap());
        assert_eq!(version.execution_state(), ExecutionState::None);
        assert!(version.time().is_some());
        assert_eq!(users(&h.store).count_documents(&Document::new()).unwrap(), 1);

        let stats = version.statistics().get("users").unwrap();
        assert_eq!(stats.after().get("count"), Some(&1.0));

        version.execute(Direction::Down, false).unwrap();
        assert!(!version.is_migrated().unwrap());
        assert_eq!(users(&h.store).count_documents(&Document::new()).unwrap(), 0);

        let messages = h.messages.lock().unwrap();
        assert!(messages.iter().any(|m| m.contains("++ migrating 20140101000000")));
        assert!(messages.iter().any(|m| m.contains("++ migrated (")));
        assert!(messages.iter().any(|m| m.contains("-- reverting 20140101000000")));
        assert!(messages.iter().any(|m| m.contains("-- reverted (")));
    }

    #[test]
    fn test_statistics_failure_is_only_a_warning() {
        let h = harness(Scripted::default());
        let mut version = h.config.version(&v()).unwrap();

        // "users" does not exist yet, so the before snapshot fails
        version.execute(Direction::Up, false).unwrap();

        let messages = h.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|m| m.contains("Warning during Execution") && m.contains("ns not found")));
    }

    #[test]
    fn test_skip_marks_migrated_without_exec_effects() {
        let h = harness(Scripted {
            skip_in_up: true,
            ..Scripted::default()
        });
        let mut version = h.config.version(&v()).unwrap();

        version.execute(Direction::Up, false).unwrap();

        assert!(h.config.has_version_migrated(&v()).unwrap());
        assert_eq!(users(&h.store).count_documents(&Document::new()).unwrap(), 0);
        assert_eq!(version.execution_state(), ExecutionState::None);
        let messages = h.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|m| m.contains("SS skipped (Reason: already seeded)")));
    }

    #[test]
    fn test_skip_after_recording_does_not_record_twice() {
        let h = harness(Scripted {
            skip_in_post: true,
            ..Scripted::default()
        });
        let mut version = h.config.version(&v()).unwrap();

        version.execute(Direction::Up, false).unwrap();
        assert_eq!(h.config.number_of_executed_migrations().unwrap(), 1);
    }

    #[test]
    fn test_failure_reports_phase_and_is_not_recorded() {
        let h = harness(Scripted {
            fail_in_up: true,
            ..Scripted::default()
        });
        let mut version = h.config.version(&v()).unwrap();

        let err = version.execute(Direction::Up, false).unwrap_err();
        assert!(matches!(err, MigrationError::Domain(_)));
        assert_eq!(version.execution_state(), ExecutionState::None);
        assert!(!h.config.has_version_migrated(&v()).unwrap());

        let messages = h.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|m| m.contains("Migration 20140101000000 failed during Execution. Error boom")));
    }

    #[test]
    fn test_pre_and_post_failures_report_their_phase() {
        let h = harness(Scripted {
            fail_in_pre: true,
            ..Scripted::default()
        });
        let mut version = h.config.version(&v()).unwrap();

        assert!(version.execute(Direction::Up, false).is_err());
        assert!(!h.config.has_version_migrated(&v()).unwrap());
        assert_eq!(users(&h.store).count_documents(&Document::new()).unwrap(), 0);
        assert!(h.messages.lock().unwrap().iter().any(|m| m
            .contains("Migration 20140101000000 failed during Pre-Checks. Error not ready")));

        let h = harness(Scripted {
            fail_in_post: true,
            ..Scripted::default()
        });
        let mut version = h.config.version(&v()).unwrap();

        assert!(version.execute(Direction::Up, false).is_err());
        assert_eq!(version.execution_state(), ExecutionState::None);
        // the record is written before the post hook runs
        assert!(h.config.has_version_migrated(&v()).unwrap());
        assert!(h.messages.lock().unwrap().iter().any(|m| m.contains(
            "Migration 20140101000000 failed during Post-Checks. Error verification failed"
        )));
    }

    #[test]
    fn test_hooks_run_in_order() {
        let migration = Scripted::default();
        let calls = Arc::clone(&migration.calls);
        let h = harness(migration);
        let mut version = h.config.version(&v()).unwrap();

        version.execute(Direction::Up, false).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["pre_up", "up", "post_up"]);

        calls.lock().unwrap().clear();
        version.execute(Direction::Down, false).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["pre_down", "down", "post_down"]);
    }

    #[test]
    fn test_skip_during_down_removes_record() {
        let migration = Scripted {
            skip_in_down: true,
            ..Scripted::default()
        };
        let calls = Arc::clone(&migration.calls);
        let h = harness(migration);
        let mut version = h.config.version(&v()).unwrap();
        version.execute(Direction::Up, false).unwrap();
        calls.lock().unwrap().clear();

        version.execute(Direction::Down, false).unwrap();

        assert!(!h.config.has_version_migrated(&v()).unwrap());
        assert_eq!(users(&h.store).count_documents(&Document::new()).unwrap(), 1);
        assert_eq!(*calls.lock().unwrap(), vec!["pre_down", "down"]);
        assert!(h
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains("SS skipped (Reason: nothing to revert)")));
    }

    #[test]
    fn test_failed_skip_record_is_reported() {
        let h = harness(Scripted {
            skip_in_up: true,
            ..Scripted::default()
        });
        h.config.mark_version_migrated(&v(), false).unwrap();
        let mut version = h.config.version(&v()).unwrap();

        let err = version.execute(Direction::Up, false).unwrap_err();

        assert!(matches!(err, MigrationError::Store(_)));
        let messages = h.messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|m| m.contains("Migration 20140101000000 failed during Execution. Error")));
        assert!(!messages.iter().any(|m| m.contains("SS skipped")));
    }

    #[test]
    fn test_dry_run_down_keeps_record() {
        let mut h = harness(Scripted::default());
        {
            let mut version = h.config.version(&v()).unwrap();
            version.execute(Direction::Up, false).unwrap();
        }
        h.config.set_dry_run(true);
        let mut version = h.config.version(&v()).unwrap();

        version.execute(Direction::Down, false).unwrap();

        assert!(h.config.has_version_migrated(&v()).unwrap());
        assert_eq!(users(&h.store).count_documents(&Document::new()).unwrap(), 0);
    }

    #[test]
    fn test_replay_down_is_rejected() {
        let h = harness(Scripted::default());
        let mut version = h.config.version(&v()).unwrap();

        let err = version.execute(Direction::Down, true).unwrap_err();
        assert!(matches!(err, MigrationError::Abort(m) if m.contains("Use replay with 'up'")));
    }

    #[test]
    fn test_replay_up_upserts() {
        let h = harness(Scripted::default());
        let mut version = h.config.version(&v()).unwrap();

        version.execute(Direction::Up, false).unwrap();
        version.execute(Direction::Up, true).unwrap();

        let records = h
            .config
            .collection()
            .unwrap()
            .find(&Document::new(), &FindOptions::default())
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_second_plain_up_fails_on_unique_index() {
        let h = harness(Scripted::default());
        let mut version = h.config.version(&v()).unwrap();

        version.execute(Direction::Up, false).unwrap();
        let err = version.execute(Direction::Up, false).unwrap_err();
        assert!(matches!(err, MigrationError::Store(_)));
    }

    #[test]
    fn test_dry_run_leaves_no_record() {
        let mut h = harness(Scripted::default());
        h.config.set_dry_run(true);
        let mut version = h.config.version(&v()).unwrap();

        version.execute(Direction::Up, false).unwrap();
        assert!(!h.config.has_version_migrated(&v()).unwrap());
        assert_eq!(users(&h.store).count_documents(&Document::new()).unwrap(), 1);
    }

    #[test]
    fn test_execute_script() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("seed.js"), "db.users.insert({name: 'ada'});").unwrap();

        let mut h = harness(Scripted::default());
        {
            let version = h.config.version(&v()).unwrap();
            assert!(matches!(
                version.execute_script("seed.js"),
                Err(MigrationError::MissingScriptDirectory)
            ));
        }

        h.config.set_migrations_script_directory(temp.path());
        let version = h.config.version(&v()).unwrap();
        let reply = version.execute_script("seed.js").unwrap();
        assert_eq!(reply.get("ok"), Some(&json!(1)));
        assert_eq!(h.store.evaluated_scripts().len(), 1);

        let missing = version.execute_script("missing.js");
        assert!(matches!(
            missing,
            Err(MigrationError::InvalidArgument(m)) if m.contains("File does not exist")
        ));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ExecutionState::Pre.to_string(), "Pre-Checks");
        assert_eq!(ExecutionState::Exec.to_string(), "Execution");
        assert_eq!(ExecutionState::Post.to_string(), "Post-Checks");
        assert_eq!(ExecutionState::None.to_string(), "No State");
    }
}
