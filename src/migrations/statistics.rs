//! # Collection Statistics
//!
//! Before/after snapshots of collection metrics around a migration. The
//! numbers come from an opaque [`StatisticsCollector`]; this module only
//! stores and diffs them. Collection is best-effort: callers log failures
//! and carry on.

use std::collections::BTreeMap;

use serde_json::json;

use super::errors::{MigrationError, MigrationResult};
use crate::store::{Database, Document};

/// Metrics tracked for every analyzed collection, in report order.
pub const METRICS: [&str; 9] = [
    "count",
    "size",
    "avgObjSize",
    "storageSize",
    "numExtents",
    "nindexes",
    "lastExtentSize",
    "paddingFactor",
    "totalIndexSize",
];

/// Flat metric name to value mapping.
pub type Metrics = BTreeMap<String, f64>;

/// Source of collection metrics.
pub trait StatisticsCollector: Send + Sync {
    /// Collect metrics for `collection` in `database`.
    fn collect(&self, database: &dyn Database, collection: &str) -> MigrationResult<Metrics>;
}

/// Collector backed by the `collStats` database command.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollStatsCollector;

impl StatisticsCollector for CollStatsCollector {
    fn collect(&self, database: &dyn Database, collection: &str) -> MigrationResult<Metrics> {
        let mut command = Document::new();
        command.insert("collStats".to_string(), json!(collection));

        let reply = database.command(&command)?;
        if reply.is_empty() {
            return Err(MigrationError::Domain(format!(
                "Statistics not found for collection {}",
                collection
            )));
        }
        if let Some(errmsg) = reply.get("errmsg") {
            let message = errmsg.as_str().map(str::to_string).unwrap_or_else(|| errmsg.to_string());
            return Err(MigrationError::Domain(message));
        }

        Ok(extract_metrics(&reply))
    }
}

/// Keep only the tracked numeric metrics of a stats reply.
pub fn extract_metrics(reply: &Document) -> Metrics {
    reply
        .iter()
        .filter(|(key, _)| METRICS.contains(&key.as_str()))
        .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
        .collect()
}

/// Before/after metrics of one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    collection: String,
    before: Metrics,
    after: Metrics,
}

impl Statistics {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            before: Metrics::new(),
            after: Metrics::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn before(&self) -> &Metrics {
        &self.before
    }

    pub fn after(&self) -> &Metrics {
        &self.after
    }

    pub fn update_before(
        &mut self,
        collector: &dyn StatisticsCollector,
        database: &dyn Database,
    ) -> MigrationResult<()> {
        self.before = collector.collect(database, &self.collection)?;
        Ok(())
    }

    pub fn update_after(
        &mut self,
        collector: &dyn StatisticsCollector,
        database: &dyn Database,
    ) -> MigrationResult<()> {
        self.after = collector.collect(database, &self.collection)?;
        Ok(())
    }

    /// Report lines: a header, a rule, then one line per tracked metric.
    /// Missing values count as zero.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(METRICS.len() + 2);
        lines.push(format!(
            "     {:<16} {:<20} {:<20} {:<20}",
            "metric", "before", "after", "difference"
        ));
        lines.push(format!("     {}", "=".repeat(80)));

        for metric in METRICS {
            let before = self.before.get(metric).copied().unwrap_or(0.0);
            let after = self.after.get(metric).copied().unwrap_or(0.0);
            lines.push(format!(
                "     {:<16} {:<20} {:<20} {:<20}",
                metric,
                render(before),
                render(after),
                render(after - before)
            ));
        }
        lines
    }
}

fn render(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
