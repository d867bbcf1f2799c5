//! Run reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::executor::{EnvironmentOutcome, EnvironmentState, ItemResult, Outcome};
use crate::plan::{Stage, Warning};

/// Per-environment counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Environments, variables and references created (or rendered).
    pub created: usize,
    /// Parameters linked (or rendered).
    pub linked: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl Summary {
    pub fn from_items(items: &[ItemResult]) -> Self {
        items.iter().fold(Summary::default(), |mut acc, item| {
            match item.outcome {
                Outcome::Applied | Outcome::Rendered if item.stage == Stage::Parameters => {
                    acc.linked += 1
                }
                Outcome::Applied | Outcome::Rendered => acc.created += 1,
                Outcome::Skipped(_) => acc.skipped += 1,
                Outcome::Failed(_) => acc.errored += 1,
            }
            acc
        })
    }

    fn add(mut self, other: Summary) -> Self {
        self.created += other.created;
        self.linked += other.linked;
        self.skipped += other.skipped;
        self.errored += other.errored;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentReport {
    pub environment: String,
    pub state: EnvironmentState,
    pub summary: Summary,
    pub items: Vec<ItemResult>,
    pub warnings: Vec<Warning>,
}

impl From<EnvironmentOutcome> for EnvironmentReport {
    fn from(outcome: EnvironmentOutcome) -> Self {
        Self {
            summary: Summary::from_items(&outcome.items),
            environment: outcome.environment,
            state: outcome.state,
            items: outcome.items,
            warnings: outcome.warnings,
        }
    }
}

/// Final report of one sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub source: String,
    pub target: String,
    pub source_folder: String,
    pub target_folder: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub environments: Vec<EnvironmentReport>,
    /// Warnings not tied to a replicated environment.
    pub warnings: Vec<Warning>,
}

impl SyncReport {
    /// Whether any environment failed or any item errored.
    pub fn has_failures(&self) -> bool {
        self.environments
            .iter()
            .any(|e| e.state.is_failed() || e.summary.errored > 0)
    }

    pub fn totals(&self) -> Summary {
        self.environments
            .iter()
            .fold(Summary::default(), |acc, e| acc.add(e.summary))
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.environments
            .iter()
            .flat_map(|e| e.warnings.iter())
            .chain(self.warnings.iter())
    }

    /// Rendered statements in plan order, one per line. Empty for live runs.
    pub fn script(&self) -> String {
        let mut out = String::new();
        for statement in self
            .environments
            .iter()
            .flat_map(|e| e.items.iter())
            .filter_map(|item| item.statement.as_deref())
        {
            out.push_str(statement);
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
