//! Replication engine.
//!
//! Reads the source folder, inspects the target folder, plans, and hands each
//! environment plan to the executor. Environments run concurrently up to the
//! configured parallelism; results are collected in plan order.

use std::collections::BTreeSet;

use chrono::Utc;
use ferry_catalog::{
    CatalogGateway, CatalogReader, ParameterBinding, ReferenceType, SharedGateway,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::codec;
use crate::error::{Result, SyncError};
use crate::executor::{EnvironmentOutcome, ExecuteOptions, Executor, ItemResult, Outcome};
use crate::plan::{ParameterOperation, ParameterValue, Stage, SyncPlan, Warning};
use crate::planner::{self, PlanOptions, SourceEnvironment, SourceSnapshot, TargetFacts};
use crate::report::{EnvironmentReport, SyncReport};

/// Default number of environments applied concurrently.
pub const DEFAULT_PARALLELISM: usize = 1;

/// Options for one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Source folder.
    pub folder: String,
    /// Target folder; defaults to the source folder name.
    pub target_folder: Option<String>,
    /// Environments to replicate. Empty means all.
    pub environments: Vec<String>,
    pub dry_run: bool,
    pub resume: bool,
    pub mask_sensitive: bool,
    pub parallelism: usize,
}

impl SyncOptions {
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            target_folder: None,
            environments: Vec::new(),
            dry_run: false,
            resume: false,
            mask_sensitive: false,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn target_folder(&self) -> &str {
        self.target_folder.as_deref().unwrap_or(&self.folder)
    }

    fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            resume: self.resume,
            environments: self.environments.clone(),
        }
    }
}

/// Result of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub source: String,
    pub target: String,
    pub source_folder: String,
    pub target_folder: String,
    pub source_folder_exists: bool,
    pub target_folder_exists: bool,
    pub environments: Vec<String>,
    /// Source environments that already exist on the target.
    pub existing_environments: Vec<String>,
    /// Source projects not deployed on the target.
    pub missing_projects: Vec<String>,
}

impl CheckReport {
    pub fn is_ready(&self) -> bool {
        self.source_folder_exists && self.target_folder_exists
    }
}

/// Options for copying literal parameter overrides of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideOptions {
    pub folder: String,
    pub target_folder: Option<String>,
    pub project: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverridesReport {
    pub project: String,
    pub items: Vec<ItemResult>,
    pub warnings: Vec<Warning>,
}

impl OverridesReport {
    pub fn has_failures(&self) -> bool {
        self.items.iter().any(ItemResult::is_failed)
    }
}

/// Replicates environments between two catalogs.
pub struct SyncEngine {
    source: SharedGateway,
    target: SharedGateway,
}

impl SyncEngine {
    pub fn new(source: SharedGateway, target: SharedGateway) -> Self {
        Self { source, target }
    }

    pub fn source(&self) -> &dyn CatalogGateway {
        self.source.as_ref()
    }

    pub fn target(&self) -> &dyn CatalogGateway {
        self.target.as_ref()
    }

    async fn require_folder(gateway: &dyn CatalogGateway, folder: &str) -> Result<()> {
        if CatalogReader::new(gateway).folder_exists(folder).await? {
            Ok(())
        } else {
            Err(SyncError::FolderMissing {
                server: gateway.endpoint().server.clone(),
                folder: folder.to_string(),
            })
        }
    }

    /// Read the source folder. Variables are read only for selected environments.
    pub async fn snapshot(&self, folder: &str, environments: &[String]) -> Result<SourceSnapshot> {
        let reader = CatalogReader::new(self.source());
        let mut snapshot = SourceSnapshot {
            folder: folder.to_string(),
            ..Default::default()
        };

        for environment in reader.environments(folder).await? {
            if !environments.is_empty()
                && !environments.iter().any(|e| planner::same_name(e, &environment.name))
            {
                continue;
            }
            let variables = reader.variables(&environment).await?;
            snapshot.environments.push(SourceEnvironment {
                environment,
                variables,
            });
        }

        snapshot.references = reader.references(folder).await?;
        let linked: BTreeSet<&str> = snapshot
            .references
            .iter()
            .filter(|r| r.reference_type == ReferenceType::Relative)
            .map(|r| r.project_name.as_str())
            .collect();
        let mut parameters = Vec::new();
        for project in linked {
            parameters.extend(reader.object_parameters(folder, project).await?);
        }
        snapshot.parameters = parameters;

        Ok(snapshot)
    }

    /// Probe what exists in the target folder. Variable names are read only
    /// when `with_variables` is set.
    pub async fn inspect_target(&self, folder: &str, with_variables: bool) -> Result<TargetFacts> {
        let reader = CatalogReader::new(self.target());
        let mut facts = TargetFacts {
            folder: folder.to_string(),
            ..Default::default()
        };

        facts.projects = reader
            .projects(folder)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();

        for environment in reader.environments(folder).await? {
            let names = if with_variables {
                reader
                    .variables(&environment)
                    .await?
                    .into_iter()
                    .map(|v| v.name)
                    .collect()
            } else {
                BTreeSet::new()
            };
            facts.environments.insert(environment.name, names);
        }

        facts.references = reader
            .references(folder)
            .await?
            .into_iter()
            .filter(|r| r.reference_type == ReferenceType::Relative)
            .map(|r| (r.project_name, r.environment_name))
            .collect();

        Ok(facts)
    }

    /// Read both sides and build the plan. Nothing is written.
    pub async fn plan(&self, options: &SyncOptions) -> Result<SyncPlan> {
        let target_folder = options.target_folder();
        Self::require_folder(self.source(), &options.folder).await?;
        Self::require_folder(self.target(), target_folder).await?;

        let snapshot = self.snapshot(&options.folder, &options.environments).await?;
        for name in &options.environments {
            if !snapshot
                .environments
                .iter()
                .any(|e| planner::same_name(&e.environment.name, name))
            {
                warn!(environment = %name, folder = %options.folder, "environment not found in source folder");
            }
        }

        let facts = self.inspect_target(target_folder, options.resume).await?;
        Ok(planner::plan(&snapshot, &facts, &options.plan_options()))
    }

    /// Plan and apply (or render) a full run.
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sync",
            %run_id,
            source = %self.source.endpoint(),
            target = %self.target.endpoint()
        );
        self.run_inner(run_id, options).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, options: &SyncOptions) -> Result<SyncReport> {
        let started_at = Utc::now();
        let plan = self.plan(options).await?;
        info!(
            environments = plan.environments.len(),
            operations = plan.operation_count(),
            dry_run = options.dry_run,
            "plan ready"
        );

        let executor = Executor::new(
            self.source(),
            self.target(),
            ExecuteOptions {
                dry_run: options.dry_run,
                mask_sensitive: options.mask_sensitive,
            },
        );
        for warning in &plan.warnings {
            warn!("{}", warning);
        }
        let outcomes: Vec<EnvironmentOutcome> = futures::stream::iter(plan.environments.iter())
            .map(|env| executor.apply(env))
            .buffered(options.parallelism.max(1))
            .collect()
            .await;

        let report = SyncReport {
            run_id,
            source: self.source.endpoint().to_string(),
            target: self.target.endpoint().to_string(),
            source_folder: plan.source_folder,
            target_folder: plan.target_folder,
            dry_run: options.dry_run,
            started_at,
            finished_at: Utc::now(),
            environments: outcomes.into_iter().map(EnvironmentReport::from).collect(),
            warnings: plan.warnings,
        };
        let totals = report.totals();
        info!(
            created = totals.created,
            linked = totals.linked,
            skipped = totals.skipped,
            errored = totals.errored,
            "run finished"
        );
        Ok(report)
    }

    /// Report folder presence and what a sync would find on both sides.
    pub async fn check(&self, folder: &str, target_folder: Option<&str>) -> Result<CheckReport> {
        let target_folder = target_folder.unwrap_or(folder);
        let source = CatalogReader::new(self.source());
        let target = CatalogReader::new(self.target());

        let mut report = CheckReport {
            source: self.source.endpoint().to_string(),
            target: self.target.endpoint().to_string(),
            source_folder: folder.to_string(),
            target_folder: target_folder.to_string(),
            source_folder_exists: source.folder_exists(folder).await?,
            target_folder_exists: target.folder_exists(target_folder).await?,
            environments: Vec::new(),
            existing_environments: Vec::new(),
            missing_projects: Vec::new(),
        };
        if !report.source_folder_exists {
            return Ok(report);
        }

        report.environments = source
            .environments(folder)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect();
        let source_projects = source.projects(folder).await?;

        if report.target_folder_exists {
            let facts = self.inspect_target(target_folder, false).await?;
            report.existing_environments = report
                .environments
                .iter()
                .filter(|name| facts.environments.contains_key(*name))
                .cloned()
                .collect();
            report.missing_projects = source_projects
                .into_iter()
                .filter(|p| !facts.projects.contains(&p.name))
                .map(|p| p.name)
                .collect();
        } else {
            report.missing_projects = source_projects.into_iter().map(|p| p.name).collect();
        }
        Ok(report)
    }

    /// Copy the literal parameter overrides of one project to the target.
    ///
    /// Reference bindings are left to [`run`](Self::run); sensitive literals
    /// are reported as warnings and not copied.
    pub async fn copy_overrides(&self, options: &OverrideOptions) -> Result<OverridesReport> {
        let target_folder = options.target_folder.as_deref().unwrap_or(&options.folder);
        let source = CatalogReader::new(self.source());
        let target = CatalogReader::new(self.target());

        for (gateway, reader, folder) in [
            (self.source(), &source, options.folder.as_str()),
            (self.target(), &target, target_folder),
        ] {
            Self::require_folder(gateway, folder).await?;
            if !reader
                .projects(folder)
                .await?
                .iter()
                .any(|p| planner::same_name(&p.name, &options.project))
            {
                return Err(SyncError::ProjectMissing {
                    server: gateway.endpoint().server.clone(),
                    folder: folder.to_string(),
                    project: options.project.clone(),
                });
            }
        }

        let mut items = Vec::new();
        let mut warnings = Vec::new();
        let mut operations = Vec::new();
        for parameter in source
            .object_parameters(&options.folder, &options.project)
            .await?
        {
            let value = match &parameter.binding {
                ParameterBinding::Reference(_) => continue,
                ParameterBinding::Value(None) => {
                    let warning = Warning::SensitiveOverride {
                        project: options.project.clone(),
                        parameter: parameter.parameter_name.clone(),
                    };
                    warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                }
                ParameterBinding::Value(Some(value)) => value,
            };
            match codec::encode(value, parameter.data_type) {
                Ok(literal) => operations.push(ParameterOperation {
                    folder: target_folder.to_string(),
                    project: options.project.clone(),
                    scope: parameter.scope.clone(),
                    parameter_name: parameter.parameter_name.clone(),
                    value: ParameterValue::Literal(literal),
                }),
                Err(e) => items.push(ItemResult {
                    stage: Stage::Parameters,
                    subject: format!(
                        "parameter {}.{} ({})",
                        options.project, parameter.parameter_name, parameter.scope
                    ),
                    outcome: Outcome::Failed(e.to_string()),
                    statement: None,
                }),
            }
        }

        let executor = Executor::new(
            self.source(),
            self.target(),
            ExecuteOptions {
                dry_run: options.dry_run,
                mask_sensitive: false,
            },
        );
        items.extend(executor.apply_parameters(&operations).await);

        Ok(OverridesReport {
            project: options.project.clone(),
            items,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_options_defaults() {
        let options = SyncOptions::new("ETL");
        assert_eq!(options.target_folder(), "ETL");
        assert_eq!(options.parallelism, DEFAULT_PARALLELISM);
        assert!(!options.dry_run);

        let options = SyncOptions {
            target_folder: Some("ETL_QA".into()),
            ..SyncOptions::new("ETL")
        };
        assert_eq!(options.target_folder(), "ETL_QA");
    }

    #[test]
    fn test_check_report_readiness() {
        let report = CheckReport {
            source: "a".into(),
            target: "b".into(),
            source_folder: "ETL".into(),
            target_folder: "ETL".into(),
            source_folder_exists: true,
            target_folder_exists: false,
            environments: Vec::new(),
            existing_environments: Vec::new(),
            missing_projects: Vec::new(),
        };
        assert!(!report.is_ready());
    }
}
