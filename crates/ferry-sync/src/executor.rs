//! Replication executor.
//!
//! Applies one environment plan in order, or renders it in dry-run mode.
//! Every create or link yields its own [`ItemResult`]; only a failed
//! environment creation stops the rest of that environment's plan.

use std::collections::BTreeSet;
use std::fmt;

use ferry_catalog::{CatalogGateway, CatalogReader, GatewayError, Statement};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::codec::{self, Literal};
use crate::plan::{
    EnvironmentPlan, Operation, ParameterOperation, SensitiveHandle, Stage, VariableValue, Warning,
};
use crate::render::Renderer;

/// Executor knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Render statements instead of submitting them.
    pub dry_run: bool,
    /// Redact decrypted sensitive literals in rendered output.
    pub mask_sensitive: bool,
}

/// Progress of one environment through its dependency stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    NotStarted,
    EnvironmentCreated,
    VariablesApplied,
    ReferencesApplied,
    ParametersLinked,
    Done,
    /// Terminal. Only environment creation can fail an environment.
    Failed(Stage),
}

impl EnvironmentState {
    fn rank(&self) -> u8 {
        match self {
            EnvironmentState::NotStarted => 0,
            EnvironmentState::EnvironmentCreated => 1,
            EnvironmentState::VariablesApplied => 2,
            EnvironmentState::ReferencesApplied => 3,
            EnvironmentState::ParametersLinked => 4,
            EnvironmentState::Done | EnvironmentState::Failed(_) => 5,
        }
    }

    fn next(self) -> Self {
        match self {
            EnvironmentState::NotStarted => EnvironmentState::EnvironmentCreated,
            EnvironmentState::EnvironmentCreated => EnvironmentState::VariablesApplied,
            EnvironmentState::VariablesApplied => EnvironmentState::ReferencesApplied,
            EnvironmentState::ReferencesApplied => EnvironmentState::ParametersLinked,
            EnvironmentState::ParametersLinked | EnvironmentState::Done => EnvironmentState::Done,
            failed @ EnvironmentState::Failed(_) => failed,
        }
    }

    /// State that must be reached before operations of `stage` may run.
    fn required_for(stage: Stage) -> Self {
        match stage {
            Stage::Environment => EnvironmentState::NotStarted,
            Stage::Variables => EnvironmentState::EnvironmentCreated,
            Stage::References => EnvironmentState::VariablesApplied,
            Stage::Parameters => EnvironmentState::ReferencesApplied,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EnvironmentState::Failed(_))
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentState::NotStarted => f.write_str("not started"),
            EnvironmentState::EnvironmentCreated => f.write_str("environment created"),
            EnvironmentState::VariablesApplied => f.write_str("variables applied"),
            EnvironmentState::ReferencesApplied => f.write_str("references applied"),
            EnvironmentState::ParametersLinked => f.write_str("parameters linked"),
            EnvironmentState::Done => f.write_str("done"),
            EnvironmentState::Failed(stage) => write!(f, "failed at {}", stage),
        }
    }
}

/// Result of one planned item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    /// Submitted to the target and accepted.
    Applied,
    /// Rendered only (dry run).
    Rendered,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResult {
    pub stage: Stage,
    pub subject: String,
    pub outcome: Outcome,
    /// Rendered statement text. Only populated in dry-run mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
}

impl ItemResult {
    fn new(stage: Stage, subject: String, outcome: Outcome) -> Self {
        Self {
            stage,
            subject,
            outcome,
            statement: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped(_))
    }
}

impl fmt::Display for ItemResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.stage == Stage::Parameters {
            "linked"
        } else {
            "created"
        };
        match &self.outcome {
            Outcome::Applied => write!(f, "{} {}", verb, self.subject),
            Outcome::Rendered => write!(f, "would have {} {}", verb, self.subject),
            Outcome::Skipped(reason) => write!(f, "skipped {}: {}", self.subject, reason),
            Outcome::Failed(message) => write!(f, "failed {}: {}", self.subject, message),
        }
    }
}

/// Everything that happened to one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentOutcome {
    pub environment: String,
    pub state: EnvironmentState,
    pub items: Vec<ItemResult>,
    pub warnings: Vec<Warning>,
}

/// Applies plans against a target, decrypting sensitive values from a source.
pub struct Executor<'a> {
    source: &'a dyn CatalogGateway,
    target: &'a dyn CatalogGateway,
    renderer: Renderer,
    options: ExecuteOptions,
}

impl<'a> Executor<'a> {
    pub fn new(
        source: &'a dyn CatalogGateway,
        target: &'a dyn CatalogGateway,
        options: ExecuteOptions,
    ) -> Self {
        Self {
            source,
            target,
            renderer: Renderer::new(target.endpoint().database.clone()),
            options,
        }
    }

    pub fn options(&self) -> ExecuteOptions {
        self.options
    }

    /// Apply (or render) one environment plan.
    pub async fn apply(&self, plan: &EnvironmentPlan) -> EnvironmentOutcome {
        let environment = plan.environment.as_str();
        let mut state = EnvironmentState::NotStarted;
        let mut items = Vec::with_capacity(plan.operations.len() + plan.skips.len());
        let mut failed_references = BTreeSet::new();

        for warning in &plan.warnings {
            warn!(environment, "{}", warning);
        }

        let mut operations = plan.operations.iter();
        while let Some(op) = operations.next() {
            state = advance(environment, state, EnvironmentState::required_for(op.stage()));

            let item = match op {
                Operation::CreateVariable {
                    value: VariableValue::Rejected(message),
                    ..
                } => ItemResult::new(op.stage(), op.subject(), Outcome::Failed(message.clone())),
                Operation::CreateVariable {
                    value: VariableValue::Deferred(handle),
                    ..
                } => match self.resolve(handle).await {
                    Ok(literal) => self.submit(op, Some(&literal)).await,
                    Err(outcome) => ItemResult::new(op.stage(), op.subject(), outcome),
                },
                Operation::BindParameter(param) if failed_references.contains(&param.project) => {
                    ItemResult::new(
                        op.stage(),
                        op.subject(),
                        Outcome::Skipped(format!("reference to project {} failed", param.project)),
                    )
                }
                _ => self.submit(op, None).await,
            };

            match op {
                Operation::CreateEnvironment { .. } if item.is_failed() => {
                    error!(environment, "{}", item);
                    items.push(item);
                    for rest in operations.by_ref() {
                        items.push(ItemResult::new(
                            rest.stage(),
                            rest.subject(),
                            Outcome::Skipped("environment was not created".to_string()),
                        ));
                    }
                    state = EnvironmentState::Failed(Stage::Environment);
                    break;
                }
                Operation::CreateEnvironment { .. } => {
                    state = EnvironmentState::EnvironmentCreated;
                }
                Operation::CreateReference { project, .. } if item.is_failed() => {
                    failed_references.insert(project.clone());
                }
                _ => {}
            }

            match &item.outcome {
                Outcome::Failed(_) => error!(environment, "{}", item),
                Outcome::Skipped(_) => warn!(environment, "{}", item),
                _ => info!(environment, "{}", item),
            }
            items.push(item);
        }

        if !state.is_failed() {
            state = advance(environment, state, EnvironmentState::Done);
        }

        for skip in &plan.skips {
            info!(environment, "{}", skip);
            items.push(ItemResult::new(
                skip.stage(),
                skip.subject(),
                Outcome::Skipped(skip.to_string()),
            ));
        }

        EnvironmentOutcome {
            environment: plan.environment.clone(),
            state,
            items,
            warnings: plan.warnings.clone(),
        }
    }

    /// Apply standalone parameter operations (literal override copy).
    pub async fn apply_parameters(&self, operations: &[ParameterOperation]) -> Vec<ItemResult> {
        let mut items = Vec::with_capacity(operations.len());
        for op in operations {
            let op = Operation::BindParameter(op.clone());
            let item = self.submit(&op, None).await;
            match &item.outcome {
                Outcome::Failed(_) => error!(project = %op_project(&op), "{}", item),
                _ => info!(project = %op_project(&op), "{}", item),
            }
            items.push(item);
        }
        items
    }

    /// Decrypt and encode one sensitive value right before it is consumed.
    ///
    /// Only a decryption failure skips the variable; losing the source or
    /// timing out fails it. Error outcomes never carry the value itself.
    async fn resolve(&self, handle: &SensitiveHandle) -> Result<Literal, Outcome> {
        let plaintext = CatalogReader::new(self.source)
            .decrypt_variable(handle.environment_id, handle.variable_id)
            .await
            .map_err(|e| match e {
                GatewayError::DecryptionFailed { .. } => Outcome::Skipped(e.to_string()),
                other => Outcome::Failed(other.to_string()),
            })?;
        codec::encode(&plaintext, handle.data_type).map_err(|_| {
            Outcome::Failed(format!(
                "decrypted value is not a valid {}",
                handle.data_type
            ))
        })
    }

    async fn submit(&self, op: &Operation, resolved: Option<&Literal>) -> ItemResult {
        let mut item = ItemResult::new(op.stage(), op.subject(), Outcome::Applied);

        if self.options.dry_run {
            match self.renderer.render(op, resolved, self.options.mask_sensitive) {
                Some(statement) => {
                    item.outcome = Outcome::Rendered;
                    item.statement = Some(statement.text().to_string());
                }
                None => item.outcome = Outcome::Failed("no value to render".to_string()),
            }
            return item;
        }

        let Some(statement) = self.renderer.render(op, resolved, false) else {
            item.outcome = Outcome::Failed("no value to render".to_string());
            return item;
        };
        log_statement(&statement);
        match self.target.execute(&statement).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                item.outcome = Outcome::Failed(format!("{} (rerun with resume to skip it)", e));
            }
            Err(e) => item.outcome = Outcome::Failed(e.to_string()),
        }
        item
    }
}

fn op_project(op: &Operation) -> &str {
    match op {
        Operation::BindParameter(p) => &p.project,
        Operation::CreateReference { project, .. } => project,
        Operation::CreateEnvironment { name, .. } => name,
        Operation::CreateVariable { environment, .. } => environment,
    }
}

fn log_statement(statement: &Statement) {
    if statement.is_sensitive() {
        debug!(label = statement.label(), "submitting sensitive statement");
    } else {
        debug!(label = statement.label(), text = statement.text(), "submitting statement");
    }
}

fn advance(
    environment: &str,
    mut state: EnvironmentState,
    required: EnvironmentState,
) -> EnvironmentState {
    while state.rank() < required.rank() {
        state = state.next();
        debug!(environment, state = %state, "environment state");
    }
    state
}
