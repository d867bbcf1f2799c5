//! Replication planner.
//!
//! Pure function from a source snapshot and inspected target facts to an ordered
//! [`SyncPlan`]. Nothing here performs I/O, so the same inputs always yield
//! the same plan.

use std::collections::{BTreeMap, BTreeSet};

use ferry_catalog::{
    Environment, EnvironmentReference, EnvironmentVariable, ObjectParameter, ReferenceType,
    StoredValue,
};

use crate::codec;
use crate::error::CodecError;
use crate::plan::{
    EnvironmentPlan, Operation, ParameterOperation, ParameterValue, SensitiveHandle, Skip, Stage,
    SyncPlan, VariableValue, Warning,
};

/// One source environment with its variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEnvironment {
    pub environment: Environment,
    pub variables: Vec<EnvironmentVariable>,
}

/// Everything read from the source folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub folder: String,
    pub environments: Vec<SourceEnvironment>,
    /// References of every project in the folder.
    pub references: Vec<EnvironmentReference>,
    /// Overridden parameters of the projects that hold a relative reference.
    pub parameters: Vec<ObjectParameter>,
}

/// What already exists in the target folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetFacts {
    pub folder: String,
    pub projects: BTreeSet<String>,
    /// Existing environments and the names of their variables.
    pub environments: BTreeMap<String, BTreeSet<String>>,
    /// Existing `(project, environment)` references.
    pub references: BTreeSet<(String, String)>,
}

/// Planner knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Skip items that already exist on the target instead of re-creating them.
    pub resume: bool,
    /// Restrict planning to these environments. Empty means all.
    pub environments: Vec<String>,
}

impl PlanOptions {
    fn selects(&self, environment: &str) -> bool {
        self.environments.is_empty() || self.environments.iter().any(|e| same_name(e, environment))
    }
}

/// Catalog names compare case-insensitively, like the catalog's own lookups.
pub fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Target facts keyed by case-folded name.
struct TargetIndex {
    projects: BTreeSet<String>,
    environments: BTreeMap<String, BTreeSet<String>>,
    references: BTreeSet<(String, String)>,
}

impl TargetIndex {
    fn new(target: &TargetFacts) -> Self {
        Self {
            projects: target.projects.iter().map(|p| fold(p)).collect(),
            environments: target
                .environments
                .iter()
                .map(|(env, vars)| (fold(env), vars.iter().map(|v| fold(v)).collect()))
                .collect(),
            references: target
                .references
                .iter()
                .map(|(project, env)| (fold(project), fold(env)))
                .collect(),
        }
    }
}

/// Plan every selected source environment, in source order.
pub fn plan(source: &SourceSnapshot, target: &TargetFacts, options: &PlanOptions) -> SyncPlan {
    let index = TargetIndex::new(target);
    let selected: Vec<&SourceEnvironment> = source
        .environments
        .iter()
        .filter(|env| options.selects(&env.environment.name))
        .collect();

    let mut planned: Vec<(EnvironmentPlan, BTreeSet<String>)> = selected
        .iter()
        .map(|env| plan_environment(env, source, target, &index, options))
        .collect();

    // Reference bindings no linking environment can satisfy.
    for parameter in &source.parameters {
        let Some(variable) = parameter.referenced_variable() else {
            continue;
        };
        let project = fold(&parameter.project_name);
        let linking: Vec<usize> = planned
            .iter()
            .enumerate()
            .filter(|(_, (_, linked))| linked.contains(&project))
            .map(|(i, _)| i)
            .collect();
        let defined = linking.iter().any(|&i| {
            selected[i]
                .variables
                .iter()
                .any(|v| same_name(&v.name, variable))
        });
        if let (Some(&first), false) = (linking.first(), defined) {
            planned[first].0.skips.push(Skip::VariableUndefined {
                project: parameter.project_name.clone(),
                parameter: parameter.parameter_name.clone(),
                variable: variable.to_string(),
            });
        }
    }

    // Absolute references not seen by any planned environment, typically
    // pointing at an environment in another folder.
    let warnings = source
        .references
        .iter()
        .filter(|r| r.reference_type == ReferenceType::Absolute)
        .filter(|r| {
            !selected
                .iter()
                .any(|env| same_name(&env.environment.name, &r.environment_name))
        })
        .map(|r| Warning::AbsoluteReference {
            project: r.project_name.clone(),
            environment: match &r.environment_folder {
                Some(folder) => format!("{}/{}", folder, r.environment_name),
                None => r.environment_name.clone(),
            },
        })
        .collect();

    SyncPlan {
        source_folder: source.folder.clone(),
        target_folder: target.folder.clone(),
        environments: planned.into_iter().map(|(plan, _)| plan).collect(),
        warnings,
    }
}

fn variable_value(variable: &EnvironmentVariable) -> VariableValue {
    match &variable.value {
        StoredValue::Encrypted => VariableValue::Deferred(SensitiveHandle {
            environment_id: variable.environment_id,
            variable_id: variable.variable_id,
            data_type: variable.data_type,
        }),
        StoredValue::Plain(text) => match codec::encode(text, variable.data_type) {
            Ok(literal) => VariableValue::Literal(literal),
            Err(e) => VariableValue::Rejected(e.to_string()),
        },
        StoredValue::Unsupported(declared) => VariableValue::Rejected(
            CodecError::UnsupportedType {
                declared: declared.clone(),
            }
            .to_string(),
        ),
    }
}

/// Plan one environment. Also returns the case-folded names of the projects
/// whose reference is planned or already present.
fn plan_environment(
    source_env: &SourceEnvironment,
    source: &SourceSnapshot,
    target: &TargetFacts,
    index: &TargetIndex,
    options: &PlanOptions,
) -> (EnvironmentPlan, BTreeSet<String>) {
    let env = &source_env.environment;
    let folder = &target.folder;
    let mut operations = Vec::new();
    let mut warnings = Vec::new();
    let mut skips = Vec::new();

    // Stage 1: environment
    let existing = if options.resume {
        index.environments.get(&fold(&env.name))
    } else {
        None
    };
    if existing.is_some() {
        skips.push(Skip::AlreadyPresent {
            stage: Stage::Environment,
            name: env.name.clone(),
        });
    } else {
        operations.push(Operation::CreateEnvironment {
            folder: folder.clone(),
            name: env.name.clone(),
            description: env.description.clone(),
        });
    }

    // Stage 2: variables
    for variable in &source_env.variables {
        if existing.is_some_and(|names| names.contains(&fold(&variable.name))) {
            skips.push(Skip::AlreadyPresent {
                stage: Stage::Variables,
                name: variable.name.clone(),
            });
            continue;
        }
        operations.push(Operation::CreateVariable {
            folder: folder.clone(),
            environment: env.name.clone(),
            name: variable.name.clone(),
            data_type: variable.data_type,
            sensitive: variable.sensitive,
            description: variable.description.clone(),
            value: variable_value(variable),
        });
    }

    // Stage 3: references. Projects whose reference is planned or already
    // present are eligible for parameter binding.
    let mut linked = BTreeSet::new();
    for reference in source
        .references
        .iter()
        .filter(|r| same_name(&r.environment_name, &env.name))
    {
        let project = &reference.project_name;
        let key = fold(project);
        if reference.reference_type == ReferenceType::Absolute {
            warnings.push(Warning::AbsoluteReference {
                project: project.clone(),
                environment: env.name.clone(),
            });
            continue;
        }
        if !index.projects.contains(&key) {
            skips.push(Skip::ProjectMissing {
                project: project.clone(),
            });
            continue;
        }
        if !linked.insert(key.clone()) {
            continue;
        }
        if options.resume && index.references.contains(&(key, fold(&env.name))) {
            skips.push(Skip::AlreadyPresent {
                stage: Stage::References,
                name: project.clone(),
            });
            continue;
        }
        operations.push(Operation::CreateReference {
            folder: folder.clone(),
            project: project.clone(),
            environment: env.name.clone(),
        });
    }

    // Stage 4: parameter bindings to variables defined in this environment.
    let defined: BTreeSet<String> = source_env.variables.iter().map(|v| fold(&v.name)).collect();
    for parameter in source
        .parameters
        .iter()
        .filter(|p| linked.contains(&fold(&p.project_name)))
    {
        let Some(variable) = parameter.referenced_variable() else {
            continue;
        };
        if !defined.contains(&fold(variable)) {
            continue;
        }
        operations.push(Operation::BindParameter(ParameterOperation {
            folder: folder.clone(),
            project: parameter.project_name.clone(),
            scope: parameter.scope.clone(),
            parameter_name: parameter.parameter_name.clone(),
            value: ParameterValue::Reference(variable.to_string()),
        }));
    }

    let plan = EnvironmentPlan {
        environment: env.name.clone(),
        operations,
        warnings,
        skips,
    };
    (plan, linked)
}
