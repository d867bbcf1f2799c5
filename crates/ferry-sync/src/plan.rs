//! Replication plans.
//!
//! A plan is an ordered list of immutable operations per environment. The
//! planner produces it, the executor consumes it, and neither mutates it.

use std::fmt;

use ferry_catalog::{DeclaredType, ParameterScope};
use serde::Serialize;

use crate::codec::Literal;

/// Dependency stage an operation belongs to, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Environment,
    Variables,
    References,
    Parameters,
}

impl Stage {
    /// Singular noun for an item of this stage.
    pub fn noun(&self) -> &'static str {
        match self {
            Stage::Environment => "environment",
            Stage::Variables => "variable",
            Stage::References => "reference",
            Stage::Parameters => "parameter",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Environment => "environment",
            Stage::Variables => "variables",
            Stage::References => "references",
            Stage::Parameters => "parameters",
        };
        f.write_str(s)
    }
}

/// Handle to a sensitive source value, decrypted only when consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensitiveHandle {
    pub environment_id: i64,
    pub variable_id: i64,
    pub data_type: DeclaredType,
}

/// Value a planned variable is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableValue {
    /// Plaintext value, already encoded.
    Literal(Literal),
    /// Sensitive value, decrypted by the executor right before the create call.
    Deferred(SensitiveHandle),
    /// The source value could not be encoded; the variable is reported failed.
    Rejected(String),
}

/// Value assigned by a parameter operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    /// Literal override (`value_type = V`).
    Literal(Literal),
    /// Binding to an environment variable by name (`value_type = R`).
    Reference(String),
}

/// One `set_object_parameter_value` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterOperation {
    pub folder: String,
    pub project: String,
    pub scope: ParameterScope,
    pub parameter_name: String,
    pub value: ParameterValue,
}

/// A single planned create or link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateEnvironment {
        folder: String,
        name: String,
        description: String,
    },
    CreateVariable {
        folder: String,
        environment: String,
        name: String,
        data_type: DeclaredType,
        sensitive: bool,
        description: String,
        value: VariableValue,
    },
    /// Always a relative reference.
    CreateReference {
        folder: String,
        project: String,
        environment: String,
    },
    BindParameter(ParameterOperation),
}

impl Operation {
    pub fn stage(&self) -> Stage {
        match self {
            Operation::CreateEnvironment { .. } => Stage::Environment,
            Operation::CreateVariable { .. } => Stage::Variables,
            Operation::CreateReference { .. } => Stage::References,
            Operation::BindParameter(_) => Stage::Parameters,
        }
    }

    /// Short human-readable subject, e.g. `variable V1`.
    pub fn subject(&self) -> String {
        match self {
            Operation::CreateEnvironment { name, .. } => format!("environment {}", name),
            Operation::CreateVariable { name, .. } => format!("variable {}", name),
            Operation::CreateReference { project, .. } => format!("reference {}", project),
            Operation::BindParameter(op) => {
                format!("parameter {}.{} ({})", op.project, op.parameter_name, op.scope)
            }
        }
    }
}

/// Non-fatal condition surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Absolute references are not migrated.
    AbsoluteReference { project: String, environment: String },
    /// Sensitive literal override that cannot be copied in plaintext.
    SensitiveOverride { project: String, parameter: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::AbsoluteReference {
                project,
                environment,
            } => write!(
                f,
                "project {} has an absolute reference to environment {}; not migrated",
                project, environment
            ),
            Warning::SensitiveOverride { project, parameter } => write!(
                f,
                "parameter {}.{} has a sensitive override; not copied",
                project, parameter
            ),
        }
    }
}

/// Planned item that was deliberately left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Skip {
    /// The project is not deployed in the target folder.
    ProjectMissing { project: String },
    /// Already present on the target (resume mode).
    AlreadyPresent { stage: Stage, name: String },
    /// Reference parameter whose variable no environment linked to the
    /// project defines.
    VariableUndefined {
        project: String,
        parameter: String,
        variable: String,
    },
}

impl Skip {
    pub fn stage(&self) -> Stage {
        match self {
            Skip::ProjectMissing { .. } => Stage::References,
            Skip::AlreadyPresent { stage, .. } => *stage,
            Skip::VariableUndefined { .. } => Stage::Parameters,
        }
    }

    /// Item the skip stands in for, phrased like [`Operation::subject`].
    pub fn subject(&self) -> String {
        match self {
            Skip::ProjectMissing { project } => format!("reference {}", project),
            Skip::AlreadyPresent { stage, name } => format!("{} {}", stage.noun(), name),
            Skip::VariableUndefined {
                project, parameter, ..
            } => format!("parameter {}.{}", project, parameter),
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::ProjectMissing { project } => {
                write!(f, "project {} does not exist on target", project)
            }
            Skip::AlreadyPresent { stage, name } => {
                write!(f, "{} {} already present on target", stage.noun(), name)
            }
            Skip::VariableUndefined {
                project, variable, ..
            } => write!(
                f,
                "variable {} is not defined in any environment referenced by project {}",
                variable, project
            ),
        }
    }
}

/// Ordered operations for one source environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentPlan {
    pub environment: String,
    pub operations: Vec<Operation>,
    pub warnings: Vec<Warning>,
    pub skips: Vec<Skip>,
}

impl EnvironmentPlan {
    /// Operations in one stage, in plan order.
    pub fn stage(&self, stage: Stage) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(move |op| op.stage() == stage)
    }
}

/// The full plan for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub source_folder: String,
    pub target_folder: String,
    pub environments: Vec<EnvironmentPlan>,
    /// Warnings not tied to a planned environment.
    pub warnings: Vec<Warning>,
}

impl SyncPlan {
    /// Every warning across environments in plan order, then run-level ones.
    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.environments
            .iter()
            .flat_map(|e| e.warnings.iter())
            .chain(self.warnings.iter())
    }

    pub fn operation_count(&self) -> usize {
        self.environments.iter().map(|e| e.operations.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::Environment < Stage::Variables);
        assert!(Stage::Variables < Stage::References);
        assert!(Stage::References < Stage::Parameters);
    }

    #[test]
    fn test_subjects() {
        let op = Operation::BindParameter(ParameterOperation {
            folder: "ETL".into(),
            project: "P3".into(),
            scope: ParameterScope::Package("Load.dtsx".into()),
            parameter_name: "Conn".into(),
            value: ParameterValue::Reference("V1".into()),
        });
        assert_eq!(op.stage(), Stage::Parameters);
        assert_eq!(op.subject(), "parameter P3.Conn (package Load.dtsx)");
    }

    #[test]
    fn test_warning_and_skip_text() {
        let w = Warning::AbsoluteReference {
            project: "P1".into(),
            environment: "E1".into(),
        };
        assert!(w.to_string().contains("P1"));
        let s = Skip::AlreadyPresent {
            stage: Stage::Variables,
            name: "V1".into(),
        };
        assert_eq!(s.to_string(), "variable V1 already present on target");
        assert_eq!(s.subject(), "variable V1");

        let s = Skip::VariableUndefined {
            project: "P3".into(),
            parameter: "Conn".into(),
            variable: "V9".into(),
        };
        assert_eq!(s.stage(), Stage::Parameters);
        assert_eq!(s.subject(), "parameter P3.Conn");
        assert!(s.to_string().starts_with("variable V9 is not defined"));
    }
}
