//! In-memory catalog gateway.
//!
//! Answers the reads issued by [`CatalogReader`](crate::reader::CatalogReader)
//! from a [`CatalogState`] and applies the catalog write procedures to it,
//! refusing duplicates and missing parents the way the server does. Names
//! compare case-insensitively. Failures can be injected per statement label
//! so that partial-failure behaviour is testable without a server.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{GatewayError, Result};
use crate::gateway::{CatalogGateway, CatalogValue, Endpoint, Row, Statement, row};
use crate::model::{DeclaredType, ParameterBinding, ParameterScope, ReferenceType};

#[derive(Debug, Clone)]
struct FolderRow {
    folder_id: i64,
    name: String,
}

#[derive(Debug, Clone)]
struct EnvironmentRow {
    environment_id: i64,
    folder_id: i64,
    name: String,
    description: String,
}

#[derive(Debug, Clone)]
struct VariableRow {
    variable_id: i64,
    environment_id: i64,
    name: String,
    type_name: String,
    sensitive: bool,
    value: String,
}

#[derive(Debug, Clone)]
struct ProjectRow {
    project_id: i64,
    folder_id: i64,
    name: String,
    stream: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct ReferenceRow {
    reference_id: i64,
    project_id: i64,
    reference_type: ReferenceType,
    environment_folder: Option<String>,
    environment_name: String,
}

#[derive(Debug, Clone)]
struct ParameterRow {
    parameter_id: i64,
    project_id: i64,
    scope: ParameterScope,
    name: String,
    data_type: DeclaredType,
    binding: ParameterBinding,
}

/// Catalog contents served by a [`MemoryGateway`].
#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    next_id: i64,
    folders: Vec<FolderRow>,
    environments: Vec<EnvironmentRow>,
    variables: Vec<VariableRow>,
    projects: Vec<ProjectRow>,
    references: Vec<ReferenceRow>,
    parameters: Vec<ParameterRow>,
}

impl CatalogState {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn folder_id(&self, name: &str) -> Option<i64> {
        self.folders
            .iter()
            .find(|f| same(&f.name, name))
            .map(|f| f.folder_id)
    }

    fn project_id(&self, folder: &str, name: &str) -> Option<i64> {
        let folder_id = self.folder_id(folder)?;
        self.projects
            .iter()
            .find(|p| p.folder_id == folder_id && same(&p.name, name))
            .map(|p| p.project_id)
    }

    fn environment_id(&self, folder: &str, name: &str) -> Option<i64> {
        let folder_id = self.folder_id(folder)?;
        self.environments
            .iter()
            .find(|e| e.folder_id == folder_id && same(&e.name, name))
            .map(|e| e.environment_id)
    }

    fn project(&self, project_id: i64) -> Option<&ProjectRow> {
        self.projects.iter().find(|p| p.project_id == project_id)
    }

    /// Add a folder; returns its id. Adding an existing name returns the existing id.
    pub fn add_folder(&mut self, name: &str) -> i64 {
        if let Some(id) = self.folder_id(name) {
            return id;
        }
        let folder_id = self.id();
        self.folders.push(FolderRow {
            folder_id,
            name: name.to_string(),
        });
        folder_id
    }

    /// Add an environment; creates the folder if needed. Returns the environment id.
    pub fn add_environment(&mut self, folder: &str, name: &str, description: &str) -> i64 {
        let folder_id = self.add_folder(folder);
        let environment_id = self.id();
        self.environments.push(EnvironmentRow {
            environment_id,
            folder_id,
            name: name.to_string(),
            description: description.to_string(),
        });
        environment_id
    }

    /// Add a variable to an environment. `value` is the plaintext textual form,
    /// which for a sensitive variable is only served by the decrypt query.
    pub fn add_variable(
        &mut self,
        environment_id: i64,
        name: &str,
        data_type: DeclaredType,
        sensitive: bool,
        value: &str,
    ) -> i64 {
        let variable_id = self.id();
        self.variables.push(VariableRow {
            variable_id,
            environment_id,
            name: name.to_string(),
            type_name: data_type.as_str().to_string(),
            sensitive,
            value: value.to_string(),
        });
        variable_id
    }

    /// Overwrite the stored type name of a variable, e.g. with one the
    /// catalog does not define.
    pub fn set_variable_type(&mut self, variable_id: i64, type_name: &str) {
        if let Some(v) = self.variables.iter_mut().find(|v| v.variable_id == variable_id) {
            v.type_name = type_name.to_string();
        }
    }

    /// Add a project; creates the folder if needed.
    pub fn add_project(&mut self, folder: &str, name: &str) -> i64 {
        let folder_id = self.add_folder(folder);
        let project_id = self.id();
        self.projects.push(ProjectRow {
            project_id,
            folder_id,
            name: name.to_string(),
            stream: None,
        });
        project_id
    }

    /// Attach a deployed project stream to an existing project.
    pub fn set_project_stream(&mut self, folder: &str, project: &str, stream: Vec<u8>) {
        if let Some(id) = self.project_id(folder, project)
            && let Some(p) = self.projects.iter_mut().find(|p| p.project_id == id)
        {
            p.stream = Some(stream);
        }
    }

    /// Add an environment reference to an existing project.
    ///
    /// Absolute references record `folder` as the environment folder.
    pub fn add_reference(
        &mut self,
        folder: &str,
        project: &str,
        reference_type: ReferenceType,
        environment: &str,
    ) -> i64 {
        let project_id = self
            .project_id(folder, project)
            .unwrap_or_else(|| self.add_project(folder, project));
        let reference_id = self.id();
        self.references.push(ReferenceRow {
            reference_id,
            project_id,
            reference_type,
            environment_folder: match reference_type {
                ReferenceType::Relative => None,
                ReferenceType::Absolute => Some(folder.to_string()),
            },
            environment_name: environment.to_string(),
        });
        reference_id
    }

    /// Add an overridden parameter to an existing project.
    pub fn add_parameter(
        &mut self,
        folder: &str,
        project: &str,
        scope: ParameterScope,
        name: &str,
        data_type: DeclaredType,
        binding: ParameterBinding,
    ) -> i64 {
        let project_id = self
            .project_id(folder, project)
            .unwrap_or_else(|| self.add_project(folder, project));
        let parameter_id = self.id();
        self.parameters.push(ParameterRow {
            parameter_id,
            project_id,
            scope,
            name: name.to_string(),
            data_type,
            binding,
        });
        parameter_id
    }
}

fn same(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Read one argument value: an `N'..'` literal (unquoted) or a bare token
/// running up to `,` or `;`. Returns the value and the remaining text.
fn read_value(text: &str) -> Option<(String, &str)> {
    let Some(body) = text.strip_prefix("N'") else {
        let end = text.find([',', ';']).unwrap_or(text.len());
        return Some((text[..end].trim().to_string(), &text[end..]));
    };
    let mut value = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '\'' {
            value.push(c);
        } else if body[i + 1..].starts_with('\'') {
            value.push('\'');
            chars.next();
        } else {
            return Some((value, &body[i + 1..]));
        }
    }
    None
}

/// Arguments of one rendered procedure call.
#[derive(Debug, Default)]
struct CallArgs {
    /// Literal of a leading `DECLARE @var <type> = <literal>;`.
    declared: Option<String>,
    named: Vec<(String, String)>,
}

impl CallArgs {
    fn parse(text: &str) -> Self {
        let mut call = CallArgs::default();
        let mut rest = text;
        if let Some(after) = text.strip_prefix("DECLARE @var ")
            && let Some(eq) = after.find(" = ")
            && let Some((value, tail)) = read_value(&after[eq + 3..])
        {
            call.declared = Some(value);
            rest = tail;
        }
        while let Some(at) = rest.find('@') {
            let after = &rest[at + 1..];
            let end = after
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            let name = &after[..end];
            match after[end..].trim_start().strip_prefix('=') {
                Some(value) => match read_value(value.trim_start()) {
                    Some((value, tail)) => {
                        call.named.push((name.to_string(), value));
                        rest = tail;
                    }
                    None => break,
                },
                None => rest = &after[end..],
            }
        }
        call
    }

    /// Named argument, with `@var` resolved to the declared literal.
    fn get(&self, name: &str) -> Option<&str> {
        let value = self
            .named
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())?;
        match value {
            "@var" => self.declared.as_deref(),
            other => Some(other),
        }
    }
}

/// A write recorded by the in-memory gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub label: &'static str,
    pub text: String,
}

#[derive(Debug, Clone)]
struct FailRule {
    label: &'static str,
    needle: String,
    message: String,
}

/// Gateway backed by an in-memory [`CatalogState`].
pub struct MemoryGateway {
    endpoint: Endpoint,
    state: Mutex<CatalogState>,
    writes: Mutex<Vec<RecordedWrite>>,
    reads: Mutex<Vec<&'static str>>,
    fail_rules: Mutex<Vec<FailRule>>,
    fail_decrypt: Mutex<Vec<String>>,
    unreachable: Mutex<bool>,
}

impl MemoryGateway {
    pub fn new(server: &str, state: CatalogState) -> Self {
        Self {
            endpoint: Endpoint::new(server),
            state: Mutex::new(state),
            writes: Mutex::new(Vec::new()),
            reads: Mutex::new(Vec::new()),
            fail_rules: Mutex::new(Vec::new()),
            fail_decrypt: Mutex::new(Vec::new()),
            unreachable: Mutex::new(false),
        }
    }

    /// An empty catalog with no folders.
    pub fn empty(server: &str) -> Self {
        Self::new(server, CatalogState::default())
    }

    /// Fail writes with `label` whose text contains `needle`.
    pub fn fail_execute(&self, label: &'static str, needle: &str, message: &str) {
        self.fail_rules.lock().push(FailRule {
            label,
            needle: needle.to_string(),
            message: message.to_string(),
        });
    }

    /// Drop every injected execute failure.
    pub fn clear_failures(&self) {
        self.fail_rules.lock().clear();
    }

    /// Make decryption of the named sensitive variable fail.
    pub fn fail_decrypt_of(&self, variable: &str) {
        self.fail_decrypt.lock().push(variable.to_string());
    }

    /// Make every call fail with a connectivity error.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    /// Writes received so far, in order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    /// Labels of reads received so far, in order.
    pub fn reads(&self) -> Vec<&'static str> {
        self.reads.lock().clone()
    }

    /// Mutate the served state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut CatalogState) -> R) -> R {
        f(&mut self.state.lock())
    }

    fn check_reachable(&self) -> Result<()> {
        if *self.unreachable.lock() {
            return Err(GatewayError::Connectivity {
                server: self.endpoint.server.clone(),
                message: "host unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn text_param<'s>(statement: &'s Statement, index: usize) -> Result<&'s str> {
        statement.text_param(index).ok_or_else(|| GatewayError::Execution {
            label: statement.label().to_string(),
            message: format!("missing text parameter @P{}", index + 1),
        })
    }

    fn int_param(statement: &Statement, index: usize) -> Result<i64> {
        statement.int_param(index).ok_or_else(|| GatewayError::Execution {
            label: statement.label().to_string(),
            message: format!("missing integer parameter @P{}", index + 1),
        })
    }

    /// Apply one write procedure to the catalog.
    fn apply(&self, statement: &Statement) -> Result<()> {
        let label = statement.label();
        let call = CallArgs::parse(statement.text());
        let refused = |message: String| GatewayError::Execution {
            label: label.to_string(),
            message,
        };
        let arg = |name: &str| {
            call.get(name)
                .ok_or_else(|| refused(format!("missing argument @{}", name)))
        };
        let mut state = self.state.lock();

        match label {
            "create_environment" => {
                let folder = arg("folder_name")?;
                let name = arg("environment_name")?;
                let folder_id = state.folder_id(folder).ok_or_else(|| {
                    refused(format!("The folder '{}' does not exist or you have not been granted the appropriate permissions to access it.", folder))
                })?;
                if state.environment_id(folder, name).is_some() {
                    return Err(refused(format!("The environment '{}' already exists or you have not been granted the appropriate permissions to create it.", name)));
                }
                let environment_id = state.id();
                state.environments.push(EnvironmentRow {
                    environment_id,
                    folder_id,
                    name: name.to_string(),
                    description: call.get("environment_description").unwrap_or("").to_string(),
                });
            }
            "create_environment_variable" => {
                let environment = arg("environment_name")?;
                let name = arg("variable_name")?;
                let environment_id = state
                    .environment_id(arg("folder_name")?, environment)
                    .ok_or_else(|| {
                        refused(format!("The environment '{}' does not exist or you have not been granted the appropriate permissions to access it.", environment))
                    })?;
                if state
                    .variables
                    .iter()
                    .any(|v| v.environment_id == environment_id && same(&v.name, name))
                {
                    return Err(refused(format!("The environment variable '{}' already exists or you have not been granted the appropriate permissions to create it.", name)));
                }
                let variable_id = state.id();
                state.variables.push(VariableRow {
                    variable_id,
                    environment_id,
                    name: name.to_string(),
                    type_name: arg("data_type")?.to_string(),
                    sensitive: arg("sensitive")? == "1",
                    value: arg("value")?.to_string(),
                });
            }
            "create_environment_reference" => {
                let folder = arg("folder_name")?;
                let project = arg("project_name")?;
                let environment = arg("environment_name")?;
                let project_id = state.project_id(folder, project).ok_or_else(|| {
                    refused(format!("The project '{}' does not exist or you have not been granted the appropriate permissions to access it.", project))
                })?;
                if state.environment_id(folder, environment).is_none() {
                    return Err(refused(format!("The environment '{}' does not exist or you have not been granted the appropriate permissions to access it.", environment)));
                }
                if state.references.iter().any(|r| {
                    r.project_id == project_id
                        && r.reference_type == ReferenceType::Relative
                        && same(&r.environment_name, environment)
                }) {
                    return Err(refused(format!("A reference from project '{}' to environment '{}' already exists.", project, environment)));
                }
                let reference_id = state.id();
                state.references.push(ReferenceRow {
                    reference_id,
                    project_id,
                    reference_type: ReferenceType::Relative,
                    environment_folder: None,
                    environment_name: environment.to_string(),
                });
            }
            "set_object_parameter_value" => {
                let project = arg("project_name")?;
                let project_id = state.project_id(arg("folder_name")?, project).ok_or_else(|| {
                    refused(format!("The project '{}' does not exist or you have not been granted the appropriate permissions to access it.", project))
                })?;
                let scope = match arg("object_type")? {
                    "20" => ParameterScope::Project,
                    _ => ParameterScope::Package(arg("object_name")?.to_string()),
                };
                let name = arg("parameter_name")?;
                let value = arg("parameter_value")?.to_string();
                let binding = match arg("value_type")? {
                    "R" => ParameterBinding::Reference(value),
                    _ => ParameterBinding::Value(Some(value)),
                };
                let existing = state
                    .parameters
                    .iter()
                    .position(|p| p.project_id == project_id && p.scope == scope && same(&p.name, name));
                match existing {
                    Some(index) => state.parameters[index].binding = binding,
                    None => {
                        let parameter_id = state.id();
                        state.parameters.push(ParameterRow {
                            parameter_id,
                            project_id,
                            scope,
                            name: name.to_string(),
                            data_type: DeclaredType::String,
                            binding,
                        });
                    }
                }
            }
            other => {
                return Err(refused(format!(
                    "procedure {} not supported by the in-memory catalog",
                    other
                )));
            }
        }
        Ok(())
    }

    fn answer(&self, statement: &Statement) -> Result<Vec<Row>> {
        let state = self.state.lock();
        let label = statement.label();
        let text = |s: &str| CatalogValue::Text(s.to_string());

        let rows = match label {
            "folder" => {
                let name = Self::text_param(statement, 0)?;
                state
                    .folders
                    .iter()
                    .filter(|f| same(&f.name, name))
                    .map(|f| {
                        row(
                            label,
                            vec![
                                ("folder_id", CatalogValue::Int(f.folder_id)),
                                ("name", text(&f.name)),
                            ],
                        )
                    })
                    .collect()
            }
            "environments" => {
                let folder_id = state.folder_id(Self::text_param(statement, 0)?);
                let mut envs: Vec<&EnvironmentRow> = state
                    .environments
                    .iter()
                    .filter(|e| Some(e.folder_id) == folder_id)
                    .collect();
                envs.sort_by(|a, b| a.name.cmp(&b.name));
                envs.into_iter()
                    .map(|e| {
                        row(
                            label,
                            vec![
                                ("environment_id", CatalogValue::Int(e.environment_id)),
                                ("name", text(&e.name)),
                                ("description", text(&e.description)),
                            ],
                        )
                    })
                    .collect()
            }
            "environment_variables" => {
                let environment_id = Self::int_param(statement, 0)?;
                let mut vars: Vec<&VariableRow> = state
                    .variables
                    .iter()
                    .filter(|v| v.environment_id == environment_id)
                    .collect();
                vars.sort_by(|a, b| a.name.cmp(&b.name));
                vars.into_iter()
                    .map(|v| {
                        row(
                            label,
                            vec![
                                ("variable_id", CatalogValue::Int(v.variable_id)),
                                ("environment_id", CatalogValue::Int(v.environment_id)),
                                ("name", text(&v.name)),
                                ("type", text(&v.type_name)),
                                ("sensitive", CatalogValue::Bool(v.sensitive)),
                                ("description", text("")),
                                (
                                    "value",
                                    if v.sensitive {
                                        CatalogValue::Null
                                    } else {
                                        text(&v.value)
                                    },
                                ),
                            ],
                        )
                    })
                    .collect()
            }
            "decrypt_variable" => {
                let variable_id = Self::int_param(statement, 0)?;
                let environment_id = Self::int_param(statement, 1)?;
                let found = state.variables.iter().find(|v| {
                    v.variable_id == variable_id && v.environment_id == environment_id
                });
                match found {
                    Some(v) if self.fail_decrypt.lock().contains(&v.name) => {
                        return Err(GatewayError::Execution {
                            label: label.to_string(),
                            message: format!(
                                "Cannot find the symmetric key 'MS_Enckey_Env_{}'",
                                environment_id
                            ),
                        });
                    }
                    Some(v) => vec![row(label, vec![("value", text(&v.value))])],
                    None => Vec::new(),
                }
            }
            "projects" => {
                let folder_id = state.folder_id(Self::text_param(statement, 0)?);
                let mut projects: Vec<&ProjectRow> = state
                    .projects
                    .iter()
                    .filter(|p| Some(p.folder_id) == folder_id)
                    .collect();
                projects.sort_by(|a, b| a.name.cmp(&b.name));
                projects
                    .into_iter()
                    .map(|p| {
                        row(
                            label,
                            vec![
                                ("project_id", CatalogValue::Int(p.project_id)),
                                ("name", text(&p.name)),
                            ],
                        )
                    })
                    .collect()
            }
            "environment_references" => {
                let folder_id = state.folder_id(Self::text_param(statement, 0)?);
                let mut refs: Vec<(&str, &ReferenceRow)> = state
                    .references
                    .iter()
                    .filter_map(|r| {
                        let p = state.project(r.project_id)?;
                        (Some(p.folder_id) == folder_id).then_some((p.name.as_str(), r))
                    })
                    .collect();
                refs.sort_by(|a, b| (a.0, &a.1.environment_name).cmp(&(b.0, &b.1.environment_name)));
                refs.into_iter()
                    .map(|(project, r)| {
                        row(
                            label,
                            vec![
                                ("reference_id", CatalogValue::Int(r.reference_id)),
                                ("project_name", text(project)),
                                (
                                    "reference_type",
                                    text(&r.reference_type.code().to_string()),
                                ),
                                (
                                    "environment_folder_name",
                                    r.environment_folder
                                        .as_deref()
                                        .map(text)
                                        .unwrap_or(CatalogValue::Null),
                                ),
                                ("environment_name", text(&r.environment_name)),
                            ],
                        )
                    })
                    .collect()
            }
            "object_parameters" => {
                let folder = Self::text_param(statement, 0)?;
                let project = Self::text_param(statement, 1)?;
                let Some(project_id) = state.project_id(folder, project) else {
                    return Ok(Vec::new());
                };
                let mut params: Vec<&ParameterRow> = state
                    .parameters
                    .iter()
                    .filter(|p| p.project_id == project_id)
                    .collect();
                params.sort_by(|a, b| (&a.scope, &a.name).cmp(&(&b.scope, &b.name)));
                params
                    .into_iter()
                    .map(|p| {
                        let (value_type, variable, value) = match &p.binding {
                            ParameterBinding::Reference(v) => ("R", text(v), CatalogValue::Null),
                            ParameterBinding::Value(Some(v)) => ("V", CatalogValue::Null, text(v)),
                            ParameterBinding::Value(None) => {
                                ("V", CatalogValue::Null, CatalogValue::Null)
                            }
                        };
                        let sensitive = matches!(p.binding, ParameterBinding::Value(None));
                        row(
                            label,
                            vec![
                                ("parameter_id", CatalogValue::Int(p.parameter_id)),
                                ("project_name", text(project)),
                                (
                                    "object_type",
                                    CatalogValue::Int(i64::from(p.scope.object_type())),
                                ),
                                (
                                    "object_name",
                                    text(p.scope.object_name().unwrap_or(project)),
                                ),
                                ("parameter_name", text(&p.name)),
                                ("data_type", text(p.data_type.as_str())),
                                ("sensitive", CatalogValue::Bool(sensitive)),
                                ("value_type", text(value_type)),
                                ("referenced_variable_name", variable),
                                ("default_value", value),
                            ],
                        )
                    })
                    .collect()
            }
            "project_stream" => {
                let folder = Self::text_param(statement, 0)?;
                let project = Self::text_param(statement, 1)?;
                let stream = state
                    .project_id(folder, project)
                    .and_then(|id| state.project(id))
                    .and_then(|p| p.stream.clone())
                    .ok_or_else(|| GatewayError::Execution {
                        label: label.to_string(),
                        message: format!("Cannot access the project '{}'", project),
                    })?;
                vec![row(label, vec![("", CatalogValue::Bytes(stream))])]
            }
            other => {
                return Err(GatewayError::Execution {
                    label: other.to_string(),
                    message: "statement not supported by the in-memory catalog".to_string(),
                });
            }
        };
        Ok(rows)
    }
}

#[async_trait]
impl CatalogGateway for MemoryGateway {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        self.check_reachable()?;
        self.reads.lock().push(statement.label());
        self.answer(statement)
    }

    async fn execute(&self, statement: &Statement) -> Result<()> {
        self.check_reachable()?;
        let rules = self.fail_rules.lock();
        if let Some(rule) = rules
            .iter()
            .find(|r| r.label == statement.label() && statement.text().contains(&r.needle))
        {
            return Err(GatewayError::Execution {
                label: statement.label().to_string(),
                message: rule.message.clone(),
            });
        }
        drop(rules);
        self.apply(statement)?;
        self.writes.lock().push(RecordedWrite {
            label: statement.label(),
            text: statement.text().to_string(),
        });
        Ok(())
    }
}
