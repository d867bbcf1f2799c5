//! Statement rendering.
//!
//! Turns planned operations into the exact single-line batches sent to the
//! target catalog. Dry-run output is this same text, so a dry run shows
//! byte-for-byte what a live run would submit.

use ferry_catalog::{DeclaredType, Statement};

use crate::codec::{Literal, quote};
use crate::plan::{Operation, ParameterOperation, ParameterValue, VariableValue};

pub const CREATE_ENVIRONMENT: &str = "create_environment";
pub const CREATE_VARIABLE: &str = "create_environment_variable";
pub const CREATE_REFERENCE: &str = "create_environment_reference";
pub const SET_PARAMETER: &str = "set_object_parameter_value";

fn bracket(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

/// Renders operations against one target catalog database.
#[derive(Debug, Clone)]
pub struct Renderer {
    database: String,
}

impl Renderer {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }

    fn procedure(&self, name: &str) -> String {
        format!("{}.[catalog].[{}]", bracket(&self.database), name)
    }

    pub fn create_environment(&self, folder: &str, name: &str, description: &str) -> Statement {
        Statement::new(
            CREATE_ENVIRONMENT,
            format!(
                "EXEC {} @environment_name = {}, @environment_description = {}, @folder_name = {};",
                self.procedure(CREATE_ENVIRONMENT),
                quote(name),
                quote(description),
                quote(folder)
            ),
        )
    }

    /// `mask` replaces the literal with a redaction marker when the variable
    /// is sensitive. A masked statement is for display only.
    #[allow(clippy::too_many_arguments)]
    pub fn create_variable(
        &self,
        folder: &str,
        environment: &str,
        name: &str,
        data_type: DeclaredType,
        sensitive: bool,
        description: &str,
        literal: &Literal,
        mask: bool,
    ) -> Statement {
        let text = format!(
            "DECLARE @var {} = {}; EXEC {} @variable_name = {}, @sensitive = {}, \
             @description = {}, @environment_name = {}, @folder_name = {}, \
             @value = @var, @data_type = {};",
            literal.sql_type(),
            literal.display(mask && sensitive),
            self.procedure(CREATE_VARIABLE),
            quote(name),
            u8::from(sensitive),
            quote(description),
            quote(environment),
            quote(folder),
            quote(data_type.as_str())
        );
        let statement = Statement::new(CREATE_VARIABLE, text);
        if sensitive {
            statement.sensitive()
        } else {
            statement
        }
    }

    /// Relative reference; the environment is resolved in the project's own folder.
    pub fn create_reference(&self, folder: &str, project: &str, environment: &str) -> Statement {
        Statement::new(
            CREATE_REFERENCE,
            format!(
                "DECLARE @reference_id bigint; EXEC {} @environment_name = {}, \
                 @reference_id = @reference_id OUTPUT, @project_name = {}, \
                 @folder_name = {}, @reference_type = N'R';",
                self.procedure(CREATE_REFERENCE),
                quote(environment),
                quote(project),
                quote(folder)
            ),
        )
    }

    /// Parameter builder over `{project, package} x {literal, reference}`.
    ///
    /// Project-scope calls never carry `@object_name`; package-scope calls
    /// always do.
    pub fn set_parameter(&self, op: &ParameterOperation) -> Statement {
        let (declare, value, value_type) = match &op.value {
            ParameterValue::Literal(literal) => (
                format!("DECLARE @var {} = {}; ", literal.sql_type(), literal.text()),
                "@var".to_string(),
                "V",
            ),
            ParameterValue::Reference(variable) => (String::new(), quote(variable), "R"),
        };
        let object_name = op
            .scope
            .object_name()
            .map(|name| format!(", @object_name = {}", quote(name)))
            .unwrap_or_default();

        Statement::new(
            SET_PARAMETER,
            format!(
                "{}EXEC {} @object_type = {}, @folder_name = {}, @project_name = {}, \
                 @parameter_name = {}, @parameter_value = {}{}, @value_type = N'{}';",
                declare,
                self.procedure(SET_PARAMETER),
                op.scope.object_type(),
                quote(&op.folder),
                quote(&op.project),
                quote(&op.parameter_name),
                value,
                object_name,
                value_type
            ),
        )
    }

    /// Render any planned operation.
    ///
    /// `resolved` supplies the decrypted literal of a deferred variable.
    /// Returns `None` when the operation has no value to render: a deferred
    /// variable without `resolved`, or a rejected one.
    pub fn render(
        &self,
        op: &Operation,
        resolved: Option<&Literal>,
        mask: bool,
    ) -> Option<Statement> {
        match op {
            Operation::CreateEnvironment {
                folder,
                name,
                description,
            } => Some(self.create_environment(folder, name, description)),
            Operation::CreateVariable {
                folder,
                environment,
                name,
                data_type,
                sensitive,
                description,
                value,
            } => {
                let literal = match value {
                    VariableValue::Literal(literal) => literal,
                    VariableValue::Deferred(_) => resolved?,
                    VariableValue::Rejected(_) => return None,
                };
                Some(self.create_variable(
                    folder,
                    environment,
                    name,
                    *data_type,
                    *sensitive,
                    description,
                    literal,
                    mask,
                ))
            }
            Operation::CreateReference {
                folder,
                project,
                environment,
            } => Some(self.create_reference(folder, project, environment)),
            Operation::BindParameter(op) => Some(self.set_parameter(op)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{REDACTED, encode};
    use ferry_catalog::ParameterScope;

    fn renderer() -> Renderer {
        Renderer::new("SSISDB")
    }

    #[test]
    fn test_create_environment() {
        let stmt = renderer().create_environment("ETL", "E1", "it's first");
        assert_eq!(stmt.label(), CREATE_ENVIRONMENT);
        assert_eq!(
            stmt.text(),
            "EXEC [SSISDB].[catalog].[create_environment] @environment_name = N'E1', \
             @environment_description = N'it''s first', @folder_name = N'ETL';"
        );
    }

    #[test]
    fn test_create_variable_string() {
        let lit = encode("hello", DeclaredType::String).unwrap();
        let stmt = renderer().create_variable(
            "ETL", "E1", "V1", DeclaredType::String, false, "", &lit, false,
        );
        assert_eq!(
            stmt.text(),
            "DECLARE @var sql_variant = N'hello'; EXEC [SSISDB].[catalog].[create_environment_variable] \
             @variable_name = N'V1', @sensitive = 0, @description = N'', @environment_name = N'E1', \
             @folder_name = N'ETL', @value = @var, @data_type = N'String';"
        );
        assert!(!stmt.is_sensitive());
    }

    #[test]
    fn test_create_variable_sensitive_masking() {
        let lit = encode("True", DeclaredType::Boolean).unwrap();
        let r = renderer();
        let exact = r.create_variable("ETL", "E1", "V2", DeclaredType::Boolean, true, "", &lit, false);
        assert!(exact.text().starts_with("DECLARE @var bit = 1;"));
        assert!(exact.text().contains("@sensitive = 1"));
        assert!(exact.is_sensitive());

        let masked = r.create_variable("ETL", "E1", "V2", DeclaredType::Boolean, true, "", &lit, true);
        assert!(masked.text().contains(REDACTED));

        // Masking never touches non-sensitive values.
        let plain = r.create_variable("ETL", "E1", "V2", DeclaredType::Boolean, false, "", &lit, true);
        assert!(plain.text().starts_with("DECLARE @var bit = 1;"));
    }

    #[test]
    fn test_create_reference_is_relative() {
        let stmt = renderer().create_reference("ETL", "P3", "E1");
        assert_eq!(stmt.label(), CREATE_REFERENCE);
        assert!(stmt.text().contains("@project_name = N'P3'"));
        assert!(stmt.text().ends_with("@reference_type = N'R';"));
    }

    #[test]
    fn test_parameter_builder_matrix() {
        let r = renderer();
        let base = ParameterOperation {
            folder: "ETL".into(),
            project: "P3".into(),
            scope: ParameterScope::Project,
            parameter_name: "Conn".into(),
            value: ParameterValue::Reference("V1".into()),
        };

        let project_ref = r.set_parameter(&base);
        assert_eq!(
            project_ref.text(),
            "EXEC [SSISDB].[catalog].[set_object_parameter_value] @object_type = 20, \
             @folder_name = N'ETL', @project_name = N'P3', @parameter_name = N'Conn', \
             @parameter_value = N'V1', @value_type = N'R';"
        );
        assert!(!project_ref.text().contains("@object_name"));

        let package_ref = r.set_parameter(&ParameterOperation {
            scope: ParameterScope::Package("Load.dtsx".into()),
            ..base.clone()
        });
        assert!(package_ref.text().contains("@object_type = 30"));
        assert!(package_ref.text().contains("@object_name = N'Load.dtsx'"));

        let package_literal = r.set_parameter(&ParameterOperation {
            scope: ParameterScope::Package("Load.dtsx".into()),
            value: ParameterValue::Literal(encode("42", DeclaredType::Int32).unwrap()),
            ..base.clone()
        });
        assert!(package_literal.text().starts_with("DECLARE @var int = 42; EXEC"));
        assert!(package_literal.text().contains("@parameter_value = @var"));
        assert!(package_literal.text().ends_with("@value_type = N'V';"));

        let project_literal = r.set_parameter(&ParameterOperation {
            value: ParameterValue::Literal(encode("x", DeclaredType::String).unwrap()),
            ..base
        });
        assert!(!project_literal.text().contains("@object_name"));
        assert!(project_literal.text().contains("@value_type = N'V'"));
    }

    #[test]
    fn test_render_deferred_requires_resolution() {
        let op = Operation::CreateVariable {
            folder: "ETL".into(),
            environment: "E1".into(),
            name: "V2".into(),
            data_type: DeclaredType::Boolean,
            sensitive: true,
            description: String::new(),
            value: VariableValue::Deferred(crate::plan::SensitiveHandle {
                environment_id: 1,
                variable_id: 2,
                data_type: DeclaredType::Boolean,
            }),
        };
        let r = renderer();
        assert!(r.render(&op, None, false).is_none());
        let lit = encode("1", DeclaredType::Boolean).unwrap();
        assert!(r.render(&op, Some(&lit), false).is_some());
    }

    #[test]
    fn test_database_identifier_is_bracketed() {
        let stmt = Renderer::new("odd]db").create_environment("F", "E", "");
        assert!(stmt.text().starts_with("EXEC [odd]]db].[catalog]"));
    }
}
