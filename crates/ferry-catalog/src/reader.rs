//! Entity readers.
//!
//! Each method assembles one parameterized query, runs it through the gateway
//! and maps the rows into model types. Lists are ordered by name so that two
//! reads of unchanged state produce identical snapshots.

use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{GatewayError, Result};
use crate::gateway::{CatalogGateway, Row, SqlParam, Statement};
use crate::model::{
    DeclaredType, Environment, EnvironmentReference, EnvironmentVariable, Folder, ObjectParameter,
    ParameterBinding, ParameterScope, Project, ReferenceType, StoredValue,
};

/// Render a `sql_variant` expression as text without losing precision for
/// date and floating-point base types.
fn variant_text(expr: &str) -> String {
    format!(
        "CASE CAST(SQL_VARIANT_PROPERTY({expr}, 'BaseType') AS nvarchar(128)) \
         WHEN N'datetime' THEN CONVERT(nvarchar(4000), CONVERT(datetime2, {expr}), 126) \
         WHEN N'datetime2' THEN CONVERT(nvarchar(4000), CONVERT(datetime2, {expr}), 126) \
         WHEN N'smalldatetime' THEN CONVERT(nvarchar(4000), CONVERT(datetime2, {expr}), 126) \
         WHEN N'date' THEN CONVERT(nvarchar(4000), CONVERT(datetime2, {expr}), 126) \
         WHEN N'float' THEN CONVERT(nvarchar(4000), CONVERT(float, {expr}), 3) \
         WHEN N'real' THEN CONVERT(nvarchar(4000), CONVERT(float, {expr}), 3) \
         ELSE CONVERT(nvarchar(4000), {expr}) END"
    )
}

/// Reads catalog entities through a gateway.
pub struct CatalogReader<'a> {
    gateway: &'a dyn CatalogGateway,
}

impl<'a> CatalogReader<'a> {
    pub fn new(gateway: &'a dyn CatalogGateway) -> Self {
        Self { gateway }
    }

    async fn rows(&self, statement: Statement) -> Result<Vec<Row>> {
        debug!(
            endpoint = %self.gateway.endpoint(),
            label = statement.label(),
            "catalog read"
        );
        self.gateway.query(&statement).await
    }

    /// Look up a folder by name.
    pub async fn folder(&self, folder: &str) -> Result<Option<Folder>> {
        let stmt = Statement::new(
            "folder",
            "SELECT f.[folder_id], f.[name] FROM [catalog].[folders] f WHERE f.[name] = @P1",
        )
        .bind(SqlParam::Text(folder.to_string()));

        let rows = self.rows(stmt).await?;
        rows.first()
            .map(|row| {
                Ok(Folder {
                    folder_id: row.get_i64("folder_id")?,
                    name: row.get_str("name")?.to_string(),
                })
            })
            .transpose()
    }

    /// Whether a folder exists.
    pub async fn folder_exists(&self, folder: &str) -> Result<bool> {
        Ok(self.folder(folder).await?.is_some())
    }

    /// Environments in a folder.
    pub async fn environments(&self, folder: &str) -> Result<Vec<Environment>> {
        let stmt = Statement::new(
            "environments",
            "SELECT e.[environment_id], e.[name], ISNULL(e.[description], N'') AS [description] \
             FROM [catalog].[environments] e \
             INNER JOIN [catalog].[folders] f ON f.[folder_id] = e.[folder_id] \
             WHERE f.[name] = @P1 ORDER BY e.[name]",
        )
        .bind(SqlParam::Text(folder.to_string()));

        self.rows(stmt)
            .await?
            .iter()
            .map(|row| {
                Ok(Environment {
                    environment_id: row.get_i64("environment_id")?,
                    name: row.get_str("name")?.to_string(),
                    description: row.get_opt_str("description")?.unwrap_or_default().to_string(),
                    folder: folder.to_string(),
                })
            })
            .collect()
    }

    /// Variables of one environment. Sensitive values are not decrypted here.
    pub async fn variables(&self, environment: &Environment) -> Result<Vec<EnvironmentVariable>> {
        let stmt = Statement::new(
            "environment_variables",
            format!(
                "SELECT v.[variable_id], v.[environment_id], v.[name], v.[type], v.[sensitive], \
                 ISNULL(v.[description], N'') AS [description], {} AS [value] \
                 FROM [catalog].[environment_variables] v \
                 WHERE v.[environment_id] = @P1 ORDER BY v.[name]",
                variant_text("v.[value]")
            ),
        )
        .bind(SqlParam::Int(environment.environment_id));

        self.rows(stmt)
            .await?
            .iter()
            .map(|row| {
                let sensitive = row.get_bool("sensitive")?;
                let type_name = row.get_str("type")?;
                let (data_type, value) = match type_name.parse::<DeclaredType>() {
                    Err(_) => (
                        DeclaredType::String,
                        StoredValue::Unsupported(type_name.to_string()),
                    ),
                    Ok(data_type) if sensitive => (data_type, StoredValue::Encrypted),
                    Ok(data_type) => (
                        data_type,
                        StoredValue::Plain(
                            row.get_opt_str("value")?.unwrap_or_default().to_string(),
                        ),
                    ),
                };
                Ok(EnvironmentVariable {
                    variable_id: row.get_i64("variable_id")?,
                    environment_id: row.get_i64("environment_id")?,
                    name: row.get_str("name")?.to_string(),
                    data_type,
                    sensitive,
                    description: row.get_opt_str("description")?.unwrap_or_default().to_string(),
                    value,
                })
            })
            .collect()
    }

    /// Decrypt one sensitive variable with its environment's key.
    ///
    /// Scoped to exactly one `variable_id`. A missing row or a NULL result is
    /// an error; no default is substituted.
    pub async fn decrypt_variable(
        &self,
        environment_id: i64,
        variable_id: i64,
    ) -> Result<Zeroizing<String>> {
        let stmt = Statement::new(
            "decrypt_variable",
            format!(
                "OPEN SYMMETRIC KEY [MS_Enckey_Env_{id}] DECRYPTION BY CERTIFICATE [MS_Cert_Env_{id}]; \
                 SELECT {} AS [value] FROM [internal].[environment_variables] v \
                 WHERE v.[variable_id] = @P1 AND v.[environment_id] = @P2; \
                 CLOSE SYMMETRIC KEY [MS_Enckey_Env_{id}];",
                variant_text(
                    "[internal].[get_value_by_data_type](DECRYPTBYKEY(v.[sensitive_value]), v.[type])"
                ),
                id = environment_id
            ),
        )
        .bind(SqlParam::Int(variable_id))
        .bind(SqlParam::Int(environment_id))
        .sensitive();

        let failed = |message: String| GatewayError::DecryptionFailed {
            environment_id,
            variable_id,
            message,
        };

        let mut rows = match self.rows(stmt).await {
            Ok(rows) => rows,
            Err(GatewayError::Execution { message, .. }) => return Err(failed(message)),
            Err(e) => return Err(e),
        };

        match rows.len() {
            0 => return Err(failed("variable not found".to_string())),
            1 => {}
            n => return Err(failed(format!("expected one row, got {}", n))),
        }

        rows[0]
            .take_str("value")?
            .map(Zeroizing::new)
            .ok_or_else(|| failed("decryption returned NULL".to_string()))
    }

    /// Projects in a folder.
    pub async fn projects(&self, folder: &str) -> Result<Vec<Project>> {
        let stmt = Statement::new(
            "projects",
            "SELECT p.[project_id], p.[name] FROM [catalog].[projects] p \
             INNER JOIN [catalog].[folders] f ON f.[folder_id] = p.[folder_id] \
             WHERE f.[name] = @P1 ORDER BY p.[name]",
        )
        .bind(SqlParam::Text(folder.to_string()));

        self.rows(stmt)
            .await?
            .iter()
            .map(|row| {
                Ok(Project {
                    project_id: row.get_i64("project_id")?,
                    name: row.get_str("name")?.to_string(),
                    folder: folder.to_string(),
                })
            })
            .collect()
    }

    /// Environment references of every project in a folder.
    pub async fn references(&self, folder: &str) -> Result<Vec<EnvironmentReference>> {
        let stmt = Statement::new(
            "environment_references",
            "SELECT r.[reference_id], p.[name] AS [project_name], r.[reference_type], \
             r.[environment_folder_name], r.[environment_name] \
             FROM [catalog].[environment_references] r \
             INNER JOIN [catalog].[projects] p ON p.[project_id] = r.[project_id] \
             INNER JOIN [catalog].[folders] f ON f.[folder_id] = p.[folder_id] \
             WHERE f.[name] = @P1 ORDER BY p.[name], r.[environment_name]",
        )
        .bind(SqlParam::Text(folder.to_string()));

        self.rows(stmt)
            .await?
            .iter()
            .map(|row| {
                let reference_type = ReferenceType::from_code(row.get_str("reference_type")?)?;
                let environment_folder = match reference_type {
                    ReferenceType::Relative => None,
                    ReferenceType::Absolute => {
                        row.get_opt_str("environment_folder_name")?.map(str::to_string)
                    }
                };
                Ok(EnvironmentReference {
                    reference_id: row.get_i64("reference_id")?,
                    project_name: row.get_str("project_name")?.to_string(),
                    reference_type,
                    environment_folder,
                    environment_name: row.get_str("environment_name")?.to_string(),
                })
            })
            .collect()
    }

    /// Parameters of one project that carry a server-side override.
    pub async fn object_parameters(
        &self,
        folder: &str,
        project: &str,
    ) -> Result<Vec<ObjectParameter>> {
        let stmt = Statement::new(
            "object_parameters",
            format!(
                "SELECT op.[parameter_id], p.[name] AS [project_name], op.[object_type], \
                 op.[object_name], op.[parameter_name], op.[data_type], op.[sensitive], \
                 op.[value_type], op.[referenced_variable_name], {} AS [default_value] \
                 FROM [catalog].[object_parameters] op \
                 INNER JOIN [catalog].[projects] p ON p.[project_id] = op.[project_id] \
                 INNER JOIN [catalog].[folders] f ON f.[folder_id] = p.[folder_id] \
                 WHERE f.[name] = @P1 AND p.[name] = @P2 AND op.[value_set] = 1 \
                 ORDER BY op.[object_type], op.[object_name], op.[parameter_name]",
                variant_text("op.[default_value]")
            ),
        )
        .bind(SqlParam::Text(folder.to_string()))
        .bind(SqlParam::Text(project.to_string()));

        self.rows(stmt)
            .await?
            .iter()
            .map(|row| {
                let sensitive = row.get_bool("sensitive")?;
                let binding = match row.get_str("value_type")?.trim() {
                    "R" => ParameterBinding::Reference(
                        row.get_str("referenced_variable_name")?.to_string(),
                    ),
                    "V" if sensitive => ParameterBinding::Value(None),
                    "V" => ParameterBinding::Value(
                        row.get_opt_str("default_value")?.map(str::to_string),
                    ),
                    other => {
                        return Err(GatewayError::Unrecognised {
                            field: "value type",
                            value: other.to_string(),
                        });
                    }
                };
                Ok(ObjectParameter {
                    parameter_id: row.get_i64("parameter_id")?,
                    project_name: row.get_str("project_name")?.to_string(),
                    scope: ParameterScope::from_catalog(
                        row.get_i64("object_type")?,
                        row.get_str("object_name")?,
                    )?,
                    parameter_name: row.get_str("parameter_name")?.to_string(),
                    data_type: row.get_str("data_type")?.parse()?,
                    sensitive,
                    binding,
                })
            })
            .collect()
    }

    /// Deployed project stream (`.ispac` bytes) of one project.
    pub async fn project_stream(&self, folder: &str, project: &str) -> Result<Vec<u8>> {
        let stmt = Statement::new(
            "project_stream",
            "EXEC [catalog].[get_project] @folder_name = @P1, @project_name = @P2",
        )
        .bind(SqlParam::Text(folder.to_string()))
        .bind(SqlParam::Text(project.to_string()));

        let rows = self.rows(stmt).await?;
        let row = rows.first().ok_or_else(|| GatewayError::Execution {
            label: "project_stream".to_string(),
            message: format!("project '{}' returned no stream", project),
        })?;
        match row.value_at(0) {
            Some(crate::gateway::CatalogValue::Bytes(bytes)) => Ok(bytes.clone()),
            _ => Err(GatewayError::Column {
                label: "project_stream".to_string(),
                column: "0".to_string(),
                message: "expected varbinary project stream".to_string(),
            }),
        }
    }
}
