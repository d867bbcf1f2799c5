//! Catalog entity model.
//!
//! These are transient copies of catalog rows read for the duration of one
//! run. Nothing here is persisted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

// ─────────────────────────────────────────────────────────────────────────────
// Declared types
// ─────────────────────────────────────────────────────────────────────────────

/// Data type declared on an environment variable or object parameter.
///
/// This is the full enumeration the catalog accepts for `@data_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclaredType {
    Boolean,
    Byte,
    DateTime,
    Decimal,
    Double,
    Int16,
    Int32,
    Int64,
    SByte,
    Single,
    String,
    UInt32,
    UInt64,
}

impl DeclaredType {
    /// Every declared type, in catalog order.
    pub const ALL: [DeclaredType; 13] = [
        DeclaredType::Boolean,
        DeclaredType::Byte,
        DeclaredType::DateTime,
        DeclaredType::Decimal,
        DeclaredType::Double,
        DeclaredType::Int16,
        DeclaredType::Int32,
        DeclaredType::Int64,
        DeclaredType::SByte,
        DeclaredType::Single,
        DeclaredType::String,
        DeclaredType::UInt32,
        DeclaredType::UInt64,
    ];

    /// Name as stored in the catalog and passed as `@data_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredType::Boolean => "Boolean",
            DeclaredType::Byte => "Byte",
            DeclaredType::DateTime => "DateTime",
            DeclaredType::Decimal => "Decimal",
            DeclaredType::Double => "Double",
            DeclaredType::Int16 => "Int16",
            DeclaredType::Int32 => "Int32",
            DeclaredType::Int64 => "Int64",
            DeclaredType::SByte => "SByte",
            DeclaredType::Single => "Single",
            DeclaredType::String => "String",
            DeclaredType::UInt32 => "UInt32",
            DeclaredType::UInt64 => "UInt64",
        }
    }

    /// Whether values of this type are rendered as bare numeric literals.
    pub fn is_numeric(&self) -> bool {
        !matches!(
            self,
            DeclaredType::Boolean | DeclaredType::DateTime | DeclaredType::String
        )
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeclaredType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeclaredType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GatewayError::Unrecognised {
                field: "data type",
                value: s.to_string(),
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────────────────────────

/// A catalog folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub folder_id: i64,
    pub name: String,
}

/// A named set of variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub environment_id: i64,
    pub name: String,
    pub description: String,
    /// Owning folder name.
    pub folder: String,
}

/// Value held by an environment variable as read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    /// Plaintext value in its catalog textual form.
    Plain(String),
    /// Encrypted at rest. Only the identifiers needed to decrypt it are kept.
    Encrypted,
    /// Declared with a type name outside [`DeclaredType`]. The value is not
    /// read and `data_type` carries no meaning.
    Unsupported(String),
}

/// A variable inside an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub variable_id: i64,
    pub environment_id: i64,
    pub name: String,
    pub data_type: DeclaredType,
    pub sensitive: bool,
    pub description: String,
    pub value: StoredValue,
}

/// A deployed project. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: i64,
    pub name: String,
    pub folder: String,
}

/// How a reference locates its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceType {
    /// Same folder name on whichever server the project lives on.
    Relative,
    /// Pinned to a specific folder path.
    Absolute,
}

impl ReferenceType {
    /// Single-character code used by the catalog.
    pub fn code(&self) -> char {
        match self {
            ReferenceType::Relative => 'R',
            ReferenceType::Absolute => 'A',
        }
    }

    /// Parse the catalog code.
    pub fn from_code(code: &str) -> Result<Self, GatewayError> {
        match code.trim() {
            "R" | "r" => Ok(ReferenceType::Relative),
            "A" | "a" => Ok(ReferenceType::Absolute),
            other => Err(GatewayError::Unrecognised {
                field: "reference type",
                value: other.to_string(),
            }),
        }
    }
}

/// Binding of a project to an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentReference {
    pub reference_id: i64,
    pub project_name: String,
    pub reference_type: ReferenceType,
    /// Folder named by an absolute reference. `None` for relative references.
    pub environment_folder: Option<String>,
    pub environment_name: String,
}

/// Object a parameter belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParameterScope {
    /// Project-level parameter (catalog object type 20). Never carries a name.
    Project,
    /// Package-level parameter (catalog object type 30) with the package name.
    Package(String),
}

impl ParameterScope {
    /// Catalog `object_type` code.
    pub fn object_type(&self) -> i16 {
        match self {
            ParameterScope::Project => 20,
            ParameterScope::Package(_) => 30,
        }
    }

    /// Object name carried by package-level operations.
    pub fn object_name(&self) -> Option<&str> {
        match self {
            ParameterScope::Project => None,
            ParameterScope::Package(name) => Some(name),
        }
    }

    /// Build from catalog columns.
    pub fn from_catalog(object_type: i64, object_name: &str) -> Result<Self, GatewayError> {
        match object_type {
            20 => Ok(ParameterScope::Project),
            30 => Ok(ParameterScope::Package(object_name.to_string())),
            other => Err(GatewayError::Unrecognised {
                field: "object type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ParameterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterScope::Project => f.write_str("project"),
            ParameterScope::Package(name) => write!(f, "package {}", name),
        }
    }
}

/// How an overridden parameter obtains its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterBinding {
    /// Literal override (`value_type = 'V'`). `None` when the value is sensitive
    /// and therefore not readable in plaintext.
    Value(Option<String>),
    /// Bound to an environment variable by name (`value_type = 'R'`).
    Reference(String),
}

/// A project or package parameter with a server-side override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectParameter {
    pub parameter_id: i64,
    pub project_name: String,
    pub scope: ParameterScope,
    pub parameter_name: String,
    pub data_type: DeclaredType,
    pub sensitive: bool,
    pub binding: ParameterBinding,
}

impl ObjectParameter {
    /// Variable name this parameter is bound to, if it is a reference.
    pub fn referenced_variable(&self) -> Option<&str> {
        match &self.binding {
            ParameterBinding::Reference(name) => Some(name),
            ParameterBinding::Value(_) => None,
        }
    }
}
