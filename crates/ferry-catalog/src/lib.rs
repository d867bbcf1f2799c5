//! Catalog access for ferry.
//!
//! This crate models the entities of an SSIS catalog (folders, environments,
//! variables, projects, references, parameter overrides) and provides a
//! [`CatalogGateway`] abstraction to read and write them.
//!
//! # Example
//!
//! ```no_run
//! use ferry_catalog::{CatalogReader, Credentials, MssqlGateway, Result};
//!
//! # async fn example() -> Result<()> {
//! let gateway = MssqlGateway::builder("sql01")
//!     .credentials(Credentials::new("ferry", "secret"))
//!     .trust_cert(true)
//!     .build()?;
//!
//! let reader = CatalogReader::new(&gateway);
//! for env in reader.environments("ETL").await? {
//!     println!("{}", env.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`MemoryGateway`] answers the same statements from an in-process
//! [`CatalogState`] and is used throughout the test suites.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod model;
pub mod mssql;
pub mod reader;

pub use error::{GatewayError, Result};
pub use gateway::{
    CatalogGateway, CatalogValue, Endpoint, Row, SharedGateway, SqlParam, Statement,
};
pub use memory::{CatalogState, MemoryGateway, RecordedWrite};
pub use model::{
    DeclaredType, Environment, EnvironmentReference, EnvironmentVariable, Folder, ObjectParameter,
    ParameterBinding, ParameterScope, Project, ReferenceType, StoredValue,
};
pub use mssql::{Credentials, GatewayBuilder, MssqlGateway};
pub use reader::CatalogReader;
