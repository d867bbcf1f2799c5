//! SQL Server catalog gateway over TDS.
//!
//! One connection per gateway, opened lazily on first use and re-opened after
//! a transport failure. Statements on one gateway are serialized through the
//! connection lock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, ColumnData, Config, Query};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{GatewayError, Result};
use crate::gateway::{
    CatalogGateway, CatalogValue, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DATABASE, DEFAULT_QUERY_TIMEOUT,
    Endpoint, Row, SqlParam, Statement,
};

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

type TdsClient = Client<Compat<TcpStream>>;

/// SQL login used by the gateway.
#[derive(Clone)]
pub struct Credentials {
    user: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Gateway to a SQL Server hosting the catalog database.
pub struct MssqlGateway {
    endpoint: Endpoint,
    port: u16,
    credentials: Credentials,
    trust_cert: bool,
    client: Mutex<Option<TdsClient>>,
}

impl MssqlGateway {
    /// Create a new gateway builder.
    pub fn builder(server: impl Into<String>) -> GatewayBuilder {
        GatewayBuilder::new(server)
    }

    fn connectivity(&self, message: impl ToString) -> GatewayError {
        GatewayError::Connectivity {
            server: self.endpoint.server.clone(),
            message: message.to_string(),
        }
    }

    fn timeout(&self, operation: &str, elapsed: Duration) -> GatewayError {
        GatewayError::Timeout {
            server: self.endpoint.server.clone(),
            operation: operation.to_string(),
            elapsed,
        }
    }

    async fn connect(&self) -> Result<TdsClient> {
        let mut config = Config::new();
        config.host(&self.endpoint.server);
        config.port(self.port);
        config.database(&self.endpoint.database);
        config.application_name("ferry");
        config.authentication(AuthMethod::sql_server(
            &self.credentials.user,
            self.credentials.password.as_str(),
        ));
        if self.trust_cert {
            config.trust_cert();
        }

        let addr = config.get_addr();
        let connect = async {
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|e| self.connectivity(e))?;
            tcp.set_nodelay(true).map_err(|e| self.connectivity(e))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| self.connectivity(e))
        };

        let client = tokio::time::timeout(self.endpoint.connect_timeout, connect)
            .await
            .map_err(|_| self.timeout("connect", self.endpoint.connect_timeout))??;
        debug!(endpoint = %self.endpoint, "connected");
        Ok(client)
    }

    /// Map a driver error, dropping the connection unless the server itself
    /// rejected the statement.
    fn statement_error(
        &self,
        slot: &mut Option<TdsClient>,
        label: &str,
        err: tiberius::error::Error,
    ) -> GatewayError {
        match err {
            tiberius::error::Error::Server(token) => GatewayError::Execution {
                label: label.to_string(),
                message: token.message().to_string(),
            },
            other => {
                warn!(endpoint = %self.endpoint, label, error = %other, "dropping connection");
                *slot = None;
                GatewayError::Execution {
                    label: label.to_string(),
                    message: other.to_string(),
                }
            }
        }
    }
}

fn cell(label: &'static str, column: &str, data: ColumnData<'static>) -> Result<CatalogValue> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| CatalogValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| CatalogValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| CatalogValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(CatalogValue::Int),
        ColumnData::F32(v) => v.map(|v| CatalogValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(CatalogValue::Float),
        ColumnData::Bit(v) => v.map(CatalogValue::Bool),
        ColumnData::String(v) => v.map(|s| CatalogValue::Text(s.into_owned())),
        ColumnData::Binary(v) => v.map(|b| CatalogValue::Bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map(|n| CatalogValue::Text(n.to_string())),
        ColumnData::Guid(v) => v.map(|g| CatalogValue::Text(g.to_string())),
        other => {
            return Err(GatewayError::Column {
                label: label.to_string(),
                column: column.to_string(),
                message: format!("unsupported column type {:?}", other),
            });
        }
    };
    Ok(value.unwrap_or(CatalogValue::Null))
}

fn convert_rows(label: &'static str, rows: Vec<tiberius::Row>) -> Result<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    rows.into_iter()
        .map(|row| {
            let values = row
                .into_iter()
                .zip(columns.iter())
                .map(|(data, column)| cell(label, column, data))
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::new(label, Arc::clone(&columns), values))
        })
        .collect()
}

#[async_trait]
impl CatalogGateway for MssqlGateway {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        let mut slot = self.client.lock().await;
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        let Some(client) = slot.as_mut() else {
            return Err(self.connectivity("connection unavailable"));
        };

        let mut query = Query::new(statement.text().to_string());
        for param in statement.params() {
            match param {
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.clone()),
            }
        }

        let run = async {
            let stream = query.query(client).await?;
            stream.into_first_result().await
        };
        let deadline = self.endpoint.query_timeout;
        let rows = match tokio::time::timeout(deadline, run).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return Err(self.statement_error(&mut slot, statement.label(), e)),
            Err(_) => {
                *slot = None;
                return Err(self.timeout(statement.label(), deadline));
            }
        };
        convert_rows(statement.label(), rows)
    }

    async fn execute(&self, statement: &Statement) -> Result<()> {
        let mut slot = self.client.lock().await;
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        let Some(client) = slot.as_mut() else {
            return Err(self.connectivity("connection unavailable"));
        };

        let run = async {
            let stream = client.simple_query(statement.text()).await?;
            stream.into_results().await
        };
        let deadline = self.endpoint.query_timeout;
        match tokio::time::timeout(deadline, run).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(self.statement_error(&mut slot, statement.label(), e)),
            Err(_) => {
                *slot = None;
                Err(self.timeout(statement.label(), deadline))
            }
        }
    }
}

/// Builder for creating an [`MssqlGateway`].
#[derive(Debug)]
pub struct GatewayBuilder {
    server: String,
    port: u16,
    database: String,
    credentials: Option<Credentials>,
    trust_cert: bool,
    connect_timeout: Duration,
    query_timeout: Duration,
}

impl GatewayBuilder {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            credentials: None,
            trust_cert: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Accept the server certificate without validation.
    pub fn trust_cert(mut self, trust: bool) -> Self {
        self.trust_cert = trust;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Build the gateway. No connection is opened until the first call.
    pub fn build(self) -> Result<MssqlGateway> {
        if self.server.trim().is_empty() {
            return Err(GatewayError::Config("server host is required".to_string()));
        }
        let credentials = self.credentials.ok_or_else(|| {
            GatewayError::Config(format!("no login configured for {}", self.server))
        })?;

        Ok(MssqlGateway {
            endpoint: Endpoint::new(self.server)
                .with_database(self.database)
                .with_timeouts(self.connect_timeout, self.query_timeout),
            port: self.port,
            credentials,
            trust_cert: self.trust_cert,
            client: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_credentials() {
        let err = MssqlGateway::builder("sql01").build().err().unwrap();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_builder_requires_server() {
        let result = MssqlGateway::builder("  ")
            .credentials(Credentials::new("u", "p"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_endpoint() {
        let gw = MssqlGateway::builder("sql01")
            .port(14330)
            .database("Catalog")
            .credentials(Credentials::new("ferry", "pw"))
            .connect_timeout(Duration::from_secs(3))
            .query_timeout(Duration::from_secs(9))
            .build()
            .unwrap();
        assert_eq!(gw.endpoint().to_string(), "sql01/Catalog");
        assert_eq!(gw.endpoint().connect_timeout, Duration::from_secs(3));
        assert_eq!(gw.endpoint().query_timeout, Duration::from_secs(9));
        assert_eq!(gw.port, 14330);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("ferry", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("ferry"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_cell_conversion() {
        assert_eq!(
            cell("t", "c", ColumnData::I32(Some(7))).unwrap(),
            CatalogValue::Int(7)
        );
        assert_eq!(cell("t", "c", ColumnData::Bit(None)).unwrap(), CatalogValue::Null);
        assert_eq!(
            cell("t", "c", ColumnData::String(Some("x".into()))).unwrap(),
            CatalogValue::Text("x".to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_refused_is_connectivity() {
        let gw = MssqlGateway::builder("127.0.0.1")
            .port(1)
            .credentials(Credentials::new("u", "p"))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let err = gw
            .query(&Statement::new("folder", "SELECT 1"))
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
    }
}
