//! Cluster session abstraction.
//!
//! Collectors talk to the cluster through [`ClusterSession`], which runs SQL
//! text and returns rows as nullable text cells. The production implementation
//! is `postgres::Client` over the simple query protocol: Redshift system views
//! return `NUMERIC`, `CHAR` and friends that the extended protocol would need
//! per-type decoders for, while the text form parses uniformly.

use std::time::Duration;

use postgres::config::SslMode;
use postgres::{Client, SimpleQueryMessage};
use tracing::debug;

use crate::credentials::Credential;

/// Timeout for establishing the TCP + TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for session operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Connection could not be established.
    ConnectionError(String),
    /// Query execution failed.
    QueryError(String),
    /// A returned cell could not be interpreted.
    DecodeError(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::ConnectionError(msg) => write!(f, "Redshift: {}", msg),
            SessionError::QueryError(msg) => write!(f, "Redshift query error: {}", msg),
            SessionError::DecodeError(msg) => write!(f, "Redshift result error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// One result row, each cell in text form; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
    values: Vec<Option<String>>,
}

impl QueryRow {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Text of cell `idx`; `None` for NULL or a missing column.
    pub fn text(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    /// Numeric value of cell `idx`; `Ok(None)` for NULL.
    pub fn f64(&self, idx: usize) -> Result<Option<f64>, SessionError> {
        self.column(idx)?
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|e| SessionError::DecodeError(format!("column {} '{}': {}", idx, s, e)))
            })
            .transpose()
    }

    /// Integer value of cell `idx`; `Ok(None)` for NULL.
    pub fn i64(&self, idx: usize) -> Result<Option<i64>, SessionError> {
        self.column(idx)?
            .map(|s| {
                s.trim()
                    .parse::<i64>()
                    .map_err(|e| SessionError::DecodeError(format!("column {} '{}': {}", idx, s, e)))
            })
            .transpose()
    }

    fn column(&self, idx: usize) -> Result<Option<&str>, SessionError> {
        self.values
            .get(idx)
            .map(|v| v.as_deref())
            .ok_or_else(|| SessionError::DecodeError(format!("row has no column {}", idx)))
    }
}

/// An open session against the cluster.
pub trait ClusterSession {
    /// Runs `sql` and returns its rows.
    fn query(&mut self, sql: &str) -> Result<Vec<QueryRow>, SessionError>;

    /// Terminates the session.
    fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// Connection coordinates for one run.
#[derive(Debug)]
pub struct ConnectParams<'a> {
    pub host: &'a str,
    pub port: u16,
    pub database: &'a str,
    pub user: &'a str,
    pub password: &'a Credential,
}

/// Opens sessions.
pub trait Connector {
    fn connect(&self, params: &ConnectParams<'_>) -> Result<Box<dyn ClusterSession>, SessionError>;
}

impl ClusterSession for Client {
    fn query(&mut self, sql: &str) -> Result<Vec<QueryRow>, SessionError> {
        let messages = self
            .simple_query(sql)
            .map_err(|e| SessionError::QueryError(format_postgres_error(&e)))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let values = (0..row.len()).map(|i| row.get(i).map(str::to_owned)).collect();
                rows.push(QueryRow::new(values));
            }
        }
        Ok(rows)
    }

    fn close(self: Box<Self>) -> Result<(), SessionError> {
        Client::close(*self)
            .map_err(|e| SessionError::ConnectionError(format_postgres_error(&e)))
    }
}

/// Opens TLS sessions with the `postgres` client.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    connect_timeout: Duration,
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Connector for PostgresConnector {
    fn connect(&self, params: &ConnectParams<'_>) -> Result<Box<dyn ClusterSession>, SessionError> {
        let tls = native_tls::TlsConnector::new()
            .map_err(|e| SessionError::ConnectionError(format!("TLS setup failed: {}", e)))?;
        let tls = postgres_native_tls::MakeTlsConnector::new(tls);

        debug!(host = params.host, port = params.port, database = params.database, "connecting");

        let client = postgres::Config::new()
            .host(params.host)
            .port(params.port)
            .dbname(params.database)
            .user(params.user)
            .password(params.password.expose())
            .ssl_mode(SslMode::Require)
            .connect_timeout(self.connect_timeout)
            .connect(tls)
            .map_err(|e| SessionError::ConnectionError(format_postgres_error(&e)))?;

        Ok(Box::new(client))
    }
}

/// Formats a postgres error for logs.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("timed out") {
            "connection timed out".to_string()
        } else {
            msg
        }
    }
}
