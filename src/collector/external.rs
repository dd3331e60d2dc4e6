//! Operator-supplied diagnostics loaded from JSON files.
//!
//! File format: a JSON array of
//! `{"name": ..., "type": "value" | "canary", "query": ..., "unit": ...}`,
//! where `unit` is required for `value` queries. The token `{interval}` in a
//! query is replaced with the configured aggregation interval.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::run_command;
use super::session::{ClusterSession, SessionError};
use crate::config::ClusterConfig;
use crate::metrics::{MetricSample, Unit};

/// Placeholder substituted with the aggregation interval.
pub const INTERVAL_PLACEHOLDER: &str = "{interval}";

/// What a diagnostic query reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueryKind {
    /// First column of the first row, in `unit`.
    Value { unit: Unit },
    /// Execution latency in milliseconds; the result is ignored.
    Canary,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiagnosticQuery {
    pub name: String,
    pub query: String,
    #[serde(flatten)]
    pub kind: QueryKind,
}

impl DiagnosticQuery {
    fn kind_label(&self) -> &'static str {
        match self.kind {
            QueryKind::Value { .. } => "Query",
            QueryKind::Canary => "Canary",
        }
    }
}

/// Error type for loading a query file.
#[derive(Debug)]
pub enum ExternalQueryError {
    /// The file exists but cannot be read.
    Read { path: PathBuf, source: io::Error },
    /// The file is not a valid query list.
    Parse { path: PathBuf, source: serde_json::Error },
}

impl std::fmt::Display for ExternalQueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalQueryError::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ExternalQueryError::Parse { path, source } => {
                write!(f, "malformed query file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ExternalQueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExternalQueryError::Read { source, .. } => Some(source),
            ExternalQueryError::Parse { source, .. } => Some(source),
        }
    }
}

/// Loads a query file. A missing or empty file yields no queries.
pub fn load_queries(path: &Path) -> Result<Vec<DiagnosticQuery>, ExternalQueryError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ExternalQueryError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&contents).map_err(|source| ExternalQueryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs every query of one file against the session.
#[derive(Debug, Clone)]
pub struct ExternalQueryRunner {
    label: String,
    path: PathBuf,
}

impl ExternalQueryRunner {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the file's queries in order. Only a malformed file is an error;
    /// a failing query is logged and skipped.
    pub fn run(
        &self,
        session: &mut dyn ClusterSession,
        config: &ClusterConfig,
    ) -> Result<Vec<MetricSample>, ExternalQueryError> {
        let queries = load_queries(&self.path)?;
        let mut samples = Vec::with_capacity(queries.len());

        for query in &queries {
            info!(set = %self.label, kind = query.kind_label(), name = %query.name, "executing");
            match run_query(session, query, config) {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!(set = %self.label, name = %query.name, error = %e, "external query failed"),
            }
        }

        Ok(samples)
    }
}

fn run_query(
    session: &mut dyn ClusterSession,
    query: &DiagnosticQuery,
    config: &ClusterConfig,
) -> Result<MetricSample, SessionError> {
    let statement = query.query.replace(INTERVAL_PLACEHOLDER, &config.interval);
    let started_at = Utc::now();
    let (rows, elapsed) = run_command(session, &statement, config.debug)?;

    let (value, unit) = match query.kind {
        QueryKind::Value { unit } => {
            let first = rows
                .first()
                .ok_or_else(|| SessionError::DecodeError("query returned no rows".to_string()))?;
            (first.f64(0)?.unwrap_or(0.0), unit)
        }
        QueryKind::Canary => (elapsed.as_secs_f64() * 1000.0, Unit::Milliseconds),
    };

    Ok(MetricSample::new(&config.cluster_name, query.name.as_str(), value, started_at).with_unit(unit))
}
