//! Metric collectors running against an open cluster session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Monitor                             │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────────┐  │
//! │  │ table health │ │  workload /  │ │ ExternalQueryRunner  │  │
//! │  │ svv_table_   │ │  WLM state   │ │ (diagnostics + user  │  │
//! │  │ info         │ │  stl_wlm_*   │ │  query files)        │  │
//! │  └──────┬───────┘ └──────┬───────┘ └──────────┬───────────┘  │
//! │         └────────────────┼────────────────────┘              │
//! │                   ┌──────▼───────┐                           │
//! │                   │ClusterSession│ (trait)                   │
//! │                   └──────┬───────┘                           │
//! └──────────────────────────┼───────────────────────────────────┘
//!                 ┌──────────┴──────────┐
//!          ┌──────▼──────┐       ┌──────▼──────┐
//!          │   Client    │       │ MockSession │
//!          │ (postgres)  │       │  (Testing)  │
//!          └─────────────┘       └─────────────┘
//! ```
//!
//! The built-in passes are fatal on error. External queries are best-effort
//! per query.

mod external;
pub mod mock;
mod queries;
mod session;
mod tables;
mod wlm;
mod workload;

use std::time::{Duration, Instant};

use tracing::debug;

pub use external::{DiagnosticQuery, ExternalQueryError, ExternalQueryRunner, QueryKind, load_queries};
pub use mock::{MockConnector, MockSession};
pub(crate) use queries::build_application_name_statement;
pub use session::{ClusterSession, ConnectParams, Connector, PostgresConnector, QueryRow, SessionError};
pub use tables::{TableHealth, TableInfoRow, collect_table_health};
pub use wlm::collect_service_class_state;
pub use workload::{WORKLOAD_LOOKBACK_HOURS, WorkloadGroup, collect_workload};

/// Runs one statement and measures its wall-clock execution time.
pub(crate) fn run_command(
    session: &mut dyn ClusterSession,
    statement: &str,
    debug_statements: bool,
) -> Result<(Vec<QueryRow>, Duration), SessionError> {
    if debug_statements {
        debug!(statement, "running statement");
    }

    let start = Instant::now();
    let rows = session.query(statement)?;
    Ok((rows, start.elapsed()))
}
