//! redshift-monitor - periodic Redshift telemetry agent library.
//!
//! One invocation resolves its configuration, obtains the database password,
//! runs the built-in and operator-defined diagnostics against the cluster and
//! publishes the results to CloudWatch in batches. See [`monitor::Monitor`].

pub mod aws;
pub mod collector;
pub mod config;
pub mod credentials;
pub mod metrics;
pub mod monitor;
