//! One collection run: configuration to published metrics.
//!
//! [`Monitor`] owns no I/O of its own. It is wired with a [`Connector`], a
//! [`SecretDecryptor`], an optional [`PasswordFile`] and a [`MetricsBackend`],
//! which makes the whole run testable against in-memory fakes.
//!
//! The sequence per run is fixed:
//!
//! 1. resolve the [`ClusterConfig`]
//! 2. resolve the password
//! 3. open the session and tag it with the agent's `application_name`
//! 4. table health, workload and WLM queue-state passes
//! 5. diagnostics file, then user query file
//! 6. append `CloudwatchMetricsExported`
//! 7. publish in batches
//! 8. close the session
//!
//! The session is closed on every path once it has been opened.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::collector::{
    ClusterSession, ConnectParams, Connector, ExternalQueryError, ExternalQueryRunner, SessionError,
    build_application_name_statement, collect_service_class_state, collect_table_health,
    collect_workload, run_command,
};
use crate::config::{ClusterConfig, ConfigError, ConfigSource};
use crate::credentials::{CredentialError, CredentialProvider, PasswordFile, SecretDecryptor};
use crate::metrics::{MetricSample, MetricsBackend, PublishReport, Unit, publish};

/// Metrics namespace used unless overridden.
pub const DEFAULT_NAMESPACE: &str = "Redshift";

/// Bundled diagnostics, relative to the working directory.
pub const DEFAULT_DIAGNOSTICS_FILE: &str = "monitoring-queries.json";

/// Operator-supplied queries, relative to the working directory.
pub const DEFAULT_USER_QUERIES_FILE: &str = "user-queries.json";

/// Name of the self-describing sample appended to every run.
pub const EXPORTED_COUNT_METRIC: &str = "CloudwatchMetricsExported";

/// Status reported by a completed run.
pub const STATUS_FINISHED: &str = "Finished";

/// Fatal error of a run.
#[derive(Debug)]
pub enum MonitorError {
    Config(ConfigError),
    Credentials(CredentialError),
    Session(SessionError),
    Queries(ExternalQueryError),
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Config(e) => write!(f, "{}", e),
            MonitorError::Credentials(e) => write!(f, "{}", e),
            MonitorError::Session(e) => write!(f, "{}", e),
            MonitorError::Queries(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Config(e) => Some(e),
            MonitorError::Credentials(e) => Some(e),
            MonitorError::Session(e) => Some(e),
            MonitorError::Queries(e) => Some(e),
        }
    }
}

impl From<ConfigError> for MonitorError {
    fn from(e: ConfigError) -> Self {
        MonitorError::Config(e)
    }
}

impl From<CredentialError> for MonitorError {
    fn from(e: CredentialError) -> Self {
        MonitorError::Credentials(e)
    }
}

impl From<SessionError> for MonitorError {
    fn from(e: SessionError) -> Self {
        MonitorError::Session(e)
    }
}

impl From<ExternalQueryError> for MonitorError {
    fn from(e: ExternalQueryError) -> Self {
        MonitorError::Queries(e)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub cluster: String,
    /// Samples handed to the publisher, including the exported-count sample.
    pub samples: usize,
    pub publish: PublishReport,
}

impl RunSummary {
    pub fn status(&self) -> &'static str {
        STATUS_FINISHED
    }
}

/// Collection run wiring.
pub struct Monitor<'a> {
    connector: &'a dyn Connector,
    decryptor: &'a dyn SecretDecryptor,
    password_file: Option<&'a dyn PasswordFile>,
    backend: &'a mut dyn MetricsBackend,
    diagnostics: ExternalQueryRunner,
    user_queries: ExternalQueryRunner,
    namespace: String,
}

impl<'a> Monitor<'a> {
    pub fn new(
        connector: &'a dyn Connector,
        decryptor: &'a dyn SecretDecryptor,
        backend: &'a mut dyn MetricsBackend,
    ) -> Self {
        Self {
            connector,
            decryptor,
            password_file: None,
            backend,
            diagnostics: ExternalQueryRunner::new("Redshift Diagnostic", DEFAULT_DIAGNOSTICS_FILE),
            user_queries: ExternalQueryRunner::new("User Configured", DEFAULT_USER_QUERIES_FILE),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_password_file(mut self, file: &'a dyn PasswordFile) -> Self {
        self.password_file = Some(file);
        self
    }

    pub fn with_diagnostics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagnostics = ExternalQueryRunner::new("Redshift Diagnostic", path);
        self
    }

    pub fn with_user_queries_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_queries = ExternalQueryRunner::new("User Configured", path);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Resolves the configuration from `sources` and runs one collection.
    pub fn run(&mut self, sources: &[ConfigSource]) -> Result<RunSummary, MonitorError> {
        let config = ClusterConfig::resolve(sources).inspect_err(|e| error!(error = %e, "invalid configuration"))?;
        self.monitor_cluster(&config)
    }

    /// Runs one collection for an already resolved configuration.
    pub fn monitor_cluster(&mut self, config: &ClusterConfig) -> Result<RunSummary, MonitorError> {
        let mut provider = CredentialProvider::new(self.decryptor);
        if let Some(file) = self.password_file {
            provider = provider.with_password_file(file);
        }
        let credential = provider.resolve(config)?;

        info!(host = %config.host, port = config.port, database = %config.database, "connecting to cluster");
        let params = ConnectParams {
            host: &config.host,
            port: config.port,
            database: &config.database,
            user: &config.user,
            password: &credential,
        };
        let mut session = self
            .connector
            .connect(&params)
            .inspect_err(|e| error!(error = %e, "connection failed"))?;
        drop(credential);
        debug!("connected to cluster");

        let mut samples = match self.collect(session.as_mut(), config) {
            Ok(samples) => samples,
            Err(e) => {
                error!(error = %e, "collection failed");
                close_session(session);
                return Err(e);
            }
        };

        samples.push(
            MetricSample::new(&config.cluster_name, EXPORTED_COUNT_METRIC, samples.len() as f64, Utc::now())
                .with_unit(Unit::Count),
        );

        let report = publish(&mut *self.backend, &config.region, &self.namespace, &samples, config.debug);
        if !report.all_succeeded() {
            warn!(failed = report.failed_batches, batches = report.batches, "some metric groups were not published");
        }

        close_session(session);

        Ok(RunSummary {
            cluster: config.cluster_name.clone(),
            samples: samples.len(),
            publish: report,
        })
    }

    fn collect(
        &self,
        session: &mut dyn ClusterSession,
        config: &ClusterConfig,
    ) -> Result<Vec<MetricSample>, MonitorError> {
        let set_name = build_application_name_statement(env!("CARGO_PKG_VERSION"));
        run_command(session, &set_name, config.debug)?;

        let mut samples = collect_table_health(session, config)?;
        samples.extend(collect_workload(session, config)?);
        samples.extend(collect_service_class_state(session, config)?);
        samples.extend(self.diagnostics.run(session, config)?);
        samples.extend(self.user_queries.run(session, config)?);

        debug!(count = samples.len(), "collection complete");
        Ok(samples)
    }
}

fn close_session(session: Box<dyn ClusterSession>) {
    if let Err(e) = session.close() {
        warn!(error = %e, "closing session failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockConnector, MockSession, row};
    use crate::config::EncryptionContext;
    use crate::credentials::DecryptError;
    use crate::metrics::{CLUSTER_DIMENSION, PublishError};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use std::io::Write;

    struct StaticDecryptor(Result<String, DecryptError>);

    impl SecretDecryptor for StaticDecryptor {
        fn decrypt(
            &self,
            _: &str,
            ciphertext: &[u8],
            _: Option<&EncryptionContext>,
        ) -> Result<String, DecryptError> {
            assert_eq!(ciphertext, b"ciphertext");
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        batches: Vec<Vec<MetricSample>>,
        fail: bool,
    }

    impl MetricsBackend for RecordingBackend {
        fn put_metric_data(
            &mut self,
            _: &str,
            namespace: &str,
            batch: &[MetricSample],
        ) -> Result<(), PublishError> {
            assert_eq!(namespace, "Redshift");
            self.batches.push(batch.to_vec());
            if self.fail {
                return Err(PublishError("throttled".to_string()));
            }
            Ok(())
        }
    }

    impl RecordingBackend {
        fn samples(&self) -> Vec<MetricSample> {
            self.batches.iter().flatten().cloned().collect()
        }
    }

    fn event() -> ConfigSource {
        ConfigSource::new("event")
            .with("AWS_REGION", "us-east-1")
            .with("DbUser", "monitor")
            .with("HostName", "cluster.example.com")
            .with("DatabaseName", "dev")
            .with("ClusterName", "analytics")
            .with("EncryptedPassword", STANDARD.encode(b"ciphertext"))
    }

    struct Fixture {
        dir: tempfile::TempDir,
        decryptor: StaticDecryptor,
        backend: RecordingBackend,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                decryptor: StaticDecryptor(Ok("s3cret".to_string())),
                backend: RecordingBackend::default(),
            }
        }

        fn write(&self, name: &str, contents: &str) {
            let mut file = std::fs::File::create(self.dir.path().join(name)).unwrap();
            file.write_all(contents.as_bytes()).unwrap();
        }

        fn run(&mut self, connector: &MockConnector, sources: &[ConfigSource]) -> Result<RunSummary, MonitorError> {
            let diagnostics = self.dir.path().join("monitoring-queries.json");
            let user_queries = self.dir.path().join("user-queries.json");
            Monitor::new(connector, &self.decryptor, &mut self.backend)
                .with_diagnostics_file(diagnostics)
                .with_user_queries_file(user_queries)
                .run(sources)
        }
    }

    #[test]
    fn full_run_publishes_and_closes_once() {
        let mut fixture = Fixture::new();
        let session = MockSession::new()
            .on(
                "stl_wlm_query",
                vec![row(&[Some("2024-05-01 10:00:00"), Some("6"), Some("1"), Some("2"), Some("3"), Some("4"), Some("5")])],
            )
            .on("stv_wlm_service_class_state", vec![row(&[Some("6"), Some("0"), Some("1")])]);
        let connector = MockConnector::new(session);
        let log = connector.log();

        let summary = fixture.run(&connector, &[event()]).unwrap();
        assert_eq!(summary.status(), "Finished");
        assert_eq!(summary.cluster, "analytics");

        // 10 table health + 5 workload + 2 queue state + exported count.
        assert_eq!(summary.samples, 18);
        assert_eq!(summary.publish.batches, 1);

        let log = log.borrow();
        assert_eq!(log.connections, [("monitor".to_string(), "s3cret".to_string())]);
        assert_eq!(log.closed, 1);
        assert_eq!(
            log.statements[0],
            format!("SET application_name TO 'RedshiftAdvancedMonitoring-v{}'", env!("CARGO_PKG_VERSION"))
        );

        let published = fixture.backend.samples();
        assert_eq!(published.len(), 18);
        assert!(published.iter().all(|s| s.dimension(CLUSTER_DIMENSION) == Some("analytics")));
        let last = published.last().unwrap();
        assert_eq!(last.name(), EXPORTED_COUNT_METRIC);
        assert_eq!(last.value(), 17.0);
        assert_eq!(last.unit(), Some(Unit::Count));
    }

    #[test]
    fn external_files_run_in_order_and_batch() {
        let mut fixture = Fixture::new();
        let diagnostics: Vec<String> = (0..12)
            .map(|i| format!(r#"{{"name": "Diag{i}", "type": "value", "query": "select diag", "unit": "Count"}}"#))
            .collect();
        fixture.write("monitoring-queries.json", &format!("[{}]", diagnostics.join(",")));
        fixture.write(
            "user-queries.json",
            r#"[{"name": "UserCanary", "type": "canary", "query": "select user_canary"}]"#,
        );

        let connector = MockConnector::new(MockSession::new().on("select diag", vec![row(&[Some("7")])]));
        let summary = fixture.run(&connector, &[event()]).unwrap();

        // 10 + 12 + 1 + 1
        assert_eq!(summary.samples, 24);
        assert_eq!(summary.publish.batches, 2);
        assert_eq!(fixture.backend.batches[0].len(), 20);
        assert_eq!(fixture.backend.batches[1].len(), 4);

        let names: Vec<String> = fixture.backend.samples().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names[10], "Diag0");
        assert_eq!(names[22], "UserCanary");
        assert_eq!(names[23], EXPORTED_COUNT_METRIC);
    }

    #[test]
    fn fatal_pass_still_closes_session() {
        let mut fixture = Fixture::new();
        let connector = MockConnector::new(MockSession::new().fail_on("stl_wlm_query", "permission denied"));
        let log = connector.log();

        let err = fixture.run(&connector, &[event()]).unwrap_err();
        assert!(matches!(err, MonitorError::Session(SessionError::QueryError(_))));
        assert_eq!(log.borrow().closed, 1);
        assert!(fixture.backend.batches.is_empty());
    }

    #[test]
    fn malformed_query_file_is_fatal() {
        let mut fixture = Fixture::new();
        fixture.write("user-queries.json", "{");
        let connector = MockConnector::new(MockSession::new());
        let log = connector.log();

        let err = fixture.run(&connector, &[event()]).unwrap_err();
        assert!(matches!(err, MonitorError::Queries(ExternalQueryError::Parse { .. })));
        assert_eq!(log.borrow().closed, 1);
    }

    #[test]
    fn connection_failure_is_fatal() {
        let mut fixture = Fixture::new();
        let connector = MockConnector::refusing("connection refused");

        let err = fixture.run(&connector, &[event()]).unwrap_err();
        assert!(matches!(err, MonitorError::Session(SessionError::ConnectionError(_))));
        assert!(fixture.backend.batches.is_empty());
    }

    #[test]
    fn missing_configuration_fails_before_connecting() {
        let mut fixture = Fixture::new();
        let connector = MockConnector::new(MockSession::new());
        let log = connector.log();
        let sources = [ConfigSource::new("event").with("AWS_REGION", "us-east-1")];

        let err = fixture.run(&connector, &sources).unwrap_err();
        assert!(matches!(err, MonitorError::Config(ConfigError::Missing(_))));
        assert!(log.borrow().connections.is_empty());
    }

    #[test]
    fn decrypt_failure_fails_before_connecting() {
        let mut fixture = Fixture::new();
        fixture.decryptor = StaticDecryptor(Err(DecryptError("AccessDenied".to_string())));
        let connector = MockConnector::new(MockSession::new());
        let log = connector.log();

        let err = fixture.run(&connector, &[event()]).unwrap_err();
        assert!(matches!(err, MonitorError::Credentials(CredentialError::Decrypt(_))));
        assert!(log.borrow().connections.is_empty());
    }

    #[test]
    fn publish_failures_do_not_fail_the_run() {
        let mut fixture = Fixture::new();
        fixture.backend.fail = true;
        let connector = MockConnector::new(MockSession::new());
        let log = connector.log();

        let summary = fixture.run(&connector, &[event()]).unwrap();
        assert_eq!(summary.publish.failed_batches, 1);
        assert_eq!(summary.status(), STATUS_FINISHED);
        assert_eq!(log.borrow().closed, 1);
    }
}
