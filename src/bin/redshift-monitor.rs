//! redshift-monitor - collects Redshift health metrics and publishes them to
//! CloudWatch. Runs one collection and exits; schedule it externally.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

use redshift_monitor::aws::{AwsContext, CloudWatchBackend, KmsDecryptor};
use redshift_monitor::collector::PostgresConnector;
use redshift_monitor::config::{ConfigSource, DEFAULT_PORT, debug_enabled};
use redshift_monitor::credentials::PgPassFile;
use redshift_monitor::metrics::{JsonLinesBackend, MetricsBackend};
use redshift_monitor::monitor::{
    DEFAULT_DIAGNOSTICS_FILE, DEFAULT_NAMESPACE, DEFAULT_USER_QUERIES_FILE, Monitor,
};

/// Redshift monitoring agent.
#[derive(Parser)]
#[command(name = "redshift-monitor", about = "Publishes Redshift health metrics to CloudWatch", version)]
#[allow(non_snake_case)]
struct Args {
    /// Database user.
    #[arg(long = "DbUser")]
    DbUser: Option<String>,

    /// Base64 KMS ciphertext of the database password.
    #[arg(long = "EncryptedPassword")]
    EncryptedPassword: Option<String>,

    /// Cluster endpoint.
    #[arg(long = "HostName")]
    HostName: Option<String>,

    /// Cluster port.
    #[arg(long = "HostPort")]
    HostPort: Option<u16>,

    #[arg(long = "DatabaseName")]
    DatabaseName: Option<String>,

    /// Value of the ClusterIdentifier dimension.
    #[arg(long = "ClusterName")]
    ClusterName: Option<String>,

    /// Lookback window for time-windowed diagnostics, e.g. "1 hour".
    #[arg(long = "AggregationInterval")]
    AggregationInterval: Option<String>,

    /// KMS key alias; used to derive the encryption context.
    #[arg(long = "cmkAlias")]
    cmkAlias: Option<String>,

    /// Explicit KMS encryption context as a JSON object.
    #[arg(long = "kms_auth_context")]
    kms_auth_context: Option<String>,

    /// Region of the cluster, KMS key and metrics. Falls back to $AWS_REGION.
    #[arg(long = "AWS_REGION")]
    AWS_REGION: Option<String>,

    /// Log statements and metric payloads.
    #[arg(long = "DEBUG")]
    DEBUG: bool,

    /// JSON event file with configuration values. Consulted after the flags
    /// and before the environment.
    #[arg(long, value_name = "FILE")]
    event: Option<PathBuf>,

    /// Built-in diagnostic queries.
    #[arg(long, default_value = DEFAULT_DIAGNOSTICS_FILE)]
    diagnostics_file: PathBuf,

    /// Operator-defined queries.
    #[arg(long, default_value = DEFAULT_USER_QUERIES_FILE)]
    user_queries_file: PathBuf,

    /// CloudWatch namespace.
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Print metric batches to stdout as JSON lines instead of publishing.
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// The configuration values given as flags.
    fn to_source(&self) -> ConfigSource {
        let mut source = ConfigSource::new("arguments");
        let strings = [
            ("DbUser", &self.DbUser),
            ("EncryptedPassword", &self.EncryptedPassword),
            ("HostName", &self.HostName),
            ("DatabaseName", &self.DatabaseName),
            ("ClusterName", &self.ClusterName),
            ("AggregationInterval", &self.AggregationInterval),
            ("cmkAlias", &self.cmkAlias),
            ("kms_auth_context", &self.kms_auth_context),
            ("AWS_REGION", &self.AWS_REGION),
        ];
        for (label, value) in strings {
            if let Some(value) = value {
                source.set(label, value.as_str());
            }
        }
        if let Some(port) = self.HostPort {
            source.set("HostPort", port);
        }
        if self.DEBUG {
            source.set("DEBUG", true);
        }
        source
    }
}

/// Reads an event file holding either one JSON object or an array of them.
fn load_event(path: &Path) -> Result<Vec<ConfigSource>, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read event file {}: {}", path.display(), e))?;
    let value: Value = serde_json::from_str(&contents)
        .map_err(|e| format!("malformed event file {}: {}", path.display(), e))?;

    let name = path.display().to_string();
    let events = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    events
        .into_iter()
        .map(|event| ConfigSource::from_json(name.as_str(), event).map_err(|e| e.to_string()))
        .collect()
}

/// Labels written to the replayable event definition.
const EVENT_LABELS: [&str; 11] = [
    "DbUser",
    "EncryptedPassword",
    "HostName",
    "HostPort",
    "DatabaseName",
    "ClusterName",
    "AggregationInterval",
    "cmkAlias",
    "kms_auth_context",
    "DEBUG",
    "AWS_REGION",
];

fn init_logging(verbose: u8, quiet: bool, debug_flag: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 if debug_flag => Level::DEBUG,
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("redshift_monitor={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();

    let cli = args.to_source();
    let event = args.event.as_deref().map(load_event).transpose();
    let env = ConfigSource::from_env();

    let debug_flag = {
        let mut debug_sources = vec![cli.clone()];
        if let Ok(Some(events)) = &event {
            debug_sources.extend(events.iter().cloned());
        }
        debug_sources.push(env.clone());
        debug_enabled(&debug_sources)
    };
    init_logging(args.verbose, args.quiet, debug_flag);

    info!("redshift-monitor {} starting", env!("CARGO_PKG_VERSION"));

    let mut sources = vec![cli];
    match event {
        Ok(events) => sources.extend(events.unwrap_or_default()),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }
    if args.event.is_none() && !sources[0].is_empty() {
        let definition = event_definition(&sources[0], &env);
        debug!(event = %definition, "event definition");
    }
    sources.push(env);

    let aws = match AwsContext::new() {
        Ok(aws) => aws,
        Err(e) => {
            error!(error = %e, "cannot start AWS runtime");
            return ExitCode::FAILURE;
        }
    };

    let connector = PostgresConnector::new();
    let decryptor = KmsDecryptor::new(aws.clone());
    let mut backend: Box<dyn MetricsBackend> = if args.dry_run {
        Box::new(JsonLinesBackend::new(std::io::stdout()))
    } else {
        Box::new(CloudWatchBackend::new(aws))
    };
    let password_file = PgPassFile::from_env();

    let mut monitor = Monitor::new(&connector, &decryptor, backend.as_mut())
        .with_diagnostics_file(&args.diagnostics_file)
        .with_user_queries_file(&args.user_queries_file)
        .with_namespace(args.namespace.as_str());
    if let Some(file) = &password_file {
        monitor = monitor.with_password_file(file);
    }

    match monitor.run(&sources) {
        Ok(summary) => {
            info!(
                cluster = %summary.cluster,
                samples = summary.samples,
                batches = summary.publish.batches,
                failed = summary.publish.failed_batches,
                "run complete"
            );
            println!("{}", summary.status());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// The flag-provided configuration as an event definition that can be
/// replayed with `--event`. Only the encrypted password is ever included.
fn event_definition(cli: &ConfigSource, env: &ConfigSource) -> Value {
    let mut event = serde_json::Map::new();
    for label in EVENT_LABELS {
        if let Some(value) = cli.get(label) {
            event.insert(label.to_string(), value.clone());
        }
    }
    if !event.contains_key("AWS_REGION")
        && let Some(region) = env.get("AWS_REGION")
    {
        event.insert("AWS_REGION".to_string(), region.clone());
    }
    event
        .entry("HostPort")
        .or_insert_with(|| Value::from(DEFAULT_PORT));

    Value::Array(vec![Value::Object(event)])
}
