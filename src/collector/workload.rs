//! Hourly workload per WLM service class from `stl_wlm_query`.
//!
//! Samples are stamped with the hour the workload ran in, not with the
//! collection time, so re-collecting an hour overwrites the same datapoint.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::queries::build_workload_query;
use super::run_command;
use super::session::{ClusterSession, QueryRow, SessionError};
use crate::config::ClusterConfig;
use crate::metrics::{MetricSample, SERVICE_CLASS_DIMENSION, Unit};

/// How far back the workload pass looks.
pub const WORKLOAD_LOOKBACK_HOURS: u32 = 2;

const HOUR_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

/// Aggregates for one (hour, service class) group.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadGroup {
    pub hour: DateTime<Utc>,
    /// WLM service class id, as in `stv_wlm_service_class_state`.
    pub service_class: String,
    pub executed: f64,
    /// Microseconds.
    pub exec_time: f64,
    pub queued: f64,
    /// Microseconds.
    pub queue_time: f64,
    pub diskbased_segments: f64,
}

impl WorkloadGroup {
    pub fn from_row(row: &QueryRow) -> Result<Self, SessionError> {
        let hour = row
            .text(0)
            .ok_or_else(|| SessionError::DecodeError("attribution hour is NULL".to_string()))
            .and_then(parse_hour)?;

        Ok(Self {
            hour,
            service_class: row
                .i64(1)?
                .ok_or_else(|| SessionError::DecodeError("service_class is NULL".to_string()))?
                .to_string(),
            executed: row.f64(2)?.unwrap_or(0.0),
            exec_time: row.f64(3)?.unwrap_or(0.0),
            queued: row.f64(4)?.unwrap_or(0.0),
            queue_time: row.f64(5)?.unwrap_or(0.0),
            diskbased_segments: row.f64(6)?.unwrap_or(0.0),
        })
    }

    pub fn to_samples(&self, cluster: &str) -> Vec<MetricSample> {
        let sample = |name: &str, value: f64, unit: Unit| {
            MetricSample::new(cluster, name, value, self.hour)
                .with_dimension(SERVICE_CLASS_DIMENSION, self.service_class.as_str())
                .with_unit(unit)
        };

        vec![
            sample("ServiceClass-Queued", self.queued, Unit::Count),
            sample("ServiceClass-QueueTime", self.queue_time, Unit::Microseconds),
            sample("ServiceClass-Executed", self.executed, Unit::Count),
            sample("ServiceClass-ExecTime", self.exec_time, Unit::Microseconds),
            sample("ServiceClass-DiskbasedQuerySegments", self.diskbased_segments, Unit::Count),
        ]
    }
}

fn parse_hour(text: &str) -> Result<DateTime<Utc>, SessionError> {
    let text = text.trim();
    HOUR_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| SessionError::DecodeError(format!("unrecognized timestamp '{}'", text)))
}

/// Runs the workload pass.
pub fn collect_workload(
    session: &mut dyn ClusterSession,
    config: &ClusterConfig,
) -> Result<Vec<MetricSample>, SessionError> {
    let query = build_workload_query(WORKLOAD_LOOKBACK_HOURS);
    let (rows, _) = run_command(session, &query, config.debug)?;

    let mut samples = Vec::with_capacity(rows.len() * 5);
    for row in &rows {
        samples.extend(WorkloadGroup::from_row(row)?.to_samples(&config.cluster_name));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockSession, row};
    use crate::metrics::CLUSTER_DIMENSION;
    use chrono::TimeZone;

    #[test]
    fn group_emits_five_samples_at_hour_boundary() {
        let mut session = MockSession::new().on(
            "stl_wlm_query",
            vec![
                row(&[Some("2024-05-01 10:00:00"), Some("6"), Some("12"), Some("9000000"), Some("3"), Some("450000"), Some("2")]),
                row(&[Some("2024-05-01 11:00:00"), Some("7"), Some("4"), Some("1000"), Some("0"), Some("0"), None]),
            ],
        );
        let config = ClusterConfig::for_tests();

        let samples = collect_workload(&mut session, &config).unwrap();
        assert_eq!(samples.len(), 10);

        let ten = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let first: Vec<&MetricSample> = samples.iter().take(5).collect();
        assert!(first.iter().all(|s| s.timestamp() == ten));
        assert!(first.iter().all(|s| s.dimension(SERVICE_CLASS_DIMENSION) == Some("6")));
        assert!(samples.iter().all(|s| s.dimension(CLUSTER_DIMENSION) == Some("analytics")));

        let names: Vec<&str> = first.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            [
                "ServiceClass-Queued",
                "ServiceClass-QueueTime",
                "ServiceClass-Executed",
                "ServiceClass-ExecTime",
                "ServiceClass-DiskbasedQuerySegments",
            ]
        );
        assert_eq!(first[0].value(), 3.0);
        assert_eq!(first[1].value(), 450000.0);
        assert_eq!(first[2].value(), 12.0);
        assert_eq!(first[3].unit(), Some(Unit::Microseconds));

        // NULL disk-based count becomes zero.
        assert_eq!(samples[9].value(), 0.0);
    }

    #[test]
    fn query_uses_two_hour_lookback() {
        let mut session = MockSession::new();
        let config = ClusterConfig::for_tests();
        assert!(collect_workload(&mut session, &config).unwrap().is_empty());
        assert!(session.statements()[0].contains("DATEADD(hour, -2, GETDATE())"));
    }

    #[test]
    fn fractional_timestamps_parse() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_hour("2024-05-01 10:00:00.000").unwrap(), expected);
        assert!(parse_hour("yesterday").is_err());
    }

    #[test]
    fn service_class_dimension_uses_class_id() {
        let mut session = MockSession::new().on(
            "stl_wlm_query",
            vec![row(&[Some("2024-05-01 10:00:00"), Some(" 12 "), Some("1"), Some("1"), Some("0"), Some("0"), Some("0")])],
        );
        let config = ClusterConfig::for_tests();
        let samples = collect_workload(&mut session, &config).unwrap();
        assert!(samples.iter().all(|s| s.dimension(SERVICE_CLASS_DIMENSION) == Some("12")));

        let mut session = MockSession::new().on(
            "stl_wlm_query",
            vec![row(&[Some("2024-05-01 10:00:00"), Some("etl"), Some("1"), Some("1"), Some("0"), Some("0"), Some("0")])],
        );
        assert!(collect_workload(&mut session, &config).is_err());
    }

    #[test]
    fn null_hour_is_fatal() {
        let mut session = MockSession::new().on(
            "stl_wlm_query",
            vec![row(&[None, Some("6"), Some("1"), Some("1"), Some("0"), Some("0"), Some("0")])],
        );
        let config = ClusterConfig::for_tests();
        assert!(matches!(
            collect_workload(&mut session, &config),
            Err(SessionError::DecodeError(_))
        ));
    }
}
