//! Current WLM queue state from `stv_wlm_service_class_state`.

use chrono::Utc;

use super::queries::SERVICE_CLASS_STATE_QUERY;
use super::run_command;
use super::session::{ClusterSession, SessionError};
use crate::config::ClusterConfig;
use crate::metrics::{MetricSample, SERVICE_CLASS_DIMENSION, Unit};

/// Emits queued and executing query counts for each user service class.
pub fn collect_service_class_state(
    session: &mut dyn ClusterSession,
    config: &ClusterConfig,
) -> Result<Vec<MetricSample>, SessionError> {
    let (rows, _) = run_command(session, SERVICE_CLASS_STATE_QUERY, config.debug)?;
    let polled_at = Utc::now();

    let mut samples = Vec::with_capacity(rows.len() * 2);
    for row in &rows {
        let service_class = row
            .i64(0)?
            .ok_or_else(|| SessionError::DecodeError("service_class is NULL".to_string()))?
            .to_string();
        let queued = row.f64(1)?.unwrap_or(0.0);
        let executing = row.f64(2)?.unwrap_or(0.0);

        samples.push(
            MetricSample::new(&config.cluster_name, "ServiceClass-CurrentlyQueued", queued, polled_at)
                .with_dimension(SERVICE_CLASS_DIMENSION, service_class.as_str())
                .with_unit(Unit::Count),
        );
        samples.push(
            MetricSample::new(&config.cluster_name, "ServiceClass-CurrentlyExecuting", executing, polled_at)
                .with_dimension(SERVICE_CLASS_DIMENSION, service_class)
                .with_unit(Unit::Count),
        );
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockSession, row};

    #[test]
    fn two_samples_per_service_class() {
        let mut session = MockSession::new().on(
            "stv_wlm_service_class_state",
            vec![
                row(&[Some("6"), Some("2"), Some("5")]),
                row(&[Some("7"), Some("0"), None]),
            ],
        );
        let config = ClusterConfig::for_tests();

        let samples = collect_service_class_state(&mut session, &config).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].name(), "ServiceClass-CurrentlyQueued");
        assert_eq!(samples[0].dimension(SERVICE_CLASS_DIMENSION), Some("6"));
        assert_eq!(samples[0].value(), 2.0);
        assert_eq!(samples[1].name(), "ServiceClass-CurrentlyExecuting");
        assert_eq!(samples[1].value(), 5.0);
        assert_eq!(samples[3].dimension(SERVICE_CLASS_DIMENSION), Some("7"));
        assert_eq!(samples[3].value(), 0.0);
    }

    #[test]
    fn failure_is_fatal() {
        let mut session = MockSession::new().fail_on("stv_wlm_service_class_state", "denied");
        let config = ClusterConfig::for_tests();
        assert!(collect_service_class_state(&mut session, &config).is_err());
    }
}
