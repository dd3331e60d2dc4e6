//! CloudWatch `PutMetricData` as a [`MetricsBackend`].

use aws_sdk_cloudwatch::Client;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};

use super::AwsContext;
use crate::metrics::{MetricSample, MetricsBackend, PublishError};

/// Publishes batches to CloudWatch. The client is reused while the region
/// stays the same.
#[derive(Debug)]
pub struct CloudWatchBackend {
    aws: AwsContext,
    client: Option<(String, Client)>,
}

impl CloudWatchBackend {
    pub fn new(aws: AwsContext) -> Self {
        Self { aws, client: None }
    }

    fn client(&mut self, region: &str) -> &Client {
        if self.client.as_ref().is_some_and(|(r, _)| r != region) {
            self.client = None;
        }
        let aws = &self.aws;
        &self
            .client
            .get_or_insert_with(|| (region.to_string(), Client::new(&aws.sdk_config(region))))
            .1
    }
}

fn to_datum(sample: &MetricSample) -> MetricDatum {
    let dimensions = sample
        .dimensions()
        .iter()
        .map(|d| Dimension::builder().name(&d.name).value(&d.value).build())
        .collect();

    MetricDatum::builder()
        .metric_name(sample.name())
        .set_dimensions(Some(dimensions))
        .timestamp(DateTime::from_millis(sample.timestamp().timestamp_millis()))
        .value(sample.value())
        .set_unit(sample.unit().map(|u| StandardUnit::from(u.as_str())))
        .build()
}

impl MetricsBackend for CloudWatchBackend {
    fn put_metric_data(
        &mut self,
        region: &str,
        namespace: &str,
        batch: &[MetricSample],
    ) -> Result<(), PublishError> {
        let data: Vec<MetricDatum> = batch.iter().map(to_datum).collect();
        let request = self
            .client(region)
            .put_metric_data()
            .namespace(namespace)
            .set_metric_data(Some(data));

        self.aws
            .block_on(request.send())
            .map(|_| ())
            .map_err(|e| PublishError(DisplayErrorContext(&e).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{SERVICE_CLASS_DIMENSION, Unit};
    use chrono::TimeZone;

    #[test]
    fn datum_carries_dimensions_unit_and_timestamp() {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let sample = MetricSample::new("analytics", "ServiceClass-Queued", 3.0, ts)
            .with_dimension(SERVICE_CLASS_DIMENSION, "6")
            .with_unit(Unit::Count);

        let datum = to_datum(&sample);
        assert_eq!(datum.metric_name(), Some("ServiceClass-Queued"));
        assert_eq!(datum.value(), Some(3.0));
        assert_eq!(datum.unit(), Some(&StandardUnit::Count));
        assert_eq!(datum.timestamp().map(|t| t.secs()), Some(ts.timestamp()));

        let dimensions = datum.dimensions();
        assert_eq!(dimensions.len(), 2);
        assert_eq!(dimensions[0].name(), Some("ClusterIdentifier"));
        assert_eq!(dimensions[0].value(), Some("analytics"));
        assert_eq!(dimensions[1].value(), Some("6"));
    }

    #[test]
    fn per_second_units_map_to_standard_units() {
        let sample = MetricSample::new("c", "m", 1.0, chrono::Utc::now()).with_unit(Unit::BytesPerSecond);
        assert_eq!(to_datum(&sample).unit(), Some(&StandardUnit::BytesSecond));

        let unitless = MetricSample::new("c", "m", 1.0, chrono::Utc::now());
        assert_eq!(to_datum(&unitless).unit(), None);
    }
}
