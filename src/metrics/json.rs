//! Dry-run backend writing each batch as one JSON line.

use std::io::Write;

use serde::Serialize;

use super::{MetricSample, MetricsBackend, PublishError};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchRecord<'a> {
    region: &'a str,
    namespace: &'a str,
    metric_data: &'a [MetricSample],
}

/// Writes `{"Region", "Namespace", "MetricData"}` lines to `W`.
pub struct JsonLinesBackend<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesBackend<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricsBackend for JsonLinesBackend<W> {
    fn put_metric_data(
        &mut self,
        region: &str,
        namespace: &str,
        batch: &[MetricSample],
    ) -> Result<(), PublishError> {
        let record = BatchRecord {
            region,
            namespace,
            metric_data: batch,
        };
        serde_json::to_writer(&mut self.out, &record).map_err(|e| PublishError(e.to_string()))?;
        writeln!(self.out).map_err(|e| PublishError(e.to_string()))?;
        self.out.flush().map_err(|e| PublishError(e.to_string()))
    }
}
