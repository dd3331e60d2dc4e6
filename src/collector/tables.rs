//! Table health aggregation over `svv_table_info`.

use chrono::{DateTime, Utc};

use super::queries::TABLE_INFO_QUERY;
use super::session::{ClusterSession, QueryRow, SessionError};
use super::run_command;
use crate::config::ClusterConfig;
use crate::metrics::{MetricSample, Unit};

/// Tables with a higher stats-off percentage count as stale.
const STATS_OFF_THRESHOLD: f64 = 5.0;

/// One row of [`TABLE_INFO_QUERY`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableInfoRow {
    pub name: String,
    pub encoded: Option<String>,
    pub max_varchar: Option<f64>,
    pub unsorted: Option<f64>,
    pub stats_off: Option<f64>,
    pub tbl_rows: Option<f64>,
    pub skew_sortkey: Option<f64>,
    pub skew_rows: Option<f64>,
}

impl TableInfoRow {
    pub fn from_row(row: &QueryRow) -> Result<Self, SessionError> {
        Ok(Self {
            name: row.text(0).unwrap_or_default().to_string(),
            encoded: row.text(1).map(|s| s.trim().to_string()),
            max_varchar: row.f64(2)?,
            unsorted: row.f64(3)?,
            stats_off: row.f64(4)?,
            tbl_rows: row.f64(5)?,
            skew_sortkey: row.f64(6)?,
            skew_rows: row.f64(7)?,
        })
    }
}

/// Mean over the non-null values seen; 0 when there were none.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct NonNullMean {
    sum: f64,
    count: u64,
}

impl NonNullMean {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Streaming reduction of table rows into cluster-wide health figures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableHealth {
    pub tables: u64,
    pub tables_not_compressed: u64,
    pub tables_stats_off: u64,
    pub max_skew_ratio: f64,
    pub max_skew_sort_ratio: f64,
    pub max_varchar_size: f64,
    pub max_unsorted_pct: f64,
    pub total_rows: f64,
    skew_ratio: NonNullMean,
    skew_sort_ratio: NonNullMean,
}

impl TableHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: &TableInfoRow) {
        self.tables += 1;

        if table.encoded.as_deref() == Some("N") {
            self.tables_not_compressed += 1;
        }
        if let Some(skew) = table.skew_rows {
            self.max_skew_ratio = self.max_skew_ratio.max(skew);
            self.skew_ratio.add(skew);
        }
        if let Some(skew) = table.skew_sortkey {
            self.max_skew_sort_ratio = self.max_skew_sort_ratio.max(skew);
            self.skew_sort_ratio.add(skew);
        }
        if table.stats_off.is_some_and(|pct| pct > STATS_OFF_THRESHOLD) {
            self.tables_stats_off += 1;
        }
        if let Some(width) = table.max_varchar {
            self.max_varchar_size = self.max_varchar_size.max(width);
        }
        if let Some(pct) = table.unsorted {
            self.max_unsorted_pct = self.max_unsorted_pct.max(pct);
        }
        if let Some(rows) = table.tbl_rows {
            self.total_rows += rows;
        }
    }

    pub fn avg_skew_ratio(&self) -> f64 {
        self.skew_ratio.mean()
    }

    pub fn avg_skew_sort_ratio(&self) -> f64 {
        self.skew_sort_ratio.mean()
    }

    /// The ten table-health samples, all stamped `at`.
    pub fn to_samples(&self, cluster: &str, at: DateTime<Utc>) -> Vec<MetricSample> {
        let sample = |name: &str, value: f64, unit: Unit| {
            MetricSample::new(cluster, name, value, at).with_unit(unit)
        };

        vec![
            sample("TablesNotCompressed", self.tables_not_compressed as f64, Unit::Count),
            sample("MaxSkewRatio", self.max_skew_ratio, Unit::None),
            sample("AvgSkewRatio", self.avg_skew_ratio(), Unit::None),
            sample("Tables", self.tables as f64, Unit::Count),
            sample("MaxSkewSortRatio", self.max_skew_sort_ratio, Unit::None),
            sample("AvgSkewSortRatio", self.avg_skew_sort_ratio(), Unit::None),
            sample("TablesStatsOff", self.tables_stats_off as f64, Unit::Count),
            sample("MaxVarcharSize", self.max_varchar_size, Unit::None),
            sample("MaxUnsorted", self.max_unsorted_pct, Unit::Percent),
            sample("Rows", self.total_rows, Unit::Count),
        ]
    }
}

/// Runs the table health pass.
pub fn collect_table_health(
    session: &mut dyn ClusterSession,
    config: &ClusterConfig,
) -> Result<Vec<MetricSample>, SessionError> {
    let (rows, _) = run_command(session, TABLE_INFO_QUERY, config.debug)?;

    let mut health = TableHealth::new();
    for row in &rows {
        health.push(&TableInfoRow::from_row(row)?);
    }

    Ok(health.to_samples(&config.cluster_name, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockSession, row};

    fn table(encoded: &str, skew_rows: Option<f64>) -> TableInfoRow {
        TableInfoRow {
            name: "public.t".to_string(),
            encoded: Some(encoded.to_string()),
            skew_rows,
            ..TableInfoRow::default()
        }
    }

    fn value(samples: &[MetricSample], name: &str) -> f64 {
        samples
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.value())
            .unwrap_or_else(|| panic!("missing metric {}", name))
    }

    #[test]
    fn three_table_example() {
        let mut health = TableHealth::new();
        health.push(&table("N", Some(5.0)));
        health.push(&table("Y", None));
        health.push(&table("N", Some(15.0)));

        let samples = health.to_samples("analytics", Utc::now());
        assert_eq!(samples.len(), 10);
        assert_eq!(value(&samples, "TablesNotCompressed"), 2.0);
        assert_eq!(value(&samples, "MaxSkewRatio"), 15.0);
        assert_eq!(value(&samples, "AvgSkewRatio"), 10.0);
        assert_eq!(value(&samples, "Tables"), 3.0);
    }

    #[test]
    fn averages_are_zero_without_non_null_values() {
        let mut health = TableHealth::new();
        health.push(&table("Y", None));
        assert_eq!(health.avg_skew_ratio(), 0.0);
        assert_eq!(health.avg_skew_sort_ratio(), 0.0);

        let empty = TableHealth::new();
        assert_eq!(empty.avg_skew_ratio(), 0.0);
        assert!(!empty.avg_skew_ratio().is_nan());
    }

    #[test]
    fn averages_ignore_nulls() {
        let mut health = TableHealth::new();
        for skew in [Some(1.0), None, Some(2.0), Some(6.0), None] {
            health.push(&TableInfoRow {
                skew_sortkey: skew,
                ..TableInfoRow::default()
            });
        }
        assert_eq!(health.avg_skew_sort_ratio(), 3.0);
        assert_eq!(health.max_skew_sort_ratio, 6.0);
        assert_eq!(health.tables, 5);
    }

    #[test]
    fn stats_off_rows_and_maxima() {
        let mut health = TableHealth::new();
        health.push(&TableInfoRow {
            stats_off: Some(5.0),
            tbl_rows: Some(100.0),
            max_varchar: Some(256.0),
            unsorted: Some(12.5),
            ..TableInfoRow::default()
        });
        health.push(&TableInfoRow {
            stats_off: Some(5.01),
            tbl_rows: None,
            max_varchar: Some(65535.0),
            unsorted: None,
            ..TableInfoRow::default()
        });
        health.push(&TableInfoRow {
            tbl_rows: Some(23.0),
            ..TableInfoRow::default()
        });

        assert_eq!(health.tables_stats_off, 1);
        assert_eq!(health.total_rows, 123.0);
        assert_eq!(health.max_varchar_size, 65535.0);
        assert_eq!(health.max_unsorted_pct, 12.5);
    }

    #[test]
    fn collect_runs_query_and_stamps_cluster() {
        let mut session = MockSession::new().on(
            "svv_table_info",
            vec![
                row(&[Some("public.a"), Some("N"), Some("256"), Some("10.5"), Some("20"), Some("1000"), Some("2.5"), Some("5")]),
                row(&[Some("public.b"), Some("Y"), None, None, None, None, None, None]),
                row(&[Some("public.c"), Some("N"), Some("64"), Some("1"), Some("0"), Some("10"), None, Some("15")]),
            ],
        );
        let config = ClusterConfig::for_tests();

        let samples = collect_table_health(&mut session, &config).unwrap();
        assert_eq!(samples.len(), 10);
        assert!(samples.iter().all(|s| s.dimension("ClusterIdentifier") == Some("analytics")));
        assert_eq!(value(&samples, "TablesNotCompressed"), 2.0);
        assert_eq!(value(&samples, "AvgSkewRatio"), 10.0);
        assert_eq!(value(&samples, "AvgSkewSortRatio"), 2.5);
        assert_eq!(value(&samples, "TablesStatsOff"), 1.0);
        assert_eq!(value(&samples, "Rows"), 1010.0);
        assert_eq!(value(&samples, "MaxUnsorted"), 10.5);
    }

    #[test]
    fn malformed_row_is_fatal() {
        let mut session = MockSession::new().on(
            "svv_table_info",
            vec![row(&[Some("public.a"), Some("N"), Some("wide"), None, None, None, None, None])],
        );
        let config = ClusterConfig::for_tests();
        assert!(collect_table_health(&mut session, &config).is_err());
    }

    #[test]
    fn query_failure_is_fatal() {
        let mut session = MockSession::new().fail_on("svv_table_info", "permission denied");
        let config = ClusterConfig::for_tests();
        assert!(matches!(
            collect_table_health(&mut session, &config),
            Err(SessionError::QueryError(_))
        ));
    }
}
