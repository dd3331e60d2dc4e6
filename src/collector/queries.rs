//! SQL text for the built-in diagnostics.

/// Per-table health from `svv_table_info`.
///
/// Columns: name, encoded, max_varchar, unsorted, stats_off, tbl_rows,
/// skew_sortkey1, skew_rows.
pub(super) const TABLE_INFO_QUERY: &str = r#"
    SELECT /* Lambda CloudWatch Exporter */
        "schema" || '.' || "table" AS table_name,
        encoded,
        max_varchar,
        unsorted,
        stats_off,
        tbl_rows,
        skew_sortkey1,
        skew_rows
    FROM svv_table_info
"#;

/// Current queue depth of the user service classes.
///
/// Columns: service_class, num_queued_queries, num_executing_queries.
pub(super) const SERVICE_CLASS_STATE_QUERY: &str = r#"
    SELECT /* Lambda CloudWatch Exporter */
        service_class,
        num_queued_queries,
        num_executing_queries
    FROM stv_wlm_service_class_state w
    WHERE w.service_class >= 6
    ORDER BY 1
"#;

/// Hourly workload per service class over the last `lookback_hours`.
///
/// Columns: attribution_hour, service_class, query_count, sum_exec_time,
/// count_queued_queries, sum_queue_time, count_diskbased_segments.
pub(super) fn build_workload_query(lookback_hours: u32) -> String {
    format!(
        r#"
            SELECT /* Lambda CloudWatch Exporter */
                DATE_TRUNC('hour', a.service_class_start_time) AS attribution_hour,
                a.service_class,
                COUNT(a.query) AS query_count,
                SUM(a.total_exec_time) AS sum_exec_time,
                SUM(CASE WHEN a.total_queue_time > 0 THEN 1 ELSE 0 END) AS count_queued_queries,
                SUM(a.total_queue_time) AS sum_queue_time,
                SUM(COALESCE(c.is_diskbased, 0)) AS count_diskbased_segments
            FROM stl_wlm_query a
            LEFT OUTER JOIN (
                SELECT query, SUM(CASE WHEN is_diskbased = 't' THEN 1 ELSE 0 END) AS is_diskbased
                FROM svl_query_summary
                GROUP BY query
            ) c ON a.query = c.query
            WHERE a.service_class > 5
              AND a.service_class_start_time > DATEADD(hour, -{lookback_hours}, GETDATE())
            GROUP BY 1, 2
            ORDER BY 1, 2
        "#
    )
}

/// Tags the session so the cluster can attribute our queries.
pub(crate) fn build_application_name_statement(version: &str) -> String {
    format!("SET application_name TO 'RedshiftAdvancedMonitoring-v{}'", version)
}
