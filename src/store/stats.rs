//! Proxy stat persistence and aggregation.
//!
//! Stats are write-heavy and advisory: none of these reads or writes touch
//! the configuration cache.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{from_millis, parse_uuid, to_millis, Store, StoreError};
use crate::model::{
    BucketCount, CallerCount, ProxyStat, RouteCount, ServerCount, StatsSummary,
};

/// Rows per multi-row INSERT. Keeps the bind count well under sqlite's
/// variable limit (10 columns per row).
const INSERT_CHUNK: usize = 50;

fn row_to_stat(row: &AnyRow) -> Result<ProxyStat, StoreError> {
    Ok(ProxyStat {
        id: parse_uuid(row, "id")?,
        timestamp: from_millis(row.try_get("timestamp")?),
        source_id: parse_uuid(row, "source_id")?,
        route_id: parse_uuid(row, "route_id")?,
        target_id: parse_uuid(row, "target_id")?,
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        status_code: row.try_get::<Option<i64>, _>("status_code")?.map(|v| v as i32),
        duration_ms: row.try_get("duration_ms")?,
        client_ip: row.try_get("client_ip")?,
    })
}

impl Store {
    /// Bulk insert, chunked. Stats without an id get one assigned.
    pub async fn insert_proxy_stats(&self, stats: &[ProxyStat]) -> Result<(), StoreError> {
        if stats.is_empty() {
            return Ok(());
        }
        for chunk in stats.chunks(INSERT_CHUNK) {
            let mut sql = String::from(
                "INSERT INTO proxy_stats (id, timestamp, source_id, route_id, target_id, method, path, status_code, duration_ms, client_ip) VALUES ",
            );
            for (i, _) in chunk.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                let base = i * 10;
                sql.push('(');
                for col in 1..=10 {
                    if col > 1 {
                        sql.push_str(", ");
                    }
                    sql.push_str(&format!("${}", base + col));
                }
                sql.push(')');
            }
            let mut query = sqlx::query(&sql);
            for stat in chunk {
                let id = if stat.id.is_nil() {
                    Uuid::new_v4()
                } else {
                    stat.id
                };
                query = query
                    .bind(id.to_string())
                    .bind(to_millis(stat.timestamp))
                    .bind(stat.source_id.to_string())
                    .bind(stat.route_id.to_string())
                    .bind(stat.target_id.to_string())
                    .bind(stat.method.clone())
                    .bind(stat.path.clone())
                    .bind(stat.status_code.map(|v| v as i64))
                    .bind(stat.duration_ms)
                    .bind(stat.client_ip.clone());
            }
            query.execute(self.pool()).await?;
        }
        Ok(())
    }

    /// Newest-first page of stats plus the total row count for the filter.
    pub async fn list_proxy_stats(
        &self,
        limit: i64,
        offset: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<ProxyStat>, i64), StoreError> {
        let since_ms = since.map(to_millis).unwrap_or(i64::MIN);
        let total: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM proxy_stats WHERE timestamp >= $1")
            .bind(since_ms)
            .fetch_one(self.pool())
            .await?
            .try_get("cnt")?;
        let rows = sqlx::query(
            "SELECT * FROM proxy_stats WHERE timestamp >= $1
             ORDER BY timestamp DESC LIMIT $2 OFFSET $3",
        )
        .bind(since_ms)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        let stats = rows.iter().map(row_to_stat).collect::<Result<_, _>>()?;
        Ok((stats, total))
    }

    /// Removes stats older than `cutoff` and returns how many were deleted.
    pub async fn delete_stats_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM proxy_stats WHERE timestamp < $1")
            .bind(to_millis(cutoff))
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_all_proxy_stats(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM proxy_stats")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn count_where(&self, condition: &str, binds: &[i64]) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM proxy_stats WHERE {condition}");
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        Ok(query.fetch_one(self.pool()).await?.try_get("cnt")?)
    }

    pub async fn stats_summary(&self) -> Result<StatsSummary, StoreError> {
        let now = Utc::now();
        let last_24h = to_millis(now - ChronoDuration::hours(24));
        let last_minute = to_millis(now - ChronoDuration::minutes(1));
        Ok(StatsSummary {
            total: self.count_where("1 = 1", &[]).await?,
            last_24h: self.count_where("timestamp >= $1", &[last_24h]).await?,
            status_2xx: self
                .count_where(
                    "timestamp >= $1 AND status_code >= $2 AND status_code < $3",
                    &[last_24h, 200, 300],
                )
                .await?,
            status_4xx: self
                .count_where(
                    "timestamp >= $1 AND status_code >= $2 AND status_code < $3",
                    &[last_24h, 400, 500],
                )
                .await?,
            status_5xx: self
                .count_where(
                    "timestamp >= $1 AND status_code >= $2 AND status_code < $3",
                    &[last_24h, 500, 600],
                )
                .await?,
            tps_last_minute: self.count_where("timestamp >= $1", &[last_minute]).await?,
        })
    }

    pub async fn stats_by_route(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<RouteCount>, StoreError> {
        let since_ms = since.map(to_millis).unwrap_or(i64::MIN);
        let limit = if limit > 0 { limit } else { i64::MAX };
        let rows = sqlx::query(
            "SELECT route_id, method, path, COUNT(*) AS cnt FROM proxy_stats
             WHERE timestamp >= $1
             GROUP BY route_id, method, path ORDER BY cnt DESC LIMIT $2",
        )
        .bind(since_ms)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(RouteCount {
                    route_id: parse_uuid(row, "route_id")?,
                    method: row.try_get("method")?,
                    source_path: row.try_get("path")?,
                    count: row.try_get("cnt")?,
                })
            })
            .collect()
    }

    pub async fn stats_by_caller(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<CallerCount>, StoreError> {
        let since_ms = since.map(to_millis).unwrap_or(i64::MIN);
        let limit = if limit > 0 { limit } else { i64::MAX };
        let rows = sqlx::query(
            "SELECT client_ip, COUNT(*) AS cnt FROM proxy_stats
             WHERE timestamp >= $1
             GROUP BY client_ip ORDER BY cnt DESC LIMIT $2",
        )
        .bind(since_ms)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(CallerCount {
                    client_ip: row.try_get("client_ip")?,
                    count: row.try_get("cnt")?,
                })
            })
            .collect()
    }

    async fn stats_by_server_column(
        &self,
        column: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServerCount>, StoreError> {
        let since_ms = since.map(to_millis).unwrap_or(i64::MIN);
        let sql = format!(
            "SELECT {column} AS server_id, COUNT(*) AS cnt FROM proxy_stats
             WHERE timestamp >= $1
             GROUP BY {column} ORDER BY cnt DESC"
        );
        let rows = sqlx::query(&sql).bind(since_ms).fetch_all(self.pool()).await?;
        rows.iter()
            .map(|row| {
                Ok(ServerCount {
                    server_id: parse_uuid(row, "server_id")?,
                    count: row.try_get("cnt")?,
                })
            })
            .collect()
    }

    pub async fn stats_by_source_server(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServerCount>, StoreError> {
        self.stats_by_server_column("source_id", since).await
    }

    pub async fn stats_by_target_server(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServerCount>, StoreError> {
        self.stats_by_server_column("target_id", since).await
    }

    /// Request counts grouped into fixed time buckets, oldest first.
    ///
    /// Bucketing is integer division on the epoch-millisecond column so one
    /// query shape serves both backends.
    pub async fn stats_tps(
        &self,
        since: DateTime<Utc>,
        bucket: std::time::Duration,
    ) -> Result<Vec<BucketCount>, StoreError> {
        let bucket_ms = (bucket.as_millis() as i64).max(1);
        // Placeholders are numbered in order of appearance so the same
        // statement binds identically on sqlite and postgres.
        let rows = sqlx::query(
            "SELECT (timestamp / $1) AS bucket, COUNT(*) AS cnt FROM proxy_stats
             WHERE timestamp >= $2 AND timestamp <= $3
             GROUP BY 1 ORDER BY 1",
        )
        .bind(bucket_ms)
        .bind(to_millis(since))
        .bind(to_millis(Utc::now()))
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                let bucket_index: i64 = row.try_get("bucket")?;
                Ok(BucketCount {
                    at: from_millis(bucket_index * bucket_ms),
                    count: row.try_get("cnt")?,
                })
            })
            .collect()
    }
}
