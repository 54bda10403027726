//! Persisted rolling statistics, one row per proxy address

use crate::proxy::models::{
    join_protocols, split_protocols, AnonymityLevel, Protocol, ProxyRecord, VerificationResult,
};
use crate::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{error, info};

/// Default minimum number of successful checks for a record to be served
pub const DEFAULT_MIN_SUCCESSFUL_CHECKS: i64 = 2;

/// Records not re-verified within this many days are never served
pub const RECENCY_WINDOW_DAYS: i64 = 7;

/// Optional predicates for `StatisticsStore::query`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyFilter {
    pub country: Option<String>,
    /// Seconds, inclusive
    pub max_latency: Option<f64>,
    /// Inclusive lower bound
    pub min_anonymity: Option<AnonymityLevel>,
    /// Record must support at least one of these
    pub protocols: Vec<Protocol>,
}

impl ProxyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_max_latency(mut self, seconds: f64) -> Self {
        self.max_latency = Some(seconds);
        self
    }

    pub fn with_min_anonymity(mut self, level: AnonymityLevel) -> Self {
        self.min_anonymity = Some(level);
        self
    }

    pub fn with_protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.protocols = protocols;
        self
    }
}

/// Outcome of persisting a batch of results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub persisted: usize,
    pub failed: usize,
}

/// SQLite-backed proxy statistics
#[derive(Debug, Clone)]
pub struct StatisticsStore {
    pool: SqlitePool,
    min_successful_checks: i64,
}

impl StatisticsStore {
    /// Open (creating if missing) the database file at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Off);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!("Opened statistics database {}", path.as_ref().display());
        Self::from_pool(pool).await
    }

    /// In-memory database, single connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            min_successful_checks: DEFAULT_MIN_SUCCESSFUL_CHECKS,
        };
        store.init().await?;
        Ok(store)
    }

    pub fn with_min_successful_checks(mut self, min: i64) -> Self {
        self.min_successful_checks = min;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS proxies (
                proxy TEXT PRIMARY KEY,
                latency REAL,
                country TEXT,
                city TEXT,
                last_checked TIMESTAMP,
                successful_checks INTEGER,
                total_checks INTEGER,
                anonymity_level INTEGER,
                isp TEXT,
                protocols TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_country ON proxies(country)",
            "CREATE INDEX IF NOT EXISTS idx_latency ON proxies(latency)",
            "CREATE INDEX IF NOT EXISTS idx_anonymity ON proxies(anonymity_level)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Record a successful verification checked now
    pub async fn upsert(&self, result: &VerificationResult) -> Result<()> {
        self.upsert_at(result, Utc::now()).await
    }

    /// Insert with both counters at 1, or overwrite every non-counter column
    /// and add 1 to both counters. The increment reads the stored row inside
    /// the same statement, so concurrent writers for one address cannot lose
    /// an update.
    pub async fn upsert_at(&self, result: &VerificationResult, checked_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO proxies (
                proxy, latency, country, city, last_checked,
                successful_checks, total_checks, anonymity_level, isp, protocols
            ) VALUES (?, ?, ?, ?, ?, 1, 1, ?, ?, ?)
            ON CONFLICT(proxy) DO UPDATE SET
                latency = excluded.latency,
                country = excluded.country,
                city = excluded.city,
                last_checked = excluded.last_checked,
                anonymity_level = excluded.anonymity_level,
                isp = excluded.isp,
                protocols = excluded.protocols,
                successful_checks = proxies.successful_checks + 1,
                total_checks = proxies.total_checks + 1",
        )
        .bind(&result.address)
        .bind(result.latency)
        .bind(&result.geo.country)
        .bind(&result.geo.city)
        .bind(checked_at)
        .bind(result.anonymity_level.as_i64())
        .bind(&result.geo.isp)
        .bind(join_protocols(&result.protocols))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert every result; a failing record is logged and the rest still go in
    pub async fn upsert_all(&self, results: &[VerificationResult]) -> UpsertSummary {
        let mut summary = UpsertSummary::default();
        for result in results {
            match self.upsert(result).await {
                Ok(()) => summary.persisted += 1,
                Err(e) => {
                    error!("Failed to persist {}: {}", result.address, e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    pub async fn get(&self, address: &str) -> Result<Option<ProxyRecord>> {
        let row = sqlx::query("SELECT * FROM proxies WHERE proxy = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proxies")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Serve records matching `filter` that are both proven and recent,
    /// best success ratio first, then fastest
    pub async fn query(&self, filter: &ProxyFilter) -> Result<Vec<ProxyRecord>> {
        self.query_at(filter, Utc::now()).await
    }

    pub async fn query_at(&self, filter: &ProxyFilter, now: DateTime<Utc>) -> Result<Vec<ProxyRecord>> {
        let cutoff = now - ChronoDuration::days(RECENCY_WINDOW_DAYS);

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM proxies WHERE successful_checks >= ");
        builder.push_bind(self.min_successful_checks);
        builder.push(" AND datetime(last_checked) >= datetime(");
        builder.push_bind(cutoff);
        builder.push(")");

        if let Some(country) = &filter.country {
            builder.push(" AND country = ");
            builder.push_bind(country.clone());
        }
        if let Some(max_latency) = filter.max_latency {
            builder.push(" AND latency <= ");
            builder.push_bind(max_latency);
        }
        if let Some(level) = filter.min_anonymity {
            builder.push(" AND anonymity_level >= ");
            builder.push_bind(level.as_i64());
        }
        if !filter.protocols.is_empty() {
            builder.push(" AND (");
            for (i, protocol) in filter.protocols.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push("(',' || protocols || ',') LIKE ");
                builder.push_bind(format!("%,{},%", protocol.as_str()));
            }
            builder.push(")");
        }

        builder.push(
            " ORDER BY CAST(successful_checks AS REAL) / MAX(total_checks, 1) DESC, latency ASC",
        );

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ProxyRecord> {
    let level: i64 = row.try_get("anonymity_level")?;
    let protocols: String = row.try_get("protocols")?;

    Ok(ProxyRecord {
        address: row.try_get("proxy")?,
        latency: row.try_get("latency")?,
        country: row.try_get("country")?,
        city: row.try_get("city")?,
        isp: row.try_get("isp")?,
        anonymity_level: AnonymityLevel::try_from(level).map_err(Error::InvalidRecord)?,
        protocols: split_protocols(&protocols).map_err(Error::InvalidRecord)?,
        last_checked: row.try_get("last_checked")?,
        successful_checks: row.try_get("successful_checks")?,
        total_checks: row.try_get("total_checks")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{GeoInfo, ProtocolSet};
    use tempfile::TempDir;

    fn result(address: &str, latency: f64, country: &str, level: AnonymityLevel, protocols: &[Protocol]) -> VerificationResult {
        VerificationResult {
            address: address.to_string(),
            latency,
            observed_ip: "9.9.9.9".to_string(),
            anonymity_level: level,
            protocols: protocols.iter().copied().collect::<ProtocolSet>(),
            geo: GeoInfo::new(country, "City", "ISP"),
        }
    }

    /// Upsert `times` times so the record clears the minimum check count
    async fn seed(store: &StatisticsStore, result: &VerificationResult, times: usize) {
        for _ in 0..times {
            store.upsert(result).await.unwrap();
        }
    }

    fn addresses(records: &[ProxyRecord]) -> Vec<&str> {
        records.iter().map(|r| r.address.as_str()).collect()
    }

    #[tokio::test]
    async fn test_first_upsert_creates_record() {
        let store = StatisticsStore::in_memory().await.unwrap();
        let r = result("1.2.3.4:8080", 0.8, "US", AnonymityLevel::Elite, &[Protocol::Http]);
        store.upsert(&r).await.unwrap();

        let record = store.get("1.2.3.4:8080").await.unwrap().unwrap();
        assert_eq!(record.successful_checks, 1);
        assert_eq!(record.total_checks, 1);
        assert_eq!(record.country, "US");
        assert_eq!(record.anonymity_level, AnonymityLevel::Elite);
        assert_eq!(record.protocols.len(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeated_upsert_increments_and_overwrites() {
        let store = StatisticsStore::in_memory().await.unwrap();
        let first = result("1.2.3.4:8080", 0.8, "US", AnonymityLevel::Elite, &[Protocol::Http]);
        let second = result(
            "1.2.3.4:8080",
            1.4,
            "DE",
            AnonymityLevel::Anonymous,
            &[Protocol::Socks5, Protocol::Https],
        );
        store.upsert(&first).await.unwrap();
        store.upsert(&second).await.unwrap();
        store.upsert(&second).await.unwrap();

        let record = store.get("1.2.3.4:8080").await.unwrap().unwrap();
        assert_eq!(record.successful_checks, 3);
        assert_eq!(record.total_checks, 3);
        assert_eq!(record.latency, 1.4);
        assert_eq!(record.country, "DE");
        assert_eq!(record.anonymity_level, AnonymityLevel::Anonymous);
        assert_eq!(
            record.protocols,
            [Protocol::Https, Protocol::Socks5].into_iter().collect::<ProtocolSet>()
        );
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_success_ratio_is_always_one() {
        // Counters only move on success, so successful == total on every record
        let store = StatisticsStore::in_memory().await.unwrap();
        let r = result("1.2.3.4:8080", 0.8, "US", AnonymityLevel::Elite, &[]);
        seed(&store, &r, 5).await;

        let record = store.get("1.2.3.4:8080").await.unwrap().unwrap();
        assert_eq!(record.successful_checks, record.total_checks);
        assert_eq!(record.success_ratio(), 1.0);
    }

    #[tokio::test]
    async fn test_query_requires_minimum_checks() {
        let store = StatisticsStore::in_memory().await.unwrap();
        seed(&store, &result("1.1.1.1:80", 0.5, "US", AnonymityLevel::Elite, &[]), 1).await;
        seed(&store, &result("2.2.2.2:80", 0.5, "US", AnonymityLevel::Elite, &[]), 2).await;

        let records = store.query(&ProxyFilter::new()).await.unwrap();
        assert_eq!(addresses(&records), vec!["2.2.2.2:80"]);

        let relaxed = store.clone().with_min_successful_checks(1);
        assert_eq!(relaxed.query(&ProxyFilter::new()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_excludes_stale_records() {
        let store = StatisticsStore::in_memory().await.unwrap();
        let stale = result("1.1.1.1:80", 0.5, "US", AnonymityLevel::Elite, &[Protocol::Socks5]);
        let old = Utc::now() - ChronoDuration::days(8);
        store.upsert_at(&stale, old).await.unwrap();
        store.upsert_at(&stale, old).await.unwrap();
        seed(&store, &result("2.2.2.2:80", 0.5, "US", AnonymityLevel::Elite, &[]), 2).await;

        let records = store.query(&ProxyFilter::new()).await.unwrap();
        assert_eq!(addresses(&records), vec!["2.2.2.2:80"]);

        let records = store
            .query(&ProxyFilter::new().with_protocols(vec![Protocol::Socks5]))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_query_min_anonymity_is_inclusive() {
        let store = StatisticsStore::in_memory().await.unwrap();
        seed(&store, &result("1.1.1.1:80", 0.1, "US", AnonymityLevel::Transparent, &[]), 2).await;
        seed(&store, &result("2.2.2.2:80", 0.2, "US", AnonymityLevel::Anonymous, &[]), 2).await;
        seed(&store, &result("3.3.3.3:80", 0.3, "US", AnonymityLevel::Elite, &[]), 2).await;

        let elite = store
            .query(&ProxyFilter::new().with_min_anonymity(AnonymityLevel::Elite))
            .await
            .unwrap();
        assert_eq!(addresses(&elite), vec!["3.3.3.3:80"]);

        let anonymous = store
            .query(&ProxyFilter::new().with_min_anonymity(AnonymityLevel::Anonymous))
            .await
            .unwrap();
        assert_eq!(addresses(&anonymous), vec!["2.2.2.2:80", "3.3.3.3:80"]);
    }

    #[tokio::test]
    async fn test_query_combined_predicates_and_ordering() {
        let store = StatisticsStore::in_memory().await.unwrap();
        let socks = [Protocol::Socks5];
        let mixed = [Protocol::Http, Protocol::Socks5];
        seed(&store, &result("1.1.1.1:1080", 1.2, "US", AnonymityLevel::Elite, &socks), 2).await;
        seed(&store, &result("2.2.2.2:1080", 0.4, "US", AnonymityLevel::Anonymous, &mixed), 3).await;
        seed(&store, &result("3.3.3.3:1080", 1.5, "US", AnonymityLevel::Elite, &socks), 2).await;
        // wrong country, too slow, wrong protocol
        seed(&store, &result("4.4.4.4:1080", 0.3, "DE", AnonymityLevel::Elite, &socks), 2).await;
        seed(&store, &result("5.5.5.5:1080", 1.6, "US", AnonymityLevel::Elite, &socks), 2).await;
        seed(&store, &result("6.6.6.6:8080", 0.2, "US", AnonymityLevel::Elite, &[Protocol::Http]), 2).await;

        let filter = ProxyFilter::new()
            .with_country("US")
            .with_max_latency(1.5)
            .with_protocols(vec![Protocol::Socks5]);
        let records = store.query(&filter).await.unwrap();

        // every ratio is 1.0, so latency decides
        assert_eq!(
            addresses(&records),
            vec!["2.2.2.2:1080", "1.1.1.1:1080", "3.3.3.3:1080"]
        );
    }

    #[tokio::test]
    async fn test_query_orders_by_ratio_first() {
        let store = StatisticsStore::in_memory().await.unwrap();
        seed(&store, &result("1.1.1.1:80", 0.9, "US", AnonymityLevel::Elite, &[]), 2).await;
        seed(&store, &result("2.2.2.2:80", 0.1, "US", AnonymityLevel::Elite, &[]), 4).await;
        // a record whose counters diverged, e.g. written by another tool
        sqlx::query("UPDATE proxies SET total_checks = 8 WHERE proxy = '2.2.2.2:80'")
            .execute(store.pool())
            .await
            .unwrap();

        let records = store.query(&ProxyFilter::new()).await.unwrap();
        assert_eq!(addresses(&records), vec!["1.1.1.1:80", "2.2.2.2:80"]);
    }

    #[tokio::test]
    async fn test_protocol_filter_matches_whole_names() {
        let store = StatisticsStore::in_memory().await.unwrap();
        seed(&store, &result("1.1.1.1:80", 0.5, "US", AnonymityLevel::Elite, &[Protocol::Https]), 2).await;

        let records = store
            .query(&ProxyFilter::new().with_protocols(vec![Protocol::Http]))
            .await
            .unwrap();
        assert!(records.is_empty());

        let records = store
            .query(&ProxyFilter::new().with_protocols(vec![Protocol::Http, Protocol::Https]))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_all_reports_counts() {
        let store = StatisticsStore::in_memory().await.unwrap();
        let batch = vec![
            result("1.1.1.1:80", 0.5, "US", AnonymityLevel::Elite, &[]),
            result("2.2.2.2:80", 0.5, "US", AnonymityLevel::Elite, &[]),
        ];
        let summary = store.upsert_all(&batch).await;
        assert_eq!(summary, UpsertSummary { persisted: 2, failed: 0 });
    }

    #[tokio::test]
    async fn test_upsert_failure_does_not_abort_batch() {
        let store = StatisticsStore::in_memory().await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_blocked BEFORE INSERT ON proxies
             WHEN NEW.proxy = 'blocked:1' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let batch = vec![
            result("blocked:1", 0.5, "US", AnonymityLevel::Elite, &[]),
            result("2.2.2.2:80", 0.5, "US", AnonymityLevel::Elite, &[]),
        ];
        let summary = store.upsert_all(&batch).await;
        assert_eq!(summary, UpsertSummary { persisted: 1, failed: 1 });
        assert!(store.get("2.2.2.2:80").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxy_database.db");
        {
            let store = StatisticsStore::open(&path).await.unwrap();
            store
                .upsert(&result("1.1.1.1:80", 0.5, "US", AnonymityLevel::Elite, &[]))
                .await
                .unwrap();
            store.pool().close().await;
        }

        let store = StatisticsStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
