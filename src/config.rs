use serde::Deserialize;

use crate::kintone::KintoneApp;

/// One Kintone app: its numeric id and the API token scoped to it.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KintoneAppConfig {
    pub app_id: String,
    pub api_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KintoneConfig {
    pub base_url: String,
    /// `user:password`, sent base64-encoded when an app has no API token
    pub authorization: Option<String>,
    pub student: KintoneAppConfig,
    pub point_card: KintoneAppConfig,
    pub deposit_record: KintoneAppConfig,
    pub reduce_record: KintoneAppConfig,
    pub schedule: KintoneAppConfig,
    pub semester_settle_record: KintoneAppConfig,
    pub page_limit: usize,
    pub max_requests_per_second: u32,
    pub request_timeout_secs: u64,
}

impl KintoneConfig {
    pub fn app(&self, app: KintoneApp) -> &KintoneAppConfig {
        match app {
            KintoneApp::Student => &self.student,
            KintoneApp::PointCard => &self.point_card,
            KintoneApp::DepositRecord => &self.deposit_record,
            KintoneApp::ReduceRecord => &self.reduce_record,
            KintoneApp::Schedule => &self.schedule,
            KintoneApp::SemesterSettleRecord => &self.semester_settle_record,
        }
    }
}

/// Worker pool size per entity sync call site
#[derive(Debug, Deserialize, Clone)]
pub struct SyncPoolConfig {
    pub student: usize,
    pub point_card: usize,
    pub deposit_record: usize,
    pub reduce_record: usize,
    pub schedule: usize,
    pub semester_settle_record: usize,
}

impl Default for SyncPoolConfig {
    fn default() -> Self {
        Self {
            student: 30,
            point_card: 30,
            deposit_record: 50,
            reduce_record: 50,
            schedule: 100,
            semester_settle_record: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Settlement anchors as `MM/DD`, sorted within the year
    pub anchors: Vec<String>,
    pub utc_offset_hours: i32,
    /// Local hour the daily scheduler fires at
    pub execution_hour: u32,
    pub scheduler_enabled: bool,
    pub insert_batch_size: usize,
    pub insert_batch_delay_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            anchors: vec!["03/01".to_string(), "09/01".to_string()],
            utc_offset_hours: 8,
            execution_hour: 4,
            scheduler_enabled: true,
            insert_batch_size: 100,
            insert_batch_delay_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub db_max_connections: u32,
    pub snowflake_node_id: u16,
    pub kintone: KintoneConfig,
    pub pools: SyncPoolConfig,
    pub settlement: SettlementConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let pool_defaults = SyncPoolConfig::default();
        let settle_defaults = SettlementConfig::default();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 20)?,
            snowflake_node_id: parsed("SNOWFLAKE_NODE_ID", 1)?,
            kintone: KintoneConfig {
                base_url: required("KINTONE_URL")?,
                authorization: std::env::var("KINTONE_AUTHORIZATION").ok(),
                student: app("STUDENT"),
                point_card: app("POINT_CARD"),
                deposit_record: app("DEPOSIT_RECORD"),
                reduce_record: app("REDUCE_RECORD"),
                schedule: app("SCHEDULE"),
                semester_settle_record: app("SEMESTER_SETTLE_RECORD"),
                page_limit: parsed("KINTONE_PAGE_LIMIT", 100)?,
                max_requests_per_second: parsed("KINTONE_MAX_REQUESTS_PER_SECOND", 10)?,
                request_timeout_secs: parsed("KINTONE_REQUEST_TIMEOUT_SECS", 30)?,
            },
            pools: SyncPoolConfig {
                student: parsed("SYNC_POOL_STUDENT", pool_defaults.student)?,
                point_card: parsed("SYNC_POOL_POINT_CARD", pool_defaults.point_card)?,
                deposit_record: parsed("SYNC_POOL_DEPOSIT_RECORD", pool_defaults.deposit_record)?,
                reduce_record: parsed("SYNC_POOL_REDUCE_RECORD", pool_defaults.reduce_record)?,
                schedule: parsed("SYNC_POOL_SCHEDULE", pool_defaults.schedule)?,
                semester_settle_record: parsed(
                    "SYNC_POOL_SEMESTER_SETTLE_RECORD",
                    pool_defaults.semester_settle_record,
                )?,
            },
            settlement: SettlementConfig {
                anchors: std::env::var("SETTLE_ANCHORS")
                    .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or(settle_defaults.anchors),
                utc_offset_hours: parsed("SETTLE_UTC_OFFSET_HOURS", settle_defaults.utc_offset_hours)?,
                execution_hour: parsed("SETTLE_HOUR", settle_defaults.execution_hour)?,
                scheduler_enabled: parsed("SETTLE_SCHEDULER_ENABLED", settle_defaults.scheduler_enabled)?,
                insert_batch_size: settle_defaults.insert_batch_size,
                insert_batch_delay_ms: parsed(
                    "SETTLE_INSERT_BATCH_DELAY_MS",
                    settle_defaults.insert_batch_delay_ms,
                )?,
            },
        })
    }
}

fn required(key: &str) -> Result<String, config::ConfigError> {
    std::env::var(key).map_err(|_| config::ConfigError::Message(format!("{} must be set", key)))
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, config::ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| config::ConfigError::Message(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn app(name: &str) -> KintoneAppConfig {
    KintoneAppConfig {
        app_id: std::env::var(format!("KINTONE_{}_APP_ID", name)).unwrap_or_default(),
        api_token: std::env::var(format!("KINTONE_{}_TOKEN", name)).ok(),
    }
}
