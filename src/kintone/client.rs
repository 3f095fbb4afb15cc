use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::query::RecordQuery;
use crate::config::{KintoneAppConfig, KintoneConfig};
use crate::error::{AppError, AppResult, KintoneError};

/// The remote side rejects write batches above this size
pub const BATCH_WRITE_LIMIT: usize = 100;

const RECORDS_PATH: &str = "/k/v1/records.json";
const TOKEN_HEADER: &str = "X-Cybozu-API-Token";
const AUTHORIZATION_HEADER: &str = "X-Cybozu-Authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KintoneApp {
    Student,
    PointCard,
    DepositRecord,
    ReduceRecord,
    Schedule,
    SemesterSettleRecord,
}

impl KintoneApp {
    pub fn all() -> [KintoneApp; 6] {
        [
            KintoneApp::Student,
            KintoneApp::PointCard,
            KintoneApp::DepositRecord,
            KintoneApp::ReduceRecord,
            KintoneApp::Schedule,
            KintoneApp::SemesterSettleRecord,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            KintoneApp::Student => "student",
            KintoneApp::PointCard => "point_card",
            KintoneApp::DepositRecord => "deposit_record",
            KintoneApp::ReduceRecord => "reduce_record",
            KintoneApp::Schedule => "schedule",
            KintoneApp::SemesterSettleRecord => "semester_settle_record",
        }
    }
}

impl std::fmt::Display for KintoneApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One page of raw records plus the total the query matches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPage {
    pub records: Vec<Value>,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateKey {
    pub field: String,
    pub value: String,
}

/// One entry of a batch update, addressed by record id or by a unique field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordUpdate {
    ById {
        id: String,
        record: Value,
    },
    ByKey {
        #[serde(rename = "updateKey")]
        update_key: UpdateKey,
        record: Value,
    },
}

impl RecordUpdate {
    pub fn by_id(id: i64, record: Value) -> Self {
        RecordUpdate::ById {
            id: id.to_string(),
            record,
        }
    }

    pub fn by_key(field: &str, value: impl Into<String>, record: Value) -> Self {
        RecordUpdate::ByKey {
            update_key: UpdateKey {
                field: field.to_string(),
                value: value.into(),
            },
            record,
        }
    }
}

/// Remote records API as seen by the sync and settlement engines
#[async_trait]
pub trait KintoneApi: Send + Sync {
    async fn get_records(&self, app: KintoneApp, query: &RecordQuery) -> AppResult<RecordPage>;

    /// Inserts up to `BATCH_WRITE_LIMIT` records, returns the new record ids
    async fn add_records(&self, app: KintoneApp, records: Vec<Value>) -> AppResult<Vec<i64>>;

    async fn update_records(&self, app: KintoneApp, updates: Vec<RecordUpdate>) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRecordsResponse {
    records: Vec<Value>,
    total_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddRecordsResponse {
    ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Serialize)]
struct AddRecordsRequest<'a> {
    app: &'a str,
    records: Vec<Value>,
}

#[derive(Serialize)]
struct UpdateRecordsRequest<'a> {
    app: &'a str,
    records: Vec<RecordUpdate>,
}

/// HTTP client for the Kintone REST API
pub struct KintoneClient {
    base_url: String,
    apps: HashMap<KintoneApp, KintoneAppConfig>,
    /// base64 `user:password`, used when an app has no API token
    authorization: Option<String>,
    client: reqwest::Client,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl KintoneClient {
    pub fn new(config: &KintoneConfig) -> AppResult<Self> {
        let per_second = NonZeroU32::new(config.max_requests_per_second.max(1))
            .ok_or_else(|| AppError::Config("max requests per second must be positive".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let apps = HashMap::from([
            (KintoneApp::Student, config.student.clone()),
            (KintoneApp::PointCard, config.point_card.clone()),
            (KintoneApp::DepositRecord, config.deposit_record.clone()),
            (KintoneApp::ReduceRecord, config.reduce_record.clone()),
            (KintoneApp::Schedule, config.schedule.clone()),
            (KintoneApp::SemesterSettleRecord, config.semester_settle_record.clone()),
        ]);

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            apps,
            authorization: config.authorization.as_ref().map(|raw| STANDARD.encode(raw)),
            client,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }

    fn app_config(&self, app: KintoneApp) -> AppResult<&KintoneAppConfig> {
        self.apps
            .get(&app)
            .filter(|cfg| !cfg.app_id.is_empty())
            .ok_or_else(|| KintoneError::UnknownApp(app.to_string()).into())
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, RECORDS_PATH)
    }

    fn authorize(&self, request: reqwest::RequestBuilder, app: &KintoneAppConfig) -> reqwest::RequestBuilder {
        match (&app.api_token, &self.authorization) {
            (Some(token), _) => request.header(TOKEN_HEADER, token),
            (None, Some(auth)) => request.header(AUTHORIZATION_HEADER, auth),
            (None, None) => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> AppResult<T> {
        self.limiter.until_ready().await;

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() >= 400 {
            let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(KintoneError::Api {
                status: status.as_u16(),
                code: parsed.code.unwrap_or_default(),
                message: parsed.message.unwrap_or(body),
            }
            .into());
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn ensure_batch(size: usize) -> AppResult<()> {
    if size > BATCH_WRITE_LIMIT {
        return Err(KintoneError::BatchTooLarge {
            size,
            limit: BATCH_WRITE_LIMIT,
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl KintoneApi for KintoneClient {
    async fn get_records(&self, app: KintoneApp, query: &RecordQuery) -> AppResult<RecordPage> {
        let cfg = self.app_config(app)?;
        let query_string = query.to_query_string();
        debug!(app = %app, query = %query_string, "fetching kintone records");

        let request = self.client.get(self.url()).query(&[
            ("app", cfg.app_id.as_str()),
            ("query", query_string.as_str()),
            ("totalCount", "true"),
        ]);
        let response: GetRecordsResponse = self.send(self.authorize(request, cfg)).await?;

        let raw_total = response.total_count.unwrap_or_default();
        let total_count = raw_total
            .trim()
            .parse()
            .map_err(|_| KintoneError::InvalidTotalCount(raw_total.clone()))?;

        Ok(RecordPage {
            records: response.records,
            total_count,
        })
    }

    async fn add_records(&self, app: KintoneApp, records: Vec<Value>) -> AppResult<Vec<i64>> {
        ensure_batch(records.len())?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let cfg = self.app_config(app)?;
        debug!(app = %app, count = records.len(), "adding kintone records");

        let body = AddRecordsRequest {
            app: &cfg.app_id,
            records,
        };
        let request = self.client.post(self.url()).json(&body);
        let response: AddRecordsResponse = self.send(self.authorize(request, cfg)).await?;

        response
            .ids
            .iter()
            .map(|id| {
                id.parse::<i64>().map_err(|_| {
                    AppError::from(KintoneError::Decode(format!("record id {:?} is not numeric", id)))
                })
            })
            .collect()
    }

    async fn update_records(&self, app: KintoneApp, updates: Vec<RecordUpdate>) -> AppResult<()> {
        ensure_batch(updates.len())?;
        if updates.is_empty() {
            return Ok(());
        }
        let cfg = self.app_config(app)?;
        debug!(app = %app, count = updates.len(), "updating kintone records");

        let body = UpdateRecordsRequest {
            app: &cfg.app_id,
            records: updates,
        };
        let request = self.client.put(self.url()).json(&body);
        let _: Value = self.send(self.authorize(request, cfg)).await?;
        Ok(())
    }
}
