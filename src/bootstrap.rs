use std::{sync::Arc, time::Duration};

use chrono::FixedOffset;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    api::{async_webhook::AsyncWebhookProcessor, handler::AppState},
    config::Config,
    error::{AppError, AppResult},
    kintone::{KintoneApi, KintoneApp, KintoneClient},
    ledger::{LedgerRepository, LedgerStore},
    settlement::{SettlementCalendar, SettlementEngine, SettlementScheduler},
    snowflake::IdGenerator,
    sync::{SyncContext, SyncService},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url, config.db_max_connections).await?;

    // Core components
    let store: Arc<dyn LedgerStore> = Arc::new(LedgerRepository::new(pool));
    let ids = Arc::new(IdGenerator::new(config.snowflake_node_id)?);
    info!("✅ Snowflake id generator ready on node {}", config.snowflake_node_id);

    let kintone: Arc<dyn KintoneApi> = Arc::new(KintoneClient::new(&config.kintone)?);
    info!(
        "✅ Kintone client initialized for {} ({} req/s)",
        config.kintone.base_url, config.kintone.max_requests_per_second
    );
    for app in KintoneApp::all() {
        if config.kintone.app(app).app_id.is_empty() {
            warn!("⚠️  No app id configured for {} - its sync will fail", app);
        }
    }

    let calendar = SettlementCalendar::from_config(&config.settlement)?;
    let offset: FixedOffset = calendar.offset();

    let sync = Arc::new(SyncService::new(
        SyncContext {
            store: store.clone(),
            kintone: kintone.clone(),
            ids,
            page_limit: config.kintone.page_limit,
            offset,
        },
        &config.pools,
    ));
    info!("✅ Sync service initialized with pools: {:?}", config.pools);

    let settlement = Arc::new(SettlementEngine::new(
        store,
        kintone,
        sync.clone(),
        calendar,
        &config.settlement,
        config.kintone.page_limit,
    ));
    info!(
        "✅ Settlement engine initialized (anchors {:?}, UTC{:+})",
        config.settlement.anchors, config.settlement.utc_offset_hours
    );

    if config.settlement.scheduler_enabled {
        if config.settlement.execution_hour > 23 {
            return Err(AppError::Config(format!(
                "SETTLE_HOUR must be 0-23, got {}",
                config.settlement.execution_hour
            )));
        }
        SettlementScheduler::new(settlement.clone(), config.settlement.execution_hour).start();
        info!(
            "✅ Settlement scheduler started (daily at {:02}:00 local)",
            config.settlement.execution_hour
        );
    } else {
        warn!("⚠️  Settlement scheduler disabled - settle through the admin endpoint");
    }

    let webhooks = Arc::new(AsyncWebhookProcessor::new(sync.clone(), &config.kintone));

    Ok(AppState {
        sync,
        settlement,
        webhooks,
    })
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
