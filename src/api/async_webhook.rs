use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::spawn;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::models::{WebhookEventType, WebhookPayload};
use crate::config::KintoneConfig;
use crate::error::{AppError, AppResult};
use crate::sync::{pool, SyncEntity, SyncService};

/// Webhook response - return 202 Accepted immediately
#[derive(Debug, Serialize)]
pub struct WebhookAcceptedResponse {
    pub status: String,
    pub message: String,
    pub webhook_id: String,
}

/// Applies remote record events one at a time, off the request path
pub struct AsyncWebhookProcessor {
    sync: Arc<SyncService>,
    /// configured remote app id per entity; empty ids are not checked
    app_ids: HashMap<SyncEntity, String>,
}

impl AsyncWebhookProcessor {
    pub fn new(sync: Arc<SyncService>, kintone: &KintoneConfig) -> Self {
        let app_ids = [
            SyncEntity::Students,
            SyncEntity::PointCards,
            SyncEntity::DepositRecords,
            SyncEntity::ReduceRecords,
            SyncEntity::Schedules,
            SyncEntity::SettleRecords,
        ]
        .into_iter()
        .map(|entity| (entity, kintone.app(entity.app()).app_id.clone()))
        .collect();

        Self { sync, app_ids }
    }

    /// Everything that can be rejected with 400 before going to the background
    pub fn validate(&self, entity: SyncEntity, payload: &WebhookPayload) -> AppResult<()> {
        if let Some(expected) = self.app_ids.get(&entity).filter(|id| !id.is_empty()) {
            if *expected != payload.app.id {
                return Err(AppError::BadRequest(format!(
                    "webhook from app {} does not belong to {}",
                    payload.app.id, entity
                )));
            }
        }

        match payload.event {
            WebhookEventType::DeleteRecord => payload.deleted_ref_id().map(|_| ()),
            _ if payload.record.is_none() => Err(AppError::BadRequest(format!(
                "{:?} webhook without a record",
                payload.event
            ))),
            _ => Ok(()),
        }
    }

    /// Accept webhook and return 202 immediately
    /// Processes asynchronously in background
    pub fn process_webhook_async(
        &self,
        entity: SyncEntity,
        payload: WebhookPayload,
    ) -> (WebhookAcceptedResponse, JoinHandle<()>) {
        let sync = self.sync.clone();
        let webhook_id = payload.id.clone();

        let ref_label = payload.ref_label();
        let handle = Self::spawn_contained(
            entity,
            webhook_id.clone(),
            ref_label,
            Self::process_webhook_background(sync, entity, payload),
        );

        let response = WebhookAcceptedResponse {
            status: "accepted".to_string(),
            message: "Webhook received and queued for processing".to_string(),
            webhook_id,
        };
        (response, handle)
    }

    /// Runs one webhook job; errors and panics end up in the log, never in the runtime
    fn spawn_contained<F>(
        entity: SyncEntity,
        webhook_id: String,
        ref_label: String,
        job: F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        spawn(async move {
            match AssertUnwindSafe(job).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    entity = %entity,
                    record_ref_id = %ref_label,
                    "Webhook processing error for {}: {}",
                    webhook_id,
                    e
                ),
                Err(payload) => error!(
                    entity = %entity,
                    record_ref_id = %ref_label,
                    "❌ Webhook {} panicked: {}",
                    webhook_id,
                    pool::panic_message(payload)
                ),
            }
        })
    }

    async fn process_webhook_background(
        sync: Arc<SyncService>,
        entity: SyncEntity,
        payload: WebhookPayload,
    ) -> AppResult<()> {
        info!(entity = %entity, event = ?payload.event, "⚙️ Processing webhook: {}", payload.id);

        match payload.event {
            WebhookEventType::DeleteRecord => {
                let ref_id = payload.deleted_ref_id()?;
                let touched = sync.delete_one(entity, ref_id).await?;
                if touched == 0 {
                    warn!(entity = %entity, record_ref_id = ref_id, "deleted record had no live local row");
                }
                info!(entity = %entity, record_ref_id = ref_id, touched, "✓ Webhook delete applied");
            }
            event => {
                let record = payload
                    .record
                    .ok_or_else(|| AppError::BadRequest(format!("{:?} webhook without a record", event)))?;
                let outcome = sync.apply_one(entity, record).await?;
                info!(entity = %entity, ?outcome, "✓ Webhook record applied");
            }
        }
        Ok(())
    }
}
