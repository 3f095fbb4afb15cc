pub mod deposit;
pub mod engine;
pub mod point_card;
pub mod pool;
pub mod reduce;
pub mod schedule;
pub mod settle_record;
pub mod student;

#[cfg(test)]
pub mod test_support;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::FixedOffset;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::SyncPoolConfig;
use crate::error::{AppError, AppResult};
use crate::identity::StudentIdentity;
use crate::kintone::KintoneApi;
use crate::ledger::models::{Student, StudentCond};
use crate::ledger::LedgerStore;
use crate::snowflake::IdGenerator;

pub use deposit::DepositAdapter;
pub use engine::{ApplyOutcome, EntityAdapter, Reconciler, SyncEntity, SyncFailure, SyncReport, SyncScope};
pub use point_card::PointCardAdapter;
pub use pool::WorkerPool;
pub use reduce::ReduceAdapter;
pub use schedule::ScheduleAdapter;
pub use settle_record::SettleRecordAdapter;
pub use student::StudentAdapter;

/// Everything an adapter needs to talk to both sides
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn LedgerStore>,
    pub kintone: Arc<dyn KintoneApi>,
    pub ids: Arc<IdGenerator>,
    pub page_limit: usize,
    /// school's local offset, used to read remote calendar dates
    pub offset: FixedOffset,
}

impl SyncContext {
    pub async fn resolve_student(&self, identity: &StudentIdentity) -> AppResult<Student> {
        resolve_student(self.store.as_ref(), identity).await
    }
}

/// The live local student with this identity
pub async fn resolve_student(store: &dyn LedgerStore, identity: &StudentIdentity) -> AppResult<Student> {
    store
        .find_student(&StudentCond::active_identity(identity))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("student {}", identity)))
}

macro_rules! dispatch {
    ($service:expr, $entity:expr, |$reconciler:ident| $body:expr) => {
        match $entity {
            SyncEntity::Students => {
                let $reconciler = &$service.students;
                $body
            }
            SyncEntity::PointCards => {
                let $reconciler = &$service.point_cards;
                $body
            }
            SyncEntity::DepositRecords => {
                let $reconciler = &$service.deposits;
                $body
            }
            SyncEntity::ReduceRecords => {
                let $reconciler = &$service.reduces;
                $body
            }
            SyncEntity::Schedules => {
                let $reconciler = &$service.schedules;
                $body
            }
            SyncEntity::SettleRecords => {
                let $reconciler = &$service.settle_records;
                $body
            }
        }
    };
}

/// Entry point for every sync trigger: one reconciler per entity
pub struct SyncService {
    students: Reconciler<StudentAdapter>,
    point_cards: Reconciler<PointCardAdapter>,
    deposits: Reconciler<DepositAdapter>,
    reduces: Reconciler<ReduceAdapter>,
    schedules: Reconciler<ScheduleAdapter>,
    settle_records: Reconciler<SettleRecordAdapter>,
}

impl SyncService {
    pub fn new(ctx: SyncContext, pools: &SyncPoolConfig) -> Self {
        let api = ctx.kintone.clone();
        let limit = ctx.page_limit;

        Self {
            students: Reconciler::new(
                StudentAdapter::new(ctx.clone()),
                api.clone(),
                WorkerPool::new("students", pools.student),
                limit,
            ),
            point_cards: Reconciler::new(
                PointCardAdapter::new(ctx.clone()),
                api.clone(),
                WorkerPool::new("point-cards", pools.point_card),
                limit,
            ),
            deposits: Reconciler::new(
                DepositAdapter::new(ctx.clone()),
                api.clone(),
                WorkerPool::new("deposit-records", pools.deposit_record),
                limit,
            ),
            reduces: Reconciler::new(
                ReduceAdapter::new(ctx.clone()),
                api.clone(),
                WorkerPool::new("reduce-records", pools.reduce_record),
                limit,
            ),
            schedules: Reconciler::new(
                ScheduleAdapter::new(ctx.clone()),
                api.clone(),
                WorkerPool::new("schedules", pools.schedule),
                limit,
            ),
            settle_records: Reconciler::new(
                SettleRecordAdapter::new(ctx),
                api,
                WorkerPool::new("settle-records", pools.semester_settle_record),
                limit,
            ),
        }
    }

    pub async fn batch_sync(&self, entity: SyncEntity, scope: &SyncScope) -> AppResult<SyncReport> {
        dispatch!(self, entity, |r| r.batch_sync(scope).await)
    }

    /// Run several entity syncs at once; the first error wins once all have finished
    pub async fn batch_sync_all(
        &self,
        entities: &[SyncEntity],
        scope: &SyncScope,
    ) -> AppResult<Vec<SyncReport>> {
        join_all(entities.iter().map(|entity| self.batch_sync(*entity, scope)))
            .await
            .into_iter()
            .collect()
    }

    /// Background batch sync; the handle doubles as an optional wait group
    pub fn spawn_batch_sync(
        self: &Arc<Self>,
        entity: SyncEntity,
        scope: SyncScope,
    ) -> JoinHandle<AppResult<SyncReport>> {
        let service = self.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(service.batch_sync(entity, &scope))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(report)) => Ok(report),
                Ok(Err(e)) => {
                    error!(entity = %entity, "❌ Background sync failed: {}", e);
                    Err(e)
                }
                Err(payload) => {
                    let msg = pool::panic_message(payload);
                    error!(entity = %entity, "❌ Background sync panicked: {}", msg);
                    Err(AppError::Internal(format!("{} sync panicked: {}", entity, msg)))
                }
            }
        })
    }

    /// Students first, then everything that hangs off them, for one student
    pub async fn sync_student(&self, identity: &StudentIdentity) -> AppResult<Vec<SyncReport>> {
        let scope = SyncScope::student(identity.clone());
        let mut reports = vec![self.batch_sync(SyncEntity::Students, &scope).await?];
        reports.extend(
            self.batch_sync_all(
                &[
                    SyncEntity::PointCards,
                    SyncEntity::DepositRecords,
                    SyncEntity::ReduceRecords,
                    SyncEntity::Schedules,
                    SyncEntity::SettleRecords,
                ],
                &scope,
            )
            .await?,
        );
        info!(student = %identity, "student data synced");
        Ok(reports)
    }

    pub async fn apply_one(&self, entity: SyncEntity, record: Value) -> AppResult<ApplyOutcome> {
        dispatch!(self, entity, |r| r.apply_one(record).await)
    }

    pub async fn delete_one(&self, entity: SyncEntity, ref_id: i64) -> AppResult<u64> {
        dispatch!(self, entity, |r| r.delete_one(ref_id).await)
    }
}
