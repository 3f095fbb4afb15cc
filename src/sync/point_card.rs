use async_trait::async_trait;
use chrono::Utc;

use super::engine::{Change, EntityAdapter, SyncEntity, SyncScope};
use super::SyncContext;
use crate::error::AppResult;
use crate::kintone::fields::ID_FIELD;
use crate::kintone::records::{RemotePointCard, STUDENT_NAME};
use crate::kintone::{KintoneApp, RawRecord, RecordQuery};
use crate::ledger::models::{PointCard, PointCardCond, RecordTable, RowKey};
use crate::ledger::LedgerStore;

/// Point cards: one per student, linked by reference id or else by identity
pub struct PointCardAdapter {
    ctx: SyncContext,
}

impl PointCardAdapter {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl EntityAdapter for PointCardAdapter {
    type Remote = RemotePointCard;
    type Local = PointCard;

    fn entity(&self) -> SyncEntity {
        SyncEntity::PointCards
    }

    fn app(&self) -> KintoneApp {
        KintoneApp::PointCard
    }

    fn table(&self) -> RecordTable {
        RecordTable::PointCards
    }

    fn store(&self) -> &dyn LedgerStore {
        self.ctx.store.as_ref()
    }

    fn remote_query(&self, scope: &SyncScope) -> RecordQuery {
        let mut query = RecordQuery::new();
        if let Some(identity) = &scope.identity {
            query = query.eq(STUDENT_NAME, identity);
        }
        query.order_by(ID_FIELD, true)
    }

    fn decode(&self, raw: &RawRecord) -> AppResult<RemotePointCard> {
        RemotePointCard::from_raw(raw)
    }

    fn ref_id(&self, remote: &RemotePointCard) -> i64 {
        remote.ref_id
    }

    async fn find_local(&self, remote: &RemotePointCard) -> AppResult<Option<PointCard>> {
        let by_ref = PointCardCond {
            record_ref_id: Some(remote.ref_id),
            ..Default::default()
        };
        if let Some(card) = self.ctx.store.find_point_card(&by_ref).await? {
            return Ok(Some(card));
        }

        // a card created before its remote twin existed
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let by_student = PointCardCond {
            student_id: Some(student.student_id),
            ..Default::default()
        };
        Ok(self
            .ctx
            .store
            .find_point_card(&by_student)
            .await?
            .filter(|card| card.record_ref_id.is_none()))
    }

    async fn create(&self, remote: &RemotePointCard) -> AppResult<()> {
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let now = Utc::now();
        let card = PointCard {
            record_id: self.ctx.ids.next_id()?,
            record_ref_id: Some(remote.ref_id),
            student_id: student.student_id,
            rest_points: remote.rest_points,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.insert_point_card(&card).await
    }

    async fn update(&self, local: &PointCard, remote: &RemotePointCard) -> AppResult<Change> {
        let student = self.ctx.resolve_student(&remote.identity).await?;
        let desired = PointCard {
            record_ref_id: Some(remote.ref_id),
            student_id: student.student_id,
            rest_points: remote.rest_points,
            ..local.clone()
        };
        if desired == *local {
            return Ok(Change::Unchanged);
        }
        self.ctx.store.update_point_card(&desired).await?;
        Ok(Change::Changed)
    }

    async fn reset_tombstone(&self, local: &PointCard) -> AppResult<u64> {
        self.ctx
            .store
            .reset_tombstone(self.table(), RowKey::RecordId(local.record_id))
            .await
    }
}
