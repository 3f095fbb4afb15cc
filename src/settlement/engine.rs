// Semester settlement: clears each eligible student's unused points at every
// anchor date and records the cleared amount on both sides.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::window::SettlementCalendar;
use crate::config::SettlementConfig;
use crate::error::{AppError, AppResult};
use crate::identity::StudentIdentity;
use crate::kintone::records::{RemoteSettleRecord, CLEAR_POINTS, END_TIME, START_TIME, STUDENT_NAME};
use crate::kintone::{fetch_all, KintoneApi, KintoneApp, RawRecord, RecordQuery, RecordUpdate, BATCH_WRITE_LIMIT};
use crate::ledger::models::{PointCard, Student, TimeRange};
use crate::ledger::LedgerStore;
use crate::sync::engine::date_bounds;
use crate::sync::{SyncEntity, SyncScope, SyncService};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// `date` is not a settlement anchor
    Skipped { date: NaiveDate },
    Settled {
        window: TimeRange,
        /// students cleared by this run
        settled: usize,
        /// eligible students that already had a settle record for the window
        skipped: usize,
        total_clear_points: f64,
    },
}

/// One student's share of a run
#[derive(Debug, Clone)]
struct Clearance {
    student: Student,
    identity: StudentIdentity,
    card: Option<PointCard>,
    clear_points: f64,
}

pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    kintone: Arc<dyn KintoneApi>,
    sync: Arc<SyncService>,
    calendar: SettlementCalendar,
    insert_batch_size: usize,
    insert_batch_delay: Duration,
    page_limit: usize,
    running: Mutex<()>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        kintone: Arc<dyn KintoneApi>,
        sync: Arc<SyncService>,
        calendar: SettlementCalendar,
        config: &SettlementConfig,
        page_limit: usize,
    ) -> Self {
        Self {
            store,
            kintone,
            sync,
            calendar,
            insert_batch_size: config.insert_batch_size.clamp(1, BATCH_WRITE_LIMIT),
            insert_batch_delay: Duration::from_millis(config.insert_batch_delay_ms),
            page_limit,
            running: Mutex::new(()),
        }
    }

    pub fn calendar(&self) -> &SettlementCalendar {
        &self.calendar
    }

    /// Settle the semester that closes on `today`. Not an anchor → `Skipped`.
    ///
    /// Pre-sync and transaction failures abort the run and leave both sides
    /// untouched; a failing post-sync of the settle records is only logged.
    pub async fn settle_semester_points(&self, today: NaiveDate) -> AppResult<SettlementOutcome> {
        let _running = self.running.try_lock().map_err(|_| AppError::SettlementInProgress)?;

        let Some(window) = self.calendar.window_for(today)? else {
            debug!(%today, "not a settlement anchor");
            return Ok(SettlementOutcome::Skipped { date: today });
        };

        info!(
            %today,
            start = %window.start,
            end = %window.end,
            "🔄 Starting semester settlement"
        );

        self.pre_sync(&window).await?;
        let outcome = self.settle_window(&window).await?;

        if let Err(e) = self
            .sync
            .batch_sync(SyncEntity::SettleRecords, &SyncScope::window(window))
            .await
        {
            error!("❌ Settle record sync after settlement failed: {}", e);
        }

        info!(?outcome, "✅ Semester settlement completed");
        Ok(outcome)
    }

    /// Students first, since everything else resolves against them
    async fn pre_sync(&self, window: &TimeRange) -> AppResult<()> {
        self.sync.batch_sync(SyncEntity::Students, &SyncScope::all()).await?;

        let everything = SyncScope::all();
        let scoped = SyncScope::window(*window);
        let (cards, deposits, reduces) = tokio::join!(
            self.sync.batch_sync(SyncEntity::PointCards, &everything),
            self.sync.batch_sync(SyncEntity::DepositRecords, &scoped),
            self.sync.batch_sync(SyncEntity::ReduceRecords, &scoped),
        );
        cards?;
        deposits?;
        reduces?;
        Ok(())
    }

    /// Identities that already carry a remote settle record inside `window`
    async fn settled_identities(&self, window: &TimeRange) -> AppResult<HashSet<StudentIdentity>> {
        let (start, end) = date_bounds(window);
        let query = RecordQuery::new().ge(START_TIME, start).le(END_TIME, end);
        let (records, _) = fetch_all(
            self.kintone.as_ref(),
            KintoneApp::SemesterSettleRecord,
            &query,
            self.page_limit,
        )
        .await?;

        let mut settled = HashSet::with_capacity(records.len());
        for value in records {
            match RawRecord::from_value(value).and_then(|raw| RemoteSettleRecord::from_raw(&raw)) {
                Ok(record) => {
                    settled.insert(record.identity);
                }
                Err(e) => warn!("unreadable settle record in window ignored: {}", e),
            }
        }
        Ok(settled)
    }

    async fn settle_window(&self, window: &TimeRange) -> AppResult<SettlementOutcome> {
        let mut tx = self.store.begin_settlement().await?;

        let eligible = tx.settleable_students().await?;
        let settled = self.settled_identities(window).await?;
        let total = eligible.len();
        let due: Vec<Student> = eligible
            .into_iter()
            .filter(|s| !settled.contains(&s.identity()))
            .collect();
        let skipped = total - due.len();

        if due.is_empty() {
            tx.commit().await?;
            info!(skipped, "nothing left to settle in this window");
            return Ok(SettlementOutcome::Settled {
                window: *window,
                settled: 0,
                skipped,
                total_clear_points: 0.0,
            });
        }

        let ids: Vec<i64> = due.iter().map(|s| s.student_id).collect();
        let deposited = tx.total_deposited_points(&ids, window).await?;
        let reduced = tx.total_reduce_points(&ids, window).await?;
        let mut cards: HashMap<i64, PointCard> = tx
            .point_cards_for(&ids)
            .await?
            .into_iter()
            .map(|card| (card.student_id, card))
            .collect();

        let clearances: Vec<Clearance> = due
            .into_iter()
            .map(|student| {
                let identity = student.identity();
                let deposit = deposited.get(&student.student_id).copied().unwrap_or(0.0);
                let reduce = reduced.get(&student.student_id).copied().unwrap_or(0.0);
                let mut clear_points = deposit - reduce;
                if clear_points < 0.0 {
                    warn!(
                        student = %identity,
                        deposit,
                        reduce,
                        "more points reduced than deposited, clearing 0"
                    );
                    clear_points = 0.0;
                }
                Clearance {
                    card: cards.remove(&student.student_id),
                    student,
                    identity,
                    clear_points,
                }
            })
            .collect();

        self.insert_settle_records(window, &clearances).await?;

        for clearance in &clearances {
            match &clearance.card {
                Some(card) => tx.debit_point_card(card.record_id, clearance.clear_points).await?,
                None => warn!(student = %clearance.identity, "no point card to debit"),
            }
        }

        let updates: Vec<RecordUpdate> = clearances
            .iter()
            .filter(|c| c.card.is_some())
            .map(|c| {
                RecordUpdate::by_key(
                    STUDENT_NAME,
                    c.identity.compose(),
                    json!({ CLEAR_POINTS: { "value": c.clear_points.to_string() } }),
                )
            })
            .collect();
        for chunk in updates.chunks(BATCH_WRITE_LIMIT) {
            self.kintone
                .update_records(KintoneApp::PointCard, chunk.to_vec())
                .await?;
        }

        tx.commit().await?;

        let total_clear_points = clearances.iter().map(|c| c.clear_points).sum();
        for c in &clearances {
            debug!(
                student = %c.identity,
                student_id = c.student.student_id,
                clear_points = c.clear_points,
                "student settled"
            );
        }
        Ok(SettlementOutcome::Settled {
            window: *window,
            settled: clearances.len(),
            skipped,
            total_clear_points,
        })
    }

    async fn insert_settle_records(&self, window: &TimeRange, clearances: &[Clearance]) -> AppResult<()> {
        let start = window.start.date_naive();
        let end = window.end.date_naive();
        let bodies: Vec<Value> = clearances
            .iter()
            .map(|c| RemoteSettleRecord::insert_body(&c.identity, start, end, c.clear_points))
            .collect();

        for (i, batch) in bodies.chunks(self.insert_batch_size).enumerate() {
            if i > 0 && !self.insert_batch_delay.is_zero() {
                tokio::time::sleep(self.insert_batch_delay).await;
            }
            self.kintone
                .add_records(KintoneApp::SemesterSettleRecord, batch.to_vec())
                .await?;
            debug!(batch = i, size = batch.len(), "settle records inserted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kintone::fake::FakeKintone;
    use crate::ledger::memory::MemoryLedger;
    use crate::sync::test_support::{
        context, deposit_json, point_card_json, reduce_json, serial_pools, settle_json, student_json,
    };

    struct Harness {
        ledger: MemoryLedger,
        fake: FakeKintone,
        engine: SettlementEngine,
    }

    fn harness() -> Harness {
        let ledger = MemoryLedger::new();
        let fake = FakeKintone::new();
        let ctx = context(&ledger, &fake);
        let sync = Arc::new(SyncService::new(ctx.clone(), &serial_pools()));
        let config = SettlementConfig {
            insert_batch_delay_ms: 0,
            ..SettlementConfig::default()
        };
        let calendar = SettlementCalendar::from_config(&config).unwrap();
        let engine = SettlementEngine::new(ctx.store, ctx.kintone, sync, calendar, &config, 100);
        Harness { ledger, fake, engine }
    }

    /// Amy: 10 deposited, 4 used. Bob: 2 deposited, 5 used.
    async fn seed_semester(fake: &FakeKintone) {
        fake.seed(
            KintoneApp::Student,
            vec![
                student_json(1, "Amy", "0911", "學期制"),
                student_json(2, "Bob", "0922", "學期制"),
                student_json(3, "Cy", "0933", "舊制"),
            ],
        )
        .await;
        fake.seed(
            KintoneApp::PointCard,
            vec![
                point_card_json(11, "Amy/0911", 20.0),
                point_card_json(12, "Bob/0922", 5.0),
                point_card_json(13, "Cy/0933", 8.0),
            ],
        )
        .await;
        fake.seed(
            KintoneApp::DepositRecord,
            vec![
                deposit_json(21, "Amy/0911", "2025-04-01", 10),
                deposit_json(22, "Bob/0922", "2025-04-01", 2),
                deposit_json(23, "Amy/0911", "2025-09-02", 100),
                deposit_json(24, "Cy/0933", "2025-04-01", 8),
            ],
        )
        .await;
        fake.seed(
            KintoneApp::ReduceRecord,
            vec![
                reduce_json(31, "Amy/0911", "2025-05-01T02:00:00Z", 4.0),
                reduce_json(32, "Bob/0922", "2025-05-01T02:00:00Z", 5.0),
            ],
        )
        .await;
    }

    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    async fn remote_clear_points(fake: &FakeKintone) -> HashMap<String, f64> {
        fake.records(KintoneApp::SemesterSettleRecord)
            .await
            .into_iter()
            .map(|v| RemoteSettleRecord::from_raw(&RawRecord::from_value(v).unwrap()).unwrap())
            .map(|r| (r.identity.compose(), r.clear_points))
            .collect()
    }

    async fn local_rest_points(ledger: &MemoryLedger, name: &str) -> f64 {
        let state = ledger.snapshot().await;
        let student = state.students.values().find(|s| s.student_name == name).unwrap().student_id;
        state
            .point_cards
            .values()
            .find(|c| c.student_id == student && !c.is_deleted)
            .unwrap()
            .rest_points
    }

    #[tokio::test]
    async fn test_settles_semester_students_once() {
        let h = harness();
        seed_semester(&h.fake).await;

        let outcome = h.engine.settle_semester_points(anchor()).await.unwrap();
        match outcome {
            SettlementOutcome::Settled { settled, skipped, total_clear_points, .. } => {
                assert_eq!(settled, 2);
                assert_eq!(skipped, 0);
                assert_eq!(total_clear_points, 6.0);
            }
            other => panic!("expected a settlement, got {:?}", other),
        }

        let remote = remote_clear_points(&h.fake).await;
        assert_eq!(remote.len(), 2);
        assert_eq!(remote["Amy/0911"], 6.0);
        assert!(!remote.contains_key("Cy/0933"));
        assert_eq!(local_rest_points(&h.ledger, "Amy").await, 14.0);

        let updates = h.fake.updates(KintoneApp::PointCard).await;
        assert_eq!(updates.len(), 2);
        assert!(updates.contains(&RecordUpdate::by_key(
            STUDENT_NAME,
            "Amy/0911",
            json!({ CLEAR_POINTS: { "value": "6" } }),
        )));

        // the post-sync pulled the new settle records into the ledger
        assert_eq!(h.ledger.snapshot().await.settle_records.len(), 2);

        let again = h.engine.settle_semester_points(anchor()).await.unwrap();
        match again {
            SettlementOutcome::Settled { settled, skipped, .. } => {
                assert_eq!(settled, 0);
                assert_eq!(skipped, 2);
            }
            other => panic!("expected a settlement, got {:?}", other),
        }
        assert_eq!(h.fake.add_batches(KintoneApp::SemesterSettleRecord).await, vec![2]);
    }

    #[tokio::test]
    async fn test_overdrawn_student_clears_zero() {
        let h = harness();
        seed_semester(&h.fake).await;

        h.engine.settle_semester_points(anchor()).await.unwrap();

        assert_eq!(remote_clear_points(&h.fake).await["Bob/0922"], 0.0);
        assert_eq!(local_rest_points(&h.ledger, "Bob").await, 5.0);
    }

    #[tokio::test]
    async fn test_student_settled_elsewhere_is_skipped() {
        let h = harness();
        seed_semester(&h.fake).await;
        h.fake
            .seed(
                KintoneApp::SemesterSettleRecord,
                vec![settle_json(90, "Amy/0911", "2025-03-01", "2025-08-31", 6.0)],
            )
            .await;

        let outcome = h.engine.settle_semester_points(anchor()).await.unwrap();
        match outcome {
            SettlementOutcome::Settled { settled, skipped, .. } => {
                assert_eq!(settled, 1);
                assert_eq!(skipped, 1);
            }
            other => panic!("expected a settlement, got {:?}", other),
        }
        assert_eq!(local_rest_points(&h.ledger, "Amy").await, 20.0);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back() {
        let h = harness();
        seed_semester(&h.fake).await;
        h.fake.fail_adds(KintoneApp::SemesterSettleRecord).await;

        assert!(h.engine.settle_semester_points(anchor()).await.is_err());

        assert_eq!(local_rest_points(&h.ledger, "Amy").await, 20.0);
        assert!(h.fake.updates(KintoneApp::PointCard).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_anchor_day_does_nothing() {
        let h = harness();
        seed_semester(&h.fake).await;
        let date = NaiveDate::from_ymd_opt(2025, 9, 2).unwrap();

        let outcome = h.engine.settle_semester_points(date).await.unwrap();

        assert_eq!(outcome, SettlementOutcome::Skipped { date });
        assert!(h.fake.queries(KintoneApp::Student).await.is_empty());
    }
}
