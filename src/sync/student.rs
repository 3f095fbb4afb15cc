// Students carry three extras on top of the plain mirror:
// - the parent account (user) is created or reactivated on demand,
// - a name or phone change is pushed to every remote app that stores the
//   composite "name/phone",
// - after the sweep, accounts left without a live student are deactivated.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::engine::{Change, EntityAdapter, SyncEntity, SyncScope};
use super::SyncContext;
use crate::error::{AppError, AppResult};
use crate::identity::StudentIdentity;
use crate::kintone::fields::{value, ID_FIELD};
use crate::kintone::records::{RemoteStudent, ATTENDANCE, PARENT_PHONE, STUDENT_NAME};
use crate::kintone::{fetch_all, KintoneApp, RawRecord, RecordQuery, RecordUpdate, BATCH_WRITE_LIMIT};
use crate::ledger::models::{RecordTable, RowKey, Student, StudentCond, User, UserStatus};
use crate::ledger::LedgerStore;

/// Remote apps keyed by the student composite
const RENAME_TARGETS: [KintoneApp; 4] = [
    KintoneApp::PointCard,
    KintoneApp::DepositRecord,
    KintoneApp::ReduceRecord,
    KintoneApp::Schedule,
];

fn hash_password(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Attendance subtable of `record` with `old` swapped for `new`
fn renamed_attendance(record: &Value, old: &str, new: &str) -> Value {
    let rows: Vec<Value> = record
        .pointer("/attendance/value")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|mut row| {
            if let Some(name) = row.pointer_mut("/value/studentName/value") {
                if *name == old {
                    *name = json!(new);
                }
            }
            row
        })
        .collect();
    json!({ ATTENDANCE: { "value": rows } })
}

pub struct StudentAdapter {
    ctx: SyncContext,
    // serializes account creation so siblings sharing a phone get one user
    accounts: Mutex<()>,
}

impl StudentAdapter {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            accounts: Mutex::new(()),
        }
    }

    /// User id for the parent account, plus whether anything was written
    async fn ensure_user(&self, phone: &str) -> AppResult<(i64, bool)> {
        let _guard = self.accounts.lock().await;
        match self.ctx.store.find_user_by_account(phone).await? {
            Some(user) if user.status == UserStatus::Active => Ok((user.user_id, false)),
            Some(user) => {
                self.ctx.store.set_user_status(user.user_id, UserStatus::Active).await?;
                info!(account = %user.account, "user reactivated");
                Ok((user.user_id, true))
            }
            None => {
                let now = Utc::now();
                let user = User {
                    user_id: self.ctx.ids.next_id()?,
                    account: phone.to_string(),
                    password: hash_password(phone),
                    status: UserStatus::Active,
                    created_at: now,
                    updated_at: now,
                };
                self.ctx.store.insert_user(&user).await?;
                info!(account = %user.account, user_id = user.user_id, "user created");
                Ok((user.user_id, true))
            }
        }
    }

    async fn propagate_rename(&self, old: &StudentIdentity, new: &StudentIdentity) -> AppResult<()> {
        for app in RENAME_TARGETS {
            match self.rename_in(app, &old.compose(), &new.compose()).await {
                Ok(renamed) => info!(app = %app, renamed, from = %old, to = %new, "student renamed remotely"),
                Err(e) if e.is_remote_empty() => {
                    warn!(app = %app, from = %old, to = %new, "no remote records to rename")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn rename_in(&self, app: KintoneApp, old: &str, new: &str) -> AppResult<usize> {
        let query = match app {
            KintoneApp::Schedule => RecordQuery::new().in_list(STUDENT_NAME, [old]),
            _ => RecordQuery::new().eq(STUDENT_NAME, old),
        };
        let (records, _) = fetch_all(self.ctx.kintone.as_ref(), app, &query, self.ctx.page_limit).await?;
        if records.is_empty() {
            return Err(AppError::RemoteEmpty(format!("{} records of {}", app, old)));
        }

        let mut updates = Vec::with_capacity(records.len());
        for record in &records {
            let id = RawRecord::from_value(record.clone())?.id()?;
            let body = match app {
                KintoneApp::Schedule => renamed_attendance(record, old, new),
                _ => json!({ STUDENT_NAME: value(new) }),
            };
            updates.push(RecordUpdate::by_id(id, body));
        }
        for batch in updates.chunks(BATCH_WRITE_LIMIT) {
            self.ctx.kintone.update_records(app, batch.to_vec()).await?;
        }
        Ok(updates.len())
    }
}

#[async_trait]
impl EntityAdapter for StudentAdapter {
    type Remote = RemoteStudent;
    type Local = Student;

    fn entity(&self) -> SyncEntity {
        SyncEntity::Students
    }

    fn app(&self) -> KintoneApp {
        KintoneApp::Student
    }

    fn table(&self) -> RecordTable {
        RecordTable::Students
    }

    fn store(&self) -> &dyn LedgerStore {
        self.ctx.store.as_ref()
    }

    fn remote_query(&self, scope: &SyncScope) -> RecordQuery {
        let mut query = RecordQuery::new();
        if let Some(identity) = &scope.identity {
            query = query
                .eq(STUDENT_NAME, &identity.student_name)
                .eq(PARENT_PHONE, &identity.parent_phone);
        }
        query.order_by(ID_FIELD, true)
    }

    fn decode(&self, raw: &RawRecord) -> AppResult<RemoteStudent> {
        RemoteStudent::from_raw(raw)
    }

    fn ref_id(&self, remote: &RemoteStudent) -> i64 {
        remote.ref_id
    }

    async fn find_local(&self, remote: &RemoteStudent) -> AppResult<Option<Student>> {
        if let Some(student) = self.ctx.store.find_student(&StudentCond::by_ref(remote.ref_id)).await? {
            return Ok(Some(student));
        }
        let by_identity = StudentCond {
            identity: Some(remote.identity.clone()),
            ..Default::default()
        };
        Ok(self
            .ctx
            .store
            .find_student(&by_identity)
            .await?
            .filter(|student| student.student_ref_id.is_none()))
    }

    async fn create(&self, remote: &RemoteStudent) -> AppResult<()> {
        let (user_id, _) = self.ensure_user(&remote.identity.parent_phone).await?;
        let now = Utc::now();
        let student = Student {
            student_id: self.ctx.ids.next_id()?,
            student_ref_id: Some(remote.ref_id),
            user_id,
            student_name: remote.identity.student_name.clone(),
            parent_name: remote.parent_name.clone(),
            parent_phone: remote.identity.parent_phone.clone(),
            mode: remote.mode,
            is_settle_normally: remote.is_settle_normally,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.insert_student(&student).await
    }

    async fn update(&self, local: &Student, remote: &RemoteStudent) -> AppResult<Change> {
        let old = local.identity();
        if old != remote.identity {
            self.propagate_rename(&old, &remote.identity).await?;
        }

        let (user_id, user_written) = self.ensure_user(&remote.identity.parent_phone).await?;
        let desired = Student {
            student_ref_id: Some(remote.ref_id),
            user_id,
            student_name: remote.identity.student_name.clone(),
            parent_name: remote.parent_name.clone(),
            parent_phone: remote.identity.parent_phone.clone(),
            mode: remote.mode,
            is_settle_normally: remote.is_settle_normally,
            ..local.clone()
        };
        if desired == *local {
            return Ok(Change::from_dirty(user_written));
        }
        self.ctx.store.update_student(&desired).await?;
        Ok(Change::Changed)
    }

    async fn reset_tombstone(&self, local: &Student) -> AppResult<u64> {
        self.ctx
            .store
            .reset_tombstone(self.table(), RowKey::RecordId(local.student_id))
            .await
    }

    async fn after_sweep(&self) -> AppResult<()> {
        let deactivated = self.ctx.store.deactivate_users_without_active_student().await?;
        for user in &deactivated {
            info!(account = %user.account, user_id = user.user_id, "user deactivated");
        }
        Ok(())
    }
}
