//! Run ledger
//!
//! Every run, whatever its terminal state, leaves one record behind. The
//! snapshot itself is not stored, only a fingerprint of it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::{RunState, StageTiming};
use crate::experts::ExpertKind;
use crate::models::{Classification, FinancialSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: Uuid,
    pub account_id: String,
    pub snapshot_fingerprint: Option<String>,
    pub classification: Option<Classification>,
    pub experts: Vec<ExpertKind>,
    pub degraded_experts: usize,
    pub terminal_state: RunState,
    pub stage_timings: Vec<StageTiming>,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// In-memory run ledger
pub struct RunLog {
    records: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, record: RunRecord) -> Uuid {
        let run_id = record.run_id;
        let mut records = self.records.write().await;
        records.insert(run_id, record);
        run_id
    }

    pub async fn get(&self, run_id: Uuid) -> Option<RunRecord> {
        let records = self.records.read().await;
        records.get(&run_id).cloned()
    }

    /// Run ids for an account, oldest first.
    pub async fn list_for_account(&self, account_id: &str) -> Vec<Uuid> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.account_id == account_id)
            .map(|record| (record.run_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        items.into_iter().map(|(id, _)| id).collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the snapshot's JSON form, hex encoded.
pub fn snapshot_fingerprint(snapshot: &FinancialSnapshot) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), snapshot).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SnapshotRecords;

    fn record(account_id: &str, created_at: DateTime<Utc>) -> RunRecord {
        RunRecord {
            run_id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            snapshot_fingerprint: None,
            classification: None,
            experts: vec![ExpertKind::FinancialAnalyst],
            degraded_experts: 0,
            terminal_state: RunState::Done,
            stage_timings: Vec::new(),
            created_at,
            elapsed_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let log = RunLog::new();
        let now = Utc::now();

        let later = log.record(record("acct-1", now + chrono::Duration::seconds(5))).await;
        let earlier = log.record(record("acct-1", now)).await;
        log.record(record("acct-2", now)).await;

        assert_eq!(log.list_for_account("acct-1").await, vec![earlier, later]);
        assert_eq!(log.len().await, 3);
        assert_eq!(log.get(later).await.unwrap().account_id, "acct-1");
        assert!(log.get(Uuid::new_v4()).await.is_none());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = FinancialSnapshot::from_records(crate::snapshot::demo_records());
        let b = FinancialSnapshot::from_records(crate::snapshot::demo_records());
        let empty = FinancialSnapshot::from_records(SnapshotRecords::default());

        assert_eq!(snapshot_fingerprint(&a), snapshot_fingerprint(&b));
        assert_ne!(snapshot_fingerprint(&a), snapshot_fingerprint(&empty));
        assert_eq!(snapshot_fingerprint(&a).len(), 64);
    }
}
