//! Financial snapshot providers
//!
//! A provider aggregates an account's raw records into a
//! [`FinancialSnapshot`]. Totals are always derived by the snapshot itself.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::OrchestrationError;
use crate::models::{FinancialSnapshot, SnapshotRecords};
use crate::Result;

pub mod postgres;
pub use postgres::PgSnapshotProvider;

/// Trait for snapshot lookup
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn fetch_snapshot(&self, account_id: &str) -> Result<FinancialSnapshot>;
}

/// In-memory provider for development and tests
pub struct InMemorySnapshotProvider {
    accounts: Arc<RwLock<HashMap<String, SnapshotRecords>>>,
}

impl InMemorySnapshotProvider {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, account_id: impl Into<String>, records: SnapshotRecords) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account_id.into(), records);
    }

    /// Seeded with one demo account, `demo`.
    pub async fn with_demo_account() -> Self {
        let provider = Self::new();
        provider.insert("demo", demo_records()).await;
        provider
    }
}

impl Default for InMemorySnapshotProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotProvider for InMemorySnapshotProvider {
    async fn fetch_snapshot(&self, account_id: &str) -> Result<FinancialSnapshot> {
        let accounts = self.accounts.read().await;

        let records = accounts.get(account_id).cloned().ok_or_else(|| {
            OrchestrationError::DataAccess(format!("no records for account '{}'", account_id))
        })?;

        Ok(FinancialSnapshot::from_records(records))
    }
}

/// Small but realistic household used by the demo binary.
pub fn demo_records() -> SnapshotRecords {
    use crate::models::{FixedCostRecord, IncomeRecord, ValueRecord};

    let item = |name: &str, category: &str, value: f64| ValueRecord {
        name: name.to_string(),
        category: category.to_string(),
        value: Some(value),
    };

    SnapshotRecords {
        fixed_costs: vec![
            FixedCostRecord {
                name: "Rent".into(),
                category: "housing".into(),
                amount: Some(1450.0),
            },
            FixedCostRecord {
                name: "Car insurance".into(),
                category: "transport".into(),
                amount: Some(120.0),
            },
        ],
        incomes: vec![IncomeRecord {
            source: "Salary".into(),
            monthly_amount: Some(4200.0),
        }],
        assets: vec![
            item("Checking", "cash", 2300.0),
            item("Emergency fund", "cash", 4000.0),
        ],
        liabilities: vec![item("Credit card", "revolving", 5000.0)],
        spending: vec![
            item("Groceries", "food", 520.0),
            item("Dining out", "food", 310.0),
        ],
    }
}
