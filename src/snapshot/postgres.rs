//! Postgres-backed snapshot provider
//!
//! Reads the itemized tables for an account and lets
//! [`FinancialSnapshot::from_records`] derive the totals.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Decode, Row, Type};
use tracing::{debug, info};

use super::SnapshotProvider;
use crate::error::OrchestrationError;
use crate::models::{FinancialSnapshot, FixedCostRecord, IncomeRecord, SnapshotRecords, ValueRecord};
use crate::Result;

pub struct PgSnapshotProvider {
    pool: PgPool,
}

impl PgSnapshotProvider {
    /// Lazily connecting pool; the first query opens the connection.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                OrchestrationError::DataAccess(format!(
                    "Failed to initialize postgres pool: {}",
                    e
                ))
            })?;

        info!("Snapshot provider backend: postgres");
        Ok(Self { pool })
    }

    async fn fetch_rows(&self, sql: &str, account_id: &str, what: &str) -> Result<Vec<PgRow>> {
        sqlx::query(sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::DataAccess(format!("Failed to load {}: {}", what, e))
            })
    }

    async fn fetch_values(&self, table: &str, account_id: &str) -> Result<Vec<ValueRecord>> {
        let sql = format!(
            "SELECT name, category, value::float8 AS value FROM {} WHERE account_id = $1 ORDER BY id",
            table
        );

        let rows = self.fetch_rows(&sql, account_id, table).await?;

        rows.iter()
            .map(|row| -> Result<ValueRecord> {
                Ok(ValueRecord {
                    name: column(row, table, "name")?,
                    category: column(row, table, "category")?,
                    value: column::<Option<f64>>(row, table, "value")?,
                })
            })
            .collect()
    }
}

/// Decode one column. A NULL amount is `None`; a column that does not
/// decode is a data access failure, never a silent zero.
fn column<'r, T>(row: &'r PgRow, table: &str, name: &str) -> Result<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name).map_err(|e| decode_error(table, name, e))
}

fn decode_error(table: &str, name: &str, e: sqlx::Error) -> OrchestrationError {
    OrchestrationError::DataAccess(format!("Failed to decode {}.{}: {}", table, name, e))
}

#[async_trait]
impl SnapshotProvider for PgSnapshotProvider {
    async fn fetch_snapshot(&self, account_id: &str) -> Result<FinancialSnapshot> {
        let fixed_rows = self
            .fetch_rows(
                "SELECT name, category, amount::float8 AS amount FROM fixed_costs WHERE account_id = $1 ORDER BY id",
                account_id,
                "fixed_costs",
            )
            .await?;

        let income_rows = self
            .fetch_rows(
                "SELECT source, monthly_amount::float8 AS monthly_amount FROM incomes WHERE account_id = $1 ORDER BY id",
                account_id,
                "incomes",
            )
            .await?;

        let fixed_costs = fixed_rows
            .iter()
            .map(|row| -> Result<FixedCostRecord> {
                Ok(FixedCostRecord {
                    name: column(row, "fixed_costs", "name")?,
                    category: column(row, "fixed_costs", "category")?,
                    amount: column::<Option<f64>>(row, "fixed_costs", "amount")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let incomes = income_rows
            .iter()
            .map(|row| -> Result<IncomeRecord> {
                Ok(IncomeRecord {
                    source: column(row, "incomes", "source")?,
                    monthly_amount: column::<Option<f64>>(row, "incomes", "monthly_amount")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let records = SnapshotRecords {
            fixed_costs,
            incomes,
            assets: self.fetch_values("assets", account_id).await?,
            liabilities: self.fetch_values("liabilities", account_id).await?,
            spending: self.fetch_values("spending", account_id).await?,
        };

        let snapshot = FinancialSnapshot::from_records(records);

        debug!(
            account_id = %account_id,
            items = snapshot.item_count(),
            "Snapshot loaded from postgres"
        );

        Ok(snapshot)
    }
}
