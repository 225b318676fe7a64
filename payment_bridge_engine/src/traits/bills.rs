use chrono::NaiveDate;
use thiserror::Error;

use crate::db_types::{BillCategory, BillRecord, NewBillRecord};

#[derive(Debug, Clone, Error)]
pub enum BillApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("A bill for merchant #{merchant_id} on {bill_date} with category {category} already exists")]
    BillAlreadyExists { merchant_id: i64, bill_date: NaiveDate, category: BillCategory },
}

impl From<sqlx::Error> for BillApiError {
    fn from(e: sqlx::Error) -> Self {
        BillApiError::DatabaseError(e.to_string())
    }
}

/// The `BillManagement` trait defines the persistence contract for downloaded settlement bills.
///
/// The `(merchant, bill date, category)` triple is unique. The bill sweep checks existence before
/// doing any network work, so a stored record is also the marker that the download happened.
#[allow(async_fn_in_trait)]
pub trait BillManagement {
    /// Whether a bill record already exists for the triple.
    async fn bill_exists(
        &self,
        merchant_id: i64,
        bill_date: NaiveDate,
        category: BillCategory,
    ) -> Result<bool, BillApiError>;

    /// Inserts the record for a freshly-downloaded bill. Inserting a duplicate triple is an
    /// error, not an upsert: bill content is immutable once stored.
    async fn insert_bill(&self, bill: NewBillRecord) -> Result<BillRecord, BillApiError>;

    async fn fetch_bills_for_merchant(&self, merchant_id: i64) -> Result<Vec<BillRecord>, BillApiError>;
}
