use thiserror::Error;

use crate::db_types::{Merchant, NewMerchant};

#[derive(Debug, Clone, Error)]
pub enum MerchantApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Merchant {0} is not configured")]
    MerchantNotFound(String),
}

impl From<sqlx::Error> for MerchantApiError {
    fn from(e: sqlx::Error) -> Self {
        MerchantApiError::DatabaseError(e.to_string())
    }
}

/// The `MerchantManagement` trait defines the persistence contract for gateway merchant accounts.
///
/// Merchant identity (`mch_id`) is immutable; credentials rotate via upsert. The `valid` flag
/// gates participation in scheduled jobs without deleting the row.
#[allow(async_fn_in_trait)]
pub trait MerchantManagement {
    /// Inserts the merchant, or rotates the credentials of an existing merchant with the same
    /// `mch_id`. Returns the stored row.
    async fn upsert_merchant(&self, merchant: NewMerchant) -> Result<Merchant, MerchantApiError>;

    async fn fetch_merchant_by_mch_id(&self, mch_id: &str) -> Result<Option<Merchant>, MerchantApiError>;

    async fn fetch_merchant_by_id(&self, id: i64) -> Result<Option<Merchant>, MerchantApiError>;

    /// The merchant used when a caller does not name one: the most recently configured valid
    /// merchant.
    async fn fetch_default_merchant(&self) -> Result<Option<Merchant>, MerchantApiError>;

    /// All merchants that participate in scheduled jobs.
    async fn fetch_valid_merchants(&self) -> Result<Vec<Merchant>, MerchantApiError>;

    /// Flips the `valid` flag. Returns the updated row, or an error if the merchant is unknown.
    async fn set_merchant_validity(&self, mch_id: &str, valid: bool) -> Result<Merchant, MerchantApiError>;
}
