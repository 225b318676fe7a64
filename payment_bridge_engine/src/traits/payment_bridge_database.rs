use thiserror::Error;

use crate::traits::{
    bills::{BillApiError, BillManagement},
    merchants::{MerchantApiError, MerchantManagement},
    orders::{OrderApiError, OrderManagement},
    refunds::{RefundApiError, RefundManagement},
};

#[derive(Debug, Clone, Error)]
pub enum PaymentBridgeError {
    #[error("Internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("Order storage error: {0}")]
    Order(#[from] OrderApiError),
    #[error("Refund storage error: {0}")]
    Refund(#[from] RefundApiError),
    #[error("Merchant storage error: {0}")]
    Merchant(#[from] MerchantApiError),
    #[error("Bill storage error: {0}")]
    Bill(#[from] BillApiError),
}

impl From<sqlx::Error> for PaymentBridgeError {
    fn from(e: sqlx::Error) -> Self {
        PaymentBridgeError::DatabaseError(e.to_string())
    }
}

/// The highest level of behaviour a database backend must expose to act as the store for the
/// payment bridge. It is the sum of the per-concern management traits plus connection lifecycle.
#[allow(async_fn_in_trait)]
pub trait PaymentBridgeDatabase: OrderManagement + RefundManagement + MerchantManagement + BillManagement {
    /// The URL for the database.
    fn url(&self) -> &str;

    /// Close the connection to the database.
    async fn close(&mut self) -> Result<(), PaymentBridgeError>;
}
