use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{NewRefundOrder, RefundGoodsItem, RefundNo, RefundOrder, TradeNo},
    traits::RefundUpdate,
};

#[derive(Debug, Clone, Error)]
pub enum RefundApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Cannot insert refund, since it already exists with refund number {0}")]
    RefundAlreadyExists(RefundNo),
    #[error("Refund with refund number {0} does not exist")]
    RefundNotFound(RefundNo),
}

impl From<sqlx::Error> for RefundApiError {
    fn from(e: sqlx::Error) -> Self {
        RefundApiError::DatabaseError(e.to_string())
    }
}

/// The `RefundManagement` trait defines the persistence contract for refund orders and their
/// goods detail rows.
///
/// Refund state is a raw gateway string rather than a closed enum; the well-known values live in
/// [`crate::db_types::refund_status`]. A refund leaves the polling population as soon as its
/// status is anything other than `PROCESSING`.
#[allow(async_fn_in_trait)]
pub trait RefundManagement {
    /// Inserts a new refund order (and its goods details) with `PROCESSING` status, returning the
    /// stored row and `true`. Re-submitting the same refund number returns the existing row with
    /// `false`.
    async fn insert_refund(&self, refund: NewRefundOrder) -> Result<(RefundOrder, bool), RefundApiError>;

    async fn fetch_refund_by_refund_no(&self, refund_no: &RefundNo) -> Result<Option<RefundOrder>, RefundApiError>;

    /// All refunds raised against the given trade number.
    async fn fetch_refunds_for_trade(&self, trade_no: &TradeNo) -> Result<Vec<RefundOrder>, RefundApiError>;

    async fn fetch_goods_for_refund(&self, refund_order_id: i64) -> Result<Vec<RefundGoodsItem>, RefundApiError>;

    /// The population the refund reconciliation sweep polls: refunds still in `PROCESSING`.
    async fn fetch_processing_refunds(&self) -> Result<Vec<RefundOrder>, RefundApiError>;

    /// Attaches the raw gateway response payload to the refund for diagnostics.
    async fn record_refund_response(&self, refund_no: &RefundNo, payload: &str)
        -> Result<RefundOrder, RefundApiError>;

    /// Records the raw callback body and its arrival time against the refund. As with payment
    /// callbacks, this write precedes signature verification.
    async fn record_refund_callback(
        &self,
        refund_no: &RefundNo,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<RefundOrder, RefundApiError>;

    /// Applies the gateway's view of the refund onto the stored row. The gateway refund id is
    /// write-once: an update can set it when absent, never replace it.
    async fn apply_refund_update(
        &self,
        refund_no: &RefundNo,
        update: RefundUpdate,
    ) -> Result<RefundOrder, RefundApiError>;

    /// Forces the refund to `CLOSED`. Used when a status query comes back without a gateway
    /// refund id, meaning the gateway has no record worth polling for.
    async fn close_refund(&self, refund_no: &RefundNo) -> Result<RefundOrder, RefundApiError>;
}
