use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{NewPaymentOrder, PaymentConfirmation, PaymentOrder, TradeNo},
    order_objects::OrderQueryFilter,
};

#[derive(Debug, Clone, Error)]
pub enum OrderApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Cannot insert order, since it already exists with trade number {0}")]
    OrderAlreadyExists(TradeNo),
    #[error("Order with trade number {0} does not exist")]
    OrderNotFound(TradeNo),
    #[error("User error constructing query: {0}")]
    QueryError(String),
}

impl From<sqlx::Error> for OrderApiError {
    fn from(e: sqlx::Error) -> Self {
        OrderApiError::DatabaseError(e.to_string())
    }
}

/// The `OrderManagement` trait defines the persistence contract for payment orders.
///
/// Backends own the unit of work: every method acquires its own connection or transaction and
/// commits before returning. State transitions are expressed as guarded updates so that delivery
/// races (a live callback vs. a reconciliation poll) converge without explicit locking.
#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    /// Inserts a brand-new order, returning the stored row and `true`. If an order with the same
    /// trade number already exists and carries the same details, the existing row is returned
    /// with `false`. An existing order with *different* details is an error.
    async fn insert_order(&self, order: NewPaymentOrder) -> Result<(PaymentOrder, bool), OrderApiError>;

    /// Fetches the order with the given trade number, if any.
    async fn fetch_order_by_trade_no(&self, trade_no: &TradeNo) -> Result<Option<PaymentOrder>, OrderApiError>;

    async fn fetch_order_by_id(&self, id: i64) -> Result<Option<PaymentOrder>, OrderApiError>;

    /// Returns all orders matching the filter, ordered by creation time.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<PaymentOrder>, OrderApiError>;

    /// Returns INIT orders whose expiry time has passed. These are the candidates for the
    /// reconciliation sweep.
    async fn fetch_expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>, OrderApiError>;

    /// Stores the prepay handle returned by the gateway, along with its own expiry time.
    async fn update_prepay_handle(
        &self,
        trade_no: &TradeNo,
        prepay_id: &str,
        prepay_expire: Option<DateTime<Utc>>,
    ) -> Result<PaymentOrder, OrderApiError>;

    /// Attaches raw request and/or response payloads to the order for diagnostics. `None` leaves
    /// the stored value untouched.
    async fn record_order_exchange(
        &self,
        trade_no: &TradeNo,
        request: Option<&str>,
        response: Option<&str>,
    ) -> Result<PaymentOrder, OrderApiError>;

    /// Records the raw callback body and its arrival time against the order. This write happens
    /// before signature verification, so rejected callbacks still leave an audit trail.
    async fn record_payment_callback(
        &self,
        trade_no: &TradeNo,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<PaymentOrder, OrderApiError>;

    /// The INIT → SUCCESS transition. Returns the updated order, or `Ok(None)` when the order was
    /// already out of INIT — the caller treats that as a successfully-absorbed redelivery.
    ///
    /// A gateway transaction id, once stored, is never replaced.
    async fn mark_order_paid(
        &self,
        trade_no: &TradeNo,
        confirmation: &PaymentConfirmation,
    ) -> Result<Option<PaymentOrder>, OrderApiError>;

    /// Refreshes the raw gateway trade state (and transaction id, if newly learned) without
    /// touching the order status.
    async fn update_trade_state(
        &self,
        trade_no: &TradeNo,
        trade_state: &str,
        transaction_id: Option<&str>,
    ) -> Result<PaymentOrder, OrderApiError>;

    /// Moves the order expiry to `new_expiry` if, and only if, that is later than the stored
    /// value. Expiry never decreases.
    async fn extend_order_expiry(
        &self,
        trade_no: &TradeNo,
        new_expiry: DateTime<Utc>,
    ) -> Result<PaymentOrder, OrderApiError>;

    /// Removes the order, returning the deleted row if it existed.
    async fn delete_order(&self, trade_no: &TradeNo) -> Result<Option<PaymentOrder>, OrderApiError>;
}
