use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{NewPaymentOrder, PaymentConfirmation, PaymentOrder, TradeNo},
    events::{EventProducers, PaymentSucceededEvent},
    order_objects::OrderQueryFilter,
    pbe_api::errors::PaymentFlowError,
    traits::OrderManagement,
};

/// `OrderFlowApi` is the primary API for handling the payment order lifecycle in response to
/// merchant requests and gateway events: creation, callback ingestion, the idempotent success
/// transition, reconciliation refreshes, and order close.
pub struct OrderFlowApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }
}

impl<B> OrderFlowApi<B>
where B: OrderManagement
{
    /// Submit a new order to the engine.
    ///
    /// The order is persisted with INIT status before any gateway call is made, so a gateway
    /// failure can never lose a record of the attempt. The result carries `true` when a row was
    /// actually created; re-submitting an identical order returns the stored row with `false`.
    pub async fn process_new_order(&self, order: NewPaymentOrder) -> Result<(PaymentOrder, bool), PaymentFlowError> {
        let trade_no = order.trade_no.clone();
        let (order, created) = self.db.insert_order(order).await?;
        debug!("🔄️📦️ Order [{trade_no}] processing complete. created = {created}");
        Ok((order, created))
    }

    pub async fn fetch_order(&self, trade_no: &TradeNo) -> Result<Option<PaymentOrder>, PaymentFlowError> {
        let order = self.db.fetch_order_by_trade_no(trade_no).await?;
        Ok(order)
    }

    pub async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<PaymentOrder>, PaymentFlowError> {
        let orders = self.db.search_orders(query).await?;
        Ok(orders)
    }

    /// The audit step of callback ingestion: persist the raw body and arrival time against the
    /// order before the signature has been checked.
    pub async fn record_callback(
        &self,
        trade_no: &TradeNo,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<PaymentOrder, PaymentFlowError> {
        let order = self.db.record_payment_callback(trade_no, payload, received_at).await?;
        Ok(order)
    }

    /// Stores the prepay handle the gateway returned for the order.
    pub async fn store_prepay_handle(
        &self,
        trade_no: &TradeNo,
        prepay_id: &str,
        prepay_expire: Option<DateTime<Utc>>,
    ) -> Result<PaymentOrder, PaymentFlowError> {
        let order = self.db.update_prepay_handle(trade_no, prepay_id, prepay_expire).await?;
        Ok(order)
    }

    /// Attaches raw gateway request/response payloads to the order for diagnostics.
    pub async fn record_gateway_exchange(
        &self,
        trade_no: &TradeNo,
        request: Option<&str>,
        response: Option<&str>,
    ) -> Result<PaymentOrder, PaymentFlowError> {
        let order = self.db.record_order_exchange(trade_no, request, response).await?;
        Ok(order)
    }

    /// Confirms payment for an order. This is the *only* path to SUCCESS, shared by live
    /// callbacks and the reconciliation sweep.
    ///
    /// The transition is guarded: if the order has already left INIT the call is a no-op and
    /// returns `Ok(None)`. The [`PaymentSucceededEvent`] fires exactly once, on the call that
    /// actually performed the transition.
    pub async fn confirm_payment(
        &self,
        trade_no: &TradeNo,
        confirmation: PaymentConfirmation,
    ) -> Result<Option<PaymentOrder>, PaymentFlowError> {
        trace!("🔄️✅️ Order [{trade_no}] is being marked as paid");
        let transitioned = self.db.mark_order_paid(trade_no, &confirmation).await?;
        match &transitioned {
            Some(order) => {
                self.call_payment_succeeded_hook(order, &confirmation).await;
                info!(
                    "🔄️✅️ Order [{}] is paid. Gateway transaction: {}",
                    order.trade_no,
                    order.transaction_id.as_deref().unwrap_or("<none>")
                );
            },
            None => {
                debug!("🔄️✅️ Order [{trade_no}] had already left INIT. Redelivery absorbed");
            },
        }
        Ok(transitioned)
    }

    async fn call_payment_succeeded_hook(&self, order: &PaymentOrder, confirmation: &PaymentConfirmation) {
        for emitter in &self.producers.payment_succeeded_producer {
            debug!("🔄️📦️ Notifying payment succeeded hook subscribers");
            let event = PaymentSucceededEvent::new(order.clone(), confirmation.clone());
            emitter.publish_event(event).await;
        }
    }

    /// Maps a gateway status-query result onto the order without changing its status. Used by
    /// the reconciliation sweep for non-success trade states, so an expired order keeps its INIT
    /// status alongside the latest gateway view.
    pub async fn refresh_trade_state(
        &self,
        trade_no: &TradeNo,
        trade_state: &str,
        transaction_id: Option<&str>,
    ) -> Result<PaymentOrder, PaymentFlowError> {
        let order = self.db.update_trade_state(trade_no, trade_state, transaction_id).await?;
        Ok(order)
    }

    /// Pushes the order expiry later. A `new_expiry` earlier than the stored value is ignored:
    /// expiry never decreases.
    pub async fn extend_expiry(
        &self,
        trade_no: &TradeNo,
        new_expiry: DateTime<Utc>,
    ) -> Result<PaymentOrder, PaymentFlowError> {
        let order = self.db.extend_order_expiry(trade_no, new_expiry).await?;
        Ok(order)
    }

    /// The INIT orders whose payable window has passed, i.e. the reconciliation sweep's worklist.
    pub async fn expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>, PaymentFlowError> {
        let orders = self.db.fetch_expired_orders(now).await?;
        Ok(orders)
    }

    /// Closes an order by removing the local row. The caller follows up with a best-effort
    /// gateway close; a gateway failure there does not resurrect the row.
    pub async fn close_order(&self, trade_no: &TradeNo) -> Result<PaymentOrder, PaymentFlowError> {
        let order = self
            .db
            .delete_order(trade_no)
            .await?
            .ok_or_else(|| PaymentFlowError::OrderNotFound(trade_no.clone()))?;
        info!("🔄️🗑️ Order [{}] closed and removed locally", order.trade_no);
        Ok(order)
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}
