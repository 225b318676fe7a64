use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{refund_status, NewRefundOrder, RefundGoodsItem, RefundNo, RefundOrder, TradeNo},
    events::{EventProducers, RefundSucceededEvent},
    pbe_api::errors::PaymentFlowError,
    traits::{OrderManagement, RefundManagement, RefundUpdate},
};

/// `RefundFlowApi` handles the refund lifecycle: raising a refund against a paid order, ingesting
/// refund callbacks, folding gateway status results onto the stored row, and detecting the
/// settlement transition.
pub struct RefundFlowApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for RefundFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefundFlowApi")
    }
}

impl<B> RefundFlowApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }
}

impl<B> RefundFlowApi<B>
where B: RefundManagement + OrderManagement
{
    /// Raises a refund against an existing order.
    ///
    /// The refund amount may not exceed the original order total, and the referenced order must
    /// exist locally. The refund is persisted with `PROCESSING` status before any gateway call,
    /// linked to the payment order it refunds. Returns the stored row and `true` when a row was
    /// actually created; re-submitting the same refund number returns the stored row with `false`.
    pub async fn process_new_refund(&self, mut refund: NewRefundOrder) -> Result<(RefundOrder, bool), PaymentFlowError> {
        if refund.amount > refund.total {
            return Err(PaymentFlowError::RefundExceedsTotal { amount: refund.amount, total: refund.total });
        }
        let order = self
            .db
            .fetch_order_by_trade_no(&refund.trade_no)
            .await?
            .ok_or_else(|| PaymentFlowError::OrderNotFound(refund.trade_no.clone()))?;
        refund.payment_order_id = Some(order.id);
        let refund_no = refund.refund_no.clone();
        let (refund, created) = self.db.insert_refund(refund).await?;
        debug!("🔄️💸️ Refund [{refund_no}] against order [{}] processed. created = {created}", order.trade_no);
        Ok((refund, created))
    }

    pub async fn fetch_refund(&self, refund_no: &RefundNo) -> Result<Option<RefundOrder>, PaymentFlowError> {
        let refund = self.db.fetch_refund_by_refund_no(refund_no).await?;
        Ok(refund)
    }

    pub async fn refunds_for_trade(&self, trade_no: &TradeNo) -> Result<Vec<RefundOrder>, PaymentFlowError> {
        let refunds = self.db.fetch_refunds_for_trade(trade_no).await?;
        Ok(refunds)
    }

    pub async fn goods_for_refund(&self, refund_order_id: i64) -> Result<Vec<RefundGoodsItem>, PaymentFlowError> {
        let goods = self.db.fetch_goods_for_refund(refund_order_id).await?;
        Ok(goods)
    }

    /// The refunds the reconciliation sweep still needs to poll.
    pub async fn processing_refunds(&self) -> Result<Vec<RefundOrder>, PaymentFlowError> {
        let refunds = self.db.fetch_processing_refunds().await?;
        Ok(refunds)
    }

    /// Attaches the raw gateway response payload to the refund for diagnostics.
    pub async fn record_gateway_response(
        &self,
        refund_no: &RefundNo,
        payload: &str,
    ) -> Result<RefundOrder, PaymentFlowError> {
        let refund = self.db.record_refund_response(refund_no, payload).await?;
        Ok(refund)
    }

    /// The audit step of refund callback ingestion: persist the raw body and arrival time before
    /// the signature has been checked.
    pub async fn record_callback(
        &self,
        refund_no: &RefundNo,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<RefundOrder, PaymentFlowError> {
        let refund = self.db.record_refund_callback(refund_no, payload, received_at).await?;
        Ok(refund)
    }

    /// Folds the gateway's view of the refund onto the stored row. This is the shared endpoint of
    /// refund callbacks and the reconciliation sweep, so both paths converge on the same state.
    ///
    /// The [`RefundSucceededEvent`] fires exactly once, on the call that moved the refund status
    /// to `SUCCESS`. Callers serialize updates per refund (the callback lock, or the single sweep
    /// worker), so the before/after comparison here is race-free in practice.
    pub async fn apply_update(&self, refund_no: &RefundNo, update: RefundUpdate) -> Result<RefundOrder, PaymentFlowError> {
        let current = self
            .db
            .fetch_refund_by_refund_no(refund_no)
            .await?
            .ok_or_else(|| PaymentFlowError::RefundNotFound(refund_no.clone()))?;
        let was_successful = current.status == refund_status::SUCCESS;
        let refund = self.db.apply_refund_update(refund_no, update).await?;
        if !was_successful && refund.status == refund_status::SUCCESS {
            self.call_refund_succeeded_hook(&refund).await;
            info!(
                "🔄️💸️ Refund [{}] for order [{}] has settled. {} of {} refunded",
                refund.refund_no, refund.trade_no, refund.amount, refund.total
            );
        } else {
            debug!("🔄️💸️ Refund [{}] updated. status = {}", refund.refund_no, refund.status);
        }
        Ok(refund)
    }

    async fn call_refund_succeeded_hook(&self, refund: &RefundOrder) {
        for emitter in &self.producers.refund_succeeded_producer {
            debug!("🔄️💸️ Notifying refund succeeded hook subscribers");
            let event = RefundSucceededEvent::new(refund.clone());
            emitter.publish_event(event).await;
        }
    }

    /// Forces the refund to `CLOSED`, taking it out of the polling population. Used when the
    /// gateway reports no record of the refund.
    pub async fn close_refund(&self, refund_no: &RefundNo) -> Result<RefundOrder, PaymentFlowError> {
        let refund = self.db.close_refund(refund_no).await?;
        info!("🔄️💸️ Refund [{}] closed without settling", refund.refund_no);
        Ok(refund)
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}
