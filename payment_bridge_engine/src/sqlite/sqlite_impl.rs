//! `SqliteDatabase` is a concrete implementation of a payment bridge backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the
//! [`crate::traits`] module.
use std::fmt::Debug;

use chrono::{DateTime, NaiveDate, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{bills, db_url, merchants, new_pool, orders, refunds};
use crate::{
    db_types::{
        BillCategory,
        BillRecord,
        Merchant,
        NewBillRecord,
        NewMerchant,
        NewPaymentOrder,
        NewRefundOrder,
        PaymentConfirmation,
        PaymentOrder,
        RefundGoodsItem,
        RefundNo,
        RefundOrder,
        TradeNo,
    },
    order_objects::OrderQueryFilter,
    traits::{
        BillApiError,
        BillManagement,
        MerchantApiError,
        MerchantManagement,
        OrderApiError,
        OrderManagement,
        PaymentBridgeDatabase,
        PaymentBridgeError,
        RefundApiError,
        RefundManagement,
        RefundUpdate,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl PaymentBridgeDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), PaymentBridgeError> {
        self.pool.close().await;
        Ok(())
    }
}

impl OrderManagement for SqliteDatabase {
    async fn insert_order(&self, order: NewPaymentOrder) -> Result<(PaymentOrder, bool), OrderApiError> {
        let mut tx = self.pool.begin().await?;
        let (order, inserted) = orders::idempotent_insert(order, &mut tx).await?;
        tx.commit().await?;
        if inserted {
            debug!("🗃️ New payment order [{}] committed for merchant #{}", order.trade_no, order.merchant_id);
        } else {
            debug!("🗃️ Payment order [{}] was already present. Returning existing row", order.trade_no);
        }
        Ok((order, inserted))
    }

    async fn fetch_order_by_trade_no(&self, trade_no: &TradeNo) -> Result<Option<PaymentOrder>, OrderApiError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_trade_no(trade_no, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_by_id(&self, id: i64) -> Result<Option<PaymentOrder>, OrderApiError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_id(id, &mut conn).await?;
        Ok(order)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<PaymentOrder>, OrderApiError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::search_orders(query, &mut conn).await?;
        Ok(orders)
    }

    async fn fetch_expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>, OrderApiError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::fetch_expired_orders(now, &mut conn).await?;
        trace!("🗃️ {} INIT orders have passed their expiry time", orders.len());
        Ok(orders)
    }

    async fn update_prepay_handle(
        &self,
        trade_no: &TradeNo,
        prepay_id: &str,
        prepay_expire: Option<DateTime<Utc>>,
    ) -> Result<PaymentOrder, OrderApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::update_prepay_handle(trade_no, prepay_id, prepay_expire, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Prepay handle stored against order [{trade_no}]");
        Ok(order)
    }

    async fn record_order_exchange(
        &self,
        trade_no: &TradeNo,
        request: Option<&str>,
        response: Option<&str>,
    ) -> Result<PaymentOrder, OrderApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::record_order_exchange(trade_no, request, response, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn record_payment_callback(
        &self,
        trade_no: &TradeNo,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<PaymentOrder, OrderApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::record_payment_callback(trade_no, payload, received_at, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Callback snapshot recorded against order [{trade_no}]");
        Ok(order)
    }

    async fn mark_order_paid(
        &self,
        trade_no: &TradeNo,
        confirmation: &PaymentConfirmation,
    ) -> Result<Option<PaymentOrder>, OrderApiError> {
        let mut tx = self.pool.begin().await?;
        if orders::fetch_order_by_trade_no(trade_no, &mut tx).await?.is_none() {
            return Err(OrderApiError::OrderNotFound(trade_no.clone()));
        }
        let order = orders::mark_order_paid(trade_no, confirmation, &mut tx).await?;
        tx.commit().await?;
        match &order {
            Some(o) => info!("🗃️ Order [{}] transitioned to SUCCESS (txn {:?})", o.trade_no, o.transaction_id),
            None => debug!("🗃️ Order [{trade_no}] was already out of INIT. Transition absorbed"),
        }
        Ok(order)
    }

    async fn update_trade_state(
        &self,
        trade_no: &TradeNo,
        trade_state: &str,
        transaction_id: Option<&str>,
    ) -> Result<PaymentOrder, OrderApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::update_trade_state(trade_no, trade_state, transaction_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{trade_no}] trade state refreshed to {trade_state}");
        Ok(order)
    }

    async fn extend_order_expiry(
        &self,
        trade_no: &TradeNo,
        new_expiry: DateTime<Utc>,
    ) -> Result<PaymentOrder, OrderApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::extend_order_expiry(trade_no, new_expiry, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn delete_order(&self, trade_no: &TradeNo) -> Result<Option<PaymentOrder>, OrderApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::delete_order(trade_no, &mut tx).await?;
        tx.commit().await?;
        if order.is_some() {
            info!("🗃️ Order [{trade_no}] deleted");
        }
        Ok(order)
    }
}

impl RefundManagement for SqliteDatabase {
    async fn insert_refund(&self, refund: NewRefundOrder) -> Result<(RefundOrder, bool), RefundApiError> {
        let mut tx = self.pool.begin().await?;
        let (refund, inserted) = refunds::idempotent_insert(refund, &mut tx).await?;
        tx.commit().await?;
        if inserted {
            debug!("🗃️ New refund order [{}] committed against trade [{}]", refund.refund_no, refund.trade_no);
        }
        Ok((refund, inserted))
    }

    async fn fetch_refund_by_refund_no(&self, refund_no: &RefundNo) -> Result<Option<RefundOrder>, RefundApiError> {
        let mut conn = self.pool.acquire().await?;
        let refund = refunds::fetch_refund_by_refund_no(refund_no, &mut conn).await?;
        Ok(refund)
    }

    async fn fetch_refunds_for_trade(&self, trade_no: &TradeNo) -> Result<Vec<RefundOrder>, RefundApiError> {
        let mut conn = self.pool.acquire().await?;
        let refunds = refunds::fetch_refunds_for_trade(trade_no, &mut conn).await?;
        Ok(refunds)
    }

    async fn fetch_goods_for_refund(&self, refund_order_id: i64) -> Result<Vec<RefundGoodsItem>, RefundApiError> {
        let mut conn = self.pool.acquire().await?;
        let goods = refunds::fetch_goods_for_refund(refund_order_id, &mut conn).await?;
        Ok(goods)
    }

    async fn fetch_processing_refunds(&self) -> Result<Vec<RefundOrder>, RefundApiError> {
        let mut conn = self.pool.acquire().await?;
        let refunds = refunds::fetch_processing_refunds(&mut conn).await?;
        trace!("🗃️ {} refunds are still PROCESSING", refunds.len());
        Ok(refunds)
    }

    async fn record_refund_response(
        &self,
        refund_no: &RefundNo,
        payload: &str,
    ) -> Result<RefundOrder, RefundApiError> {
        let mut tx = self.pool.begin().await?;
        let refund = refunds::record_refund_response(refund_no, payload, &mut tx).await?;
        tx.commit().await?;
        Ok(refund)
    }

    async fn record_refund_callback(
        &self,
        refund_no: &RefundNo,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<RefundOrder, RefundApiError> {
        let mut tx = self.pool.begin().await?;
        let refund = refunds::record_refund_callback(refund_no, payload, received_at, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Callback snapshot recorded against refund [{refund_no}]");
        Ok(refund)
    }

    async fn apply_refund_update(
        &self,
        refund_no: &RefundNo,
        update: RefundUpdate,
    ) -> Result<RefundOrder, RefundApiError> {
        let mut tx = self.pool.begin().await?;
        let refund = refunds::apply_refund_update(refund_no, update, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Refund [{}] updated. Status is now {}", refund.refund_no, refund.status);
        Ok(refund)
    }

    async fn close_refund(&self, refund_no: &RefundNo) -> Result<RefundOrder, RefundApiError> {
        let mut tx = self.pool.begin().await?;
        let refund = refunds::close_refund(refund_no, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Refund [{refund_no}] forced to CLOSED");
        Ok(refund)
    }
}

impl MerchantManagement for SqliteDatabase {
    async fn upsert_merchant(&self, merchant: NewMerchant) -> Result<Merchant, MerchantApiError> {
        let mut tx = self.pool.begin().await?;
        let merchant = merchants::upsert_merchant(merchant, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Merchant [{}] configuration stored", merchant.mch_id);
        Ok(merchant)
    }

    async fn fetch_merchant_by_mch_id(&self, mch_id: &str) -> Result<Option<Merchant>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        let merchant = merchants::fetch_merchant_by_mch_id(mch_id, &mut conn).await?;
        Ok(merchant)
    }

    async fn fetch_merchant_by_id(&self, id: i64) -> Result<Option<Merchant>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        let merchant = merchants::fetch_merchant_by_id(id, &mut conn).await?;
        Ok(merchant)
    }

    async fn fetch_default_merchant(&self) -> Result<Option<Merchant>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        let merchant = merchants::fetch_default_merchant(&mut conn).await?;
        Ok(merchant)
    }

    async fn fetch_valid_merchants(&self) -> Result<Vec<Merchant>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        let merchants = merchants::fetch_valid_merchants(&mut conn).await?;
        Ok(merchants)
    }

    async fn set_merchant_validity(&self, mch_id: &str, valid: bool) -> Result<Merchant, MerchantApiError> {
        let mut tx = self.pool.begin().await?;
        let merchant = merchants::set_merchant_validity(mch_id, valid, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Merchant [{}] validity set to {}", merchant.mch_id, merchant.valid);
        Ok(merchant)
    }
}

impl BillManagement for SqliteDatabase {
    async fn bill_exists(
        &self,
        merchant_id: i64,
        bill_date: NaiveDate,
        category: BillCategory,
    ) -> Result<bool, BillApiError> {
        let mut conn = self.pool.acquire().await?;
        let exists = bills::bill_exists(merchant_id, bill_date, category, &mut conn).await?;
        Ok(exists)
    }

    async fn insert_bill(&self, bill: NewBillRecord) -> Result<BillRecord, BillApiError> {
        let mut tx = self.pool.begin().await?;
        let bill = bills::insert_bill(bill, &mut tx).await?;
        tx.commit().await?;
        Ok(bill)
    }

    async fn fetch_bills_for_merchant(&self, merchant_id: i64) -> Result<Vec<BillRecord>, BillApiError> {
        let mut conn = self.pool.acquire().await?;
        let bills = bills::fetch_bills_for_merchant(merchant_id, &mut conn).await?;
        Ok(bills)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
