use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{refund_status, NewRefundGoodsItem, NewRefundOrder, RefundGoodsItem, RefundNo, RefundOrder, TradeNo},
    traits::{RefundApiError, RefundUpdate},
};

/// Inserts the refund order and its goods details, returning `false` in the second parameter if
/// the refund number already exists. Not atomic on its own; run it inside a transaction.
pub async fn idempotent_insert(
    refund: NewRefundOrder,
    conn: &mut SqliteConnection,
) -> Result<(RefundOrder, bool), RefundApiError> {
    let inserted = match fetch_refund_by_refund_no(&refund.refund_no, conn).await? {
        Some(existing) => (existing, false),
        None => {
            let goods = refund.goods.clone();
            let row = insert_refund(refund, conn).await?;
            for item in goods {
                insert_goods_item(row.id, item, conn).await?;
            }
            debug!("📝️ Refund order [{}] inserted with id {}", row.refund_no, row.id);
            (row, true)
        },
    };
    Ok(inserted)
}

async fn insert_refund(refund: NewRefundOrder, conn: &mut SqliteConnection) -> Result<RefundOrder, RefundApiError> {
    let refund = sqlx::query_as(
        r#"
            INSERT INTO refund_orders (
                refund_no,
                payment_order_id,
                trade_no,
                merchant_id,
                amount,
                total,
                currency,
                reason,
                notify_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(refund.refund_no)
    .bind(refund.payment_order_id)
    .bind(refund.trade_no)
    .bind(refund.merchant_id)
    .bind(refund.amount)
    .bind(refund.total)
    .bind(refund.currency)
    .bind(refund.reason)
    .bind(refund.notify_url)
    .fetch_one(conn)
    .await?;
    Ok(refund)
}

async fn insert_goods_item(
    refund_order_id: i64,
    item: NewRefundGoodsItem,
    conn: &mut SqliteConnection,
) -> Result<RefundGoodsItem, RefundApiError> {
    let item = sqlx::query_as(
        r#"
            INSERT INTO refund_goods_items (refund_order_id, goods_id, goods_name, unit_price, refund_amount, quantity)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(refund_order_id)
    .bind(item.goods_id)
    .bind(item.goods_name)
    .bind(item.unit_price)
    .bind(item.refund_amount)
    .bind(item.quantity)
    .fetch_one(conn)
    .await?;
    Ok(item)
}

pub async fn fetch_refund_by_refund_no(
    refund_no: &RefundNo,
    conn: &mut SqliteConnection,
) -> Result<Option<RefundOrder>, sqlx::Error> {
    let refund = sqlx::query_as("SELECT * FROM refund_orders WHERE refund_no = $1")
        .bind(refund_no.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(refund)
}

pub async fn fetch_refunds_for_trade(
    trade_no: &TradeNo,
    conn: &mut SqliteConnection,
) -> Result<Vec<RefundOrder>, sqlx::Error> {
    let refunds = sqlx::query_as("SELECT * FROM refund_orders WHERE trade_no = $1 ORDER BY created_at ASC")
        .bind(trade_no.as_str())
        .fetch_all(conn)
        .await?;
    Ok(refunds)
}

pub async fn fetch_goods_for_refund(
    refund_order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<RefundGoodsItem>, sqlx::Error> {
    let goods = sqlx::query_as("SELECT * FROM refund_goods_items WHERE refund_order_id = $1 ORDER BY id ASC")
        .bind(refund_order_id)
        .fetch_all(conn)
        .await?;
    Ok(goods)
}

/// The polling population: refunds the gateway has not given a final answer for yet.
pub async fn fetch_processing_refunds(conn: &mut SqliteConnection) -> Result<Vec<RefundOrder>, sqlx::Error> {
    let refunds = sqlx::query_as("SELECT * FROM refund_orders WHERE status = $1 ORDER BY created_at ASC")
        .bind(refund_status::PROCESSING)
        .fetch_all(conn)
        .await?;
    Ok(refunds)
}

pub async fn record_refund_response(
    refund_no: &RefundNo,
    payload: &str,
    conn: &mut SqliteConnection,
) -> Result<RefundOrder, RefundApiError> {
    sqlx::query_as(
        "UPDATE refund_orders SET response_payload = $1, updated_at = CURRENT_TIMESTAMP WHERE refund_no = $2 \
         RETURNING *",
    )
    .bind(payload)
    .bind(refund_no.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| RefundApiError::RefundNotFound(refund_no.clone()))
}

/// The audit write for an incoming refund callback, made before signature verification.
pub async fn record_refund_callback(
    refund_no: &RefundNo,
    payload: &str,
    received_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<RefundOrder, RefundApiError> {
    sqlx::query_as(
        "UPDATE refund_orders SET callback_payload = $1, callback_at = $2, updated_at = CURRENT_TIMESTAMP WHERE \
         refund_no = $3 RETURNING *",
    )
    .bind(payload)
    .bind(received_at)
    .bind(refund_no.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| RefundApiError::RefundNotFound(refund_no.clone()))
}

/// Maps the gateway's view of the refund onto the stored row. `refund_id` is write-once; the
/// other fields only change when the update actually carries them.
pub async fn apply_refund_update(
    refund_no: &RefundNo,
    update: RefundUpdate,
    conn: &mut SqliteConnection,
) -> Result<RefundOrder, RefundApiError> {
    sqlx::query_as(
        r#"
            UPDATE refund_orders SET
                refund_id = COALESCE(refund_id, $1),
                channel = COALESCE($2, channel),
                user_received_account = COALESCE($3, user_received_account),
                success_time = COALESCE($4, success_time),
                status = COALESCE($5, status),
                updated_at = CURRENT_TIMESTAMP
            WHERE refund_no = $6
            RETURNING *;
        "#,
    )
    .bind(update.refund_id)
    .bind(update.channel)
    .bind(update.user_received_account)
    .bind(update.success_time)
    .bind(update.status)
    .bind(refund_no.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| RefundApiError::RefundNotFound(refund_no.clone()))
}

/// Terminal shutdown for refunds the gateway cannot account for. Closed refunds leave the polling
/// population for good.
pub async fn close_refund(refund_no: &RefundNo, conn: &mut SqliteConnection) -> Result<RefundOrder, RefundApiError> {
    sqlx::query_as("UPDATE refund_orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE refund_no = $2 RETURNING *")
        .bind(refund_status::CLOSED)
        .bind(refund_no.as_str())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| RefundApiError::RefundNotFound(refund_no.clone()))
}
