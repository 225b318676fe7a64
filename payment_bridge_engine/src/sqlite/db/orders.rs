use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewPaymentOrder, PaymentConfirmation, PaymentOrder, TradeNo},
    order_objects::OrderQueryFilter,
    traits::OrderApiError,
};

/// Inserts the order into the database, returning `false` in the second parameter if the order
/// already exists. Re-submitting an existing trade number with different details is an error.
pub async fn idempotent_insert(
    order: NewPaymentOrder,
    conn: &mut SqliteConnection,
) -> Result<(PaymentOrder, bool), OrderApiError> {
    let inserted = match fetch_order_by_trade_no(&order.trade_no, conn).await? {
        Some(existing) if order.is_equivalent(&existing) => (existing, false),
        Some(_) => return Err(OrderApiError::OrderAlreadyExists(order.trade_no)),
        None => {
            let order = insert_order(order, conn).await?;
            debug!("📝️ Payment order [{}] inserted with id {}", order.trade_no, order.id);
            (order, true)
        },
    };
    Ok(inserted)
}

/// Inserts a new payment order using the given connection. This is not atomic. You can embed this
/// call inside a transaction if you need to ensure atomicity, and pass `&mut *tx` as the
/// connection argument.
async fn insert_order(order: NewPaymentOrder, conn: &mut SqliteConnection) -> Result<PaymentOrder, OrderApiError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO payment_orders (
                trade_no,
                merchant_id,
                trade_type,
                amount,
                currency,
                description,
                openid,
                attach,
                notify_url,
                client_ip,
                time_start,
                time_expire
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *;
        "#,
    )
    .bind(order.trade_no)
    .bind(order.merchant_id)
    .bind(order.trade_type)
    .bind(order.amount)
    .bind(order.currency)
    .bind(order.description)
    .bind(order.openid)
    .bind(order.attach)
    .bind(order.notify_url)
    .bind(order.client_ip)
    .bind(order.time_start)
    .bind(order.time_expire)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_trade_no(
    trade_no: &TradeNo,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentOrder>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM payment_orders WHERE trade_no = $1")
        .bind(trade_no.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_order_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<PaymentOrder>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM payment_orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn search_orders(
    query: OrderQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentOrder>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT * FROM payment_orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(trade_no) = query.trade_no {
        where_clause.push("trade_no = ");
        where_clause.push_bind_unseparated(trade_no.to_string());
    }
    if let Some(transaction_id) = query.transaction_id {
        where_clause.push("transaction_id = ");
        where_clause.push_bind_unseparated(transaction_id);
    }
    if let Some(merchant_id) = query.merchant_id {
        where_clause.push("merchant_id = ");
        where_clause.push_bind_unseparated(merchant_id);
    }
    if let Some(openid) = query.openid {
        where_clause.push("openid = ");
        where_clause.push_bind_unseparated(openid);
    }
    if let Some(currency) = query.currency {
        where_clause.push("currency = ");
        where_clause.push_bind_unseparated(currency);
    }
    if let Some(trade_type) = query.trade_type {
        where_clause.push(format!("trade_type = '{trade_type}'"));
    }
    if query.status.as_ref().map(|s| !s.is_empty()).unwrap_or(false) {
        let mut statuses = vec![];
        query.status.as_ref().unwrap().iter().for_each(|s| {
            statuses.push(format!("'{s}'"));
        });
        let status_clause = statuses.join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    if let Some(since) = query.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    builder.push(" ORDER BY created_at ASC");

    trace!("📝️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<PaymentOrder>();
    let orders = query.fetch_all(conn).await?;
    trace!("Result of search_orders: {:?}", orders.len());
    Ok(orders)
}

/// Returns the INIT orders whose expiry has passed. These stay INIT; the reconciliation sweep
/// decides what happens to them after asking the gateway.
pub async fn fetch_expired_orders(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentOrder>, sqlx::Error> {
    let orders = sqlx::query_as(
        "SELECT * FROM payment_orders WHERE status = 'INIT' AND unixepoch(time_expire) < unixepoch($1) ORDER BY \
         time_expire ASC",
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub async fn update_prepay_handle(
    trade_no: &TradeNo,
    prepay_id: &str,
    prepay_expire: Option<DateTime<Utc>>,
    conn: &mut SqliteConnection,
) -> Result<PaymentOrder, OrderApiError> {
    sqlx::query_as(
        "UPDATE payment_orders SET prepay_id = $1, prepay_expire = $2, updated_at = CURRENT_TIMESTAMP WHERE trade_no \
         = $3 RETURNING *",
    )
    .bind(prepay_id)
    .bind(prepay_expire)
    .bind(trade_no.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| OrderApiError::OrderNotFound(trade_no.clone()))
}

pub async fn record_order_exchange(
    trade_no: &TradeNo,
    request: Option<&str>,
    response: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<PaymentOrder, OrderApiError> {
    sqlx::query_as(
        "UPDATE payment_orders SET request_payload = COALESCE($1, request_payload), response_payload = COALESCE($2, \
         response_payload), updated_at = CURRENT_TIMESTAMP WHERE trade_no = $3 RETURNING *",
    )
    .bind(request)
    .bind(response)
    .bind(trade_no.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| OrderApiError::OrderNotFound(trade_no.clone()))
}

/// The audit write for an incoming callback. Runs before signature verification, so a rejected
/// delivery still leaves its raw body on the order.
pub async fn record_payment_callback(
    trade_no: &TradeNo,
    payload: &str,
    received_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentOrder, OrderApiError> {
    sqlx::query_as(
        "UPDATE payment_orders SET callback_payload = $1, callback_at = $2, updated_at = CURRENT_TIMESTAMP WHERE \
         trade_no = $3 RETURNING *",
    )
    .bind(payload)
    .bind(received_at)
    .bind(trade_no.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| OrderApiError::OrderNotFound(trade_no.clone()))
}

/// The guarded INIT → SUCCESS transition. The `status = 'INIT'` predicate makes redeliveries and
/// reconciliation races collapse into a no-op: zero rows updated means the order already left
/// INIT, and `None` is returned.
pub async fn mark_order_paid(
    trade_no: &TradeNo,
    confirmation: &PaymentConfirmation,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentOrder>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE payment_orders SET
                status = 'SUCCESS',
                transaction_id = COALESCE(transaction_id, $1),
                trade_state = COALESCE($2, trade_state),
                openid = COALESCE(openid, $3),
                success_time = COALESCE($4, CURRENT_TIMESTAMP),
                updated_at = CURRENT_TIMESTAMP
            WHERE trade_no = $5 AND status = 'INIT'
            RETURNING *;
        "#,
    )
    .bind(confirmation.transaction_id.as_deref())
    .bind(confirmation.trade_state.as_deref())
    .bind(confirmation.openid.as_deref())
    .bind(confirmation.success_time)
    .bind(trade_no.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Refreshes the raw gateway trade state without touching the order status. The transaction id is
/// write-once.
pub async fn update_trade_state(
    trade_no: &TradeNo,
    trade_state: &str,
    transaction_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<PaymentOrder, OrderApiError> {
    sqlx::query_as(
        "UPDATE payment_orders SET trade_state = $1, transaction_id = COALESCE(transaction_id, $2), updated_at = \
         CURRENT_TIMESTAMP WHERE trade_no = $3 RETURNING *",
    )
    .bind(trade_state)
    .bind(transaction_id)
    .bind(trade_no.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| OrderApiError::OrderNotFound(trade_no.clone()))
}

/// Expiry is monotone: the stored value only ever moves later.
pub async fn extend_order_expiry(
    trade_no: &TradeNo,
    new_expiry: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentOrder, OrderApiError> {
    sqlx::query_as(
        "UPDATE payment_orders SET time_expire = CASE WHEN unixepoch($1) > unixepoch(time_expire) THEN $1 ELSE \
         time_expire END, updated_at = CURRENT_TIMESTAMP WHERE trade_no = $2 RETURNING *",
    )
    .bind(new_expiry)
    .bind(trade_no.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| OrderApiError::OrderNotFound(trade_no.clone()))
}

pub async fn delete_order(
    trade_no: &TradeNo,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentOrder>, sqlx::Error> {
    let order = sqlx::query_as("DELETE FROM payment_orders WHERE trade_no = $1 RETURNING *")
        .bind(trade_no.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(order)
}
