//! Gateway notification handlers
//!
//! These routes receive the asynchronous payment and refund notifications from the gateway. They
//! always answer HTTP 200: success or failure travels in the body envelope the delivering channel
//! understands, because the gateway's redelivery logic keys off the envelope, not the status code.
//!
//! Every delivery runs the same protocol: take the per-number lock (or ask for a retry), look the
//! record up, absorb redeliveries of settled records, parse, write the audit snapshot before any
//! verification, resolve and check the sending merchant, verify the signature, and only then
//! apply the state transition. The audit write deliberately happens before signature
//! verification, so that a forged or corrupted delivery still leaves a trace to investigate.
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::*;
use payment_bridge_engine::{
    db_types::{Merchant, PaymentConfirmation, PaymentOrderStatus, RefundNo, TradeNo},
    traits::{MerchantManagement, PaymentBridgeDatabase, RefundUpdate},
    MerchantApi,
    OrderFlowApi,
    RefundFlowApi,
};
use wxpay_tools::{
    verify_fields,
    PaymentNotification,
    RefundNotification,
    SignType,
    SignatureError,
    WxPayApiError,
    XmlError,
};

use crate::{
    data_objects::{legacy_ack, NotifyAck},
    integrations::wechat::{map_refund_status, parse_gateway_timestamp},
    locks::NotifyLocks,
    route,
};

/// How a delivery was settled. The channel-specific handlers translate this into the ack
/// envelope the gateway expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The delivery was applied, or absorbed as a redelivery. The gateway should stop retrying.
    Ack,
    /// Another delivery for the same number holds the lock. The gateway should retry later.
    Busy,
    /// The delivery was rejected. The message is safe to echo to the gateway.
    Rejected(String),
}

/// Which wire format the delivery used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyChannel {
    Json,
    LegacyXml,
}

//----------------------------------------   Route handlers  ----------------------------------------------------------

route!(payment_notify => Post "/notify/{trade_no}" impl PaymentBridgeDatabase);
pub async fn payment_notify<B: PaymentBridgeDatabase>(
    path: web::Path<String>,
    body: web::Bytes,
    orders: web::Data<OrderFlowApi<B>>,
    merchants: web::Data<MerchantApi<B>>,
    locks: web::Data<NotifyLocks>,
) -> HttpResponse {
    let trade_no = TradeNo(path.into_inner());
    debug!("📨️ Payment notification for {trade_no} on the JSON channel");
    let outcome = ingest_payment_notification(
        &trade_no,
        &body,
        NotifyChannel::Json,
        orders.as_ref(),
        merchants.as_ref(),
        locks.as_ref(),
    )
    .await;
    json_ack(&outcome)
}

route!(legacy_payment_notify => Post "/notify/legacy/{trade_no}" impl PaymentBridgeDatabase);
pub async fn legacy_payment_notify<B: PaymentBridgeDatabase>(
    path: web::Path<String>,
    body: web::Bytes,
    orders: web::Data<OrderFlowApi<B>>,
    merchants: web::Data<MerchantApi<B>>,
    locks: web::Data<NotifyLocks>,
) -> HttpResponse {
    let trade_no = TradeNo(path.into_inner());
    debug!("📨️ Payment notification for {trade_no} on the legacy XML channel");
    let outcome = ingest_payment_notification(
        &trade_no,
        &body,
        NotifyChannel::LegacyXml,
        orders.as_ref(),
        merchants.as_ref(),
        locks.as_ref(),
    )
    .await;
    xml_ack(&outcome)
}

route!(refund_notify => Post "/notify/refund/{refund_no}" impl PaymentBridgeDatabase);
pub async fn refund_notify<B: PaymentBridgeDatabase>(
    path: web::Path<String>,
    body: web::Bytes,
    refunds: web::Data<RefundFlowApi<B>>,
    merchants: web::Data<MerchantApi<B>>,
    locks: web::Data<NotifyLocks>,
) -> HttpResponse {
    let refund_no = RefundNo(path.into_inner());
    debug!("📨️ Refund notification for {refund_no}");
    // Refund notifications arrive on whichever channel the original trade used, so the format is
    // sniffed rather than pinned by the route.
    let is_xml = body.iter().find(|b| !b.is_ascii_whitespace()).map_or(false, |b| *b == b'<');
    let channel = if is_xml { NotifyChannel::LegacyXml } else { NotifyChannel::Json };
    let outcome =
        ingest_refund_notification(&refund_no, &body, channel, refunds.as_ref(), merchants.as_ref(), locks.as_ref())
            .await;
    match channel {
        NotifyChannel::Json => json_ack(&outcome),
        NotifyChannel::LegacyXml => xml_ack(&outcome),
    }
}

fn json_ack(outcome: &NotifyOutcome) -> HttpResponse {
    let ack = match outcome {
        NotifyOutcome::Ack => NotifyAck::success(),
        NotifyOutcome::Busy => NotifyAck::failure("A delivery for this number is in flight. Retry later."),
        NotifyOutcome::Rejected(message) => NotifyAck::failure(message),
    };
    HttpResponse::Ok().json(ack)
}

fn xml_ack(outcome: &NotifyOutcome) -> HttpResponse {
    let body = match outcome {
        NotifyOutcome::Ack => legacy_ack(true, "OK"),
        NotifyOutcome::Busy => legacy_ack(false, "A delivery for this number is in flight. Retry later."),
        NotifyOutcome::Rejected(message) => legacy_ack(false, message),
    };
    HttpResponse::Ok().content_type("text/xml; charset=utf-8").body(body)
}

//----------------------------------------   Payment pipeline  --------------------------------------------------------

pub async fn ingest_payment_notification<B>(
    trade_no: &TradeNo,
    body: &[u8],
    channel: NotifyChannel,
    orders: &OrderFlowApi<B>,
    merchants: &MerchantApi<B>,
    locks: &NotifyLocks,
) -> NotifyOutcome
where
    B: PaymentBridgeDatabase,
{
    let _guard = match locks.try_acquire(trade_no.as_str()) {
        Some(guard) => guard,
        None => {
            info!("📨️ Another delivery for {trade_no} is being processed. Asking the gateway to retry.");
            return NotifyOutcome::Busy;
        },
    };
    let order = match orders.fetch_order(trade_no).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            warn!("📨️ Received a payment notification for unknown order {trade_no}");
            return NotifyOutcome::Rejected("order not found".into());
        },
        Err(e) => {
            warn!("📨️ Could not look up order {trade_no} for a payment notification. {e}");
            return NotifyOutcome::Rejected("order lookup failed".into());
        },
    };
    if order.status == PaymentOrderStatus::Success {
        debug!("📨️ Order {trade_no} is already settled. Absorbing the redelivery.");
        return NotifyOutcome::Ack;
    }
    let notification = match parse_payment_notification(body, channel) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(
                "📨️ Could not parse the payment notification for {trade_no}. {e}. Raw body: {}",
                String::from_utf8_lossy(body)
            );
            return NotifyOutcome::Rejected("malformed notification body".into());
        },
    };
    // The audit snapshot is written before any verification, so forged deliveries leave a trace.
    let received_at = Utc::now();
    let raw = String::from_utf8_lossy(body);
    if let Err(e) = orders.record_callback(trade_no, raw.as_ref(), received_at).await {
        warn!("📨️ Could not record the callback payload for {trade_no}. {e}");
        return NotifyOutcome::Rejected("callback could not be recorded".into());
    }
    if notification.out_trade_no() != Some(trade_no.as_str()) {
        warn!(
            "🚨️ The payload delivered for {trade_no} names trade {:?}. Rejecting.",
            notification.out_trade_no()
        );
        return NotifyOutcome::Rejected("trade number mismatch".into());
    }
    let merchant = match notifying_merchant(notification.mch_id(), merchants).await {
        Ok(merchant) => merchant,
        Err(outcome) => return outcome,
    };
    if merchant.id != order.merchant_id {
        warn!(
            "🚨️ Merchant {} delivered a notification for {trade_no}, which belongs to merchant id {}. Rejecting.",
            merchant.mch_id, order.merchant_id
        );
        return NotifyOutcome::Rejected("merchant mismatch".into());
    }
    if let Err(outcome) = check_signature(notification.fields(), notification.sign_type(), &merchant, trade_no.as_str())
    {
        return outcome;
    }
    let trade_state = notification.trade_state().map(String::from);
    if trade_state.as_deref() != Some("SUCCESS") {
        let state = trade_state.unwrap_or_else(|| "UNKNOWN".to_string());
        info!("📨️ Verified notification reports {trade_no} as {state}. Recording the state without settling.");
        if let Err(e) = orders.refresh_trade_state(trade_no, &state, notification.transaction_id()).await {
            warn!("📨️ Could not record the reported trade state for {trade_no}. {e}");
            return NotifyOutcome::Rejected("state refresh failed".into());
        }
        return NotifyOutcome::Ack;
    }
    let confirmation = confirmation_from_notification(&notification, received_at);
    match orders.confirm_payment(trade_no, confirmation).await {
        Ok(Some(order)) => {
            info!("📨️ Order {trade_no} settled by callback. Amount: {}", order.amount);
            NotifyOutcome::Ack
        },
        Ok(None) => {
            debug!("📨️ Order {trade_no} was settled by a concurrent path. Absorbing.");
            NotifyOutcome::Ack
        },
        Err(e) => {
            warn!("📨️ The settlement transition failed for {trade_no} after verification. {e}");
            NotifyOutcome::Rejected("state transition failed".into())
        },
    }
}

fn parse_payment_notification(body: &[u8], channel: NotifyChannel) -> Result<PaymentNotification, WxPayApiError> {
    match channel {
        NotifyChannel::Json => PaymentNotification::from_json(body),
        NotifyChannel::LegacyXml => {
            let text =
                std::str::from_utf8(body).map_err(|e| WxPayApiError::InvalidXml(XmlError::Malformed(e.to_string())))?;
            PaymentNotification::from_xml(text)
        },
    }
}

fn confirmation_from_notification(notification: &PaymentNotification, received_at: DateTime<Utc>) -> PaymentConfirmation {
    PaymentConfirmation {
        transaction_id: notification.transaction_id().map(String::from),
        trade_state: notification.trade_state().map(String::from),
        openid: notification.fields().get("openid").cloned(),
        amount: notification.total_fee(),
        success_time: notification.time_end().and_then(parse_gateway_timestamp).or(Some(received_at)),
    }
}

async fn notifying_merchant<M: MerchantManagement>(
    mch_id: Option<&str>,
    merchants: &MerchantApi<M>,
) -> Result<Merchant, NotifyOutcome> {
    let mch_id = match mch_id {
        Some(id) => id,
        None => {
            warn!("📨️ The notification payload carries no merchant account id. Rejecting.");
            return Err(NotifyOutcome::Rejected("missing merchant account id".into()));
        },
    };
    match merchants.merchant_by_mch_id(mch_id).await {
        Ok(Some(merchant)) => Ok(merchant),
        Ok(None) => {
            warn!("📨️ The notification names merchant {mch_id}, which is not configured. Rejecting.");
            Err(NotifyOutcome::Rejected("unknown merchant".into()))
        },
        Err(e) => {
            warn!("📨️ Could not resolve merchant {mch_id} for a notification. {e}");
            Err(NotifyOutcome::Rejected("merchant lookup failed".into()))
        },
    }
}

fn check_signature(
    fields: &std::collections::BTreeMap<String, String>,
    sign_type: Result<SignType, SignatureError>,
    merchant: &Merchant,
    number: &str,
) -> Result<(), NotifyOutcome> {
    let sign_type = match sign_type {
        Ok(sign_type) => sign_type,
        Err(e) => {
            warn!("🚨️ The notification for {number} names an unsupported signature algorithm. {e}");
            return Err(NotifyOutcome::Rejected("unsupported signature algorithm".into()));
        },
    };
    verify_fields(fields, &merchant.api_key, sign_type).map_err(|e| {
        warn!("🚨️ Signature verification failed for {number} under merchant {}. {e}", merchant.mch_id);
        NotifyOutcome::Rejected("signature mismatch".into())
    })
}

//----------------------------------------   Refund pipeline  ---------------------------------------------------------

pub async fn ingest_refund_notification<B>(
    refund_no: &RefundNo,
    body: &[u8],
    channel: NotifyChannel,
    refunds: &RefundFlowApi<B>,
    merchants: &MerchantApi<B>,
    locks: &NotifyLocks,
) -> NotifyOutcome
where
    B: PaymentBridgeDatabase,
{
    let _guard = match locks.try_acquire(refund_no.as_str()) {
        Some(guard) => guard,
        None => {
            info!("📨️ Another delivery for {refund_no} is being processed. Asking the gateway to retry.");
            return NotifyOutcome::Busy;
        },
    };
    let refund = match refunds.fetch_refund(refund_no).await {
        Ok(Some(refund)) => refund,
        Ok(None) => {
            warn!("📨️ Received a refund notification for unknown refund {refund_no}");
            return NotifyOutcome::Rejected("refund not found".into());
        },
        Err(e) => {
            warn!("📨️ Could not look up refund {refund_no} for a notification. {e}");
            return NotifyOutcome::Rejected("refund lookup failed".into());
        },
    };
    if refund.is_settled() {
        debug!("📨️ Refund {refund_no} is already settled as {}. Absorbing the redelivery.", refund.status);
        return NotifyOutcome::Ack;
    }
    let notification = match parse_refund_notification(body, channel) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(
                "📨️ Could not parse the refund notification for {refund_no}. {e}. Raw body: {}",
                String::from_utf8_lossy(body)
            );
            return NotifyOutcome::Rejected("malformed notification body".into());
        },
    };
    let received_at = Utc::now();
    let raw = String::from_utf8_lossy(body);
    if let Err(e) = refunds.record_callback(refund_no, raw.as_ref(), received_at).await {
        warn!("📨️ Could not record the callback payload for {refund_no}. {e}");
        return NotifyOutcome::Rejected("callback could not be recorded".into());
    }
    if notification.out_refund_no() != Some(refund_no.as_str()) {
        warn!(
            "🚨️ The payload delivered for {refund_no} names refund {:?}. Rejecting.",
            notification.out_refund_no()
        );
        return NotifyOutcome::Rejected("refund number mismatch".into());
    }
    let merchant = match notifying_merchant(notification.mch_id(), merchants).await {
        Ok(merchant) => merchant,
        Err(outcome) => return outcome,
    };
    if merchant.id != refund.merchant_id {
        warn!(
            "🚨️ Merchant {} delivered a notification for {refund_no}, which belongs to merchant id {}. Rejecting.",
            merchant.mch_id, refund.merchant_id
        );
        return NotifyOutcome::Rejected("merchant mismatch".into());
    }
    if let Err(outcome) =
        check_signature(notification.fields(), notification.sign_type(), &merchant, refund_no.as_str())
    {
        return outcome;
    }
    let update = refund_update_from_notification(&notification);
    match refunds.apply_update(refund_no, update).await {
        Ok(refund) => {
            info!("📨️ Refund {refund_no} updated by callback. Status: {}", refund.status);
            NotifyOutcome::Ack
        },
        Err(e) => {
            warn!("📨️ The refund update failed for {refund_no} after verification. {e}");
            NotifyOutcome::Rejected("refund update failed".into())
        },
    }
}

fn parse_refund_notification(body: &[u8], channel: NotifyChannel) -> Result<RefundNotification, WxPayApiError> {
    match channel {
        NotifyChannel::Json => RefundNotification::from_json(body),
        NotifyChannel::LegacyXml => {
            let text =
                std::str::from_utf8(body).map_err(|e| WxPayApiError::InvalidXml(XmlError::Malformed(e.to_string())))?;
            RefundNotification::from_xml(text)
        },
    }
}

fn refund_update_from_notification(notification: &RefundNotification) -> RefundUpdate {
    RefundUpdate {
        refund_id: notification.refund_id().map(String::from),
        channel: notification.channel().map(String::from),
        user_received_account: notification.user_received_account().map(String::from),
        success_time: notification.success_time().and_then(parse_gateway_timestamp),
        status: notification.refund_status().map(|s| map_refund_status(s).to_string()),
    }
}
