use std::collections::BTreeMap;

use actix_web::{http::StatusCode, web, web::ServiceConfig};
use payment_bridge_engine::{
    db_types::{Fen, PaymentOrderStatus, RefundNo, TradeNo},
    events::EventProducers,
    MerchantApi,
    OrderFlowApi,
    RefundFlowApi,
};
use wxpay_tools::{fields_to_xml, sign_fields, SignType};

use super::{
    helpers::post_raw,
    mocks::{merchant_fixture, order_fixture, refund_fixture, MockBridge, TEST_API_KEY},
};
use crate::{
    data_objects::NotifyAck,
    locks::NotifyLocks,
    notify_routes::{
        ingest_payment_notification,
        ingest_refund_notification,
        LegacyPaymentNotifyRoute,
        NotifyChannel,
        NotifyOutcome,
        PaymentNotifyRoute,
    },
};

const MCH_ID: &str = "1900000001";
const TXN_ID: &str = "4200009995202608230001";

fn signed_fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut fields: BTreeMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let sig = sign_fields(&fields, TEST_API_KEY, SignType::Md5).unwrap();
    fields.insert("sign".to_string(), sig);
    fields
}

fn signed_json(pairs: &[(&str, &str)]) -> Vec<u8> {
    serde_json::to_vec(&signed_fields(pairs)).unwrap()
}

fn payment_fields<'a>(trade_no: &'a str, trade_state: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("mch_id", MCH_ID),
        ("out_trade_no", trade_no),
        ("transaction_id", TXN_ID),
        ("trade_state", trade_state),
        ("total_fee", "100"),
        ("time_end", "20260823180000"),
        ("nonce_str", "oHpVmPrVQamVmbxV"),
    ]
}

#[tokio::test]
async fn a_verified_success_callback_settles_the_order() {
    let _ = env_logger::try_init().ok();
    let trade_no = TradeNo("WPB20260823100001".into());
    let order = order_fixture(&trade_no, 1);
    let mut order_db = MockBridge::new();
    let found = order.clone();
    order_db.expect_fetch_order_by_trade_no().return_once(move |_| Ok(Some(found)));
    let audited = order.clone();
    order_db.expect_record_payment_callback().return_once(move |_, _, _| Ok(audited));
    let mut settled = order.clone();
    settled.status = PaymentOrderStatus::Success;
    order_db
        .expect_mark_order_paid()
        .withf(|_, c| {
            c.transaction_id.as_deref() == Some(TXN_ID)
                && c.amount == Some(Fen::from(100))
                && c.success_time.is_some()
        })
        .return_once(move |_, _| Ok(Some(settled)));
    order_db.expect_update_trade_state().never();
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_merchant_by_mch_id().return_once(|_| Ok(Some(merchant_fixture(1))));
    let orders = OrderFlowApi::new(order_db, EventProducers::default());
    let merchants = MerchantApi::new(merchant_db);
    let body = signed_json(&payment_fields(trade_no.as_str(), "SUCCESS"));
    let outcome =
        ingest_payment_notification(&trade_no, &body, NotifyChannel::Json, &orders, &merchants, &NotifyLocks::new())
            .await;
    assert_eq!(outcome, NotifyOutcome::Ack);
}

#[tokio::test]
async fn redeliveries_for_a_settled_order_are_absorbed_without_writes() {
    let _ = env_logger::try_init().ok();
    let trade_no = TradeNo("WPB20260823100002".into());
    let mut order = order_fixture(&trade_no, 1);
    order.status = PaymentOrderStatus::Success;
    let mut order_db = MockBridge::new();
    order_db.expect_fetch_order_by_trade_no().return_once(move |_| Ok(Some(order)));
    order_db.expect_record_payment_callback().never();
    order_db.expect_mark_order_paid().never();
    let orders = OrderFlowApi::new(order_db, EventProducers::default());
    let merchants = MerchantApi::new(MockBridge::new());
    let body = signed_json(&payment_fields(trade_no.as_str(), "SUCCESS"));
    let outcome =
        ingest_payment_notification(&trade_no, &body, NotifyChannel::Json, &orders, &merchants, &NotifyLocks::new())
            .await;
    assert_eq!(outcome, NotifyOutcome::Ack);
}

#[tokio::test]
async fn tampered_payloads_are_rejected_but_still_audited() {
    let _ = env_logger::try_init().ok();
    let trade_no = TradeNo("WPB20260823100003".into());
    let order = order_fixture(&trade_no, 1);
    let mut order_db = MockBridge::new();
    let found = order.clone();
    order_db.expect_fetch_order_by_trade_no().return_once(move |_| Ok(Some(found)));
    // The audit snapshot is written even though verification will fail.
    let audited = order.clone();
    order_db.expect_record_payment_callback().times(1).return_once(move |_, _, _| Ok(audited));
    order_db.expect_mark_order_paid().never();
    order_db.expect_update_trade_state().never();
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_merchant_by_mch_id().return_once(|_| Ok(Some(merchant_fixture(1))));
    let orders = OrderFlowApi::new(order_db, EventProducers::default());
    let merchants = MerchantApi::new(merchant_db);
    let mut fields = signed_fields(&payment_fields(trade_no.as_str(), "SUCCESS"));
    // Signed for 100 fen, delivered claiming 10000.
    fields.insert("total_fee".to_string(), "10000".to_string());
    let body = serde_json::to_vec(&fields).unwrap();
    let outcome =
        ingest_payment_notification(&trade_no, &body, NotifyChannel::Json, &orders, &merchants, &NotifyLocks::new())
            .await;
    assert_eq!(outcome, NotifyOutcome::Rejected("signature mismatch".into()));
}

#[tokio::test]
async fn concurrent_deliveries_for_one_trade_get_the_retry_envelope() {
    let trade_no = TradeNo("WPB20260823100004".into());
    let locks = NotifyLocks::new();
    let _held = locks.try_acquire(trade_no.as_str()).unwrap();
    // No expectations: the pipeline must not touch the database while the lock is held elsewhere.
    let orders = OrderFlowApi::new(MockBridge::new(), EventProducers::default());
    let merchants = MerchantApi::new(MockBridge::new());
    let body = signed_json(&payment_fields(trade_no.as_str(), "SUCCESS"));
    let outcome = ingest_payment_notification(&trade_no, &body, NotifyChannel::Json, &orders, &merchants, &locks).await;
    assert_eq!(outcome, NotifyOutcome::Busy);
}

#[tokio::test]
async fn callbacks_for_unknown_orders_are_rejected() {
    let trade_no = TradeNo("WPB20260823100005".into());
    let mut order_db = MockBridge::new();
    order_db.expect_fetch_order_by_trade_no().return_once(|_| Ok(None));
    order_db.expect_record_payment_callback().never();
    let orders = OrderFlowApi::new(order_db, EventProducers::default());
    let merchants = MerchantApi::new(MockBridge::new());
    let body = signed_json(&payment_fields("WPB20260823100005", "SUCCESS"));
    let outcome =
        ingest_payment_notification(&trade_no, &body, NotifyChannel::Json, &orders, &merchants, &NotifyLocks::new())
            .await;
    assert_eq!(outcome, NotifyOutcome::Rejected("order not found".into()));
}

#[tokio::test]
async fn verified_non_success_states_are_recorded_without_settling() {
    let _ = env_logger::try_init().ok();
    let trade_no = TradeNo("WPB20260823100006".into());
    let order = order_fixture(&trade_no, 1);
    let mut order_db = MockBridge::new();
    let found = order.clone();
    order_db.expect_fetch_order_by_trade_no().return_once(move |_| Ok(Some(found)));
    let audited = order.clone();
    order_db.expect_record_payment_callback().return_once(move |_, _, _| Ok(audited));
    let refreshed = order.clone();
    order_db
        .expect_update_trade_state()
        .withf(|_, state, _| state == "PAYERROR")
        .return_once(move |_, _, _| Ok(refreshed));
    order_db.expect_mark_order_paid().never();
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_merchant_by_mch_id().return_once(|_| Ok(Some(merchant_fixture(1))));
    let orders = OrderFlowApi::new(order_db, EventProducers::default());
    let merchants = MerchantApi::new(merchant_db);
    let body = signed_json(&payment_fields(trade_no.as_str(), "PAYERROR"));
    let outcome =
        ingest_payment_notification(&trade_no, &body, NotifyChannel::Json, &orders, &merchants, &NotifyLocks::new())
            .await;
    assert_eq!(outcome, NotifyOutcome::Ack);
}

#[tokio::test]
async fn a_verified_refund_callback_applies_the_update() {
    let _ = env_logger::try_init().ok();
    let refund_no = RefundNo("R20260823100007".into());
    let refund = refund_fixture(&refund_no, 1, "PROCESSING");
    let mut refund_db = MockBridge::new();
    // Looked up once by the pipeline and once more inside the update, for settlement detection.
    let current = refund.clone();
    refund_db.expect_fetch_refund_by_refund_no().times(2).returning(move |_| Ok(Some(current.clone())));
    let audited = refund.clone();
    refund_db.expect_record_refund_callback().return_once(move |_, _, _| Ok(audited));
    let mut settled = refund.clone();
    settled.status = "SUCCESS".to_string();
    settled.refund_id = Some("50000000382026082309732678859".to_string());
    refund_db
        .expect_apply_refund_update()
        .withf(|_, update| {
            update.status.as_deref() == Some("SUCCESS")
                && update.refund_id.as_deref() == Some("50000000382026082309732678859")
        })
        .return_once(move |_, _| Ok(settled));
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_merchant_by_mch_id().return_once(|_| Ok(Some(merchant_fixture(1))));
    let refunds = RefundFlowApi::new(refund_db, EventProducers::default());
    let merchants = MerchantApi::new(merchant_db);
    let body = signed_json(&[
        ("mch_id", MCH_ID),
        ("out_refund_no", refund_no.as_str()),
        ("refund_id", "50000000382026082309732678859"),
        ("refund_status", "SUCCESS"),
        ("success_time", "2026-08-23T18:00:00+08:00"),
    ]);
    let outcome =
        ingest_refund_notification(&refund_no, &body, NotifyChannel::Json, &refunds, &merchants, &NotifyLocks::new())
            .await;
    assert_eq!(outcome, NotifyOutcome::Ack);
}

//----------------------------------------   Ack envelopes over HTTP  --------------------------------------------------

#[actix_web::test]
async fn rejections_still_answer_http_200_on_the_json_channel() {
    let _ = env_logger::try_init().ok();
    let body = signed_json(&payment_fields("WPB20260823100008", "SUCCESS"));
    let (status, body) = post_raw("/notify/WPB20260823100008", body, "application/json", configure_unknown_order).await;
    assert_eq!(status, StatusCode::OK);
    let ack: NotifyAck = serde_json::from_str(&body).unwrap();
    assert_eq!(ack.code, "FAIL");
    assert_eq!(ack.message, "order not found");
}

fn configure_unknown_order(cfg: &mut ServiceConfig) {
    let mut order_db = MockBridge::new();
    order_db.expect_fetch_order_by_trade_no().returning(|_| Ok(None));
    cfg.service(PaymentNotifyRoute::<MockBridge>::new())
        .app_data(web::Data::new(OrderFlowApi::new(order_db, EventProducers::default())))
        .app_data(web::Data::new(MerchantApi::new(MockBridge::new())))
        .app_data(web::Data::new(NotifyLocks::new()));
}

const LEGACY_TRADE: &str = "WPB20260823100009";

#[actix_web::test]
async fn the_legacy_channel_acks_in_xml() {
    let _ = env_logger::try_init().ok();
    let fields = signed_fields(&[
        ("mch_id", MCH_ID),
        ("out_trade_no", LEGACY_TRADE),
        ("transaction_id", TXN_ID),
        ("result_code", "SUCCESS"),
        ("total_fee", "100"),
        ("time_end", "20260823180000"),
    ]);
    let body = fields_to_xml(&fields).into_bytes();
    let (status, body) = post_raw(&format!("/notify/legacy/{LEGACY_TRADE}"), body, "text/xml", configure_legacy).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<return_code><![CDATA[SUCCESS]]></return_code>"), "unexpected ack: {body}");
}

fn configure_legacy(cfg: &mut ServiceConfig) {
    let trade_no = TradeNo(LEGACY_TRADE.into());
    let order = order_fixture(&trade_no, 1);
    let mut order_db = MockBridge::new();
    let found = order.clone();
    order_db.expect_fetch_order_by_trade_no().returning(move |_| Ok(Some(found.clone())));
    let audited = order.clone();
    order_db.expect_record_payment_callback().return_once(move |_, _, _| Ok(audited));
    let mut settled = order;
    settled.status = PaymentOrderStatus::Success;
    order_db.expect_mark_order_paid().return_once(move |_, _| Ok(Some(settled)));
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_merchant_by_mch_id().returning(|_| Ok(Some(merchant_fixture(1))));
    cfg.service(LegacyPaymentNotifyRoute::<MockBridge>::new())
        .app_data(web::Data::new(OrderFlowApi::new(order_db, EventProducers::default())))
        .app_data(web::Data::new(MerchantApi::new(merchant_db)))
        .app_data(web::Data::new(NotifyLocks::new()));
}
