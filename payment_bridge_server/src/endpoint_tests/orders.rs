use actix_web::{http::StatusCode, web, web::ServiceConfig};
use payment_bridge_engine::{
    db_types::{Fen, TradeNo, TradeType},
    events::EventProducers,
    MerchantApi,
    OrderFlowApi,
    RefundFlowApi,
};
use serde_json::json;
use wxpay_tools::{PrepayResponse, TransferBatchResponse};

use super::{
    helpers::{get_request, post_json},
    mocks::{merchant_fixture, order_fixture, refund_fixture, MockBridge, MockGateway, MockGatewayFactory},
};
use crate::{
    config::{ServerConfig, ServerOptions},
    routes::{
        CloseOrderRoute,
        CreateOrderRoute,
        OrderSearchRoute,
        OrderStatusRoute,
        RefundStatusRoute,
        SubmitTransferRoute,
    },
};

const CODE_URL: &str = "weixin://wxpay/bizpayurl?pr=k4Qe2sC";

#[actix_web::test]
async fn create_native_order_returns_the_code_url() {
    let _ = env_logger::try_init().ok();
    let body = json!({ "trade_type": "NATIVE", "amount": 100, "description": "widgets" });
    let (status, body) = post_json("/order", body, configure_create).await;
    assert_eq!(status, StatusCode::OK, "unexpected response: {body}");
    let result: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(result["pay_params"]["channel"], "NATIVE");
    assert_eq!(result["pay_params"]["code_url"], CODE_URL);
    assert_eq!(result["order"]["trade_type"], "NATIVE");
    assert_eq!(result["order"]["prepay_id"], CODE_URL);
}

fn configure_create(cfg: &mut ServiceConfig) {
    let mut order_db = MockBridge::new();
    order_db.expect_insert_order().return_once(|new| {
        let mut order = order_fixture(&new.trade_no, new.merchant_id);
        order.trade_type = new.trade_type;
        order.amount = new.amount;
        order.description = new.description;
        order.notify_url = new.notify_url;
        order.openid = new.openid;
        order.prepay_id = None;
        Ok((order, true))
    });
    order_db
        .expect_record_order_exchange()
        .withf(|_, request, response| request.is_some() && response.is_some())
        .returning(|trade_no, _, _| {
            let mut order = order_fixture(trade_no, 1);
            order.trade_type = TradeType::Native;
            Ok(order)
        });
    order_db
        .expect_update_prepay_handle()
        .withf(|_, handle, expire| handle == CODE_URL && expire.is_some())
        .returning(|trade_no, handle, _| {
            let mut order = order_fixture(trade_no, 1);
            order.trade_type = TradeType::Native;
            order.prepay_id = Some(handle.to_string());
            Ok(order)
        });
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_default_merchant().return_once(|| Ok(Some(merchant_fixture(1))));
    let mut gateway = MockGateway::new();
    gateway
        .expect_create_native_order()
        .withf(|req| req.amount == Fen::from(100) && req.notify_url.contains("/wxpay/notify/"))
        .returning(|_| Ok(PrepayResponse { code_url: Some(CODE_URL.to_string()), ..Default::default() }));
    let config = ServerConfig::default();
    let options = ServerOptions::from_config(&config);
    cfg.service(CreateOrderRoute::<MockBridge, MockGatewayFactory>::new())
        .app_data(web::Data::new(OrderFlowApi::new(order_db, EventProducers::default())))
        .app_data(web::Data::new(MerchantApi::new(merchant_db)))
        .app_data(web::Data::new(MockGatewayFactory::new(gateway)))
        .app_data(web::Data::new(config))
        .app_data(web::Data::new(options));
}

#[actix_web::test]
async fn jsapi_orders_without_an_openid_are_bad_requests() {
    let _ = env_logger::try_init().ok();
    let body = json!({ "trade_type": "JSAPI", "amount": 100, "description": "widgets" });
    let (status, body) = post_json("/order", body, configure_create_untouched).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("openid"), "unexpected error body: {body}");
}

// Validation fires before the merchant lookup, so nothing may touch the backend or the gateway.
fn configure_create_untouched(cfg: &mut ServiceConfig) {
    let config = ServerConfig::default();
    let options = ServerOptions::from_config(&config);
    cfg.service(CreateOrderRoute::<MockBridge, MockGatewayFactory>::new())
        .app_data(web::Data::new(OrderFlowApi::new(MockBridge::new(), EventProducers::default())))
        .app_data(web::Data::new(MerchantApi::new(MockBridge::new())))
        .app_data(web::Data::new(MockGatewayFactory::new(MockGateway::new())))
        .app_data(web::Data::new(config))
        .app_data(web::Data::new(options));
}

const STATUS_TRADE: &str = "WPB20260823200001";

#[actix_web::test]
async fn order_status_returns_the_stored_order() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request(&format!("/order/{STATUS_TRADE}"), configure_status).await;
    assert_eq!(status, StatusCode::OK);
    let order: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(order["trade_no"], STATUS_TRADE);
    assert_eq!(order["status"], "INIT");
}

#[actix_web::test]
async fn order_status_is_404_for_unknown_trade_numbers() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request("/order/WPB00000000000000", configure_status).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("WPB00000000000000"));
}

fn configure_status(cfg: &mut ServiceConfig) {
    let mut order_db = MockBridge::new();
    order_db.expect_fetch_order_by_trade_no().returning(|trade_no| {
        if trade_no.as_str() == STATUS_TRADE {
            Ok(Some(order_fixture(trade_no, 1)))
        } else {
            Ok(None)
        }
    });
    cfg.service(OrderStatusRoute::<MockBridge>::new())
        .app_data(web::Data::new(OrderFlowApi::new(order_db, EventProducers::default())));
}

#[actix_web::test]
async fn order_search_passes_the_filter_through() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request("/search/orders?merchant_id=1&currency=CNY", configure_search).await;
    assert_eq!(status, StatusCode::OK);
    let orders: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(orders.as_array().unwrap().len(), 1);
}

fn configure_search(cfg: &mut ServiceConfig) {
    let mut order_db = MockBridge::new();
    order_db
        .expect_search_orders()
        .withf(|query| query.merchant_id == Some(1) && query.currency.as_deref() == Some("CNY"))
        .returning(|_| Ok(vec![order_fixture(&TradeNo("WPB20260823200002".into()), 1)]));
    cfg.service(OrderSearchRoute::<MockBridge>::new())
        .app_data(web::Data::new(OrderFlowApi::new(order_db, EventProducers::default())));
}

const CLOSE_TRADE: &str = "WPB20260823200003";

#[actix_web::test]
async fn closing_an_order_deletes_it_and_closes_the_trade_upstream() {
    let _ = env_logger::try_init().ok();
    let (status, body) = post_json(&format!("/order/{CLOSE_TRADE}/close"), json!({}), configure_close).await;
    assert_eq!(status, StatusCode::OK);
    let response: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["success"], true);
    assert_eq!(response["message"], format!("Order {CLOSE_TRADE} closed"));
}

fn configure_close(cfg: &mut ServiceConfig) {
    let mut order_db = MockBridge::new();
    order_db.expect_delete_order().returning(|trade_no| Ok(Some(order_fixture(trade_no, 1))));
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_merchant_by_id().returning(|id| Ok(Some(merchant_fixture(id))));
    let mut gateway = MockGateway::new();
    gateway.expect_close_order().withf(|trade_no| trade_no == CLOSE_TRADE).returning(|_| Ok(()));
    cfg.service(CloseOrderRoute::<MockBridge, MockGatewayFactory>::new())
        .app_data(web::Data::new(OrderFlowApi::new(order_db, EventProducers::default())))
        .app_data(web::Data::new(MerchantApi::new(merchant_db)))
        .app_data(web::Data::new(MockGatewayFactory::new(gateway)));
}

const REFUND_NO: &str = "R2026082320000004";

#[actix_web::test]
async fn refund_status_carries_the_goods_detail() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request(&format!("/refund/{REFUND_NO}"), configure_refund_status).await;
    assert_eq!(status, StatusCode::OK);
    let response: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["refund"]["refund_no"], REFUND_NO);
    assert!(response["goods"].as_array().unwrap().is_empty());
}

fn configure_refund_status(cfg: &mut ServiceConfig) {
    let mut refund_db = MockBridge::new();
    refund_db.expect_fetch_refund_by_refund_no().returning(|refund_no| Ok(Some(refund_fixture(refund_no, 1, "PROCESSING"))));
    refund_db.expect_fetch_goods_for_refund().returning(|_| Ok(vec![]));
    cfg.service(RefundStatusRoute::<MockBridge>::new())
        .app_data(web::Data::new(RefundFlowApi::new(refund_db, EventProducers::default())));
}

#[actix_web::test]
async fn transfer_batches_pass_straight_through_to_the_gateway() {
    let _ = env_logger::try_init().ok();
    let body = json!({
        "out_batch_no": "B20260823001",
        "batch_name": "August payouts",
        "batch_remark": "affiliate commissions",
        "total_amount": 5000,
        "total_num": 1,
        "transfer_detail_list": [{
            "out_detail_no": "B20260823001-1",
            "transfer_amount": 5000,
            "transfer_remark": "commission",
            "openid": "oUpF8uMuAJO_M2pxb1Q9zNjWeS6o"
        }]
    });
    let (status, body) = post_json("/transfer", body, configure_transfer).await;
    assert_eq!(status, StatusCode::OK, "unexpected response: {body}");
    let response: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["batch_id"], "1030000071100999991182020050700019480001");
}

fn configure_transfer(cfg: &mut ServiceConfig) {
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_default_merchant().return_once(|| Ok(Some(merchant_fixture(1))));
    let mut gateway = MockGateway::new();
    gateway
        .expect_create_transfer_batch()
        .withf(|req| req.out_batch_no == "B20260823001" && req.transfer_detail_list.len() == 1)
        .returning(|req| {
            Ok(TransferBatchResponse {
                out_batch_no: req.out_batch_no.clone(),
                batch_id: "1030000071100999991182020050700019480001".to_string(),
                create_time: Some("2026-08-23T10:00:00+08:00".to_string()),
            })
        });
    cfg.service(SubmitTransferRoute::<MockBridge, MockGatewayFactory>::new())
        .app_data(web::Data::new(MerchantApi::new(merchant_db)))
        .app_data(web::Data::new(MockGatewayFactory::new(gateway)));
}
