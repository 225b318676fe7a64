use actix_web::{http::StatusCode, web, web::ServiceConfig};
use chrono::Utc;
use payment_bridge_engine::{
    db_types::{BillCategory, BillRecord, Merchant},
    BillApi,
    MerchantApi,
};
use serde_json::json;

use super::{
    helpers::{get_request, post_json},
    mocks::{merchant_fixture, MockBridge, TEST_API_KEY},
};
use crate::routes::{MerchantBillsRoute, MerchantValidityRoute, RegisterMerchantRoute};

const MCH_ID: &str = "1900000001";

#[actix_web::test]
async fn merchant_registration_never_echoes_key_material() {
    let _ = env_logger::try_init().ok();
    let body = json!({
        "mch_id": MCH_ID,
        "app_id": "wx8888888888888888",
        "api_key": TEST_API_KEY,
    });
    let (status, body) = post_json("/merchant", body, configure_register).await;
    assert_eq!(status, StatusCode::OK, "unexpected response: {body}");
    assert!(!body.contains(TEST_API_KEY), "the API key leaked into the response: {body}");
    let summary: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(summary["mch_id"], MCH_ID);
    assert_eq!(summary["valid"], true);
    assert_eq!(summary["has_rsa_keys"], false);
}

fn configure_register(cfg: &mut ServiceConfig) {
    let mut merchant_db = MockBridge::new();
    merchant_db
        .expect_upsert_merchant()
        .withf(|new| new.mch_id == MCH_ID && new.api_key == TEST_API_KEY && new.valid)
        .return_once(|new| {
            let now = Utc::now();
            Ok(Merchant {
                id: 1,
                mch_id: new.mch_id,
                app_id: new.app_id,
                api_key: new.api_key,
                serial_no: new.serial_no,
                private_key_pem: new.private_key_pem,
                platform_cert_pem: new.platform_cert_pem,
                valid: new.valid,
                created_at: now,
                updated_at: now,
            })
        });
    cfg.service(RegisterMerchantRoute::<MockBridge>::new())
        .app_data(web::Data::new(MerchantApi::new(merchant_db)));
}

#[actix_web::test]
async fn disabling_a_merchant_round_trips() {
    let _ = env_logger::try_init().ok();
    let (status, body) =
        post_json(&format!("/merchant/{MCH_ID}/validity"), json!({ "valid": false }), configure_validity).await;
    assert_eq!(status, StatusCode::OK);
    let summary: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(summary["valid"], false);
}

fn configure_validity(cfg: &mut ServiceConfig) {
    let mut merchant_db = MockBridge::new();
    merchant_db
        .expect_set_merchant_validity()
        .withf(|mch_id, valid| mch_id == MCH_ID && !valid)
        .returning(|_, valid| {
            let mut merchant = merchant_fixture(1);
            merchant.valid = valid;
            Ok(merchant)
        });
    cfg.service(MerchantValidityRoute::<MockBridge>::new())
        .app_data(web::Data::new(MerchantApi::new(merchant_db)));
}

#[actix_web::test]
async fn merchant_bills_list_the_archived_records() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request(&format!("/bills/{MCH_ID}"), configure_bills).await;
    assert_eq!(status, StatusCode::OK);
    let records: serde_json::Value = serde_json::from_str(&body).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["category"], "TRADE_ALL");
    assert_eq!(records[1]["category"], "FUND_FLOW");
}

fn configure_bills(cfg: &mut ServiceConfig) {
    let mut merchant_db = MockBridge::new();
    merchant_db.expect_fetch_merchant_by_mch_id().returning(|_| Ok(Some(merchant_fixture(1))));
    let mut bill_db = MockBridge::new();
    bill_db.expect_fetch_bills_for_merchant().withf(|id| *id == 1).returning(|id| {
        let date = Utc::now().date_naive() - chrono::Duration::days(1);
        let record = |category| BillRecord {
            id: 1,
            merchant_id: id,
            bill_date: date,
            category,
            hash_type: Some("SHA1".to_string()),
            hash_value: Some("0c7c9f1a".to_string()),
            download_url: None,
            object_key: Some("2026/08/22/abcd.csv".to_string()),
            created_at: Utc::now(),
        };
        Ok(vec![record(BillCategory::TradeAll), record(BillCategory::FundFlow)])
    });
    cfg.service(MerchantBillsRoute::<MockBridge>::new())
        .app_data(web::Data::new(MerchantApi::new(merchant_db)))
        .app_data(web::Data::new(BillApi::new(bill_db)));
}
