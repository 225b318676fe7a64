use chrono::{Duration, Utc};
use log::*;
use payment_bridge_engine::{
    db_types::{PaymentConfirmation, PaymentOrderStatus, TradeType},
    order_objects::OrderQueryFilter,
    events::EventProducers,
    OrderApiError,
    OrderFlowApi,
    PaymentBridgeDatabase,
    PaymentFlowError,
    SqliteDatabase,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::runtime::Runtime;

use crate::support::{
    prepare_env::{prepare_test_env, random_db_path},
    seed::{sample_order, seed_merchant},
};

mod support;

async fn setup() -> OrderFlowApi<SqliteDatabase> {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    OrderFlowApi::new(db, EventProducers::default())
}

async fn tear_down(mut api: OrderFlowApi<SqliteDatabase>) {
    if let Err(e) = api.db_mut().close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(api.db().url()).await.unwrap();
}

#[test]
fn order_lifecycle_happy_path() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let api = setup().await;
        let merchant = seed_merchant(api.db()).await;

        let new_order = sample_order(merchant.id, 8_800);
        let (order, created) = api.process_new_order(new_order).await.expect("Error processing order");
        assert!(created);
        assert_eq!(order.status, PaymentOrderStatus::Init);
        assert_eq!(order.trade_type, TradeType::Native);
        assert_eq!(order.currency, "CNY");
        assert_eq!(order.trade_no.as_str().len(), 20);
        assert_eq!((order.time_expire - order.time_start).num_seconds(), 15 * 60);
        assert!(order.transaction_id.is_none());

        let order = api
            .store_prepay_handle(&order.trade_no, "wx201410272009395522657a690389285100", None)
            .await
            .expect("Error storing prepay id");
        assert_eq!(order.prepay_id.as_deref(), Some("wx201410272009395522657a690389285100"));

        let order = api
            .record_gateway_exchange(&order.trade_no, Some(r#"{"out_trade_no":"..."}"#), Some(r#"{"prepay_id":"..."}"#))
            .await
            .expect("Error recording exchange");
        assert!(order.request_payload.is_some());
        assert!(order.response_payload.is_some());

        let received_at = Utc::now();
        let order = api
            .record_callback(&order.trade_no, r#"{"event_type":"TRANSACTION.SUCCESS"}"#, received_at)
            .await
            .expect("Error recording callback");
        assert!(order.callback_payload.is_some());
        assert!(order.callback_at.is_some());
        // the snapshot lands while the order is still unverified and INIT
        assert_eq!(order.status, PaymentOrderStatus::Init);

        let confirmation = PaymentConfirmation {
            transaction_id: Some("4200000001202406100001".into()),
            trade_state: Some("SUCCESS".into()),
            openid: Some("oUpF8uMuAJO_M2pxb1Q9zNjWeS6o".into()),
            amount: Some(order.amount),
            success_time: Some(Utc::now()),
        };
        let paid = api.confirm_payment(&order.trade_no, confirmation.clone()).await.expect("Error confirming payment");
        let paid = paid.expect("First confirmation must perform the transition");
        assert_eq!(paid.status, PaymentOrderStatus::Success);
        assert_eq!(paid.transaction_id.as_deref(), Some("4200000001202406100001"));
        assert_eq!(paid.trade_state.as_deref(), Some("SUCCESS"));
        assert!(paid.success_time.is_some());

        // a redelivered notification is absorbed without a second transition
        let redelivered = api.confirm_payment(&order.trade_no, confirmation).await.expect("Error re-confirming");
        assert!(redelivered.is_none());

        let stored = api.fetch_order(&order.trade_no).await.expect("Error fetching order");
        assert_eq!(stored.expect("Order must exist").status, PaymentOrderStatus::Success);
        tear_down(api).await;
    });
    info!("🚀️ order_lifecycle_happy_path complete");
}

#[test]
fn resubmitting_an_order_is_absorbed_but_conflicts_are_rejected() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let api = setup().await;
        let merchant = seed_merchant(api.db()).await;

        let new_order = sample_order(merchant.id, 1_500);
        let (first, created) = api.process_new_order(new_order.clone()).await.expect("Error processing order");
        assert!(created);

        let (second, created) = api.process_new_order(new_order.clone()).await.expect("Error re-processing order");
        assert!(!created);
        assert_eq!(second.id, first.id);

        let mut conflicting = new_order;
        conflicting.amount = 9_999.into();
        let err = api.process_new_order(conflicting).await.expect_err("Conflicting resubmission must fail");
        assert!(matches!(err, PaymentFlowError::Order(OrderApiError::OrderAlreadyExists(_))));
        tear_down(api).await;
    });
}

#[test]
fn expiry_sweep_only_sees_overdue_init_orders() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let api = setup().await;
        let merchant = seed_merchant(api.db()).await;

        let mut overdue = sample_order(merchant.id, 100);
        overdue.time_expire = Utc::now() - Duration::minutes(1);
        let (overdue, _) = api.process_new_order(overdue).await.expect("Error processing order");

        let mut paid_and_overdue = sample_order(merchant.id, 200);
        paid_and_overdue.time_expire = Utc::now() - Duration::minutes(1);
        let (paid, _) = api.process_new_order(paid_and_overdue).await.expect("Error processing order");
        api.confirm_payment(&paid.trade_no, PaymentConfirmation::default())
            .await
            .expect("Error confirming payment")
            .expect("Transition must happen");

        let (fresh, _) = api.process_new_order(sample_order(merchant.id, 300)).await.expect("Error processing order");

        let expired = api.expired_orders(Utc::now()).await.expect("Error fetching expired orders");
        let trade_nos = expired.iter().map(|o| o.trade_no.clone()).collect::<Vec<_>>();
        assert!(trade_nos.contains(&overdue.trade_no));
        assert!(!trade_nos.contains(&paid.trade_no));
        assert!(!trade_nos.contains(&fresh.trade_no));
        tear_down(api).await;
    });
}

#[test]
fn expiry_extension_never_decreases() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let api = setup().await;
        let merchant = seed_merchant(api.db()).await;
        let (order, _) = api.process_new_order(sample_order(merchant.id, 500)).await.expect("Error processing order");

        let later = Utc::now() + Duration::minutes(30);
        let extended = api.extend_expiry(&order.trade_no, later).await.expect("Error extending expiry");
        assert!(extended.time_expire > order.time_expire);

        let earlier = Utc::now() + Duration::minutes(5);
        let unchanged = api.extend_expiry(&order.trade_no, earlier).await.expect("Error extending expiry");
        assert_eq!(unchanged.time_expire, extended.time_expire);
        tear_down(api).await;
    });
}

#[test]
fn transaction_id_is_write_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let api = setup().await;
        let merchant = seed_merchant(api.db()).await;
        let (order, _) = api.process_new_order(sample_order(merchant.id, 700)).await.expect("Error processing order");

        let refreshed = api
            .refresh_trade_state(&order.trade_no, "USERPAYING", Some("4200000001202406100111"))
            .await
            .expect("Error refreshing trade state");
        assert_eq!(refreshed.trade_state.as_deref(), Some("USERPAYING"));
        assert_eq!(refreshed.transaction_id.as_deref(), Some("4200000001202406100111"));
        // an order that has a gateway transaction id keeps it
        assert_eq!(refreshed.status, PaymentOrderStatus::Init);

        let refreshed = api
            .refresh_trade_state(&order.trade_no, "NOTPAY", Some("4200000001202406100222"))
            .await
            .expect("Error refreshing trade state");
        assert_eq!(refreshed.trade_state.as_deref(), Some("NOTPAY"));
        assert_eq!(refreshed.transaction_id.as_deref(), Some("4200000001202406100111"));
        tear_down(api).await;
    });
}

#[test]
fn search_orders_by_filter() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let api = setup().await;
        let merchant = seed_merchant(api.db()).await;

        let (a, _) = api.process_new_order(sample_order(merchant.id, 1_000)).await.expect("Error processing order");
        let mut jsapi = sample_order(merchant.id, 2_000);
        jsapi.trade_type = TradeType::Jsapi;
        jsapi.openid = Some("oUpF8uMuAJO_M2pxb1Q9zNjWeS6o".into());
        let (b, _) = api.process_new_order(jsapi).await.expect("Error processing order");
        api.confirm_payment(&b.trade_no, PaymentConfirmation::default())
            .await
            .expect("Error confirming payment")
            .expect("Transition must happen");

        let query = OrderQueryFilter::default().with_trade_no(a.trade_no.clone());
        let found = api.search_orders(query).await.expect("Error searching orders");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        let query = OrderQueryFilter::default().with_status(PaymentOrderStatus::Success);
        let found = api.search_orders(query).await.expect("Error searching orders");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b.id);

        let query = OrderQueryFilter::default()
            .with_merchant_id(merchant.id)
            .with_trade_type(TradeType::Jsapi)
            .with_openid("oUpF8uMuAJO_M2pxb1Q9zNjWeS6o".to_string());
        let found = api.search_orders(query).await.expect("Error searching orders");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b.id);

        let query = OrderQueryFilter::default()
            .since(Utc::now() - Duration::hours(1))
            .expect("Valid timestamp")
            .until(Utc::now() + Duration::hours(1))
            .expect("Valid timestamp");
        let found = api.search_orders(query).await.expect("Error searching orders");
        assert_eq!(found.len(), 2);
        tear_down(api).await;
    });
}

#[test]
fn close_order_removes_the_row() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let api = setup().await;
        let merchant = seed_merchant(api.db()).await;
        let (order, _) = api.process_new_order(sample_order(merchant.id, 4_200)).await.expect("Error processing order");

        let closed = api.close_order(&order.trade_no).await.expect("Error closing order");
        assert_eq!(closed.id, order.id);

        let gone = api.fetch_order(&order.trade_no).await.expect("Error fetching order");
        assert!(gone.is_none());

        let err = api.close_order(&order.trade_no).await.expect_err("Closing a missing order must fail");
        assert!(matches!(err, PaymentFlowError::OrderNotFound(_)));
        tear_down(api).await;
    });
}
