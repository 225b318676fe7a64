use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use payment_bridge_engine::{
    events::EventProducers,
    BillApi,
    FsObjectStore,
    MerchantApi,
    OrderFlowApi,
    RefundFlowApi,
    SqliteDatabase,
};

use crate::{
    config::{ServerConfig, ServerOptions},
    errors::ServerError,
    integrations::{wechat::create_wechat_event_handlers, ApiGatewayFactory, WxPayGatewayFactory},
    locks::NotifyLocks,
    notify_routes::{LegacyPaymentNotifyRoute, PaymentNotifyRoute, RefundNotifyRoute},
    routes::{
        health,
        CloseOrderRoute,
        CreateOrderRoute,
        CreateRefundRoute,
        MerchantBillsRoute,
        MerchantValidityRoute,
        OrderSearchRoute,
        OrderStatusRoute,
        RefundStatusRoute,
        RegisterMerchantRoute,
        SubmitTransferRoute,
    },
    workers::{start_bill_download_worker, start_order_expiry_worker, start_refund_poll_worker},
};

/// Builds the database, event pipeline, reconciliation workers and HTTP server from the given
/// configuration, then runs the server until it is shut down.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let handlers = create_wechat_event_handlers();
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let gateways = ApiGatewayFactory::new(config.wxpay.clone());
    let store = FsObjectStore::new(config.bill_storage_dir.clone());
    start_order_expiry_worker(db.clone(), producers.clone(), gateways.clone(), config.order_sweep_interval);
    start_refund_poll_worker(db.clone(), producers.clone(), gateways.clone(), config.refund_sweep_interval);
    start_bill_download_worker(db.clone(), store, gateways.clone(), config.bill_sweep_interval, config.bill_window_days);
    let srv = create_server_instance(config, db, producers, gateways)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// Builds the HTTP server instance. The gateway factory is generic so that integration tests can
/// run the full server against a scripted gateway.
pub fn create_server_instance<G: WxPayGatewayFactory>(
    config: ServerConfig,
    db: SqliteDatabase,
    producers: EventProducers,
    gateways: G,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let locks = NotifyLocks::new();
    let srv = HttpServer::new(move || {
        let orders_api = OrderFlowApi::new(db.clone(), producers.clone());
        let refunds_api = RefundFlowApi::new(db.clone(), producers.clone());
        let merchants_api = MerchantApi::new(db.clone());
        let bills_api = BillApi::new(db.clone());
        let options = ServerOptions::from_config(&config);
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("wpb::access_log"))
            .app_data(web::Data::new(orders_api))
            .app_data(web::Data::new(refunds_api))
            .app_data(web::Data::new(merchants_api))
            .app_data(web::Data::new(bills_api))
            .app_data(web::Data::new(gateways.clone()))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(options))
            .app_data(web::Data::new(locks.clone()));
        // Management routes for the platform
        let api_scope = web::scope("/api")
            .service(CreateOrderRoute::<SqliteDatabase, G>::new())
            .service(OrderStatusRoute::<SqliteDatabase>::new())
            .service(OrderSearchRoute::<SqliteDatabase>::new())
            .service(CloseOrderRoute::<SqliteDatabase, G>::new())
            .service(CreateRefundRoute::<SqliteDatabase, G>::new())
            .service(RefundStatusRoute::<SqliteDatabase>::new())
            .service(RegisterMerchantRoute::<SqliteDatabase>::new())
            .service(MerchantValidityRoute::<SqliteDatabase>::new())
            .service(MerchantBillsRoute::<SqliteDatabase>::new())
            .service(SubmitTransferRoute::<SqliteDatabase, G>::new());
        // Notification routes for the gateway. These never answer with an HTTP error; the
        // channel envelope carries success or failure.
        let notify_scope = web::scope("/wxpay")
            .service(PaymentNotifyRoute::<SqliteDatabase>::new())
            .service(LegacyPaymentNotifyRoute::<SqliteDatabase>::new())
            .service(RefundNotifyRoute::<SqliteDatabase>::new());
        app.service(health).service(api_scope).service(notify_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
