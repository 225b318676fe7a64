//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests:
//! ```nocompile
//!     fn my_handler() -> impl Responder {
//!         std::thread::sleep(Duration::from_secs(5)); // <-- Bad practice! Will cause the current worker thread to
//! hang!
//!     }
//! ```
//! For this reason, any long, non-cpu-bound operation (e.g. I/O, database operations, etc.) should be expressed as
//! futures or asynchronous functions. Async handlers get executed concurrently by worker threads and thus don’t block
//! execution:
//!
//! ```nocompile
//!     async fn my_handler() -> impl Responder {
//!         tokio::time::sleep(Duration::from_secs(5)).await; // <-- Ok. Worker thread will handle other requests here
//!     }
//! ```
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::*;
use payment_bridge_engine::{
    db_types::{RefundNo, TradeNo},
    order_objects::OrderQueryFilter,
    traits::{MerchantManagement, OrderManagement, PaymentBridgeDatabase},
    BillApi,
    MerchantApi,
    OrderFlowApi,
    RefundFlowApi,
};
use serde_json::json;

use crate::{
    config::{ServerConfig, ServerOptions},
    data_objects::{
        JsonResponse,
        MerchantRegistration,
        MerchantSummary,
        OrderCreationRequest,
        RefundSubmission,
        TransferSubmission,
        ValidityUpdate,
    },
    errors::ServerError,
    helpers::get_remote_ip,
    integrations::{wechat, WxPayGatewayFactory},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal) => {
        paste::paste! { pub struct [<$name:camel Route>];}
        paste::paste! {
                impl [<$name:camel Route>] {
                #[allow(clippy::new_without_default)]
                pub fn new() -> Self { Self }
            }
        }
        paste::paste! {
            impl actix_web::dev::HttpServiceFactory for [<$name:camel Route>] {
                fn register(self, config: &mut actix_web::dev::AppService) {
                    let res = actix_web::Resource::new($path)
                        .name(stringify!($name))
                        .guard(actix_web::guard::$method())
                        .to($name);
                    actix_web::dev::HttpServiceFactory::register(res, config);
                }
            }
        }
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(create_order => Post "/order" impl PaymentBridgeDatabase, WxPayGatewayFactory);
/// Route handler for the order creation endpoint
///
/// The order is saved with INIT status before the gateway sees it, so the payment callback can
/// never race an order that does not exist yet. The response carries the stored order together
/// with the channel-specific parameters the client SDK needs to start the payment.
pub async fn create_order<B: PaymentBridgeDatabase, G: WxPayGatewayFactory>(
    req: HttpRequest,
    body: web::Json<OrderCreationRequest>,
    orders: web::Data<OrderFlowApi<B>>,
    merchants: web::Data<MerchantApi<B>>,
    gateways: web::Data<G>,
    config: web::Data<ServerConfig>,
    options: web::Data<ServerOptions>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    debug!("💻️ POST create order for {request:?}");
    let client_ip = get_remote_ip(&req, options.as_ref()).map(|ip| ip.to_string());
    let result = wechat::create_payment_order(
        request,
        client_ip,
        orders.as_ref(),
        merchants.as_ref(),
        gateways.as_ref(),
        config.as_ref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

route!(order_status => Get "/order/{trade_no}" impl OrderManagement);
pub async fn order_status<B: OrderManagement>(
    path: web::Path<String>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let trade_no = TradeNo(path.into_inner());
    debug!("💻️ GET order status for {trade_no}");
    let order = api.fetch_order(&trade_no).await.map_err(|e| {
        debug!("💻️ Could not fetch order {trade_no}. {e}");
        ServerError::BackendError(e.to_string())
    })?;
    match order {
        Some(order) => Ok(HttpResponse::Ok().json(order)),
        None => Err(ServerError::NoRecordFound(format!("No order with trade number {trade_no}"))),
    }
}

route!(order_search => Get "/search/orders" impl OrderManagement);
pub async fn order_search<B: OrderManagement>(
    query: web::Query<OrderQueryFilter>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let query = query.into_inner();
    debug!("💻️ GET orders search for [{query:?}]");
    let orders = api.search_orders(query).await.map_err(|e| {
        debug!("💻️ Could not fetch orders. {e}");
        ServerError::BackendError(e.to_string())
    })?;
    Ok(HttpResponse::Ok().json(orders))
}

route!(close_order => Post "/order/{trade_no}/close" impl PaymentBridgeDatabase, WxPayGatewayFactory);
/// Route handler for closing an order upstream
///
/// The local order record is deleted first, then the gateway is told to close the trade. A gateway
/// failure is logged and reported in the response message, but does not resurrect the local order.
pub async fn close_order<B: PaymentBridgeDatabase, G: WxPayGatewayFactory>(
    path: web::Path<String>,
    orders: web::Data<OrderFlowApi<B>>,
    merchants: web::Data<MerchantApi<B>>,
    gateways: web::Data<G>,
) -> Result<HttpResponse, ServerError> {
    let trade_no = TradeNo(path.into_inner());
    debug!("💻️ POST close order {trade_no}");
    let closed_upstream =
        wechat::close_payment_order(&trade_no, orders.as_ref(), merchants.as_ref(), gateways.as_ref()).await?;
    let response = if closed_upstream {
        JsonResponse::success(format!("Order {trade_no} closed"))
    } else {
        JsonResponse::success(format!("Order {trade_no} removed locally, but the gateway close call failed"))
    };
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Refunds  ----------------------------------------------------
route!(create_refund => Post "/refund" impl PaymentBridgeDatabase, WxPayGatewayFactory);
/// Route handler for raising a refund against an existing order
///
/// The refund is persisted in PROCESSING before the gateway call, and the refund status sweep
/// reconciles it if the gateway call fails here.
pub async fn create_refund<B: PaymentBridgeDatabase, G: WxPayGatewayFactory>(
    body: web::Json<RefundSubmission>,
    refunds: web::Data<RefundFlowApi<B>>,
    merchants: web::Data<MerchantApi<B>>,
    gateways: web::Data<G>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    let submission = body.into_inner();
    debug!("💻️ POST create refund for trade {}", submission.trade_no);
    let refund = wechat::create_refund_order(
        submission,
        refunds.as_ref(),
        merchants.as_ref(),
        gateways.as_ref(),
        config.as_ref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(refund))
}

route!(refund_status => Get "/refund/{refund_no}" impl PaymentBridgeDatabase);
pub async fn refund_status<B: PaymentBridgeDatabase>(
    path: web::Path<String>,
    api: web::Data<RefundFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let refund_no = RefundNo(path.into_inner());
    debug!("💻️ GET refund status for {refund_no}");
    let refund = api.fetch_refund(&refund_no).await.map_err(|e| {
        debug!("💻️ Could not fetch refund {refund_no}. {e}");
        ServerError::BackendError(e.to_string())
    })?;
    let refund = match refund {
        Some(refund) => refund,
        None => return Err(ServerError::NoRecordFound(format!("No refund with refund number {refund_no}"))),
    };
    let goods = api.goods_for_refund(refund.id).await.map_err(|e| {
        debug!("💻️ Could not fetch goods detail for refund {refund_no}. {e}");
        ServerError::BackendError(e.to_string())
    })?;
    Ok(HttpResponse::Ok().json(json!({ "refund": refund, "goods": goods })))
}

//----------------------------------------------   Merchants  ----------------------------------------------------
route!(register_merchant => Post "/merchant" impl MerchantManagement);
/// Route handler for registering or updating a merchant account
///
/// Key material is stored, never echoed. The response is the summary view without secrets.
pub async fn register_merchant<B: MerchantManagement>(
    body: web::Json<MerchantRegistration>,
    api: web::Data<MerchantApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let registration = body.into_inner();
    debug!("💻️ POST register merchant {registration:?}");
    let merchant = api.register_merchant(registration.into()).await.map_err(|e| {
        debug!("💻️ Could not register merchant. {e}");
        ServerError::BackendError(e.to_string())
    })?;
    Ok(HttpResponse::Ok().json(MerchantSummary::from(&merchant)))
}

route!(merchant_validity => Post "/merchant/{mch_id}/validity" impl MerchantManagement);
pub async fn merchant_validity<B: MerchantManagement>(
    path: web::Path<String>,
    body: web::Json<ValidityUpdate>,
    api: web::Data<MerchantApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let mch_id = path.into_inner();
    let update = body.into_inner();
    debug!("💻️ POST set merchant {mch_id} validity to {}", update.valid);
    let merchant = api.set_validity(&mch_id, update.valid).await?;
    Ok(HttpResponse::Ok().json(MerchantSummary::from(&merchant)))
}

//----------------------------------------------   Bills  ----------------------------------------------------
route!(merchant_bills => Get "/bills/{mch_id}" impl PaymentBridgeDatabase);
pub async fn merchant_bills<B: PaymentBridgeDatabase>(
    path: web::Path<String>,
    merchants: web::Data<MerchantApi<B>>,
    bills: web::Data<BillApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let mch_id = path.into_inner();
    debug!("💻️ GET bills for merchant {mch_id}");
    let merchant = merchants.resolve_merchant(Some(&mch_id)).await?;
    let records = bills.bills_for_merchant(merchant.id).await.map_err(|e| {
        debug!("💻️ Could not fetch bill records for {mch_id}. {e}");
        ServerError::BackendError(e.to_string())
    })?;
    Ok(HttpResponse::Ok().json(records))
}

//----------------------------------------------   Transfers  ----------------------------------------------------
route!(submit_transfer => Post "/transfer" impl MerchantManagement, WxPayGatewayFactory);
/// Route handler for submitting a transfer batch to the gateway
///
/// Nothing is persisted locally. The gateway response, or a typed error, goes straight back to
/// the caller.
pub async fn submit_transfer<B: MerchantManagement, G: WxPayGatewayFactory>(
    body: web::Json<TransferSubmission>,
    merchants: web::Data<MerchantApi<B>>,
    gateways: web::Data<G>,
) -> Result<HttpResponse, ServerError> {
    let submission = body.into_inner();
    debug!("💻️ POST transfer batch {}", submission.batch.out_batch_no);
    let response = wechat::submit_transfer_batch(submission, merchants.as_ref(), gateways.as_ref()).await?;
    Ok(HttpResponse::Ok().json(response))
}
