//! WeChat Pay integration
//!
//! Everything that turns a platform request into gateway traffic lives here: the per-merchant
//! gateway factory, order creation against the unified-order endpoints, refund initiation, order
//! close, transfer batches, and the field mapping between gateway payloads and engine updates.
//! The notification routes and the reconciliation sweeps both lean on the mapping helpers at the
//! bottom of this module, so the two delivery paths cannot drift apart.
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use log::*;
use payment_bridge_engine::{
    db_types::{refund_status, Merchant, NewPaymentOrder, NewRefundOrder, PaymentOrder, RefundNo, RefundOrder, TradeNo, TradeType},
    events::{EventHandlers, EventHooks},
    traits::{MerchantManagement, PaymentBridgeDatabase, RefundUpdate},
    MerchantApi,
    OrderFlowApi,
    PaymentFlowError,
    RefundFlowApi,
};
use wpb_common::Secret;
use wxpay_tools::{
    MerchantCredentials,
    PrepayResponse,
    RefundAmountSpec,
    RefundGoods,
    RefundRequest,
    RefundResponse,
    TradeId,
    TransferBatchResponse,
    UnifiedOrderRequest,
    WxPayApi,
    WxPayApiError,
    WxPayConfig,
    WxPayGateway,
};

use crate::{
    config::ServerConfig,
    data_objects::{ClientPayParams, OrderCreationRequest, PaymentOrderResult, RefundGoodsSpec, RefundSubmission, TransferSubmission},
};

pub const WECHAT_EVENT_BUFFER_SIZE: usize = 25;
/// How long a prepay handle from the gateway stays usable. The gateway documents two hours for
/// every channel.
pub const PREPAY_HANDLE_TTL_HOURS: i64 = 2;

//----------------------------------------   Gateway factory  ---------------------------------------------------------

/// Hands out a gateway client bound to one merchant's credentials. Handlers and sweeps are
/// generic over this seam, so tests can substitute a scripted gateway without real key material.
pub trait WxPayGatewayFactory: Clone + Send + Sync + 'static {
    type Gateway: WxPayGateway + Send + Sync;

    fn gateway_for(&self, merchant: &Merchant) -> Result<Arc<Self::Gateway>, PaymentFlowError>;
}

/// The production factory. A client is built per call from the merchant's stored credentials, so
/// a credential rotation takes effect on the next request without a restart.
#[derive(Clone)]
pub struct ApiGatewayFactory {
    config: WxPayConfig,
}

impl ApiGatewayFactory {
    pub fn new(config: WxPayConfig) -> Self {
        Self { config }
    }
}

impl WxPayGatewayFactory for ApiGatewayFactory {
    type Gateway = WxPayApi;

    fn gateway_for(&self, merchant: &Merchant) -> Result<Arc<WxPayApi>, PaymentFlowError> {
        let credentials = merchant_credentials(merchant)?;
        let api =
            WxPayApi::new(self.config.clone(), credentials).map_err(|e| PaymentFlowError::Credentials(e.to_string()))?;
        Ok(Arc::new(api))
    }
}

/// Builds the signing credentials from a merchant row. Merchants must be registered with a full
/// credential set; a merchant without RSA keys can receive callbacks but cannot originate
/// gateway calls, and this is where that surfaces.
pub fn merchant_credentials(merchant: &Merchant) -> Result<MerchantCredentials, PaymentFlowError> {
    MerchantCredentials::try_from_parts(
        &merchant.mch_id,
        &merchant.app_id,
        Secret::new(merchant.api_key.clone()),
        merchant.serial_no.as_deref().unwrap_or_default(),
        merchant.private_key_pem.as_deref().unwrap_or_default(),
    )
    .map_err(|e| PaymentFlowError::Credentials(e.to_string()))
}

//----------------------------------------   Order creation  ----------------------------------------------------------

/// Creates a payment order and obtains its prepay handle from the gateway.
///
/// The order row is committed before the gateway call, so the payment callback can never arrive
/// for an order we do not know about. If the gateway rejects the trade or answers without a
/// prepay handle, the order stays in INIT with its request snapshot recorded; the expired-order
/// sweep takes it from there.
pub async fn create_payment_order<B, G>(
    request: OrderCreationRequest,
    client_ip: Option<String>,
    orders: &OrderFlowApi<B>,
    merchants: &MerchantApi<B>,
    gateways: &G,
    config: &ServerConfig,
) -> Result<PaymentOrderResult, PaymentFlowError>
where
    B: PaymentBridgeDatabase,
    G: WxPayGatewayFactory,
{
    validate_order_request(&request, client_ip.as_deref())?;
    let merchant = merchants.resolve_merchant(request.mch_id.as_deref()).await?;
    let gateway = gateways.gateway_for(&merchant)?;
    let mut new_order =
        NewPaymentOrder::new(merchant.id, request.trade_type, request.amount, request.description.clone(), "");
    new_order.notify_url = notify_url_for(config, request.trade_type, &new_order.trade_no);
    new_order.openid = request.openid.clone();
    new_order.attach = request.attach.clone();
    new_order.client_ip = client_ip;
    let (order, created) = orders.process_new_order(new_order).await?;
    if !created {
        info!("📡️ Order {} was already on record. Resubmitting it to the gateway.", order.trade_no);
    }
    let unified = unified_request_for(&order);
    let request_snapshot = serde_json::to_string(&unified).ok();
    let response = match create_prepay(gateway.as_ref(), order.trade_type, &unified).await {
        Ok(response) => response,
        Err(e) => {
            warn!("📡️ The gateway rejected order {}. {e}", order.trade_no);
            let _ = orders.record_gateway_exchange(&order.trade_no, request_snapshot.as_deref(), None).await;
            return Err(PaymentFlowError::Gateway(e.to_string()));
        },
    };
    let response_snapshot = serde_json::to_string(&response).ok();
    let order = orders
        .record_gateway_exchange(&order.trade_no, request_snapshot.as_deref(), response_snapshot.as_deref())
        .await?;
    let handle = prepay_handle(order.trade_type, &response)?;
    let expire = Utc::now() + Duration::hours(PREPAY_HANDLE_TTL_HOURS);
    let order = orders.store_prepay_handle(&order.trade_no, &handle, Some(expire)).await?;
    let pay_params = client_pay_params(gateway.as_ref(), &order, &response, &handle)?;
    info!("📡️ Order {} is ready for payment via {}", order.trade_no, order.trade_type);
    Ok(PaymentOrderResult { order, pay_params })
}

fn validate_order_request(request: &OrderCreationRequest, client_ip: Option<&str>) -> Result<(), PaymentFlowError> {
    if !request.amount.is_positive() {
        return Err(PaymentFlowError::PaymentParameter("The order amount must be positive".into()));
    }
    match request.trade_type {
        TradeType::Jsapi if request.openid.as_deref().map_or(true, |s| s.trim().is_empty()) => {
            Err(PaymentFlowError::PaymentParameter("JSAPI orders require the payer's openid".into()))
        },
        TradeType::Mweb if client_ip.is_none() => Err(PaymentFlowError::PaymentParameter(
            "MWEB orders require the client IP, and none could be determined from the connection".into(),
        )),
        _ => Ok(()),
    }
}

fn unified_request_for(order: &PaymentOrder) -> UnifiedOrderRequest {
    UnifiedOrderRequest {
        out_trade_no: order.trade_no.as_str().to_string(),
        description: order.description.clone(),
        amount: order.amount,
        currency: order.currency.clone(),
        notify_url: order.notify_url.clone(),
        time_expire: Some(order.time_expire),
        attach: order.attach.clone(),
        payer_openid: order.openid.clone(),
        client_ip: order.client_ip.clone(),
    }
}

async fn create_prepay<W: WxPayGateway>(
    gateway: &W,
    trade_type: TradeType,
    request: &UnifiedOrderRequest,
) -> Result<PrepayResponse, WxPayApiError> {
    match trade_type {
        TradeType::Jsapi => gateway.create_jsapi_order(request).await,
        TradeType::Native => gateway.create_native_order(request).await,
        TradeType::App => gateway.create_app_order(request).await,
        TradeType::Mweb => gateway.create_h5_order(request).await,
    }
}

fn prepay_handle(trade_type: TradeType, response: &PrepayResponse) -> Result<String, PaymentFlowError> {
    let handle = match trade_type {
        TradeType::Jsapi | TradeType::App | TradeType::Mweb => response.prepay_id.clone(),
        TradeType::Native => response.code_url.clone(),
    };
    handle.ok_or_else(|| {
        PaymentFlowError::PaymentParameter(format!(
            "The gateway accepted a {trade_type} trade but returned no prepay handle"
        ))
    })
}

fn client_pay_params<W: WxPayGateway>(
    gateway: &W,
    order: &PaymentOrder,
    response: &PrepayResponse,
    handle: &str,
) -> Result<ClientPayParams, PaymentFlowError> {
    let params = match order.trade_type {
        TradeType::Jsapi => ClientPayParams::Jsapi(gateway.jsapi_pay_params(handle)),
        TradeType::Native => ClientPayParams::Native { code_url: handle.to_string() },
        TradeType::App => ClientPayParams::App(gateway.app_pay_params(handle)),
        TradeType::Mweb => {
            let h5_url = response.h5_url.clone().ok_or_else(|| {
                PaymentFlowError::PaymentParameter("The gateway accepted an MWEB trade but returned no h5_url".into())
            })?;
            ClientPayParams::Mweb { h5_url }
        },
    };
    Ok(params)
}

//----------------------------------------   Refund initiation  -------------------------------------------------------

/// Raises a refund and submits it to the gateway synchronously.
///
/// The refund row is committed in PROCESSING before the gateway call. If the gateway call fails,
/// the caller gets the error but the refund stays on record, and the refund status sweep settles
/// it on a later pass. Resubmitting an existing refund number returns the stored refund without
/// contacting the gateway again.
pub async fn create_refund_order<B, G>(
    submission: RefundSubmission,
    refunds: &RefundFlowApi<B>,
    merchants: &MerchantApi<B>,
    gateways: &G,
    config: &ServerConfig,
) -> Result<RefundOrder, PaymentFlowError>
where
    B: PaymentBridgeDatabase,
    G: WxPayGatewayFactory,
{
    let merchant = merchants.resolve_merchant(submission.mch_id.as_deref()).await?;
    let mut new_refund = NewRefundOrder::new(
        TradeNo(submission.trade_no.clone()),
        merchant.id,
        submission.amount,
        submission.total,
    );
    new_refund.reason = submission.reason.clone();
    new_refund.notify_url = Some(refund_notify_url_for(config, &new_refund.refund_no));
    new_refund.goods = submission.goods.iter().cloned().map(Into::into).collect();
    let (refund, created) = refunds.process_new_refund(new_refund).await?;
    if !created {
        info!("💸️ Refund {} was already on record. Not resubmitting it to the gateway.", refund.refund_no);
        return Ok(refund);
    }
    let gateway = gateways.gateway_for(&merchant)?;
    let request = refund_request_for(&refund, &submission.goods);
    let response = match gateway.create_refund(&request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(
                "💸️ The gateway rejected refund {}. It stays in PROCESSING and the refund sweep will reconcile it. \
                 {e}",
                refund.refund_no
            );
            return Err(PaymentFlowError::Gateway(e.to_string()));
        },
    };
    let snapshot = serde_json::to_string(&response).unwrap_or_default();
    refunds.record_gateway_response(&refund.refund_no, &snapshot).await?;
    let refund = refunds.apply_update(&refund.refund_no, refund_update_from_response(&response)).await?;
    info!("💸️ Refund {} submitted to the gateway. Status: {}", refund.refund_no, refund.status);
    Ok(refund)
}

fn refund_request_for(refund: &RefundOrder, goods: &[RefundGoodsSpec]) -> RefundRequest {
    let goods_detail = goods
        .iter()
        .map(|g| RefundGoods {
            merchant_goods_id: g.goods_id.clone(),
            goods_name: g.goods_name.clone(),
            unit_price: g.unit_price,
            refund_amount: g.refund_amount,
            refund_quantity: g.quantity as i32,
        })
        .collect();
    RefundRequest {
        trade_id: TradeId::OutTradeNo(refund.trade_no.as_str().to_string()),
        out_refund_no: refund.refund_no.as_str().to_string(),
        reason: refund.reason.clone(),
        notify_url: refund.notify_url.clone(),
        amount: RefundAmountSpec { total: refund.total, refund: refund.amount, currency: refund.currency.clone() },
        goods_detail,
    }
}

//----------------------------------------   Order close  -------------------------------------------------------------

/// Deletes a local order and tells the gateway to close the trade. The local delete is the
/// authoritative action; a failed gateway close is logged and reported as `false`, never rolled
/// back.
pub async fn close_payment_order<B, G>(
    trade_no: &TradeNo,
    orders: &OrderFlowApi<B>,
    merchants: &MerchantApi<B>,
    gateways: &G,
) -> Result<bool, PaymentFlowError>
where
    B: PaymentBridgeDatabase,
    G: WxPayGatewayFactory,
{
    let order = orders.close_order(trade_no).await?;
    let merchant = match merchants.merchant_by_id(order.merchant_id).await? {
        Some(merchant) => merchant,
        None => {
            warn!("🗑️ Order {trade_no} was removed, but merchant {} is gone. Skipping the gateway close.", order.merchant_id);
            return Ok(false);
        },
    };
    let gateway = match gateways.gateway_for(&merchant) {
        Ok(gateway) => gateway,
        Err(e) => {
            warn!("🗑️ Order {trade_no} was removed, but no gateway client could be built. {e}");
            return Ok(false);
        },
    };
    match gateway.close_order(trade_no.as_str()).await {
        Ok(()) => {
            info!("🗑️ Order {trade_no} closed at the gateway");
            Ok(true)
        },
        Err(e) => {
            warn!("🗑️ Order {trade_no} was removed locally, but the gateway close failed. {e}");
            Ok(false)
        },
    }
}

//----------------------------------------   Transfers  ---------------------------------------------------------------

/// Submits a batch transfer to user wallets. Nothing is persisted; the gateway response or a
/// typed error goes straight back to the caller.
pub async fn submit_transfer_batch<B, G>(
    submission: TransferSubmission,
    merchants: &MerchantApi<B>,
    gateways: &G,
) -> Result<TransferBatchResponse, PaymentFlowError>
where
    B: MerchantManagement,
    G: WxPayGatewayFactory,
{
    let merchant = merchants.resolve_merchant(submission.mch_id.as_deref()).await?;
    let gateway = gateways.gateway_for(&merchant)?;
    let response = gateway
        .create_transfer_batch(&submission.batch)
        .await
        .map_err(|e| PaymentFlowError::Gateway(e.to_string()))?;
    info!("📡️ Transfer batch {} accepted as {}", response.out_batch_no, response.batch_id);
    Ok(response)
}

//----------------------------------------   Field mapping  -----------------------------------------------------------

/// Builds the engine-side update from a refund creation or refund query response.
pub fn refund_update_from_response(response: &RefundResponse) -> RefundUpdate {
    RefundUpdate {
        refund_id: response.refund_id.clone(),
        channel: response.channel.clone(),
        user_received_account: response.user_received_account.clone(),
        success_time: response.success_time.as_deref().and_then(parse_gateway_timestamp),
        status: response.status.as_deref().map(|s| map_refund_status(s).to_string()),
    }
}

/// Folds the legacy channel's refund vocabulary onto the stored one. The modern channel's values
/// pass through untouched.
pub fn map_refund_status(raw: &str) -> &str {
    match raw {
        "REFUNDCLOSE" => refund_status::CLOSED,
        "CHANGE" => refund_status::ABNORMAL,
        other => other,
    }
}

/// The gateway emits RFC 3339 timestamps on the JSON channel and `yyyyMMddHHmmss` in China
/// Standard Time on the legacy one. Both land here.
pub fn parse_gateway_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S").ok()?;
    let cst = FixedOffset::east_opt(8 * 3600)?;
    cst.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc))
}

//----------------------------------------   Notify URLs  -------------------------------------------------------------

/// The callback URL stored on a new order. MWEB trades run on the legacy XML channel, so their
/// callbacks land on the legacy route; every other trade type uses the JSON route.
pub fn notify_url_for(config: &ServerConfig, trade_type: TradeType, trade_no: &TradeNo) -> String {
    match trade_type {
        TradeType::Mweb => format!("{}/wxpay/notify/legacy/{trade_no}", config.notify_base_url),
        _ => format!("{}/wxpay/notify/{trade_no}", config.notify_base_url),
    }
}

pub fn refund_notify_url_for(config: &ServerConfig, refund_no: &RefundNo) -> String {
    format!("{}/wxpay/notify/refund/{refund_no}", config.notify_base_url)
}

//----------------------------------------   Event handlers  ----------------------------------------------------------

/// Wires up the event subscribers for the server. Fulfilment and customer notification systems
/// subscribe here in a full deployment; the server itself records the transitions in the log.
pub fn create_wechat_event_handlers() -> EventHandlers {
    let mut hooks = EventHooks::default();
    hooks.on_payment_succeeded(|ev| {
        let order = ev.order;
        let transaction_id = ev.confirmation.transaction_id.unwrap_or_else(|| "<none>".to_string());
        Box::pin(async move {
            info!(
                "📬️ Payment confirmed for order {} under merchant {}. Amount: {}. Gateway transaction: {transaction_id}",
                order.trade_no, order.merchant_id, order.amount
            );
        })
    });
    hooks.on_refund_succeeded(|ev| {
        let refund = ev.refund;
        Box::pin(async move {
            info!(
                "📬️ Refund {} for trade {} has been paid out. Amount: {}",
                refund.refund_no, refund.trade_no, refund.amount
            );
        })
    });
    EventHandlers::new(WECHAT_EVENT_BUFFER_SIZE, hooks)
}
