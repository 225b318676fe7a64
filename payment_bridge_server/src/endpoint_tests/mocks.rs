use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use mockall::mock;
use payment_bridge_engine::{
    db_types::{
        BillCategory,
        BillRecord,
        Fen,
        Merchant,
        NewBillRecord,
        NewMerchant,
        NewPaymentOrder,
        NewRefundOrder,
        PaymentConfirmation,
        PaymentOrder,
        PaymentOrderStatus,
        RefundGoodsItem,
        RefundNo,
        RefundOrder,
        TradeNo,
        TradeType,
    },
    order_objects::OrderQueryFilter,
    traits::{
        BillApiError,
        BillManagement,
        MerchantApiError,
        MerchantManagement,
        OrderApiError,
        OrderManagement,
        PaymentBridgeDatabase,
        PaymentBridgeError,
        RefundApiError,
        RefundManagement,
        RefundUpdate,
    },
    PaymentFlowError,
};
use wxpay_tools::{
    AppPayParams,
    BillDownloadInfo,
    JsapiPayParams,
    OrderQueryResponse,
    PrepayResponse,
    RefundRequest,
    RefundResponse,
    TransferBatchRequest,
    TransferBatchResponse,
    UnifiedOrderRequest,
    WxPayApiError,
    WxPayGateway,
};

use crate::integrations::WxPayGatewayFactory;

mock! {
    pub Bridge {}
    impl OrderManagement for Bridge {
        async fn insert_order(&self, order: NewPaymentOrder) -> Result<(PaymentOrder, bool), OrderApiError>;
        async fn fetch_order_by_trade_no(&self, trade_no: &TradeNo) -> Result<Option<PaymentOrder>, OrderApiError>;
        async fn fetch_order_by_id(&self, id: i64) -> Result<Option<PaymentOrder>, OrderApiError>;
        async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<PaymentOrder>, OrderApiError>;
        async fn fetch_expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>, OrderApiError>;
        async fn update_prepay_handle(&self, trade_no: &TradeNo, prepay_id: &str, prepay_expire: Option<DateTime<Utc>>) -> Result<PaymentOrder, OrderApiError>;
        async fn record_order_exchange<'a, 'b>(&self, trade_no: &TradeNo, request: Option<&'a str>, response: Option<&'b str>) -> Result<PaymentOrder, OrderApiError>;
        async fn record_payment_callback(&self, trade_no: &TradeNo, payload: &str, received_at: DateTime<Utc>) -> Result<PaymentOrder, OrderApiError>;
        async fn mark_order_paid(&self, trade_no: &TradeNo, confirmation: &PaymentConfirmation) -> Result<Option<PaymentOrder>, OrderApiError>;
        async fn update_trade_state<'a>(&self, trade_no: &TradeNo, trade_state: &str, transaction_id: Option<&'a str>) -> Result<PaymentOrder, OrderApiError>;
        async fn extend_order_expiry(&self, trade_no: &TradeNo, new_expiry: DateTime<Utc>) -> Result<PaymentOrder, OrderApiError>;
        async fn delete_order(&self, trade_no: &TradeNo) -> Result<Option<PaymentOrder>, OrderApiError>;
    }
    impl RefundManagement for Bridge {
        async fn insert_refund(&self, refund: NewRefundOrder) -> Result<(RefundOrder, bool), RefundApiError>;
        async fn fetch_refund_by_refund_no(&self, refund_no: &RefundNo) -> Result<Option<RefundOrder>, RefundApiError>;
        async fn fetch_refunds_for_trade(&self, trade_no: &TradeNo) -> Result<Vec<RefundOrder>, RefundApiError>;
        async fn fetch_goods_for_refund(&self, refund_order_id: i64) -> Result<Vec<RefundGoodsItem>, RefundApiError>;
        async fn fetch_processing_refunds(&self) -> Result<Vec<RefundOrder>, RefundApiError>;
        async fn record_refund_response(&self, refund_no: &RefundNo, payload: &str) -> Result<RefundOrder, RefundApiError>;
        async fn record_refund_callback(&self, refund_no: &RefundNo, payload: &str, received_at: DateTime<Utc>) -> Result<RefundOrder, RefundApiError>;
        async fn apply_refund_update(&self, refund_no: &RefundNo, update: RefundUpdate) -> Result<RefundOrder, RefundApiError>;
        async fn close_refund(&self, refund_no: &RefundNo) -> Result<RefundOrder, RefundApiError>;
    }
    impl MerchantManagement for Bridge {
        async fn upsert_merchant(&self, merchant: NewMerchant) -> Result<Merchant, MerchantApiError>;
        async fn fetch_merchant_by_mch_id(&self, mch_id: &str) -> Result<Option<Merchant>, MerchantApiError>;
        async fn fetch_merchant_by_id(&self, id: i64) -> Result<Option<Merchant>, MerchantApiError>;
        async fn fetch_default_merchant(&self) -> Result<Option<Merchant>, MerchantApiError>;
        async fn fetch_valid_merchants(&self) -> Result<Vec<Merchant>, MerchantApiError>;
        async fn set_merchant_validity(&self, mch_id: &str, valid: bool) -> Result<Merchant, MerchantApiError>;
    }
    impl BillManagement for Bridge {
        async fn bill_exists(&self, merchant_id: i64, bill_date: NaiveDate, category: BillCategory) -> Result<bool, BillApiError>;
        async fn insert_bill(&self, bill: NewBillRecord) -> Result<BillRecord, BillApiError>;
        async fn fetch_bills_for_merchant(&self, merchant_id: i64) -> Result<Vec<BillRecord>, BillApiError>;
    }
    impl PaymentBridgeDatabase for Bridge {
        fn url(&self) -> &str;
        async fn close(&mut self) -> Result<(), PaymentBridgeError>;
    }
}

mock! {
    pub Gateway {}
    impl WxPayGateway for Gateway {
        async fn create_jsapi_order(&self, req: &UnifiedOrderRequest) -> Result<PrepayResponse, WxPayApiError>;
        async fn create_native_order(&self, req: &UnifiedOrderRequest) -> Result<PrepayResponse, WxPayApiError>;
        async fn create_app_order(&self, req: &UnifiedOrderRequest) -> Result<PrepayResponse, WxPayApiError>;
        async fn create_h5_order(&self, req: &UnifiedOrderRequest) -> Result<PrepayResponse, WxPayApiError>;
        async fn query_order(&self, out_trade_no: &str) -> Result<OrderQueryResponse, WxPayApiError>;
        async fn close_order(&self, out_trade_no: &str) -> Result<(), WxPayApiError>;
        async fn create_refund(&self, req: &RefundRequest) -> Result<RefundResponse, WxPayApiError>;
        async fn query_refund(&self, out_refund_no: &str) -> Result<RefundResponse, WxPayApiError>;
        async fn trade_bill(&self, bill_date: NaiveDate, bill_type: &str) -> Result<BillDownloadInfo, WxPayApiError>;
        async fn fund_flow_bill(&self, bill_date: NaiveDate) -> Result<BillDownloadInfo, WxPayApiError>;
        async fn download_bill(&self, download_url: &str) -> Result<Vec<u8>, WxPayApiError>;
        async fn create_transfer_batch(&self, req: &TransferBatchRequest) -> Result<TransferBatchResponse, WxPayApiError>;
        fn jsapi_pay_params(&self, prepay_id: &str) -> JsapiPayParams;
        fn app_pay_params(&self, prepay_id: &str) -> AppPayParams;
    }
}

/// A gateway factory that hands every merchant the same scripted gateway.
#[derive(Clone)]
pub struct MockGatewayFactory {
    gateway: Arc<MockGateway>,
}

impl MockGatewayFactory {
    pub fn new(gateway: MockGateway) -> Self {
        Self { gateway: Arc::new(gateway) }
    }
}

impl WxPayGatewayFactory for MockGatewayFactory {
    type Gateway = MockGateway;

    fn gateway_for(&self, _merchant: &Merchant) -> Result<Arc<MockGateway>, PaymentFlowError> {
        Ok(Arc::clone(&self.gateway))
    }
}

//--------------------------------------      Fixtures      -----------------------------------------------------------

/// The sample API key from the gateway's signature documentation. DO NOT use real key material
/// in tests.
pub const TEST_API_KEY: &str = "192006250b4c09247ec02edce69f6a2d";

pub fn merchant_fixture(id: i64) -> Merchant {
    let now = Utc::now();
    Merchant {
        id,
        mch_id: format!("19000{id:05}"),
        app_id: "wx8888888888888888".to_string(),
        api_key: TEST_API_KEY.to_string(),
        serial_no: None,
        private_key_pem: None,
        platform_cert_pem: None,
        valid: true,
        created_at: now,
        updated_at: now,
    }
}

pub fn order_fixture(trade_no: &TradeNo, merchant_id: i64) -> PaymentOrder {
    let now = Utc::now();
    PaymentOrder {
        id: 1,
        trade_no: trade_no.clone(),
        transaction_id: None,
        merchant_id,
        trade_type: TradeType::Jsapi,
        amount: Fen::from(100),
        currency: "CNY".to_string(),
        description: "widgets".to_string(),
        openid: Some("oUpF8uMuAJO_M2pxb1Q9zNjWeS6o".to_string()),
        attach: None,
        notify_url: format!("https://pay.example.com/wxpay/notify/{trade_no}"),
        client_ip: None,
        time_start: now - chrono::Duration::minutes(25),
        time_expire: now - chrono::Duration::minutes(10),
        prepay_id: Some("wx201410272009395522657a690389285100".to_string()),
        prepay_expire: Some(now + chrono::Duration::hours(1)),
        trade_state: None,
        request_payload: None,
        response_payload: None,
        callback_payload: None,
        callback_at: None,
        success_time: None,
        status: PaymentOrderStatus::Init,
        created_at: now - chrono::Duration::minutes(25),
        updated_at: now - chrono::Duration::minutes(25),
    }
}

pub fn refund_fixture(refund_no: &RefundNo, merchant_id: i64, status: &str) -> RefundOrder {
    let now = Utc::now();
    RefundOrder {
        id: 1,
        refund_no: refund_no.clone(),
        payment_order_id: Some(1),
        trade_no: TradeNo("WPB20260823000001".to_string()),
        merchant_id,
        amount: Fen::from(50),
        total: Fen::from(100),
        currency: "CNY".to_string(),
        reason: Some("buyer changed their mind".to_string()),
        notify_url: Some(format!("https://pay.example.com/wxpay/notify/refund/{refund_no}")),
        refund_id: None,
        channel: None,
        user_received_account: None,
        success_time: None,
        status: status.to_string(),
        request_payload: None,
        response_payload: None,
        callback_payload: None,
        callback_at: None,
        created_at: now - chrono::Duration::hours(1),
        updated_at: now - chrono::Duration::hours(1),
    }
}

pub fn query_response_fixture(out_trade_no: &str, trade_state: &str, transaction_id: Option<&str>) -> OrderQueryResponse {
    OrderQueryResponse {
        appid: "wx8888888888888888".to_string(),
        mchid: "1900000001".to_string(),
        out_trade_no: out_trade_no.to_string(),
        transaction_id: transaction_id.map(String::from),
        trade_state: trade_state.to_string(),
        trade_state_desc: trade_state.to_string(),
        trade_type: Some("JSAPI".to_string()),
        bank_type: None,
        success_time: (trade_state == "SUCCESS").then(|| "2026-08-23T10:00:00+08:00".to_string()),
        amount: None,
        payer: None,
        attach: None,
    }
}

pub fn refund_response_fixture(
    out_refund_no: &str,
    refund_id: Option<&str>,
    status: Option<&str>,
) -> RefundResponse {
    RefundResponse {
        refund_id: refund_id.map(String::from),
        out_refund_no: out_refund_no.to_string(),
        transaction_id: Some("4200009995202608230001".to_string()),
        out_trade_no: Some("WPB20260823000001".to_string()),
        channel: Some("ORIGINAL".to_string()),
        user_received_account: Some("支付用户零钱".to_string()),
        success_time: status
            .filter(|s| *s == "SUCCESS")
            .map(|_| "2026-08-23T10:30:00+08:00".to_string()),
        create_time: Some("2026-08-23T10:00:00+08:00".to_string()),
        status: status.map(String::from),
        amount: None,
    }
}

pub fn bill_record_fixture(bill: &NewBillRecord) -> BillRecord {
    BillRecord {
        id: 1,
        merchant_id: bill.merchant_id,
        bill_date: bill.bill_date,
        category: bill.category,
        hash_type: bill.hash_type.clone(),
        hash_value: bill.hash_value.clone(),
        download_url: bill.download_url.clone(),
        object_key: bill.object_key.clone(),
        created_at: Utc::now(),
    }
}
