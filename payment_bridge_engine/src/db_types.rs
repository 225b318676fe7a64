use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::error;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;
use wpb_common::CNY_CURRENCY_CODE;
pub use wpb_common::Fen;

/// Orders are payable for 15 minutes after creation, unless the caller asks for more.
pub const DEFAULT_ORDER_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------      TradeNo       ----------------------------------------------------------
/// A lightweight wrapper around the merchant-side trade number for a payment order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
pub struct TradeNo(pub String);

impl TradeNo {
    /// Generates a fresh trade number: a UTC second timestamp followed by six random digits.
    pub fn generate() -> Self {
        let suffix = rand::thread_rng().gen_range(0..1_000_000u32);
        Self(format!("{}{suffix:06}", Utc::now().format("%Y%m%d%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TradeNo {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for TradeNo {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for TradeNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------      RefundNo      ----------------------------------------------------------
/// A lightweight wrapper around the merchant-side refund number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
pub struct RefundNo(pub String);

impl RefundNo {
    /// Generates a fresh refund number in the same shape as [`TradeNo::generate`], prefixed with `R`.
    pub fn generate() -> Self {
        let suffix = rand::thread_rng().gen_range(0..1_000_000u32);
        Self(format!("R{}{suffix:06}", Utc::now().format("%Y%m%d%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RefundNo {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for RefundNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------      TradeType     ----------------------------------------------------------
/// The payment channel a buyer uses to settle an order. Determines which gateway endpoint is called
/// and which payload shape the client receives back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum TradeType {
    /// In-app payment inside the WeChat client (official accounts, mini programs).
    Jsapi,
    /// QR-code payment. The gateway returns a `code_url` to render as a QR code.
    Native,
    /// Payment launched from a native mobile app via the WeChat SDK.
    App,
    /// Mobile-web (H5) payment. Served by the legacy XML endpoint.
    Mweb,
}

impl Display for TradeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeType::Jsapi => write!(f, "JSAPI"),
            TradeType::Native => write!(f, "NATIVE"),
            TradeType::App => write!(f, "APP"),
            TradeType::Mweb => write!(f, "MWEB"),
        }
    }
}

impl FromStr for TradeType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "JSAPI" => Ok(Self::Jsapi),
            "NATIVE" => Ok(Self::Native),
            "APP" => Ok(Self::App),
            "MWEB" => Ok(Self::Mweb),
            s => Err(ConversionError(format!("Invalid trade type: {s}"))),
        }
    }
}

//--------------------------------------  PaymentOrderStatus ---------------------------------------------------------
/// The internal lifecycle state of a payment order.
///
/// `Init` orders may become `Success` exactly once. `Success` is absorbing. `Failed` is reserved
/// for operator intervention and is never set by the engine itself; expired `Init` orders keep
/// their status, with only the gateway trade state refreshed, until an operator closes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum PaymentOrderStatus {
    /// The order has been created locally. Payment has not been confirmed.
    Init,
    /// The gateway has confirmed payment.
    Success,
    /// The order was marked as failed by an operator.
    Failed,
}

impl Display for PaymentOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentOrderStatus::Init => write!(f, "INIT"),
            PaymentOrderStatus::Success => write!(f, "SUCCESS"),
            PaymentOrderStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for PaymentOrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INIT" => Ok(Self::Init),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid payment order status: {s}"))),
        }
    }
}

impl From<String> for PaymentOrderStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid payment order status: {value}. But this conversion cannot fail. Defaulting to INIT");
            PaymentOrderStatus::Init
        })
    }
}

//--------------------------------------    RefundStatus    ----------------------------------------------------------
/// Refund state is stored as the raw gateway string, since the gateway vocabulary is open-ended.
/// These are the values we know about and act on.
pub mod refund_status {
    pub const PROCESSING: &str = "PROCESSING";
    pub const SUCCESS: &str = "SUCCESS";
    pub const CLOSED: &str = "CLOSED";
    pub const ABNORMAL: &str = "ABNORMAL";
}

//--------------------------------------    BillCategory    ----------------------------------------------------------
/// The settlement bill flavours the gateway can produce for a trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillCategory {
    /// All trades for the day, successful or not.
    TradeAll,
    /// Successful trades only.
    TradeSuccess,
    /// Refunds only.
    TradeRefund,
    /// Account fund flow (balance movements rather than trades).
    FundFlow,
}

impl BillCategory {
    pub const ALL: [BillCategory; 4] =
        [BillCategory::TradeAll, BillCategory::TradeSuccess, BillCategory::TradeRefund, BillCategory::FundFlow];

    /// The `bill_type` value the gateway expects for trade bills. Fund-flow bills use a different
    /// endpoint and have no trade bill type.
    pub fn gateway_code(&self) -> Option<&'static str> {
        match self {
            BillCategory::TradeAll => Some("ALL"),
            BillCategory::TradeSuccess => Some("SUCCESS"),
            BillCategory::TradeRefund => Some("REFUND"),
            BillCategory::FundFlow => None,
        }
    }
}

impl Display for BillCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillCategory::TradeAll => write!(f, "TRADE_ALL"),
            BillCategory::TradeSuccess => write!(f, "TRADE_SUCCESS"),
            BillCategory::TradeRefund => write!(f, "TRADE_REFUND"),
            BillCategory::FundFlow => write!(f, "FUND_FLOW"),
        }
    }
}

impl FromStr for BillCategory {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRADE_ALL" => Ok(Self::TradeAll),
            "TRADE_SUCCESS" => Ok(Self::TradeSuccess),
            "TRADE_REFUND" => Ok(Self::TradeRefund),
            "FUND_FLOW" => Ok(Self::FundFlow),
            s => Err(ConversionError(format!("Invalid bill category: {s}"))),
        }
    }
}

//--------------------------------------      Merchant      ----------------------------------------------------------
/// A gateway merchant account we can transact on behalf of.
///
/// The `Debug` implementation masks key material, so merchant rows can be logged safely.
#[derive(Clone, FromRow)]
pub struct Merchant {
    pub id: i64,
    pub mch_id: String,
    pub app_id: String,
    pub api_key: String,
    pub serial_no: Option<String>,
    pub private_key_pem: Option<String>,
    pub platform_cert_pem: Option<String>,
    pub valid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Merchant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merchant")
            .field("id", &self.id)
            .field("mch_id", &self.mch_id)
            .field("app_id", &self.app_id)
            .field("api_key", &"****")
            .field("serial_no", &self.serial_no)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}

//--------------------------------------     NewMerchant    ----------------------------------------------------------
#[derive(Clone)]
pub struct NewMerchant {
    pub mch_id: String,
    pub app_id: String,
    pub api_key: String,
    pub serial_no: Option<String>,
    pub private_key_pem: Option<String>,
    pub platform_cert_pem: Option<String>,
    pub valid: bool,
}

impl NewMerchant {
    pub fn new<S1: Into<String>, S2: Into<String>, S3: Into<String>>(mch_id: S1, app_id: S2, api_key: S3) -> Self {
        Self {
            mch_id: mch_id.into(),
            app_id: app_id.into(),
            api_key: api_key.into(),
            serial_no: None,
            private_key_pem: None,
            platform_cert_pem: None,
            valid: true,
        }
    }

    pub fn with_rsa_keys<S1: Into<String>, S2: Into<String>>(mut self, serial_no: S1, private_key_pem: S2) -> Self {
        self.serial_no = Some(serial_no.into());
        self.private_key_pem = Some(private_key_pem.into());
        self
    }
}

impl std::fmt::Debug for NewMerchant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewMerchant")
            .field("mch_id", &self.mch_id)
            .field("app_id", &self.app_id)
            .field("api_key", &"****")
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}

//--------------------------------------    PaymentOrder    ----------------------------------------------------------
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentOrder {
    pub id: i64,
    pub trade_no: TradeNo,
    pub transaction_id: Option<String>,
    pub merchant_id: i64,
    pub trade_type: TradeType,
    pub amount: Fen,
    pub currency: String,
    pub description: String,
    pub openid: Option<String>,
    pub attach: Option<String>,
    pub notify_url: String,
    pub client_ip: Option<String>,
    pub time_start: DateTime<Utc>,
    pub time_expire: DateTime<Utc>,
    pub prepay_id: Option<String>,
    pub prepay_expire: Option<DateTime<Utc>>,
    pub trade_state: Option<String>,
    pub request_payload: Option<String>,
    pub response_payload: Option<String>,
    pub callback_payload: Option<String>,
    pub callback_at: Option<DateTime<Utc>>,
    pub success_time: Option<DateTime<Utc>>,
    pub status: PaymentOrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentOrderStatus::Init && self.time_expire < now
    }
}

//--------------------------------------  NewPaymentOrder   ----------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewPaymentOrder {
    /// The trade number identifying this order at the gateway.
    pub trade_no: TradeNo,
    /// The merchant account the order is placed under.
    pub merchant_id: i64,
    /// The channel used to settle the order.
    pub trade_type: TradeType,
    /// The total amount of the order.
    pub amount: Fen,
    /// The currency of the order.
    pub currency: String,
    /// A short human-readable description of the goods.
    pub description: String,
    /// The buyer's openid. Required for JSAPI orders.
    pub openid: Option<String>,
    /// Opaque merchant data echoed back in callbacks.
    pub attach: Option<String>,
    /// The callback URL the gateway will notify when the order settles.
    pub notify_url: String,
    /// The buyer's IP address. Required for MWEB orders.
    pub client_ip: Option<String>,
    /// When the order was placed.
    pub time_start: DateTime<Utc>,
    /// When the order stops being payable.
    pub time_expire: DateTime<Utc>,
}

impl NewPaymentOrder {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        merchant_id: i64,
        trade_type: TradeType,
        amount: Fen,
        description: S1,
        notify_url: S2,
    ) -> Self {
        let now = Utc::now();
        Self {
            trade_no: TradeNo::generate(),
            merchant_id,
            trade_type,
            amount,
            currency: CNY_CURRENCY_CODE.to_string(),
            description: description.into(),
            openid: None,
            attach: None,
            notify_url: notify_url.into(),
            client_ip: None,
            time_start: now,
            time_expire: now + Duration::minutes(DEFAULT_ORDER_TTL_MINUTES),
        }
    }

    pub fn is_equivalent(&self, order: &PaymentOrder) -> bool {
        self.trade_no == order.trade_no
            && self.merchant_id == order.merchant_id
            && self.trade_type == order.trade_type
            && self.amount == order.amount
            && self.currency == order.currency
            && self.description == order.description
            && self.notify_url == order.notify_url
    }
}

//-------------------------------------- PaymentConfirmation ---------------------------------------------------------
/// The fields extracted from a verified payment notification that feed the INIT → SUCCESS
/// transition.
#[derive(Debug, Clone, Default)]
pub struct PaymentConfirmation {
    pub transaction_id: Option<String>,
    pub trade_state: Option<String>,
    pub openid: Option<String>,
    pub amount: Option<Fen>,
    pub success_time: Option<DateTime<Utc>>,
}

//--------------------------------------     RefundOrder    ----------------------------------------------------------
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RefundOrder {
    pub id: i64,
    pub refund_no: RefundNo,
    pub payment_order_id: Option<i64>,
    pub trade_no: TradeNo,
    pub merchant_id: i64,
    pub amount: Fen,
    pub total: Fen,
    pub currency: String,
    pub reason: Option<String>,
    pub notify_url: Option<String>,
    pub refund_id: Option<String>,
    pub channel: Option<String>,
    pub user_received_account: Option<String>,
    pub success_time: Option<DateTime<Utc>>,
    pub status: String,
    pub request_payload: Option<String>,
    pub response_payload: Option<String>,
    pub callback_payload: Option<String>,
    pub callback_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefundOrder {
    /// A refund stops being polled once the gateway has given a final answer.
    pub fn is_settled(&self) -> bool {
        self.status != refund_status::PROCESSING
    }
}

//--------------------------------------   NewRefundOrder   ----------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewRefundOrder {
    pub refund_no: RefundNo,
    pub payment_order_id: Option<i64>,
    pub trade_no: TradeNo,
    pub merchant_id: i64,
    pub amount: Fen,
    pub total: Fen,
    pub currency: String,
    pub reason: Option<String>,
    pub notify_url: Option<String>,
    pub goods: Vec<NewRefundGoodsItem>,
}

impl NewRefundOrder {
    pub fn new(trade_no: TradeNo, merchant_id: i64, amount: Fen, total: Fen) -> Self {
        Self {
            refund_no: RefundNo::generate(),
            payment_order_id: None,
            trade_no,
            merchant_id,
            amount,
            total,
            currency: CNY_CURRENCY_CODE.to_string(),
            reason: None,
            notify_url: None,
            goods: Vec::new(),
        }
    }
}

//--------------------------------------  RefundGoodsItem   ----------------------------------------------------------
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RefundGoodsItem {
    pub id: i64,
    pub refund_order_id: i64,
    pub goods_id: String,
    pub goods_name: Option<String>,
    pub unit_price: Fen,
    pub refund_amount: Fen,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct NewRefundGoodsItem {
    pub goods_id: String,
    pub goods_name: Option<String>,
    pub unit_price: Fen,
    pub refund_amount: Fen,
    pub quantity: i64,
}

//--------------------------------------     BillRecord     ----------------------------------------------------------
/// One downloaded settlement bill. The `(merchant_id, bill_date, category)` triple is unique, so a
/// bill is only ever fetched and stored once.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BillRecord {
    pub id: i64,
    pub merchant_id: i64,
    pub bill_date: NaiveDate,
    pub category: BillCategory,
    pub hash_type: Option<String>,
    pub hash_value: Option<String>,
    pub download_url: Option<String>,
    pub object_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBillRecord {
    pub merchant_id: i64,
    pub bill_date: NaiveDate,
    pub category: BillCategory,
    pub hash_type: Option<String>,
    pub hash_value: Option<String>,
    pub download_url: Option<String>,
    pub object_key: Option<String>,
}
