use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, Utc};
use payment_bridge_engine::db_types::{Merchant, NewMerchant, NewRefundGoodsItem, PaymentOrder, TradeType};
use serde::{Deserialize, Serialize};
use wpb_common::Fen;
use wxpay_tools::{fields_to_xml, AppPayParams, JsapiPayParams, TransferBatchRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

//--------------------------------------   Order creation   -----------------------------------------------------------

/// A request to open a new payment order. The client IP is taken from the connection, not the
/// body, and the trade number is generated server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreationRequest {
    /// Which merchant account the order is placed under. Omit to use the default merchant.
    pub mch_id: Option<String>,
    pub trade_type: TradeType,
    pub amount: Fen,
    pub description: String,
    /// The buyer's openid. Required for JSAPI trades, ignored otherwise.
    #[serde(default)]
    pub openid: Option<String>,
    /// Opaque passthrough data, echoed back in the payment callback.
    #[serde(default)]
    pub attach: Option<String>,
}

/// What a client needs to start the payment flow, keyed by trade type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientPayParams {
    Jsapi(JsapiPayParams),
    Native { code_url: String },
    App(AppPayParams),
    Mweb { h5_url: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrderResult {
    pub order: PaymentOrder,
    pub pay_params: ClientPayParams,
}

//--------------------------------------      Refunds       -----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundSubmission {
    pub trade_no: String,
    /// Which merchant account raises the refund. Omit to use the default merchant.
    pub mch_id: Option<String>,
    /// The amount to refund, in fen.
    pub amount: Fen,
    /// The original order total, in fen. The gateway requires it alongside the refund amount.
    pub total: Fen,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub goods: Vec<RefundGoodsSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundGoodsSpec {
    pub goods_id: String,
    #[serde(default)]
    pub goods_name: Option<String>,
    pub unit_price: Fen,
    pub refund_amount: Fen,
    pub quantity: i64,
}

impl From<RefundGoodsSpec> for NewRefundGoodsItem {
    fn from(spec: RefundGoodsSpec) -> Self {
        Self {
            goods_id: spec.goods_id,
            goods_name: spec.goods_name,
            unit_price: spec.unit_price,
            refund_amount: spec.refund_amount,
            quantity: spec.quantity,
        }
    }
}

//--------------------------------------     Transfers      -----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSubmission {
    /// Which merchant account pays the batch. Omit to use the default merchant.
    pub mch_id: Option<String>,
    #[serde(flatten)]
    pub batch: TransferBatchRequest,
}

//--------------------------------------     Merchants      -----------------------------------------------------------

/// Registration payload for a merchant account. Key material goes straight into the credential
/// store; the `Debug` implementation masks it so request logging stays safe.
#[derive(Clone, Serialize, Deserialize)]
pub struct MerchantRegistration {
    pub mch_id: String,
    pub app_id: String,
    pub api_key: String,
    #[serde(default)]
    pub serial_no: Option<String>,
    #[serde(default)]
    pub private_key_pem: Option<String>,
    #[serde(default)]
    pub platform_cert_pem: Option<String>,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl std::fmt::Debug for MerchantRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantRegistration")
            .field("mch_id", &self.mch_id)
            .field("app_id", &self.app_id)
            .field("api_key", &"****")
            .field("serial_no", &self.serial_no)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}

impl From<MerchantRegistration> for NewMerchant {
    fn from(reg: MerchantRegistration) -> Self {
        Self {
            mch_id: reg.mch_id,
            app_id: reg.app_id,
            api_key: reg.api_key,
            serial_no: reg.serial_no,
            private_key_pem: reg.private_key_pem,
            platform_cert_pem: reg.platform_cert_pem,
            valid: reg.valid,
        }
    }
}

/// The merchant view that leaves the server. Key material never does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantSummary {
    pub id: i64,
    pub mch_id: String,
    pub app_id: String,
    pub valid: bool,
    pub has_rsa_keys: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Merchant> for MerchantSummary {
    fn from(m: &Merchant) -> Self {
        Self {
            id: m.id,
            mch_id: m.mch_id.clone(),
            app_id: m.app_id.clone(),
            valid: m.valid,
            has_rsa_keys: m.serial_no.is_some() && m.private_key_pem.is_some(),
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidityUpdate {
    pub valid: bool,
}

//--------------------------------------   Notification acks  ---------------------------------------------------------

/// The acknowledgement envelope for the JSON notification channel. The gateway retries delivery
/// until it sees `code == "SUCCESS"`, so failures are expressed here rather than as HTTP errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyAck {
    pub code: String,
    pub message: String,
}

impl NotifyAck {
    pub fn success() -> Self {
        Self { code: "SUCCESS".into(), message: "OK".into() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { code: "FAIL".into(), message: message.to_string() }
    }
}

/// The acknowledgement document for the legacy XML channel.
pub fn legacy_ack(ok: bool, message: &str) -> String {
    let mut fields = BTreeMap::new();
    fields.insert("return_code".to_string(), if ok { "SUCCESS" } else { "FAIL" }.to_string());
    fields.insert("return_msg".to_string(), message.to_string());
    fields_to_xml(&fields)
}
