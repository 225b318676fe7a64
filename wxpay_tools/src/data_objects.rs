use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use wpb_common::Fen;

use crate::{
    signing::{SignType, SignatureError},
    xml::xml_to_fields,
    WxPayApiError,
};

//--------------------------------------   Order creation    ---------------------------------------------------------

/// Everything the gateway needs to open a trade, minus the merchant identity (the API injects
/// `appid`/`mch_id` from its credentials when the request is sent).
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedOrderRequest {
    pub out_trade_no: String,
    pub description: String,
    pub amount: Fen,
    pub currency: String,
    pub notify_url: String,
    pub time_expire: Option<DateTime<Utc>>,
    pub attach: Option<String>,
    pub payer_openid: Option<String>,
    pub client_ip: Option<String>,
}

/// The prepay handle a successful order creation yields. Which field is populated depends on the
/// trade type: `prepay_id` for JSAPI and APP trades, `code_url` for NATIVE, `h5_url` for the
/// legacy MWEB channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepayResponse {
    #[serde(default)]
    pub prepay_id: Option<String>,
    #[serde(default)]
    pub code_url: Option<String>,
    #[serde(default)]
    pub h5_url: Option<String>,
}

/// The signed parameter set a JSAPI client passes to the payment sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsapiPayParams {
    #[serde(rename = "timeStamp")]
    pub time_stamp: String,
    #[serde(rename = "nonceStr")]
    pub nonce_str: String,
    pub package: String,
    #[serde(rename = "signType")]
    pub sign_type: String,
    #[serde(rename = "paySign")]
    pub pay_sign: String,
}

/// The signed parameter set the mobile SDK consumes for APP trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPayParams {
    pub appid: String,
    pub partnerid: String,
    pub prepayid: String,
    pub package: String,
    pub noncestr: String,
    pub timestamp: String,
    pub sign: String,
}

//--------------------------------------    Order queries     ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderQueryResponse {
    pub appid: String,
    pub mchid: String,
    pub out_trade_no: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub trade_state: String,
    pub trade_state_desc: String,
    #[serde(default)]
    pub trade_type: Option<String>,
    #[serde(default)]
    pub bank_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub success_time: Option<String>,
    #[serde(default)]
    pub amount: Option<OrderAmount>,
    #[serde(default)]
    pub payer: Option<PayerInfo>,
    #[serde(default)]
    pub attach: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAmount {
    #[serde(default)]
    pub total: Fen,
    #[serde(default)]
    pub payer_total: Option<Fen>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payer_currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayerInfo {
    pub openid: String,
}

//--------------------------------------       Refunds        ---------------------------------------------------------

/// Identifies the trade a refund draws on. Exactly one of the two identifiers is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradeId {
    #[serde(rename = "transaction_id")]
    TransactionId(String),
    #[serde(rename = "out_trade_no")]
    OutTradeNo(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    #[serde(flatten)]
    pub trade_id: TradeId,
    pub out_refund_no: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notify_url: Option<String>,
    pub amount: RefundAmountSpec,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub goods_detail: Vec<RefundGoods>,
}

/// Refund amounts are stated against the original order total, and the gateway rejects a refund
/// exceeding it, so both figures travel together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundAmountSpec {
    pub total: Fen,
    pub refund: Fen,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundGoods {
    pub merchant_goods_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub goods_name: Option<String>,
    pub unit_price: Fen,
    pub refund_amount: Fen,
    pub refund_quantity: i32,
}

/// Response shape shared by refund creation and refund queries. `refund_id` is absent when the
/// gateway no longer recognises the refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    #[serde(default)]
    pub refund_id: Option<String>,
    pub out_refund_no: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub out_trade_no: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user_received_account: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub success_time: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub create_time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<RefundAmountResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundAmountResult {
    #[serde(default)]
    pub total: Fen,
    #[serde(default)]
    pub refund: Fen,
    #[serde(default)]
    pub payer_total: Option<Fen>,
    #[serde(default)]
    pub payer_refund: Option<Fen>,
    #[serde(default)]
    pub currency: Option<String>,
}

//--------------------------------------        Bills         ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillDownloadInfo {
    pub hash_type: String,
    pub hash_value: String,
    pub download_url: String,
}

//--------------------------------------      Transfers       ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferBatchRequest {
    pub out_batch_no: String,
    pub batch_name: String,
    pub batch_remark: String,
    pub total_amount: Fen,
    pub total_num: i32,
    pub transfer_detail_list: Vec<TransferDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDetail {
    pub out_detail_no: String,
    pub transfer_amount: Fen,
    pub transfer_remark: String,
    pub openid: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferBatchResponse {
    pub out_batch_no: String,
    pub batch_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub create_time: Option<String>,
}

//--------------------------------------    Notifications     ---------------------------------------------------------

/// A payment notification as delivered to a callback endpoint. Both channels reduce to the same
/// representation, a flat map of string fields, which is exactly what the signature codec
/// verifies. Only top-level scalar fields participate; nested values are not part of the signed
/// payload.
#[derive(Debug, Clone)]
pub struct PaymentNotification {
    fields: BTreeMap<String, String>,
}

impl PaymentNotification {
    pub fn from_json(body: &[u8]) -> Result<Self, WxPayApiError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| WxPayApiError::JsonError(e.to_string()))?;
        Ok(Self { fields: flatten_scalar_fields(&value)? })
    }

    pub fn from_xml(body: &str) -> Result<Self, WxPayApiError> {
        Ok(Self { fields: xml_to_fields(body)? })
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|s| s.as_str())
    }

    pub fn mch_id(&self) -> Option<&str> {
        self.get("mch_id").or_else(|| self.get("mchid"))
    }

    pub fn out_trade_no(&self) -> Option<&str> {
        self.get("out_trade_no")
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.get("transaction_id")
    }

    /// The reported trade state. Legacy payloads signal success through `result_code` instead of
    /// carrying a `trade_state`, so that field doubles as a fallback.
    pub fn trade_state(&self) -> Option<&str> {
        self.get("trade_state").or_else(|| self.get("result_code"))
    }

    pub fn total_fee(&self) -> Option<Fen> {
        self.get("total_fee").and_then(|v| v.parse::<i64>().ok()).map(Fen::from)
    }

    pub fn time_end(&self) -> Option<&str> {
        self.get("time_end").or_else(|| self.get("success_time"))
    }

    pub fn attach(&self) -> Option<&str> {
        self.get("attach")
    }

    /// The signature algorithm the sender claims to have used. Absent means MD5; anything outside
    /// the closed set is an error, not a fallback.
    pub fn sign_type(&self) -> Result<SignType, SignatureError> {
        match self.get("sign_type") {
            None => Ok(SignType::default()),
            Some(name) => name.parse(),
        }
    }
}

/// A refund notification, reduced to the same flat representation as payment notifications.
#[derive(Debug, Clone)]
pub struct RefundNotification {
    fields: BTreeMap<String, String>,
}

impl RefundNotification {
    pub fn from_json(body: &[u8]) -> Result<Self, WxPayApiError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| WxPayApiError::JsonError(e.to_string()))?;
        Ok(Self { fields: flatten_scalar_fields(&value)? })
    }

    pub fn from_xml(body: &str) -> Result<Self, WxPayApiError> {
        Ok(Self { fields: xml_to_fields(body)? })
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|s| s.as_str())
    }

    pub fn mch_id(&self) -> Option<&str> {
        self.get("mch_id").or_else(|| self.get("mchid"))
    }

    pub fn out_refund_no(&self) -> Option<&str> {
        self.get("out_refund_no")
    }

    pub fn refund_id(&self) -> Option<&str> {
        self.get("refund_id")
    }

    pub fn refund_status(&self) -> Option<&str> {
        self.get("refund_status").or_else(|| self.get("result_code"))
    }

    pub fn success_time(&self) -> Option<&str> {
        self.get("success_time")
    }

    pub fn user_received_account(&self) -> Option<&str> {
        self.get("user_received_account")
    }

    pub fn channel(&self) -> Option<&str> {
        self.get("refund_channel").or_else(|| self.get("channel"))
    }

    pub fn sign_type(&self) -> Result<SignType, SignatureError> {
        match self.get("sign_type") {
            None => Ok(SignType::default()),
            Some(name) => name.parse(),
        }
    }
}

fn flatten_scalar_fields(value: &Value) -> Result<BTreeMap<String, String>, WxPayApiError> {
    let obj = value
        .as_object()
        .ok_or_else(|| WxPayApiError::JsonError("notification body must be a JSON object".to_string()))?;
    let mut fields = BTreeMap::new();
    for (field, v) in obj {
        match v {
            Value::String(s) => {
                fields.insert(field.clone(), s.clone());
            },
            Value::Number(n) => {
                fields.insert(field.clone(), n.to_string());
            },
            Value::Bool(b) => {
                fields.insert(field.clone(), b.to_string());
            },
            Value::Null | Value::Array(_) | Value::Object(_) => {},
        }
    }
    Ok(fields)
}

/// Gateways are not consistent about whether timestamps arrive as JSON strings or bare numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where D: Deserializer<'de> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        S(String),
        I(i64),
        F(f64),
    }
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(|v| match v {
        StringOrNumber::S(s) => s,
        StringOrNumber::I(i) => i.to_string(),
        StringOrNumber::F(f) => f.to_string(),
    }))
}
