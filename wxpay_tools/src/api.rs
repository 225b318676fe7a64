use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use log::*;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    config::WxPayConfig,
    credentials::MerchantCredentials,
    data_objects::{
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
    },
    signing::{nonce_str, sign_fields, SignType},
    xml::{fields_to_xml, xml_to_fields},
    WxPayApiError,
};

/// The gateway operations the rest of the system consumes. Implementations are per-merchant: the
/// credentials carried by the implementor decide which merchant account every call acts on.
pub trait WxPayGateway {
    /// Open a JSAPI trade. The request must carry the payer's openid.
    fn create_jsapi_order(
        &self,
        req: &UnifiedOrderRequest,
    ) -> impl std::future::Future<Output = Result<PrepayResponse, WxPayApiError>> + Send;
    /// Open a NATIVE (QR-code) trade. The response carries a `code_url`.
    fn create_native_order(
        &self,
        req: &UnifiedOrderRequest,
    ) -> impl std::future::Future<Output = Result<PrepayResponse, WxPayApiError>> + Send;
    /// Open an APP trade.
    fn create_app_order(
        &self,
        req: &UnifiedOrderRequest,
    ) -> impl std::future::Future<Output = Result<PrepayResponse, WxPayApiError>> + Send;
    /// Open an MWEB trade on the legacy XML channel. The request must carry the client IP, and
    /// the response's `h5_url` is the redirect target for the payer's browser.
    fn create_h5_order(
        &self,
        req: &UnifiedOrderRequest,
    ) -> impl std::future::Future<Output = Result<PrepayResponse, WxPayApiError>> + Send;
    /// Fetch the gateway's view of a trade by the merchant-assigned trade number.
    fn query_order(
        &self,
        out_trade_no: &str,
    ) -> impl std::future::Future<Output = Result<OrderQueryResponse, WxPayApiError>> + Send;
    /// Close an unpaid trade at the gateway.
    fn close_order(&self, out_trade_no: &str) -> impl std::future::Future<Output = Result<(), WxPayApiError>> + Send;
    /// Submit a refund against a settled trade.
    fn create_refund(
        &self,
        req: &RefundRequest,
    ) -> impl std::future::Future<Output = Result<RefundResponse, WxPayApiError>> + Send;
    /// Fetch the gateway's view of a refund by the merchant-assigned refund number.
    fn query_refund(
        &self,
        out_refund_no: &str,
    ) -> impl std::future::Future<Output = Result<RefundResponse, WxPayApiError>> + Send;
    /// Fetch trade bill metadata for a settlement date. `bill_type` is the gateway's code for the
    /// bill flavour (ALL, SUCCESS or REFUND).
    fn trade_bill(
        &self,
        bill_date: NaiveDate,
        bill_type: &str,
    ) -> impl std::future::Future<Output = Result<BillDownloadInfo, WxPayApiError>> + Send;
    /// Fetch fund-flow bill metadata for a settlement date.
    fn fund_flow_bill(
        &self,
        bill_date: NaiveDate,
    ) -> impl std::future::Future<Output = Result<BillDownloadInfo, WxPayApiError>> + Send;
    /// Download bill content from the short-lived URL in the bill metadata.
    fn download_bill(
        &self,
        download_url: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, WxPayApiError>> + Send;
    /// Submit a batch transfer to user wallets.
    fn create_transfer_batch(
        &self,
        req: &TransferBatchRequest,
    ) -> impl std::future::Future<Output = Result<TransferBatchResponse, WxPayApiError>> + Send;
    /// Build the signed parameter set a JSAPI client hands to `wx.requestPayment`.
    fn jsapi_pay_params(&self, prepay_id: &str) -> JsapiPayParams;
    /// Build the signed parameter set an APP client hands to the in-app payment SDK.
    fn app_pay_params(&self, prepay_id: &str) -> AppPayParams;
}

#[derive(Debug, Clone)]
pub struct WxPayApi {
    config: WxPayConfig,
    credentials: MerchantCredentials,
    client: Arc<Client>,
}

impl WxPayApi {
    pub fn new(config: WxPayConfig, credentials: MerchantCredentials) -> Result<Self, WxPayApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WxPayApiError::Initialization(e.to_string()))?;
        Ok(Self { config, credentials, client: Arc::new(client) })
    }

    pub fn credentials(&self) -> &MerchantCredentials {
        &self.credentials
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    /// Send a signed request on the modern JSON channel. `path` must include the query string,
    /// since that is what the transport signature covers.
    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, WxPayApiError> {
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let authorization = self.credentials.authorization(method.as_str(), path, &body_str);
        let url = self.url(path);
        trace!("Sending {method} {url}");
        let mut req = self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, authorization)
            .header(header::ACCEPT, "application/json");
        if !body_str.is_empty() {
            req = req.header(header::CONTENT_TYPE, "application/json").body(body_str);
        }
        let response = req.send().await.map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
        if response.status().is_success() {
            trace!("Gateway call successful. {}", response.status());
            response.json::<T>().await.map_err(|e| WxPayApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
            Err(WxPayApiError::QueryError { status, message })
        }
    }

    /// As [`WxPayApi::send_json`], for endpoints that answer with an empty body.
    async fn send_json_no_content(&self, method: Method, path: &str, body: Option<Value>) -> Result<(), WxPayApiError> {
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let authorization = self.credentials.authorization(method.as_str(), path, &body_str);
        let url = self.url(path);
        let mut req = self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, authorization)
            .header(header::ACCEPT, "application/json");
        if !body_str.is_empty() {
            req = req.header(header::CONTENT_TYPE, "application/json").body(body_str);
        }
        let response = req.send().await.map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
            Err(WxPayApiError::QueryError { status, message })
        }
    }

    /// Send a signed request on the legacy XML channel. The merchant identity, nonce and
    /// signature fields are filled in here; callers provide the operation fields only. Responses
    /// are checked for both the protocol-level `return_code` and the business-level
    /// `result_code`.
    async fn send_xml(
        &self,
        path: &str,
        mut fields: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, WxPayApiError> {
        fields.insert("appid".to_string(), self.credentials.app_id().to_string());
        fields.insert("mch_id".to_string(), self.credentials.mch_id().to_string());
        fields.insert("nonce_str".to_string(), nonce_str(32));
        fields.insert("sign_type".to_string(), SignType::default().to_string());
        let signature = sign_fields(&fields, self.credentials.api_key().reveal(), SignType::default())?;
        fields.insert("sign".to_string(), signature);
        let body = fields_to_xml(&fields);
        let url = self.url(path);
        trace!("Sending legacy request: {url}");
        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
            return Err(WxPayApiError::QueryError { status, message });
        }
        let text = response.text().await.map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
        let fields = xml_to_fields(&text)?;
        if fields.get("return_code").map(|c| c.as_str()) != Some("SUCCESS") {
            return Err(WxPayApiError::BusinessError {
                code: fields.get("return_code").cloned().unwrap_or_else(|| "FAIL".to_string()),
                message: fields.get("return_msg").cloned().unwrap_or_default(),
            });
        }
        if fields.get("result_code").map(|c| c.as_str()) != Some("SUCCESS") {
            return Err(WxPayApiError::BusinessError {
                code: fields.get("err_code").cloned().unwrap_or_else(|| "FAIL".to_string()),
                message: fields.get("err_code_des").cloned().unwrap_or_default(),
            });
        }
        Ok(fields)
    }

    fn modern_order_body(&self, req: &UnifiedOrderRequest) -> Value {
        let mut body = json!({
            "appid": self.credentials.app_id(),
            "mchid": self.credentials.mch_id(),
            "description": req.description,
            "out_trade_no": req.out_trade_no,
            "notify_url": req.notify_url,
            "amount": { "total": req.amount.value(), "currency": req.currency },
        });
        if let Some(expire) = req.time_expire {
            body["time_expire"] = json!(expire.to_rfc3339_opts(chrono::SecondsFormat::Secs, false));
        }
        if let Some(attach) = &req.attach {
            body["attach"] = json!(attach);
        }
        if let Some(ip) = &req.client_ip {
            body["scene_info"] = json!({ "payer_client_ip": ip });
        }
        body
    }
}

/// The gateway clock runs at UTC+8; legacy timestamps have no offset marker.
fn legacy_timestamp(t: DateTime<Utc>) -> String {
    (t + chrono::Duration::hours(8)).format("%Y%m%d%H%M%S").to_string()
}

impl WxPayGateway for WxPayApi {
    async fn create_jsapi_order(&self, req: &UnifiedOrderRequest) -> Result<PrepayResponse, WxPayApiError> {
        let openid = req
            .payer_openid
            .as_deref()
            .ok_or_else(|| WxPayApiError::RestRequestError("payer openid is required for JSAPI trades".to_string()))?;
        let mut body = self.modern_order_body(req);
        body["payer"] = json!({ "openid": openid });
        debug!("Creating JSAPI trade {}", req.out_trade_no);
        let response: PrepayResponse = self.send_json(Method::POST, "/v3/pay/transactions/jsapi", Some(body)).await?;
        if response.prepay_id.is_none() {
            return Err(WxPayApiError::MissingPrepayId);
        }
        info!("Created JSAPI trade {}", req.out_trade_no);
        Ok(response)
    }

    async fn create_native_order(&self, req: &UnifiedOrderRequest) -> Result<PrepayResponse, WxPayApiError> {
        let body = self.modern_order_body(req);
        debug!("Creating NATIVE trade {}", req.out_trade_no);
        let response: PrepayResponse = self.send_json(Method::POST, "/v3/pay/transactions/native", Some(body)).await?;
        if response.code_url.is_none() {
            return Err(WxPayApiError::MissingPrepayId);
        }
        info!("Created NATIVE trade {}", req.out_trade_no);
        Ok(response)
    }

    async fn create_app_order(&self, req: &UnifiedOrderRequest) -> Result<PrepayResponse, WxPayApiError> {
        let body = self.modern_order_body(req);
        debug!("Creating APP trade {}", req.out_trade_no);
        let response: PrepayResponse = self.send_json(Method::POST, "/v3/pay/transactions/app", Some(body)).await?;
        if response.prepay_id.is_none() {
            return Err(WxPayApiError::MissingPrepayId);
        }
        info!("Created APP trade {}", req.out_trade_no);
        Ok(response)
    }

    async fn create_h5_order(&self, req: &UnifiedOrderRequest) -> Result<PrepayResponse, WxPayApiError> {
        let client_ip = req
            .client_ip
            .as_deref()
            .ok_or_else(|| WxPayApiError::RestRequestError("client IP is required for MWEB trades".to_string()))?;
        let mut fields = BTreeMap::new();
        fields.insert("body".to_string(), req.description.clone());
        fields.insert("out_trade_no".to_string(), req.out_trade_no.clone());
        fields.insert("total_fee".to_string(), req.amount.value().to_string());
        fields.insert("fee_type".to_string(), req.currency.clone());
        fields.insert("spbill_create_ip".to_string(), client_ip.to_string());
        fields.insert("notify_url".to_string(), req.notify_url.clone());
        fields.insert("trade_type".to_string(), "MWEB".to_string());
        if let Some(expire) = req.time_expire {
            fields.insert("time_expire".to_string(), legacy_timestamp(expire));
        }
        if let Some(attach) = &req.attach {
            fields.insert("attach".to_string(), attach.clone());
        }
        debug!("Creating MWEB trade {} on the legacy channel", req.out_trade_no);
        let response = self.send_xml("/pay/unifiedorder", fields).await?;
        let prepay_id = response.get("prepay_id").cloned();
        if prepay_id.is_none() {
            return Err(WxPayApiError::MissingPrepayId);
        }
        info!("Created MWEB trade {}", req.out_trade_no);
        Ok(PrepayResponse { prepay_id, code_url: None, h5_url: response.get("mweb_url").cloned() })
    }

    async fn query_order(&self, out_trade_no: &str) -> Result<OrderQueryResponse, WxPayApiError> {
        let path =
            format!("/v3/pay/transactions/out-trade-no/{out_trade_no}?mchid={}", self.credentials.mch_id());
        debug!("Querying trade {out_trade_no}");
        let response = self.send_json::<OrderQueryResponse>(Method::GET, &path, None).await?;
        debug!("Trade {out_trade_no} is in state {}", response.trade_state);
        Ok(response)
    }

    async fn close_order(&self, out_trade_no: &str) -> Result<(), WxPayApiError> {
        let path = format!("/v3/pay/transactions/out-trade-no/{out_trade_no}/close");
        let body = json!({ "mchid": self.credentials.mch_id() });
        debug!("Closing trade {out_trade_no}");
        self.send_json_no_content(Method::POST, &path, Some(body)).await?;
        info!("Closed trade {out_trade_no}");
        Ok(())
    }

    async fn create_refund(&self, req: &RefundRequest) -> Result<RefundResponse, WxPayApiError> {
        let body = serde_json::to_value(req).map_err(|e| WxPayApiError::JsonError(e.to_string()))?;
        debug!("Submitting refund {}", req.out_refund_no);
        let response: RefundResponse =
            self.send_json(Method::POST, "/v3/refund/domestic/refunds", Some(body)).await?;
        info!("Submitted refund {}. Status: {}", req.out_refund_no, response.status.as_deref().unwrap_or("unknown"));
        Ok(response)
    }

    async fn query_refund(&self, out_refund_no: &str) -> Result<RefundResponse, WxPayApiError> {
        let path = format!("/v3/refund/domestic/refunds/{out_refund_no}");
        debug!("Querying refund {out_refund_no}");
        self.send_json(Method::GET, &path, None).await
    }

    async fn trade_bill(&self, bill_date: NaiveDate, bill_type: &str) -> Result<BillDownloadInfo, WxPayApiError> {
        let path = format!("/v3/bill/tradebill?bill_date={}&bill_type={bill_type}", bill_date.format("%Y-%m-%d"));
        debug!("Fetching {bill_type} trade bill metadata for {bill_date}");
        self.send_json(Method::GET, &path, None).await
    }

    async fn fund_flow_bill(&self, bill_date: NaiveDate) -> Result<BillDownloadInfo, WxPayApiError> {
        let path = format!("/v3/bill/fundflowbill?bill_date={}&account_type=BASIC", bill_date.format("%Y-%m-%d"));
        debug!("Fetching fund-flow bill metadata for {bill_date}");
        self.send_json(Method::GET, &path, None).await
    }

    async fn download_bill(&self, download_url: &str) -> Result<Vec<u8>, WxPayApiError> {
        let url = reqwest::Url::parse(download_url).map_err(|e| WxPayApiError::RestRequestError(e.to_string()))?;
        let path = match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_string(),
        };
        let authorization = self.credentials.authorization("GET", &path, "");
        debug!("Downloading bill content from {path}");
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
            return Err(WxPayApiError::QueryError { status, message });
        }
        let bytes = response.bytes().await.map_err(|e| WxPayApiError::RestResponseError(e.to_string()))?;
        info!("Downloaded bill content ({} bytes)", bytes.len());
        Ok(bytes.to_vec())
    }

    async fn create_transfer_batch(
        &self,
        req: &TransferBatchRequest,
    ) -> Result<TransferBatchResponse, WxPayApiError> {
        let mut body = serde_json::to_value(req).map_err(|e| WxPayApiError::JsonError(e.to_string()))?;
        body["appid"] = json!(self.credentials.app_id());
        debug!("Submitting transfer batch {} ({} transfers)", req.out_batch_no, req.transfer_detail_list.len());
        let response: TransferBatchResponse = self.send_json(Method::POST, "/v3/transfer/batches", Some(body)).await?;
        info!("Submitted transfer batch {}. Gateway batch id: {}", req.out_batch_no, response.batch_id);
        Ok(response)
    }

    fn jsapi_pay_params(&self, prepay_id: &str) -> JsapiPayParams {
        self.credentials.jsapi_pay_params(prepay_id)
    }

    fn app_pay_params(&self, prepay_id: &str) -> AppPayParams {
        self.credentials.app_pay_params(prepay_id)
    }
}
