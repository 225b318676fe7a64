mod api;
mod config;
mod credentials;
mod error;
mod signing;
mod xml;

mod data_objects;

pub use api::{WxPayApi, WxPayGateway};
pub use config::WxPayConfig;
pub use credentials::{CredentialError, MerchantCredentials};
pub use data_objects::{
    AppPayParams,
    BillDownloadInfo,
    JsapiPayParams,
    OrderAmount,
    OrderQueryResponse,
    PayerInfo,
    PaymentNotification,
    PrepayResponse,
    RefundAmountResult,
    RefundAmountSpec,
    RefundGoods,
    RefundNotification,
    RefundRequest,
    RefundResponse,
    TradeId,
    TransferBatchRequest,
    TransferBatchResponse,
    TransferDetail,
    UnifiedOrderRequest,
};
pub use error::WxPayApiError;
pub use signing::{nonce_str, sign_fields, verify_fields, SignType, SignatureError};
pub use xml::{fields_to_xml, xml_to_fields, XmlError};
