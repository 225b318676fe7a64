use thiserror::Error;

use crate::{signing::SignatureError, xml::XmlError};

#[derive(Debug, Error)]
pub enum WxPayApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid REST request: {0}")]
    RestRequestError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Could not parse XML: {0}")]
    InvalidXml(#[from] XmlError),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Gateway rejected the request. {code}: {message}")]
    BusinessError { code: String, message: String },
    #[error("The gateway response did not contain a prepay handle")]
    MissingPrepayId,
    #[error("Could not sign the request: {0}")]
    Signing(#[from] SignatureError),
}
