use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use payment_bridge_engine::PaymentFlowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("Payment flow error. {0}")]
    PaymentFlow(#[from] PaymentFlowError),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::PaymentFlow(e) => payment_flow_status(e),
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

/// Flow errors split three ways. The client's fault gets a 4xx, the gateway's fault gets a 502 so
/// upstreams can tell the difference, and everything else is on us.
fn payment_flow_status(e: &PaymentFlowError) -> StatusCode {
    match e {
        PaymentFlowError::MerchantNotFound(_) => StatusCode::NOT_FOUND,
        PaymentFlowError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        PaymentFlowError::RefundNotFound(_) => StatusCode::NOT_FOUND,
        PaymentFlowError::RefundExceedsTotal { .. } => StatusCode::BAD_REQUEST,
        PaymentFlowError::PaymentParameter(_) => StatusCode::BAD_REQUEST,
        PaymentFlowError::Gateway(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
