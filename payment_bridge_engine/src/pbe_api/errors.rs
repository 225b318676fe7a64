use thiserror::Error;
use wpb_common::Fen;

use crate::{
    db_types::{RefundNo, TradeNo},
    traits::{
        BillApiError,
        MerchantApiError,
        ObjectStoreError,
        OrderApiError,
        PaymentBridgeError,
        RefundApiError,
    },
};

/// The error type for the payment flow APIs. It is the union of the storage-level errors and the
/// business-rule rejections the flows themselves raise. Gateway-side failures are folded in as
/// strings by callers that own the gateway client.
#[derive(Debug, Clone, Error)]
pub enum PaymentFlowError {
    #[error("Merchant {0} is not configured")]
    MerchantNotFound(String),
    #[error("Order with trade number {0} does not exist")]
    OrderNotFound(TradeNo),
    #[error("Refund with refund number {0} does not exist")]
    RefundNotFound(RefundNo),
    #[error("Refund of {amount} exceeds the original order total of {total}")]
    RefundExceedsTotal { amount: Fen, total: Fen },
    #[error("The merchant credentials are unusable: {0}")]
    Credentials(String),
    #[error("The gateway response is missing required payment parameters: {0}")]
    PaymentParameter(String),
    #[error("Gateway call failed: {0}")]
    Gateway(String),
    #[error("Order storage error: {0}")]
    Order(#[from] OrderApiError),
    #[error("Refund storage error: {0}")]
    Refund(#[from] RefundApiError),
    #[error("Merchant storage error: {0}")]
    Merchant(#[from] MerchantApiError),
    #[error("Bill storage error: {0}")]
    Bill(#[from] BillApiError),
    #[error("Object storage error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("Database error: {0}")]
    Database(#[from] PaymentBridgeError),
}
