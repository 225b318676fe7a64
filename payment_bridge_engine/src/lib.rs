//! Payment Bridge Engine
//!
//! The payment bridge engine holds the order lifecycle and reconciliation logic for the WeChat
//! payment bridge. It is transport-agnostic: the HTTP server, the gateway client and the
//! scheduled workers all sit in other crates and drive the engine through its public API.
//!
//! The library is divided into two main sections:
//! 1. Database management and control ([`mod@sqlite`]). Sqlite is the only supported backend at
//!    present. You should never need to access the database directly. Instead, use the public API
//!    provided by the engine. The exception is the data types used in the database. These are
//!    defined in the `db_types` module and are public.
//! 2. The engine public API ([`mod@pbe_api`]). This provides the public-facing functionality of
//!    the engine: order flow, refunds, merchant accounts and settlement bills. Specific backends
//!    need to implement the traits in [`mod@traits`] in order to act as a backend for the payment
//!    bridge server.
//!
//! The engine also provides a set of events that can be subscribed to. These events are emitted
//! when an order or refund settles, and fire exactly once per transition. A simple actor
//! framework is used so that you can easily hook into these events and perform custom actions.
mod fs_store;
mod pbe_api;
#[cfg(feature = "sqlite")]
mod sqlite;
pub mod traits;

pub mod db_types;
pub mod events;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

pub use fs_store::FsObjectStore;
pub use pbe_api::{
    bill_api::BillApi,
    errors::PaymentFlowError,
    merchant_api::MerchantApi,
    order_flow_api::OrderFlowApi,
    order_objects,
    refund_flow_api::RefundFlowApi,
};
pub use traits::{
    BillApiError,
    BillManagement,
    MerchantApiError,
    MerchantManagement,
    ObjectStore,
    ObjectStoreError,
    OrderApiError,
    OrderManagement,
    PaymentBridgeDatabase,
    PaymentBridgeError,
    RefundApiError,
    RefundManagement,
    RefundUpdate,
};
