//! # Payment bridge engine public API
//!
//! The `pbe_api` module exposes the programmatic API for the payment bridge engine. The API is
//! modular, so that clients of the API can pick and choose the functionality they want, and test
//! doubles only need to implement the backend traits an API actually uses.
//!
//! * [`order_flow_api`] is the primary API for the payment order lifecycle: creation, callback
//!   ingestion, the idempotent success transition, and order close.
//! * [`refund_flow_api`] drives refund initiation and refund reconciliation updates.
//! * [`merchant_api`] manages the gateway merchant accounts the bridge transacts for.
//! * [`bill_api`] records downloaded settlement bills.
//!
//! # API usage
//!
//! The pattern for using all the APIs is the same. An API instance is created by supplying a
//! database backend that implements the specific backend traits required by the API.
//!
//! ```rust,ignore
//! use payment_bridge_engine::{MerchantApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! // SqliteDatabase implements MerchantManagement
//! let api = MerchantApi::new(db);
//! let merchant = api.merchant_by_mch_id("1900000109").await?;
//! ```

pub mod bill_api;
pub mod errors;
pub mod merchant_api;
pub mod order_flow_api;
pub mod order_objects;
pub mod refund_flow_api;
