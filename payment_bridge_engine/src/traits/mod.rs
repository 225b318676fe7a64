//! # Database management and control.
//!
//! This module provides the interfaces that define the contracts of the payment bridge database
//! *backends*.
//!
//! The engine keeps four kinds of records: payment orders, refund orders, gateway merchant
//! accounts, and downloaded settlement bills. Each has its own management trait so that a backend
//! (or a test double) can implement exactly the surface a given API needs.
//!
//! ## Traits
//! * [`PaymentBridgeDatabase`] is the umbrella: everything a full backend must provide.
//! * [`OrderManagement`] persists payment orders and performs the guarded `INIT → SUCCESS`
//!   transition.
//! * [`RefundManagement`] persists refund orders and their goods details.
//! * [`MerchantManagement`] stores merchant accounts and credential rotations.
//! * [`BillManagement`] stores the one-per-(merchant, date, category) bill records.
//! * [`ObjectStore`] is write-once blob storage for the bill files themselves.
mod bills;
mod data_objects;
mod merchants;
mod object_store;
mod orders;
mod payment_bridge_database;
mod refunds;

pub use bills::{BillApiError, BillManagement};
pub use data_objects::RefundUpdate;
pub use merchants::{MerchantApiError, MerchantManagement};
pub use object_store::{ObjectStore, ObjectStoreError};
pub use orders::{OrderApiError, OrderManagement};
pub use payment_bridge_database::{PaymentBridgeDatabase, PaymentBridgeError};
pub use refunds::{RefundApiError, RefundManagement};
