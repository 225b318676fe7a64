//! Reconciliation workers
//!
//! Three independent interval loops form the safety net for callbacks that were lost, delayed or
//! never sent:
//! * [`order_expiry`] polls the gateway for INIT orders whose payable window has passed.
//! * [`refund_poll`] polls the gateway for refunds still in PROCESSING.
//! * [`bill_download`] archives the daily settlement bills over a trailing window.
//!
//! Each worker commits per record and isolates per-record failures, so one bad record never
//! aborts a sweep and a mid-sweep crash keeps the progress already made. The `run_*_sweep`
//! functions hold the actual sweep logic and are generic over the database and gateway seams;
//! the `start_*_worker` wrappers pin them to the production types and an interval timer.
mod bill_download;
mod order_expiry;
mod refund_poll;

pub use bill_download::{run_bill_sweep, start_bill_download_worker, BillSweepOutcome};
pub use order_expiry::{run_order_sweep, start_order_expiry_worker, OrderSweepOutcome};
pub use refund_poll::{run_refund_sweep, start_refund_poll_worker, RefundSweepOutcome};
