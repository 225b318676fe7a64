//! # Payment bridge server
//! This crate hosts the REST server for the payment bridge. It is responsible for:
//! Accepting payment order, refund and merchant management requests from the platform.
//! Receiving asynchronous payment and refund notifications from the WeChat gateway.
//! Running the reconciliation sweeps that repair orders whose callbacks never arrived.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/api/...`: Order, refund, merchant, bill and transfer management routes.
//! * `/wxpay/notify/...`: The gateway notification routes. These always answer HTTP 200; success or
//!   failure travels in the body envelope the gateway expects for the channel.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;

pub mod helpers;
pub mod integrations;
pub mod locks;
pub mod notify_routes;
pub mod routes;
pub mod server;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
