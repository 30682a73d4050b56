//! # Settlement server
//! This crate hosts the HTTP front end for the settlement engine. It is responsible for:
//! * Pricing carts at checkout and storing the orders that come out of it.
//! * Receiving capture notifications from the payment gateway, and shipment confirmations from carriers, as signed
//!   webhooks.
//! * Exposing commission rule management, escrow reporting, cancellations and disputes to operators.
//! * Running the release sweep that pays sellers once their hold period is over.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/api/...`: Checkout, order, commission, allocation, dispute and reporting routes. See [routes](routes/index.html).
//! * `/webhook/capture` and `/webhook/shipment`: HMAC-signed notifications.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod gateway;
pub mod helpers;
pub mod middleware;
pub mod release_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
