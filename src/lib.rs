//! HTTP front-end for a message bus.
//!
//! Clients that only speak HTTP can produce, consume, and make request/reply
//! calls against a bus through [`controller::Dispatcher`]. Every request is
//! answered with a [`controller::dto::ResponseEnvelope`].

pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod message;
