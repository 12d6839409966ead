//! Broker request handling.

mod broker;

pub use broker::{AuthRedirect, Broker, BrokerError, Callback};
