//! Shared fixtures for broker integration tests.

mod harness;

#[allow(unused_imports)]
pub use harness::{query_param, TestBroker, TestClient};
