//! keyjar broker daemon.
//!
//! Hands out short-lived SSH certificates to clients that prove, through an
//! external identity provider, who they are and that they hold the private
//! key they started the session with.

pub mod config;
pub mod reaper;
pub mod services;
pub mod stats;

pub use config::{BrokerConfig, ConfigError, Flags};
pub use reaper::spawn_reaper;
pub use services::{AuthRedirect, Broker, BrokerError, Callback};
pub use stats::{BrokerStats, StatsSnapshot};
