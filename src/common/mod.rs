//! Common utilities and types shared across coordnode

pub mod config;
pub mod error;
pub mod utils;

pub use self::config::{
    ClusterState, Config, CoordinatorConfig, TimeoutConfig, DEFAULT_CLIENT_TIMEOUT,
    DEFAULT_KEY_PREFIX, DEFAULT_STARTUP_TIMEOUT,
};
pub use self::error::{Error, Result};
pub use self::utils::{member_id, parse_duration, parse_host_port_addr};
