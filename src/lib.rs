//! # coordnode
//!
//! Embedded coordination node for control-plane processes:
//! - Bootstrap of an etcd-like node inside the host process, returned only
//!   once it serves (or failing after a startup deadline)
//! - Extension hooks letting the host register its own gRPC services and
//!   HTTP routes on the node's client listener
//! - A client factory turning an address list into a namespaced client
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────── host process ────────────────┐
//! │                                              │
//! │  Bootstrapper ──launch──▶ CoordinationEngine │
//! │      │                        │              │
//! │      │ ready / deadline       ▼              │
//! │      └──────────────────▶ EmbeddedNode       │
//! │                           ├ client listener  │
//! │                           │  (gRPC + HTTP,   │
//! │                           │   host hooks)    │
//! │                           └ peer listener    │
//! │                                              │
//! │  ClientFactory ──▶ CoordClient ──gRPC──▶ cluster
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use coordnode::{new_client, start_coordinator, CoordinatorConfig, EmbeddedNode, ExtensionHooks};
//!
//! # async fn run() -> coordnode::Result<()> {
//! let config = CoordinatorConfig::default();
//! let mut node = start_coordinator(&config, ExtensionHooks::none()).await?;
//!
//! let client = new_client("127.0.0.1:2379")?;
//! client.put("/leader", "master-1").await?;
//!
//! node.stop();
//! node.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use common::{Config, CoordinatorConfig, Error, Result};
pub use coordinator::{
    new_client, start_coordinator, Bootstrapper, ClientFactory, CoordClient, CoordinationEngine,
    EmbeddedNode, ExtensionHooks, LocalEngine, LocalNode, NodeConfig,
};

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("coord");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
