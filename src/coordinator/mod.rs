//! Embedded coordination node
//!
//! - Bootstrap of an embedded node with a readiness deadline
//! - Extension hooks for host gRPC services and HTTP routes
//! - An in-process engine serving a revisioned key space
//! - A client factory for talking to the cluster

pub mod bootstrap;
pub mod client;
pub mod engine;
pub mod grpc;
pub mod http;
pub mod server;
pub mod store;

pub use bootstrap::{start_coordinator, Bootstrapper};
pub use client::{new_client, ClientFactory, CoordClient};
pub use engine::{CoordinationEngine, EmbeddedNode, ExtensionHooks, NodeConfig, ServiceRegistrar};
pub use server::{LocalEngine, LocalNode};
