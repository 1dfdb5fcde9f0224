//! In-process coordination engine
//!
//! `LocalEngine` runs a single member inside the host process. The client
//! listener serves HTTP/1 and gRPC (h2c) through one axum router; the peer
//! listener runs a tonic server with the `Peer` service. There is no
//! replication: the member owns the whole key space.

use crate::common::{Error, Result};
use crate::coordinator::engine::{CoordinationEngine, EmbeddedNode, NodeConfig};
use crate::coordinator::grpc::{KvService, MaintenanceService, PeerService};
use crate::coordinator::http::{create_router, not_found, HttpState};
use crate::coordinator::store::KvStore;
use axum::Router;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::RoutesBuilder;

const SNAPSHOT_FILE: &str = "snap.json";

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEngine;

impl LocalEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Resolves once `stop` is set or its sender is gone.
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Built-in gRPC and HTTP routes plus the host's hooks, as one router.
///
/// axum panics on conflicting routes, for instance a service registered
/// twice or a handler prefix shadowing a registered service. Such a panic is
/// reported as [`Error::InvalidConfig`].
fn client_router(config: &mut NodeConfig, state: HttpState) -> Result<Router> {
    let name = config.name.clone();
    let member_id = config.member_id;
    let members = state.members.clone();
    let store = state.store.clone();

    let build = AssertUnwindSafe(|| {
        let mut routes = RoutesBuilder::default();
        routes
            .add_service(KvService::new(store.clone()).into_server())
            .add_service(
                MaintenanceService::new(name.clone(), member_id, members, store).into_server(),
            );
        if config.hooks.register_services(&mut routes) {
            tracing::info!(name = %name, "registered host gRPC services");
        }
        create_router(state, config.hooks.take_user_handlers())
            .merge(routes.routes().into_axum_router())
            .fallback(not_found)
    });

    panic::catch_unwind(build).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown conflict".to_string());
        Error::InvalidConfig(format!(
            "conflicting routes on the client listener: {}",
            reason
        ))
    })
}

#[tonic::async_trait]
impl CoordinationEngine for LocalEngine {
    type Node = LocalNode;

    async fn launch(&self, mut config: NodeConfig) -> Result<LocalNode> {
        let member_dir = config.member_dir();
        tokio::fs::create_dir_all(&member_dir).await?;
        let snapshot_path = member_dir.join(SNAPSHOT_FILE);

        let store = Arc::new(KvStore::new());
        let members = Arc::new(config.initial_cluster.clone());
        let (ready_tx, ready_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Hooks are installed before anything listens
        let http_state = HttpState {
            name: config.name.clone(),
            member_id: config.member_id,
            members: members.clone(),
            store: store.clone(),
            ready: ready_rx.clone(),
        };
        let app = client_router(&mut config, http_state)?;

        let client_listener = TcpListener::bind(config.listen_client_addr).await?;
        let peer_listener = TcpListener::bind(config.listen_peer_addr).await?;
        let client_addr = client_listener.local_addr()?;
        let peer_addr = peer_listener.local_addr()?;

        tracing::info!("Launching coordination node: {}", config.name);
        tracing::info!("  member id: {:016x}", config.member_id);
        tracing::info!("  client listener: {}", client_addr);
        tracing::info!("  peer listener: {}", peer_addr);
        tracing::info!("  data dir: {}", config.data_dir.display());
        tracing::info!("  cluster state: {}", config.cluster_state);

        let client_server = axum::serve(client_listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()))
            .into_future();
        let peer_server = tonic::transport::Server::builder()
            .add_service(PeerService::new(config.name.clone(), config.member_id).into_server())
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(peer_listener),
                wait_for_shutdown(shutdown_rx),
            );

        let name = config.name.clone();
        let task_store = store.clone();
        let task_snapshot = snapshot_path.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = task_store.restore_snapshot(&task_snapshot).await {
                tracing::error!(name = %name, error = %e, "failed to restore snapshot");
                return;
            }

            ready_tx.send_replace(true);
            tracing::info!(name = %name, "✓ coordination node serving");

            let (client_res, peer_res) = tokio::join!(client_server, peer_server);
            if let Err(e) = client_res {
                tracing::error!("client listener error: {}", e);
            }
            if let Err(e) = peer_res {
                tracing::error!("peer listener error: {}", e);
            }
            tracing::info!(name = %name, "coordination node stopped serving");
        });

        Ok(LocalNode {
            name: config.name,
            member_id: config.member_id,
            client_addr,
            peer_addr,
            store,
            ready: ready_rx,
            shutdown: shutdown_tx,
            task: Some(task),
            snapshot_path,
        })
    }
}

/// A member launched by [`LocalEngine`].
pub struct LocalNode {
    name: String,
    member_id: u64,
    client_addr: SocketAddr,
    peer_addr: SocketAddr,
    store: Arc<KvStore>,
    ready: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    snapshot_path: PathBuf,
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("name", &self.name)
            .field("member_id", &format_args!("{:016x}", self.member_id))
            .field("client_addr", &self.client_addr)
            .field("peer_addr", &self.peer_addr)
            .field("stopped", &self.store.is_closed())
            .finish()
    }
}

impl LocalNode {
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    /// Bound client address; differs from the configured one for port 0.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_stopped(&self) -> bool {
        self.store.is_closed()
    }
}

#[tonic::async_trait]
impl EmbeddedNode for LocalNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ready(&self) {
        let mut rx = self.ready.clone();
        if rx.wait_for(|ready| *ready).await.is_err() {
            // Serving task exited without ever becoming ready
            std::future::pending::<()>().await;
        }
    }

    fn stop(&self) {
        if !self.store.is_closed() {
            tracing::info!(name = %self.name, "stopping coordination node");
        }
        self.store.close();
        self.shutdown.send_replace(true);
    }

    async fn close(&mut self) -> Result<()> {
        self.stop();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await
            .map_err(|e| Error::Internal(format!("coordination node task failed: {}", e)))?;

        // Only a restored key space may overwrite the snapshot
        let restored = *self.ready.borrow();
        if restored {
            self.store.save_snapshot(&self.snapshot_path).await?;
        }
        tracing::info!(name = %self.name, "coordination node closed");
        Ok(())
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        self.store.close();
        self.shutdown.send_replace(true);
    }
}
