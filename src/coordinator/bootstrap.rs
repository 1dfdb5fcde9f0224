//! Embedded node bootstrap
//!
//! Derives the node configuration, launches the node through a
//! [`CoordinationEngine`] and hands it back only once it reports ready.
//! If the deadline passes first the half-started node is stopped and
//! closed, and the caller gets [`Error::StartupTimeout`].

use crate::common::{CoordinatorConfig, Error, Result, DEFAULT_STARTUP_TIMEOUT};
use crate::coordinator::engine::{CoordinationEngine, EmbeddedNode, ExtensionHooks, NodeConfig};
use crate::coordinator::server::{LocalEngine, LocalNode};
use std::future::Future;
use std::time::Duration;

enum Startup {
    Ready,
    TimedOut,
    Aborted,
}

pub struct Bootstrapper<E> {
    engine: E,
    startup_timeout: Duration,
}

impl<E: CoordinationEngine> Bootstrapper<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Start a node and wait until it is ready or the startup deadline
    /// passes.
    pub async fn start(
        &self,
        host: &CoordinatorConfig,
        hooks: ExtensionHooks,
    ) -> Result<E::Node> {
        self.start_until(host, hooks, std::future::pending()).await
    }

    /// Like [`Bootstrapper::start`], but also gives up when `abort`
    /// completes first, returning [`Error::StartupAborted`].
    pub async fn start_until<F>(
        &self,
        host: &CoordinatorConfig,
        hooks: ExtensionHooks,
        abort: F,
    ) -> Result<E::Node>
    where
        F: Future<Output = ()>,
    {
        let config = NodeConfig::derive(host, hooks)?;
        let name = config.name.clone();
        tracing::debug!(
            name = %name,
            service_registrar = config.hooks.has_service_registrar(),
            user_handlers = ?config.hooks.user_handler_prefixes().collect::<Vec<_>>(),
            "starting embedded coordination node"
        );

        let mut node = self
            .engine
            .launch(config)
            .await
            .map_err(|e| Error::LaunchFailed(Box::new(e)))?;

        let outcome = tokio::select! {
            _ = node.ready() => Startup::Ready,
            _ = tokio::time::sleep(self.startup_timeout) => Startup::TimedOut,
            _ = abort => Startup::Aborted,
        };

        match outcome {
            Startup::Ready => {
                tracing::info!(name = %name, "embedded coordination node is ready");
                Ok(node)
            }
            Startup::TimedOut => {
                tracing::error!(
                    name = %name,
                    timeout = ?self.startup_timeout,
                    "embedded coordination node did not become ready in time"
                );
                abandon(&mut node).await;
                Err(Error::StartupTimeout(self.startup_timeout))
            }
            Startup::Aborted => {
                tracing::warn!(name = %name, "embedded coordination node startup aborted");
                abandon(&mut node).await;
                Err(Error::StartupAborted)
            }
        }
    }
}

/// Best-effort teardown of a node that never became ready.
async fn abandon<N: EmbeddedNode>(node: &mut N) {
    node.stop();
    if let Err(e) = node.close().await {
        tracing::warn!(
            name = %node.name(),
            error = %e,
            "failed to close embedded coordination node"
        );
    }
}

/// Start an in-process coordination node with the default startup deadline.
pub async fn start_coordinator(
    host: &CoordinatorConfig,
    hooks: ExtensionHooks,
) -> Result<LocalNode> {
    Bootstrapper::new(LocalEngine::new()).start(host, hooks).await
}
