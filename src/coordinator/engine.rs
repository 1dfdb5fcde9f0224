//! Seam between the bootstrapper and the coordination engine
//!
//! The bootstrapper only knows how to derive a [`NodeConfig`], hand it to a
//! [`CoordinationEngine`] and wait on the resulting [`EmbeddedNode`]. The
//! engine owns listeners, consensus and storage.

use crate::common::utils::split_host_port;
use crate::common::{member_id, ClusterState, CoordinatorConfig, Error, Result};
use crate::coordinator::http::is_reserved_path;
use axum::Router;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use tonic::service::RoutesBuilder;

/// Registers additional gRPC services next to the node's own.
pub type ServiceRegistrar = Box<dyn FnOnce(&mut RoutesBuilder) + Send>;

/// Caller-supplied extensions attached to the node's client listener.
///
/// Handler prefixes are checked against the built-in routes and each other
/// when the node configuration is derived. They cannot be checked against
/// services added by the registrar, whose paths are only known once it runs
/// inside the engine. A prefix such as `/host.Api` that shadows a registered
/// service, or a service registered twice, fails the launch with
/// [`Error::InvalidConfig`].
#[derive(Default)]
pub struct ExtensionHooks {
    service_registrar: Option<ServiceRegistrar>,
    user_handlers: BTreeMap<String, Router>,
}

impl ExtensionHooks {
    /// No extra gRPC services and no extra HTTP routes.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(
        service_registrar: Option<ServiceRegistrar>,
        user_handlers: Option<HashMap<String, Router>>,
    ) -> Self {
        Self {
            service_registrar,
            user_handlers: user_handlers.unwrap_or_default().into_iter().collect(),
        }
    }

    /// Each service must be added once; its `/package.Service` path must not
    /// be used as an HTTP handler prefix.
    pub fn with_service_registrar<F>(mut self, registrar: F) -> Self
    where
        F: FnOnce(&mut RoutesBuilder) + Send + 'static,
    {
        self.service_registrar = Some(Box::new(registrar));
        self
    }

    /// Serve `router` under `prefix` on the node's HTTP surface.
    pub fn with_user_handler(mut self, prefix: impl Into<String>, router: Router) -> Self {
        self.user_handlers.insert(prefix.into(), router);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.service_registrar.is_none() && self.user_handlers.is_empty()
    }

    pub fn has_service_registrar(&self) -> bool {
        self.service_registrar.is_some()
    }

    pub fn user_handler_prefixes(&self) -> impl Iterator<Item = &str> {
        self.user_handlers.keys().map(String::as_str)
    }

    /// Run the registrar against `routes`. The registrar is consumed, so a
    /// second call is a no-op returning `false`.
    pub fn register_services(&mut self, routes: &mut RoutesBuilder) -> bool {
        match self.service_registrar.take() {
            Some(register) => {
                register(routes);
                true
            }
            None => false,
        }
    }

    pub fn take_user_handlers(&mut self) -> BTreeMap<String, Router> {
        std::mem::take(&mut self.user_handlers)
    }

    fn validate(&self) -> Result<()> {
        for prefix in self.user_handlers.keys() {
            if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
                return Err(Error::InvalidConfig(format!(
                    "HTTP handler prefix {:?} must start with '/' and name a path segment",
                    prefix
                )));
            }
            if is_reserved_path(prefix) {
                return Err(Error::InvalidConfig(format!(
                    "HTTP handler prefix {:?} collides with a built-in route",
                    prefix
                )));
            }
        }
        for outer in self.user_handlers.keys() {
            let nested = format!("{}/", outer);
            if let Some(inner) = self.user_handlers.keys().find(|p| p.starts_with(&nested)) {
                return Err(Error::InvalidConfig(format!(
                    "HTTP handler prefix {:?} is nested under {:?}",
                    inner, outer
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ExtensionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHooks")
            .field("service_registrar", &self.service_registrar.is_some())
            .field("user_handlers", &self.user_handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One entry of the initial cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub id: u64,
    pub peer_addr: String,
}

/// Everything an engine needs to bring up one member. Built by
/// [`NodeConfig::derive`] and not changed afterwards.
#[derive(Debug)]
pub struct NodeConfig {
    pub name: String,
    pub member_id: u64,
    pub data_dir: PathBuf,
    pub listen_client_addr: SocketAddr,
    pub listen_peer_addr: SocketAddr,
    pub advertise_client_addr: String,
    pub advertise_peer_addr: String,
    pub initial_cluster: Vec<Member>,
    pub cluster_state: ClusterState,
    pub cluster_token: String,
    pub hooks: ExtensionHooks,
}

impl NodeConfig {
    /// Derive the node configuration from host configuration. Opens nothing.
    pub fn derive(host: &CoordinatorConfig, hooks: ExtensionHooks) -> Result<Self> {
        let name = host.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidConfig("member name must not be empty".into()));
        }
        if name.contains(['=', ',']) {
            return Err(Error::InvalidConfig(format!(
                "member name {:?} must not contain '=' or ','",
                name
            )));
        }

        let data_dir = if host.data_dir.as_os_str().is_empty() {
            PathBuf::from(format!("default.{}", name))
        } else {
            host.data_dir.clone()
        };

        let listen_client_addr = parse_listen_addr("client", &host.client_addr)?;
        let listen_peer_addr = parse_listen_addr("peer", &host.peer_addr)?;
        if listen_client_addr == listen_peer_addr && listen_client_addr.port() != 0 {
            return Err(Error::InvalidConfig(format!(
                "client and peer listeners share address {}",
                listen_client_addr
            )));
        }

        let advertise_client_addr =
            advertise_addr("client", host.advertise_client_addr.as_deref(), &host.client_addr)?;
        let advertise_peer_addr =
            advertise_addr("peer", host.advertise_peer_addr.as_deref(), &host.peer_addr)?;

        let cluster_token = host.initial_cluster_token.trim().to_string();
        if cluster_token.is_empty() {
            return Err(Error::InvalidConfig(
                "initial cluster token must not be empty".into(),
            ));
        }

        let initial_cluster = if host.initial_cluster.trim().is_empty() {
            format!("{}={}", name, advertise_peer_addr)
        } else {
            host.initial_cluster.clone()
        };
        let initial_cluster = parse_initial_cluster(&initial_cluster, &cluster_token)?;
        match initial_cluster.iter().find(|m| m.name == name) {
            Some(me) if me.peer_addr != advertise_peer_addr => {
                return Err(Error::InvalidConfig(format!(
                    "initial cluster advertises {} for {:?} but the member advertises {}",
                    me.peer_addr, name, advertise_peer_addr
                )))
            }
            Some(_) => {}
            None => {
                return Err(Error::InvalidConfig(format!(
                    "member {:?} is missing from the initial cluster",
                    name
                )))
            }
        }

        hooks.validate()?;

        Ok(Self {
            name: name.to_string(),
            member_id: member_id(name, &advertise_peer_addr, &cluster_token),
            data_dir,
            listen_client_addr,
            listen_peer_addr,
            advertise_client_addr,
            advertise_peer_addr,
            initial_cluster,
            cluster_state: host.initial_cluster_state,
            cluster_token,
            hooks,
        })
    }

    /// Directory holding this member's persistent state.
    pub fn member_dir(&self) -> PathBuf {
        self.data_dir.join("member")
    }
}

fn parse_listen_addr(kind: &str, addr: &str) -> Result<SocketAddr> {
    addr.trim().parse().map_err(|_| {
        Error::InvalidConfig(format!(
            "{} listen address {:?} must be an ip:port pair",
            kind, addr
        ))
    })
}

fn advertise_addr(kind: &str, advertise: Option<&str>, listen: &str) -> Result<String> {
    let addr = advertise
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(listen.trim());
    split_host_port(addr).map_err(|reason| {
        Error::InvalidConfig(format!(
            "{} advertise address {:?}: {}",
            kind, addr, reason
        ))
    })?;
    Ok(addr.to_string())
}

/// Parse `name=host:port,name=host:port`.
fn parse_initial_cluster(spec: &str, cluster_token: &str) -> Result<Vec<Member>> {
    let mut members: Vec<Member> = Vec::new();
    for entry in spec.split(',').map(str::trim) {
        let (name, peer_addr) = entry.split_once('=').ok_or_else(|| {
            Error::InvalidConfig(format!(
                "initial cluster entry {:?} must look like name=host:port",
                entry
            ))
        })?;
        let (name, peer_addr) = (name.trim(), peer_addr.trim());
        if name.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "initial cluster entry {:?} has no member name",
                entry
            )));
        }
        split_host_port(peer_addr).map_err(|reason| {
            Error::InvalidConfig(format!(
                "initial cluster entry {:?}: {}",
                entry, reason
            ))
        })?;
        if members.iter().any(|m| m.name == name) {
            return Err(Error::InvalidConfig(format!(
                "member {:?} listed twice in the initial cluster",
                name
            )));
        }
        members.push(Member {
            name: name.to_string(),
            id: member_id(name, peer_addr, cluster_token),
            peer_addr: peer_addr.to_string(),
        });
    }
    Ok(members)
}

/// A coordination engine able to bring up one member from a [`NodeConfig`].
///
/// `launch` installs the hooks, binds listeners and starts serving in the
/// background; it must return without waiting for readiness.
#[tonic::async_trait]
pub trait CoordinationEngine: Send + Sync {
    type Node: EmbeddedNode;

    async fn launch(&self, config: NodeConfig) -> Result<Self::Node>;
}

/// A launched member.
#[tonic::async_trait]
pub trait EmbeddedNode: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Resolves once the member serves requests. Never resolves if it never
    /// gets there.
    async fn ready(&self);

    /// Request a graceful stop. Returns immediately.
    fn stop(&self);

    /// Stop if needed and release every resource held by the member.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> CoordinatorConfig {
        CoordinatorConfig {
            name: "master-1".into(),
            client_addr: "127.0.0.1:8261".into(),
            peer_addr: "127.0.0.1:8291".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_derive_defaults() {
        let config = NodeConfig::derive(&host(), ExtensionHooks::none()).unwrap();
        assert_eq!(config.name, "master-1");
        assert_eq!(config.data_dir, PathBuf::from("default.master-1"));
        assert_eq!(config.member_dir(), PathBuf::from("default.master-1/member"));
        assert_eq!(config.advertise_client_addr, "127.0.0.1:8261");
        assert_eq!(config.advertise_peer_addr, "127.0.0.1:8291");
        assert_eq!(config.initial_cluster.len(), 1);
        assert_eq!(config.initial_cluster[0].peer_addr, "127.0.0.1:8291");
        assert_eq!(config.initial_cluster[0].id, config.member_id);
        assert!(config.hooks.is_empty());
    }

    #[test]
    fn test_derive_multi_member_cluster() {
        let mut host = host();
        host.advertise_peer_addr = Some("m1.local:8291".into());
        host.initial_cluster =
            "master-1=m1.local:8291, master-2=m2.local:8291,master-3=m3.local:8291".into();
        host.initial_cluster_state = ClusterState::Existing;

        let config = NodeConfig::derive(&host, ExtensionHooks::none()).unwrap();
        let names: Vec<_> = config.initial_cluster.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["master-1", "master-2", "master-3"]);
        assert_eq!(config.cluster_state, ClusterState::Existing);
    }

    #[test]
    fn test_derive_rejects_bad_config() {
        let cases: [fn(&mut CoordinatorConfig); 10] = [
            |h| h.name = "  ".into(),
            |h| h.client_addr = "localhost:8261".into(),
            |h| h.peer_addr = "127.0.0.1".into(),
            |h| h.peer_addr = h.client_addr.clone(),
            |h| h.advertise_client_addr = Some("no-port".into()),
            |h| h.initial_cluster = "master-2=127.0.0.1:8292".into(),
            |h| h.initial_cluster = "master-1=127.0.0.1:9999".into(),
            |h| h.initial_cluster = "master-1".into(),
            |h| h.initial_cluster = "master-1=127.0.0.1:8291,master-1=127.0.0.1:8292".into(),
            |h| h.initial_cluster_token = String::new(),
        ];

        for (i, mutate) in cases.iter().enumerate() {
            let mut host = host();
            mutate(&mut host);
            let err = NodeConfig::derive(&host, ExtensionHooks::none()).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "case {i}: {err}");
        }
    }

    #[test]
    fn test_derive_rejects_bad_handler_prefixes() {
        for prefix in ["", "/", "api", "/api/", "/health", "/members", "/coord.KV"] {
            let hooks = ExtensionHooks::none().with_user_handler(prefix, Router::new());
            let err = NodeConfig::derive(&host(), hooks).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{prefix:?}: {err}");
        }

        let hooks = ExtensionHooks::none()
            .with_user_handler("/apis", Router::new())
            .with_user_handler("/apis/v1", Router::new());
        assert!(NodeConfig::derive(&host(), hooks).is_err());

        let hooks = ExtensionHooks::none()
            .with_user_handler("/apis/v1", Router::new())
            .with_user_handler("/apis-v2", Router::new());
        let config = NodeConfig::derive(&host(), hooks).unwrap();
        assert_eq!(
            config.hooks.user_handler_prefixes().collect::<Vec<_>>(),
            vec!["/apis-v2", "/apis/v1"]
        );
    }

    #[test]
    fn test_registrar_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut hooks = ExtensionHooks::none().with_service_registrar(move |_routes| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(hooks.has_service_registrar());

        let mut routes = RoutesBuilder::default();
        assert!(hooks.register_services(&mut routes));
        assert!(!hooks.register_services(&mut routes));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_mirrors_optional_arguments() {
        assert!(ExtensionHooks::new(None, None).is_empty());
        assert!(ExtensionHooks::new(None, Some(HashMap::new())).is_empty());

        let mut handlers = HashMap::new();
        handlers.insert("/debug".to_string(), Router::new());
        let hooks = ExtensionHooks::new(None, Some(handlers));
        assert!(!hooks.is_empty());
        assert!(!hooks.has_service_registrar());
    }
}
