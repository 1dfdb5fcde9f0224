//! Bootstrap contract against a scripted engine

use coordnode::coordinator::engine::NodeConfig;
use coordnode::coordinator::grpc::PeerService;
use coordnode::{
    Bootstrapper, CoordinationEngine, CoordinatorConfig, EmbeddedNode, Error, ExtensionHooks,
    Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonic::service::RoutesBuilder;

#[derive(Debug, Default)]
struct Probe {
    launches: AtomicUsize,
    stops: AtomicUsize,
    closes: AtomicUsize,
    events: Mutex<Vec<&'static str>>,
    handler_prefixes: Mutex<Vec<String>>,
}

impl Probe {
    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Readiness {
    Immediate,
    Never,
}

struct ScriptedEngine {
    probe: Arc<Probe>,
    readiness: Readiness,
    fail_launch: bool,
    fail_close: bool,
}

impl ScriptedEngine {
    fn new(readiness: Readiness) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let engine = Self {
            probe: probe.clone(),
            readiness,
            fail_launch: false,
            fail_close: false,
        };
        (engine, probe)
    }
}

#[derive(Debug)]
struct ScriptedNode {
    name: String,
    probe: Arc<Probe>,
    readiness: Readiness,
    fail_close: bool,
}

#[tonic::async_trait]
impl CoordinationEngine for ScriptedEngine {
    type Node = ScriptedNode;

    async fn launch(&self, mut config: NodeConfig) -> Result<ScriptedNode> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "address already in use",
            )));
        }

        let mut routes = RoutesBuilder::default();
        config.hooks.register_services(&mut routes);
        *self.probe.handler_prefixes.lock().unwrap() =
            config.hooks.take_user_handlers().into_keys().collect();

        Ok(ScriptedNode {
            name: config.name,
            probe: self.probe.clone(),
            readiness: self.readiness,
            fail_close: self.fail_close,
        })
    }
}

#[tonic::async_trait]
impl EmbeddedNode for ScriptedNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ready(&self) {
        match self.readiness {
            Readiness::Immediate => self.probe.record("ready"),
            Readiness::Never => std::future::pending().await,
        }
    }

    fn stop(&self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.probe.record("stop");
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.probe.record("close");
        if self.fail_close {
            return Err(Error::Internal("data dir is read-only".into()));
        }
        Ok(())
    }
}

fn host() -> CoordinatorConfig {
    CoordinatorConfig {
        name: "master-1".into(),
        client_addr: "127.0.0.1:8261".into(),
        peer_addr: "127.0.0.1:8291".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_ready_node_is_returned() {
    let (engine, probe) = ScriptedEngine::new(Readiness::Immediate);
    let bootstrapper = Bootstrapper::new(engine);

    let node = bootstrapper.start(&host(), ExtensionHooks::none()).await.unwrap();
    assert_eq!(node.name(), "master-1");
    assert_eq!(probe.launches.load(Ordering::SeqCst), 1);
    assert_eq!(probe.events(), vec!["ready"]);
    assert_eq!(probe.stops.load(Ordering::SeqCst), 0);
    assert!(probe.handler_prefixes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_registrar_runs_once_before_readiness() {
    let (engine, probe) = ScriptedEngine::new(Readiness::Immediate);
    let calls = Arc::new(AtomicUsize::new(0));

    let registrar_probe = probe.clone();
    let registrar_calls = calls.clone();
    let hooks = ExtensionHooks::none().with_service_registrar(move |routes| {
        registrar_calls.fetch_add(1, Ordering::SeqCst);
        registrar_probe.record("registrar");
        routes.add_service(PeerService::new("host".into(), 7).into_server());
    });

    Bootstrapper::new(engine).start(&host(), hooks).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(probe.events(), vec!["registrar", "ready"]);
}

#[tokio::test]
async fn test_user_handlers_reach_the_engine() {
    let (engine, probe) = ScriptedEngine::new(Readiness::Immediate);
    let hooks = ExtensionHooks::none()
        .with_user_handler("/apis/v1", axum::Router::new())
        .with_user_handler("/status", axum::Router::new());

    Bootstrapper::new(engine).start(&host(), hooks).await.unwrap();
    assert_eq!(
        *probe.handler_prefixes.lock().unwrap(),
        vec!["/apis/v1".to_string(), "/status".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_startup_timeout_stops_and_closes_node() {
    let (engine, probe) = ScriptedEngine::new(Readiness::Never);
    let bootstrapper = Bootstrapper::new(engine);
    assert_eq!(bootstrapper.startup_timeout(), Duration::from_secs(60));

    let started = tokio::time::Instant::now();
    let err = bootstrapper
        .start(&host(), ExtensionHooks::none())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StartupTimeout(d) if d == Duration::from_secs(60)));
    assert!(err.to_string().contains("60s"));
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    assert_eq!(probe.events(), vec!["stop", "close"]);
}

#[tokio::test(start_paused = true)]
async fn test_startup_timeout_is_configurable() {
    let (engine, _probe) = ScriptedEngine::new(Readiness::Never);
    let bootstrapper = Bootstrapper::new(engine).with_startup_timeout(Duration::from_secs(5));

    let started = tokio::time::Instant::now();
    let err = bootstrapper
        .start(&host(), ExtensionHooks::none())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StartupTimeout(d) if d == Duration::from_secs(5)));
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_close_failure_does_not_mask_timeout() {
    let (mut engine, probe) = ScriptedEngine::new(Readiness::Never);
    engine.fail_close = true;

    let err = Bootstrapper::new(engine)
        .start(&host(), ExtensionHooks::none())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StartupTimeout(_)));
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_launch_failure_is_wrapped_without_cleanup() {
    let (mut engine, probe) = ScriptedEngine::new(Readiness::Immediate);
    engine.fail_launch = true;

    let err = Bootstrapper::new(engine)
        .start(&host(), ExtensionHooks::none())
        .await
        .unwrap_err();
    match &err {
        Error::LaunchFailed(source) => assert!(matches!(**source, Error::Io(_))),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err
        .to_string()
        .starts_with("failed to start embedded coordination node"));
    assert_eq!(probe.stops.load(Ordering::SeqCst), 0);
    assert_eq!(probe.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bad_config_fails_the_same_way_every_time() {
    let (engine, probe) = ScriptedEngine::new(Readiness::Immediate);
    let bootstrapper = Bootstrapper::new(engine);
    let mut bad = host();
    bad.client_addr = "not-an-address".into();

    for _ in 0..3 {
        let err = bootstrapper
            .start(&bad, ExtensionHooks::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    }
    assert_eq!(probe.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reserved_handler_prefix_fails_before_launch() {
    let (engine, probe) = ScriptedEngine::new(Readiness::Immediate);
    let hooks = ExtensionHooks::none().with_user_handler("/health", axum::Router::new());

    let err = Bootstrapper::new(engine)
        .start(&host(), hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert_eq!(probe.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_before_readiness() {
    let (engine, probe) = ScriptedEngine::new(Readiness::Never);
    let bootstrapper = Bootstrapper::new(engine);

    let abort = tokio::time::sleep(Duration::from_secs(1));
    let err = bootstrapper
        .start_until(&host(), ExtensionHooks::none(), abort)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StartupAborted));
    assert_eq!(probe.events(), vec!["stop", "close"]);
}
