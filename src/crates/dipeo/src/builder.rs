//! Assembles a [`crate::Dipeo`] from its constituent crates. Grounded on
//! `orchestrator`'s `OrchestratorBuilder`-less-but-constructor-injected
//! style (services and config are plain structs threaded through `new`),
//! generalized into a small builder since this facade additionally wires
//! together a handler registry and a default store/router per
//! `SPEC_FULL.md` §9's "explicit objects threaded through constructors".

use std::any::Any;
use std::sync::Arc;

use dipeo_engine::{Engine, EngineConfig};
use dipeo_handlers::{builtin, Handler, HandlerRegistry, Services};
use dipeo_router::Router;
use dipeo_state::{InMemoryStateStore, StateStore};

use crate::Dipeo;

pub struct DipeoBuilder {
    store: Option<Arc<dyn StateStore>>,
    router: Option<Arc<Router>>,
    registry: HandlerRegistry,
    config: EngineConfig,
    services: Services,
}

impl DipeoBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            router: None,
            registry: HandlerRegistry::new(),
            config: EngineConfig::default(),
            services: Services::new(),
        }
    }

    /// Overrides the default [`InMemoryStateStore`] (e.g. with
    /// [`dipeo_state::SqliteStateStore`] for durable, WAL-backed
    /// persistence).
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Overrides the default [`Router`] — rarely needed, since a fresh
    /// router has no connections yet either way.
    pub fn router(mut self, router: Arc<Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a handler for `node_type`. Call once per node type the
    /// embedding application supports; an execution referencing an
    /// unregistered type fails fast with `NoExecutorError` before any
    /// `ExecutionState` is created.
    pub fn handler(mut self, node_type: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.registry.register(node_type, handler);
        self
    }

    /// Injects a named service, looked up by handlers that declare it in
    /// `requires_services`.
    pub fn service(mut self, name: impl Into<String>, service: Arc<dyn Any + Send + Sync>) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    /// Registers the four minimal built-ins (`start`, `endpoint`,
    /// `condition`, `code_job`) this core ships for test and demo
    /// coverage. Production node bodies (`person_job`, `api_job`, `db`,
    /// `sub_diagram`, …) are always the embedder's own.
    pub fn with_builtin_handlers(mut self) -> Self {
        self.registry.register("start", Arc::new(builtin::StartHandler));
        self.registry.register("endpoint", Arc::new(builtin::EndpointHandler));
        self.registry.register("condition", Arc::new(builtin::ConditionHandler));
        self.registry.register("code_job", Arc::new(builtin::CodeJobHandler));
        self
    }

    pub fn build(self) -> Dipeo {
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryStateStore::new()));
        let router = self.router.unwrap_or_else(|| Arc::new(Router::new()));
        let engine = Engine::new(Arc::clone(&store), Arc::clone(&router), self.registry, self.config)
            .with_services(self.services);
        Dipeo::from_parts(engine, router, store)
    }
}

impl Default for DipeoBuilder {
    fn default() -> Self {
        Self::new()
    }
}
