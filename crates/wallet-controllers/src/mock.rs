//! Scriptable in-memory provider for tests and local tooling.
//!
//! Responses are configured per method, either as a fixed answer or as a
//! queue consumed one call at a time. A [`Gate`] holds the next call to a
//! method until it is opened, which is how tests pin down request ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chain_eth::rpc::{RpcError, RpcRequest};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::ProviderEngineConfig;
use crate::error::Result;
use crate::provider::{ErrorHandler, Provider, ProviderFactory, ProviderTarget};

type SharedErrorHandler = Arc<dyn Fn(&RpcError) + Send + Sync>;

#[derive(Default)]
struct Script {
    fixed: HashMap<String, Result<Value, RpcError>>,
    queued: HashMap<String, VecDeque<Result<Value, RpcError>>>,
    gates: HashMap<String, VecDeque<Arc<Semaphore>>>,
    calls: Vec<RpcRequest>,
    events: Vec<String>,
}

pub struct MockProvider {
    label: String,
    script: Mutex<Script>,
    error_handlers: Mutex<Vec<SharedErrorHandler>>,
    stops: AtomicUsize,
}

/// Releases one held request.
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn open(&self) {
        self.0.add_permits(1);
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::labeled("mock")
    }

    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            script: Mutex::new(Script::default()),
            error_handlers: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn with_result(self, method: &str, value: Value) -> Self {
        self.set_result(method, value);
        self
    }

    pub fn with_error(self, method: &str, error: RpcError) -> Self {
        self.set_error(method, error);
        self
    }

    /// Answer every call to `method` with `value`.
    pub fn set_result(&self, method: &str, value: Value) {
        self.script.lock().fixed.insert(method.to_string(), Ok(value));
    }

    /// Fail every call to `method` with `error`.
    pub fn set_error(&self, method: &str, error: RpcError) {
        self.script.lock().fixed.insert(method.to_string(), Err(error));
    }

    /// Answer the next call to `method` with `response`, ahead of the fixed
    /// answer.
    pub fn push_response(&self, method: &str, response: Result<Value, RpcError>) {
        self.script
            .lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    /// Holds the next call to `method` after it is recorded until the returned
    /// gate is opened.
    pub fn hold_next(&self, method: &str) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.script
            .lock()
            .gates
            .entry(method.to_string())
            .or_default()
            .push_back(Arc::clone(&semaphore));
        Gate(semaphore)
    }

    pub fn calls(&self) -> Vec<RpcRequest> {
        self.script.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// `begin <method>` / `end <method>` in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.script.lock().events.clone()
    }

    /// Delivers a transport error to every registered handler.
    pub fn emit_error(&self, error: RpcError) {
        let handlers: Vec<SharedErrorHandler> = self.error_handlers.lock().clone();
        for handler in handlers {
            handler(&error);
        }
    }

    pub fn error_handler_count(&self) -> usize {
        self.error_handlers.lock().len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_count() > 0
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn send(&self, request: RpcRequest) -> Result<Value, RpcError> {
        let method = request.method.clone();
        if self.is_stopped() {
            return Err(RpcError::Stopped);
        }

        let gate = {
            let mut script = self.script.lock();
            script.calls.push(request);
            script.events.push(format!("begin {method}"));
            script.gates.get_mut(&method).and_then(VecDeque::pop_front)
        };

        if let Some(gate) = gate {
            // Semaphore is never closed, so acquire only fails if dropped.
            let _ = gate.acquire().await;
        }

        let mut script = self.script.lock();
        let queued = script.queued.get_mut(&method).and_then(VecDeque::pop_front);
        let response = match queued {
            Some(response) => response,
            None => script.fixed.get(&method).cloned().unwrap_or_else(|| {
                Err(RpcError::Response {
                    code: -32601,
                    message: format!("method {method} not found"),
                })
            }),
        };
        script.events.push(format!("end {method}"));
        response
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.error_handlers.lock().push(Arc::from(handler));
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

type Setup = Box<dyn Fn(&ProviderTarget, &MockProvider) + Send + Sync>;

/// Factory that hands out [`MockProvider`]s and remembers them.
#[derive(Default)]
pub struct MockProviderFactory {
    setup: Option<Setup>,
    created: Mutex<Vec<(ProviderTarget, ProviderEngineConfig, Arc<MockProvider>)>>,
}

impl MockProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `setup` on every provider before it is handed out.
    pub fn with_setup(setup: impl Fn(&ProviderTarget, &MockProvider) + Send + Sync + 'static) -> Self {
        Self {
            setup: Some(Box::new(setup)),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<Arc<MockProvider>> {
        self.created.lock().iter().map(|(_, _, p)| Arc::clone(p)).collect()
    }

    pub fn last(&self) -> Option<Arc<MockProvider>> {
        self.created.lock().last().map(|(_, _, p)| Arc::clone(p))
    }

    pub fn targets(&self) -> Vec<ProviderTarget> {
        self.created.lock().iter().map(|(t, _, _)| t.clone()).collect()
    }

    pub fn engines(&self) -> Vec<ProviderEngineConfig> {
        self.created.lock().iter().map(|(_, e, _)| e.clone()).collect()
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(
        &self,
        target: &ProviderTarget,
        engine: &ProviderEngineConfig,
    ) -> Result<Arc<dyn Provider>> {
        let label = match target {
            ProviderTarget::Named(network_type) => network_type.to_string(),
            ProviderTarget::Standard { rpc_url, .. } => rpc_url.clone(),
        };
        let provider = Arc::new(MockProvider::labeled(label));
        if let Some(setup) = &self.setup {
            setup(target, &provider);
        }
        self.created
            .lock()
            .push((target.clone(), engine.clone(), Arc::clone(&provider)));
        Ok(provider)
    }
}
