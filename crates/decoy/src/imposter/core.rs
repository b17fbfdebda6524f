//! Core Imposter struct and implementation.

use super::response::merge_partial;
use super::store::{StubEntry, StubStore};
use super::types::{ImposterConfig, ImposterError, StubDefinition};
use crate::metrics;
use crate::model::{Protocol, Request, Response};
use crate::scripting::Sandbox;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

/// Runtime state of an imposter
#[derive(Debug)]
pub struct Imposter {
    /// Creation envelope; stubs here are stale, the store is authoritative
    config: ImposterConfig,
    protocol: Protocol,
    port: u16,
    /// Protocol defaults with `defaultResponse` applied
    defaults: Response,
    store: StubStore,
    sandbox: Arc<Sandbox>,
    /// Recorded requests (if record_requests is true)
    recorded_requests: RwLock<Vec<Value>>,
    request_count: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl Imposter {
    /// Compile an imposter from its envelope. Only structure is checked;
    /// injected source is stored as given.
    pub fn new(config: ImposterConfig, sandbox: Arc<Sandbox>) -> Result<Self, ImposterError> {
        let protocol = Protocol::parse(&config.protocol)
            .ok_or_else(|| ImposterError::InvalidProtocol(config.protocol.clone()))?;

        let mut defaults = Response::defaults_for(protocol);
        defaults.mode = config.mode;
        match &config.default_response {
            None | Some(Value::Null) => {}
            Some(Value::Object(partial)) => {
                defaults = merge_partial(&defaults, partial, protocol).map_err(|e| {
                    ImposterError::InvalidDefinition(format!("defaultResponse: {e}"))
                })?;
            }
            Some(_) => {
                return Err(ImposterError::InvalidDefinition(
                    "defaultResponse must be an object".to_string(),
                ))
            }
        }

        let stubs = config
            .stubs
            .iter()
            .cloned()
            .map(|def| StubEntry::compile(def, &defaults, protocol))
            .collect::<Result<Vec<_>, _>>()?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            port: config.port.unwrap_or(0),
            config,
            protocol,
            defaults,
            store: StubStore::new(stubs),
            sandbox,
            recorded_requests: RwLock::new(Vec::new()),
            request_count: AtomicU64::new(0),
            shutdown_tx,
            server: Mutex::new(None),
        })
    }

    /// Fix the port once the listener is bound.
    pub(crate) fn assign_port(&mut self, port: u16) {
        self.port = port;
        self.config.port = Some(port);
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn record_requests(&self) -> bool {
        self.config.record_requests
    }

    /// Handle one decoded request end to end.
    pub async fn handle(&self, request: Request) -> Response {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        let view = request.to_script_value();

        if self.config.record_requests {
            let mut recorded = view.clone();
            if let Value::Object(map) = &mut recorded {
                map.insert(
                    "timestamp".to_string(),
                    Value::String(request.timestamp.to_rfc3339()),
                );
            }
            self.recorded_requests.write().push(recorded);
        }

        let span = info_span!("imposter", port = self.port, protocol = %self.protocol);
        let resolution = self
            .store
            .resolve(&view, &self.sandbox, &self.defaults, self.protocol)
            .instrument(span)
            .await;

        let outcome = match (&resolution.fault, resolution.stub_index) {
            (Some(fault), index) => {
                warn!(
                    port = self.port,
                    stub_index = ?index,
                    error = %fault,
                    "Injected response failed, returning generic error"
                );
                "fault"
            }
            (None, Some(index)) => {
                debug!(port = self.port, stub_index = index, "Request matched stub");
                "matched"
            }
            (None, None) => {
                debug!(port = self.port, "No stub matched, using default response");
                "unmatched"
            }
        };
        metrics::record_imposter_request(self.port, self.protocol.as_str(), outcome);

        resolution.response
    }

    fn compile_stub(&self, definition: StubDefinition) -> Result<StubEntry, ImposterError> {
        StubEntry::compile(definition, &self.defaults, self.protocol)
    }

    /// Envelope with the current stubs, as reported by the admin API.
    pub fn to_config(&self) -> ImposterConfig {
        let mut config = self.config.clone();
        config.stubs = self.store.definitions();
        config
    }

    /// Get recorded requests
    pub fn get_recorded_requests(&self) -> Vec<Value> {
        self.recorded_requests.read().clone()
    }

    /// Clear recorded requests
    pub fn clear_recorded_requests(&self) {
        self.recorded_requests.write().clear();
        self.request_count.store(0, Ordering::SeqCst);
    }

    /// Get request count
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Current contents of the state bag shared by injected responses
    pub async fn state(&self) -> serde_json::Map<String, Value> {
        self.store.state().await
    }

    /// Add a stub at a specific index
    pub fn add_stub(&self, stub: StubDefinition, index: Option<usize>) -> Result<(), ImposterError> {
        let entry = self.compile_stub(stub)?;
        self.store.insert(index, entry);
        Ok(())
    }

    /// Replace a stub at a specific index
    pub fn replace_stub(&self, index: usize, stub: StubDefinition) -> Result<(), ImposterError> {
        let entry = self.compile_stub(stub)?;
        self.store.replace(index, entry)
    }

    /// Replace every stub. Nothing changes if any stub is invalid.
    pub fn replace_stubs(&self, stubs: Vec<StubDefinition>) -> Result<(), ImposterError> {
        let entries = stubs
            .into_iter()
            .map(|s| self.compile_stub(s))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.replace_all(entries);
        Ok(())
    }

    /// Delete a stub at a specific index
    pub fn delete_stub(&self, index: usize) -> Result<StubDefinition, ImposterError> {
        self.store.remove(index)
    }

    /// Get all stubs
    pub fn get_stubs(&self) -> Vec<StubDefinition> {
        self.store.definitions()
    }

    /// Get a specific stub by index
    pub fn get_stub(&self, index: usize) -> Option<StubDefinition> {
        self.store.get(index)
    }

    pub(crate) fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn set_server(&self, handle: JoinHandle<()>) {
        *self.server.lock() = Some(handle);
    }

    /// Signal the listener to stop and hand back its task so the caller can
    /// wait for the port to be released.
    pub(crate) fn stop(&self) -> Option<JoinHandle<()>> {
        let _ = self.shutdown_tx.send(());
        self.server.lock().take()
    }
}

/// True when any predicate or response in the envelope carries an `inject` key.
pub fn uses_injection(config: &ImposterConfig) -> bool {
    config.stubs.iter().any(stub_uses_injection)
}

pub fn stub_uses_injection(stub: &StubDefinition) -> bool {
    stub.predicates.iter().any(predicate_has_inject)
        || stub
            .responses
            .iter()
            .any(|r| r.get("inject").is_some())
}

fn predicate_has_inject(value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    if map.contains_key("inject") {
        return true;
    }
    ["not", "or", "and"]
        .iter()
        .filter_map(|key| map.get(*key))
        .any(|nested| match nested {
            Value::Array(items) => items.iter().any(predicate_has_inject),
            other => predicate_has_inject(other),
        })
}
