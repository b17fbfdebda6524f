//! Ordered stub storage and the per-imposter state bag.

use crate::imposter::predicates::{parse_predicates, stub_matches};
use crate::imposter::response::{fault_response, parse_responses, resolve};
use crate::imposter::types::{ImposterError, Predicate, ResponseSpec, StubDefinition};
use crate::model::{Protocol, Response};
use crate::scripting::{InjectionFault, Sandbox};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A compiled stub with its response cursor.
#[derive(Debug)]
pub struct StubEntry {
    definition: StubDefinition,
    predicates: Vec<Predicate>,
    responses: Vec<ResponseSpec>,
    next_response: AtomicUsize,
}

impl StubEntry {
    pub fn compile(
        definition: StubDefinition,
        defaults: &Response,
        protocol: Protocol,
    ) -> Result<Self, ImposterError> {
        let predicates = parse_predicates(&definition.predicates)?;
        let responses = parse_responses(&definition.responses, defaults, protocol)?;
        Ok(Self {
            definition,
            predicates,
            responses,
            next_response: AtomicUsize::new(0),
        })
    }

    pub fn definition(&self) -> &StubDefinition {
        &self.definition
    }

    /// Responses rotate: the Nth use of this stub gets response `N mod len`.
    fn next_response(&self) -> &ResponseSpec {
        let index = self.next_response.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        &self.responses[index]
    }
}

/// Outcome of resolving one request.
#[derive(Debug)]
pub struct Resolution {
    pub response: Response,
    /// Index of the matching stub, `None` when the default response was used.
    pub stub_index: Option<usize>,
    pub fault: Option<InjectionFault>,
}

/// Stubs in declared order plus the state bag shared by injected responses.
///
/// The state lock is held for the whole resolution of a request, so requests
/// to one imposter never observe each other's half-finished state changes.
#[derive(Debug, Default)]
pub struct StubStore {
    stubs: RwLock<Vec<Arc<StubEntry>>>,
    state: Mutex<Map<String, Value>>,
}

impl StubStore {
    pub fn new(stubs: Vec<StubEntry>) -> Self {
        Self {
            stubs: RwLock::new(stubs.into_iter().map(Arc::new).collect()),
            state: Mutex::new(Map::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.stubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.read().is_empty()
    }

    pub fn definitions(&self) -> Vec<StubDefinition> {
        self.stubs
            .read()
            .iter()
            .map(|s| s.definition.clone())
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<StubDefinition> {
        self.stubs.read().get(index).map(|s| s.definition.clone())
    }

    /// Insert at `index`, or append when `index` is `None` or past the end.
    pub fn insert(&self, index: Option<usize>, stub: StubEntry) {
        let mut stubs = self.stubs.write();
        let at = index.unwrap_or(stubs.len()).min(stubs.len());
        stubs.insert(at, Arc::new(stub));
    }

    pub fn replace(&self, index: usize, stub: StubEntry) -> Result<(), ImposterError> {
        let mut stubs = self.stubs.write();
        let slot = stubs
            .get_mut(index)
            .ok_or(ImposterError::StubIndexOutOfBounds(index))?;
        *slot = Arc::new(stub);
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<StubDefinition, ImposterError> {
        let mut stubs = self.stubs.write();
        if index >= stubs.len() {
            return Err(ImposterError::StubIndexOutOfBounds(index));
        }
        Ok(stubs.remove(index).definition.clone())
    }

    pub fn replace_all(&self, stubs: Vec<StubEntry>) {
        *self.stubs.write() = stubs.into_iter().map(Arc::new).collect();
    }

    /// Current contents of the state bag.
    pub async fn state(&self) -> Map<String, Value> {
        self.state.lock().await.clone()
    }

    /// Find the first stub whose predicates all match and produce its next
    /// response. No match yields `defaults`.
    pub async fn resolve(
        &self,
        request: &Value,
        sandbox: &Sandbox,
        defaults: &Response,
        protocol: Protocol,
    ) -> Resolution {
        let mut state = self.state.lock().await;
        let stubs = self.stubs.read().clone();

        for (index, stub) in stubs.iter().enumerate() {
            if !stub_matches(&stub.predicates, request, sandbox).await {
                continue;
            }
            let spec = stub.next_response();
            return match resolve(spec, request, &mut state, sandbox, defaults, protocol).await {
                Ok(response) => Resolution {
                    response,
                    stub_index: Some(index),
                    fault: None,
                },
                Err(fault) => Resolution {
                    response: fault_response(protocol),
                    stub_index: Some(index),
                    fault: Some(fault),
                },
            };
        }

        Resolution {
            response: defaults.clone(),
            stub_index: None,
            fault: None,
        }
    }
}
