//! ImposterManager - lifecycle management for multiple imposters.
//!
//! Creating an imposter compiles its stubs, binds its port and starts the
//! protocol listener. Deleting it stops the listener, waits for the port to be
//! released and drops the imposter together with its state bag.

use super::core::{stub_uses_injection, uses_injection, Imposter};
use super::types::{ImposterConfig, ImposterError, StubDefinition};
use crate::metrics;
use crate::model::{Protocol, Request, Response};
use crate::protocols::{self, tls, ListenerSpec};
use crate::scripting::{Sandbox, ScriptLimits};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// Settings shared by every imposter the manager creates.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// When false, any definition using `inject` is rejected.
    pub allow_injection: bool,
    /// Bind address for imposters that do not name their own host.
    pub host: String,
    /// Fallback TLS material for https imposters without inline key/cert.
    pub default_cert: Option<PathBuf>,
    pub default_key: Option<PathBuf>,
    pub limits: ScriptLimits,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            allow_injection: true,
            host: "0.0.0.0".to_string(),
            default_cert: None,
            default_key: None,
            limits: ScriptLimits::default(),
        }
    }
}

/// A validated definition waiting for its port.
struct Prepared {
    config: ImposterConfig,
    protocol: Protocol,
    imposter: Imposter,
    tls: Option<TlsAcceptor>,
}

/// Manages the lifecycle of multiple imposters
pub struct ImposterManager {
    /// Active imposters by port
    imposters: RwLock<HashMap<u16, Arc<Imposter>>>,
    settings: ManagerSettings,
    sandbox: Arc<Sandbox>,
}

impl ImposterManager {
    pub fn new(settings: ManagerSettings) -> Self {
        let sandbox = Arc::new(Sandbox::new(settings.limits));
        Self {
            imposters: RwLock::new(HashMap::new()),
            settings,
            sandbox,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Create and start an imposter.
    /// Returns the imposter, whose port may have been auto-assigned.
    pub async fn create_imposter(
        self: &Arc<Self>,
        config: ImposterConfig,
    ) -> Result<Arc<Imposter>, ImposterError> {
        let prepared = self.prepare(config)?;
        self.start(prepared).await
    }

    /// Everything about a definition that can be checked without binding.
    fn prepare(&self, config: ImposterConfig) -> Result<Prepared, ImposterError> {
        let protocol = Protocol::parse(&config.protocol)
            .ok_or_else(|| ImposterError::InvalidProtocol(config.protocol.clone()))?;

        if !self.settings.allow_injection && uses_injection(&config) {
            return Err(ImposterError::InjectionDisabled);
        }

        let imposter = Imposter::new(config.clone(), Arc::clone(&self.sandbox))?;

        let tls = match protocol {
            Protocol::Https => Some(tls::resolve_acceptor(
                config.cert.as_deref(),
                config.key.as_deref(),
                self.settings.default_cert.as_deref(),
                self.settings.default_key.as_deref(),
            )?),
            _ => None,
        };

        Ok(Prepared {
            config,
            protocol,
            imposter,
            tls,
        })
    }

    async fn start(self: &Arc<Self>, prepared: Prepared) -> Result<Arc<Imposter>, ImposterError> {
        let Prepared {
            config,
            protocol,
            mut imposter,
            tls,
        } = prepared;

        let bind_host = config
            .host
            .clone()
            .unwrap_or_else(|| self.settings.host.clone());
        let (port, listener) = match config.port {
            Some(p) => {
                if self.imposters.read().contains_key(&p) {
                    return Err(ImposterError::PortInUse(p));
                }
                let listener = TcpListener::bind((bind_host.as_str(), p))
                    .await
                    .map_err(|e| match e.kind() {
                        std::io::ErrorKind::AddrInUse => ImposterError::PortInUse(p),
                        _ => ImposterError::BindError(p, e.to_string()),
                    })?;
                (p, listener)
            }
            None => self.find_available_port(&bind_host).await?,
        };

        imposter.assign_port(port);
        let imposter = Arc::new(imposter);

        let spec = ListenerSpec {
            port,
            protocol,
            mode: config.mode,
            tls,
        };
        let handle = protocols::spawn_listener(
            listener,
            spec,
            Arc::clone(self),
            imposter.shutdown_receiver(),
        );
        imposter.set_server(handle);

        let count = {
            let mut imposters = self.imposters.write();
            imposters.insert(port, Arc::clone(&imposter));
            imposters.len()
        };
        metrics::set_active_imposters(count);

        info!(
            port,
            protocol = %protocol,
            stubs = imposter.get_stubs().len(),
            "Imposter bound to {}:{}",
            bind_host,
            port
        );
        Ok(imposter)
    }

    /// Replace every imposter with `configs`.
    ///
    /// The whole batch is validated before anything is deleted, so an invalid
    /// definition leaves the current imposters untouched. If a port cannot be
    /// bound afterwards, the new imposters are removed and the previous
    /// definitions are recreated.
    pub async fn replace_all(
        self: &Arc<Self>,
        configs: Vec<ImposterConfig>,
    ) -> Result<Vec<Arc<Imposter>>, ImposterError> {
        let mut ports = HashSet::new();
        let mut batch = Vec::with_capacity(configs.len());
        for config in configs {
            if let Some(port) = config.port {
                if !ports.insert(port) {
                    return Err(ImposterError::PortInUse(port));
                }
            }
            batch.push(self.prepare(config)?);
        }

        let previous = self.delete_all().await;
        let mut created = Vec::with_capacity(batch.len());
        for prepared in batch {
            match self.start(prepared).await {
                Ok(imposter) => created.push(imposter),
                Err(e) => {
                    warn!(error = %e, "Replacing imposters failed, restoring previous set");
                    self.delete_all().await;
                    for config in previous {
                        let port = config.port;
                        if let Err(e) = self.create_imposter(config).await {
                            warn!(?port, error = %e, "Could not restore imposter");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    /// Bind to an available port for auto-assignment, starting at the bottom
    /// of the dynamic range.
    async fn find_available_port(&self, host: &str) -> Result<(u16, TcpListener), ImposterError> {
        let existing_ports: HashSet<u16> = self.imposters.read().keys().copied().collect();

        for port in 49152..=u16::MAX {
            if existing_ports.contains(&port) {
                continue;
            }
            if let Ok(listener) = TcpListener::bind((host, port)).await {
                return Ok((port, listener));
            }
        }

        Err(ImposterError::BindError(
            0,
            "No available ports in range 49152-65535".to_string(),
        ))
    }

    /// Delete an imposter. Returns once its port has been released.
    pub async fn delete_imposter(&self, port: u16) -> Result<ImposterConfig, ImposterError> {
        let (imposter, count) = {
            let mut imposters = self.imposters.write();
            let imposter = imposters
                .remove(&port)
                .ok_or(ImposterError::NotFound(port))?;
            (imposter, imposters.len())
        };
        metrics::set_active_imposters(count);

        if let Some(handle) = imposter.stop() {
            if let Err(e) = handle.await {
                warn!("Listener task for port {} ended abnormally: {}", port, e);
            }
        }

        info!("Imposter on port {} deleted", port);
        Ok(imposter.to_config())
    }

    /// Delete all imposters
    pub async fn delete_all(&self) -> Vec<ImposterConfig> {
        let mut ports: Vec<u16> = self.imposters.read().keys().copied().collect();
        ports.sort_unstable();

        let mut configs = Vec::new();
        for port in ports {
            if let Ok(config) = self.delete_imposter(port).await {
                configs.push(config);
            }
        }
        configs
    }

    /// Get an imposter by port
    pub fn get_imposter(&self, port: u16) -> Result<Arc<Imposter>, ImposterError> {
        self.imposters
            .read()
            .get(&port)
            .cloned()
            .ok_or(ImposterError::NotFound(port))
    }

    /// List all imposters, ordered by port
    pub fn list_imposters(&self) -> Vec<Arc<Imposter>> {
        let mut imposters: Vec<_> = self.imposters.read().values().cloned().collect();
        imposters.sort_by_key(|i| i.port());
        imposters
    }

    pub fn count(&self) -> usize {
        self.imposters.read().len()
    }

    /// Route a decoded request to the imposter on `port`.
    pub async fn dispatch(&self, port: u16, request: Request) -> Result<Response, ImposterError> {
        let imposter = self.get_imposter(port)?;
        Ok(imposter.handle(request).await)
    }

    fn check_stub(&self, stub: &StubDefinition) -> Result<(), ImposterError> {
        if !self.settings.allow_injection && stub_uses_injection(stub) {
            return Err(ImposterError::InjectionDisabled);
        }
        Ok(())
    }

    /// Add stub to an imposter
    pub fn add_stub(
        &self,
        port: u16,
        stub: StubDefinition,
        index: Option<usize>,
    ) -> Result<(), ImposterError> {
        self.check_stub(&stub)?;
        self.get_imposter(port)?.add_stub(stub, index)
    }

    /// Replace a stub
    pub fn replace_stub(
        &self,
        port: u16,
        index: usize,
        stub: StubDefinition,
    ) -> Result<(), ImposterError> {
        self.check_stub(&stub)?;
        self.get_imposter(port)?.replace_stub(index, stub)
    }

    /// Replace every stub of an imposter
    pub fn replace_stubs(&self, port: u16, stubs: Vec<StubDefinition>) -> Result<(), ImposterError> {
        for stub in &stubs {
            self.check_stub(stub)?;
        }
        self.get_imposter(port)?.replace_stubs(stubs)
    }

    /// Delete a stub
    pub fn delete_stub(&self, port: u16, index: usize) -> Result<StubDefinition, ImposterError> {
        self.get_imposter(port)?.delete_stub(index)
    }

    /// Get a specific stub by index
    pub fn get_stub(&self, port: u16, index: usize) -> Result<StubDefinition, ImposterError> {
        self.get_imposter(port)?
            .get_stub(index)
            .ok_or(ImposterError::StubIndexOutOfBounds(index))
    }
}

impl Default for ImposterManager {
    fn default() -> Self {
        Self::new(ManagerSettings::default())
    }
}
