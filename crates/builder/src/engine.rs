//! Builder abstraction and engine selection
//!
//! Engines are probed in the caller's order of preference. A probe that
//! finds its backend unreachable reports [`Probe::Unavailable`] and the next
//! engine is tried; a probe that hits a configuration error fails the whole
//! selection.

use async_trait::async_trait;
use k6x_errors::{BuildError, Error, RuntimeError};
use k6x_types::{Engine, Modules, Platform};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::orchestrator::ContainerBuilder;
use crate::runtime::{ContainerRuntime, RuntimeConnector};

/// Turns a platform and module list into a k6 binary
#[async_trait]
pub trait Builder: Send + Sync {
    /// Backend behind this builder
    fn engine(&self) -> Engine;

    /// Build a binary and write it to `out`
    ///
    /// `platform == None` targets the host. Every runtime call made after
    /// `cancel` fires fails with `Error::Cancelled`.
    async fn build(
        &self,
        cancel: &CancellationToken,
        platform: Option<&Platform>,
        modules: &Modules,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), Error>;
}

/// Result of probing one engine
pub enum Probe {
    /// The engine answered; the builder is bound to the live connection
    Ready(Arc<dyn Builder>),
    /// The engine is not reachable; selection moves on
    Unavailable { reason: String },
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(builder) => f.debug_tuple("Ready").field(&builder.engine()).finish(),
            Self::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Checks whether an engine can be used right now
#[async_trait]
pub trait EngineProbe: Send + Sync {
    fn engine(&self) -> Engine;

    /// Probe the engine
    ///
    /// # Errors
    ///
    /// Returns an error only for configuration problems; an unreachable
    /// backend is `Ok(Probe::Unavailable)`.
    async fn probe(&self) -> Result<Probe, Error>;
}

/// Connect and ping; `None` when the runtime is simply not there
///
/// # Errors
///
/// Returns configuration errors from the connector.
pub async fn probe_runtime(
    connector: &dyn RuntimeConnector,
) -> Result<Option<Box<dyn ContainerRuntime>>, Error> {
    let runtime = match connector.connect().await {
        Ok(runtime) => runtime,
        Err(Error::Runtime(
            err @ (RuntimeError::Connection { .. }
            | RuntimeError::Tunnel { .. }
            | RuntimeError::Unreachable { .. }),
        )) => {
            debug!(error = %err, "Container runtime not reachable");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    if let Err(err) = runtime.ping().await {
        debug!(error = %err, "Container runtime did not answer ping");
        return Ok(None);
    }

    Ok(Some(runtime))
}

/// Probe for any container runtime reachable through a connector
pub struct ContainerProbe {
    engine: Engine,
    connector: Arc<dyn RuntimeConnector>,
    verbose: bool,
}

impl ContainerProbe {
    #[must_use]
    pub fn new(engine: Engine, connector: Arc<dyn RuntimeConnector>) -> Self {
        Self {
            engine,
            connector,
            verbose: false,
        }
    }

    /// Forward build container output to the debug log
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[async_trait]
impl EngineProbe for ContainerProbe {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn probe(&self) -> Result<Probe, Error> {
        match probe_runtime(self.connector.as_ref()).await? {
            Some(runtime) => {
                let builder = ContainerBuilder::new(Arc::clone(&self.connector))
                    .with_engine(self.engine)
                    .with_runtime(runtime)
                    .with_verbose(self.verbose);
                Ok(Probe::Ready(Arc::new(builder)))
            }
            None => Ok(Probe::Unavailable {
                reason: format!("{} runtime is not reachable", self.engine),
            }),
        }
    }
}

/// Registry of engine probes
pub struct EngineRegistry {
    probes: Vec<Box<dyn EngineProbe>>,
}

impl EngineRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self { probes: Vec::new() }
    }

    /// Registry with the Docker engine, connecting per `DOCKER_HOST`
    #[must_use]
    pub fn with_defaults(verbose: bool) -> Self {
        let mut registry = Self::new();
        registry.register(
            ContainerProbe::new(
                Engine::Docker,
                Arc::new(crate::docker::DockerConnector::from_env()),
            )
            .with_verbose(verbose),
        );
        registry
    }

    /// Add a probe; a later probe for the same engine replaces the earlier one
    pub fn register(&mut self, probe: impl EngineProbe + 'static) {
        let engine = probe.engine();
        self.probes.retain(|p| p.engine() != engine);
        self.probes.push(Box::new(probe));
    }

    /// Engines that have a registered probe, in registration order
    #[must_use]
    pub fn engines(&self) -> Vec<Engine> {
        self.probes.iter().map(|p| p.engine()).collect()
    }

    fn get(&self, engine: Engine) -> Option<&dyn EngineProbe> {
        self.probes
            .iter()
            .find(|p| p.engine() == engine)
            .map(Box::as_ref)
    }

    /// Return the first available engine in `preferences` order
    ///
    /// An empty preference list means registration order.
    ///
    /// # Errors
    ///
    /// Returns a probe's configuration error as soon as it occurs, or
    /// `BuildError::NoUsableBuilder` when every candidate is unavailable.
    pub async fn select(&self, preferences: &[Engine]) -> Result<Arc<dyn Builder>, Error> {
        let candidates = if preferences.is_empty() {
            self.engines()
        } else {
            preferences.to_vec()
        };

        for engine in &candidates {
            let Some(probe) = self.get(*engine) else {
                debug!(%engine, "No probe registered for engine");
                continue;
            };

            match probe.probe().await? {
                Probe::Ready(builder) => {
                    debug!(%engine, "Selected builder engine");
                    return Ok(builder);
                }
                Probe::Unavailable { reason } => {
                    debug!(%engine, %reason, "Builder engine unavailable");
                }
            }
        }

        Err(BuildError::NoUsableBuilder {
            tried: candidates
                .iter()
                .map(Engine::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        }
        .into())
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
