//! Container build orchestrator
//!
//! One [`BuildSession`] per build: connect, pull, create, start, wait,
//! drain logs, extract, and always remove the container once it exists.

use crate::archive::extract_artifacts;
use crate::command::container_spec;
use crate::engine::Builder;
use crate::pull::drain_pull_progress;
use crate::runtime::{ContainerRuntime, RuntimeConnector};
use async_trait::async_trait;
use futures::StreamExt;
use k6x_config::constants::{ARTIFACT_PREFIX, BUILDER_IMAGE, WORKDIR_PATH};
use k6x_errors::Error;
use k6x_types::{Engine, Modules, Platform};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builder backed by a container runtime
pub struct ContainerBuilder {
    engine: Engine,
    connector: Arc<dyn RuntimeConnector>,
    probed: Mutex<Option<Box<dyn ContainerRuntime>>>,
    verbose: bool,
}

impl ContainerBuilder {
    #[must_use]
    pub fn new(connector: Arc<dyn RuntimeConnector>) -> Self {
        Self {
            engine: Engine::Docker,
            connector,
            probed: Mutex::new(None),
            verbose: false,
        }
    }

    #[must_use]
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Hand an already probed connection to the first build
    #[must_use]
    pub fn with_runtime(mut self, runtime: Box<dyn ContainerRuntime>) -> Self {
        self.probed = Mutex::new(Some(runtime));
        self
    }

    /// Forward container output to the debug log after the build
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    async fn runtime(&self) -> Result<Box<dyn ContainerRuntime>, Error> {
        let probed = self.probed.lock().ok().and_then(|mut slot| slot.take());
        match probed {
            Some(runtime) => Ok(runtime),
            None => self.connector.connect().await,
        }
    }
}

#[async_trait]
impl Builder for ContainerBuilder {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn build(
        &self,
        cancel: &CancellationToken,
        platform: Option<&Platform>,
        modules: &Modules,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), Error> {
        let runtime = cancellable(cancel, self.runtime()).await?;
        let session = BuildSession {
            runtime,
            cancel,
            verbose: self.verbose,
        };
        session.run(platform, modules, out).await
    }
}

/// State owned by exactly one build
///
/// Dropping the session closes its runtime connection, and with it any
/// tunnel the connection runs over.
pub struct BuildSession<'a> {
    runtime: Box<dyn ContainerRuntime>,
    cancel: &'a CancellationToken,
    verbose: bool,
}

impl<'a> BuildSession<'a> {
    #[must_use]
    pub fn new(
        runtime: Box<dyn ContainerRuntime>,
        cancel: &'a CancellationToken,
        verbose: bool,
    ) -> Self {
        Self {
            runtime,
            cancel,
            verbose,
        }
    }

    /// Run the whole lifecycle and tear the container down
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; a removal failure only when nothing
    /// else failed.
    pub async fn run(
        self,
        platform: Option<&Platform>,
        modules: &Modules,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), Error> {
        let host;
        let platform = match platform {
            Some(platform) => platform,
            None => {
                host = Platform::host();
                &host
            }
        };

        info!(%platform, %modules, "Building k6");

        self.pull().await?;

        let spec = container_spec(platform, modules);
        let id = cancellable(self.cancel, self.runtime.create_container(&spec)).await?;
        debug!(container = %id, "Created build container");

        let result = self.run_container(&id, out).await;
        let removal = cancellable(self.cancel, self.runtime.remove_container(&id)).await;
        if removal.is_ok() {
            debug!(container = %id, "Removed build container");
        }

        keep_first_error(result, removal)
    }

    async fn pull(&self) -> Result<(), Error> {
        debug!(image = BUILDER_IMAGE, "Pulling builder image");
        let records = self.runtime.pull_image(BUILDER_IMAGE);
        let summary = cancellable(self.cancel, async {
            Ok(drain_pull_progress(records).await)
        })
        .await?;

        if summary.aborted.is_some() {
            warn!(image = BUILDER_IMAGE, "Pull output unreadable, assuming the image is present");
        }
        Ok(())
    }

    async fn run_container(
        &self,
        id: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), Error> {
        cancellable(self.cancel, self.runtime.start_container(id)).await?;
        debug!(container = %id, "Started build container");

        let mut signals = self.runtime.wait_container(id);
        let status = cancellable(self.cancel, signals.outcome()).await?;
        debug!(container = %id, status, "Build container stopped");

        if self.verbose {
            self.drain_logs(id).await?;
        }

        let archive = self.runtime.download_archive(id, WORKDIR_PATH);
        let report =
            cancellable(self.cancel, extract_artifacts(archive, ARTIFACT_PREFIX, out)).await?;

        if report.files.is_empty() {
            warn!(
                container = %id,
                prefix = ARTIFACT_PREFIX,
                "No artifact found in the build container"
            );
        } else {
            debug!(files = ?report.files, bytes = report.bytes, "Extracted artifact");
        }
        Ok(())
    }

    /// Forward container output to the debug log; read errors are not fatal
    async fn drain_logs(&self, id: &str) -> Result<(), Error> {
        let mut logs = self.runtime.container_logs(id);

        loop {
            let next = cancellable(self.cancel, async { Ok(logs.next().await) }).await?;
            match next {
                Some(Ok(chunk)) => {
                    let text = String::from_utf8_lossy(chunk.bytes());
                    for line in text.lines() {
                        debug!(stream = chunk.stream_name(), "{line}");
                    }
                }
                Some(Err(err)) => {
                    warn!(container = %id, error = %err, "Failed to read build container output");
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }
}

/// Race `fut` against the token; a fired token wins ties
///
/// # Errors
///
/// `Error::Cancelled` once the token fires, otherwise the future's error.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// Combine a build result with its teardown result, earlier error first
///
/// # Errors
///
/// The build error if any, otherwise the removal error.
pub fn keep_first_error(result: Result<(), Error>, removal: Result<(), Error>) -> Result<(), Error> {
    match (result, removal) {
        (Err(err), Err(suppressed)) => {
            warn!(error = %suppressed, "Container removal failed after an earlier error");
            Err(err)
        }
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => Ok(()),
    }
}
