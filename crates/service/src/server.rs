//! Build service listener and request handling

use crate::http::{read_request, Request, Response};
use crate::limiter::ConnectionLimiter;
use crate::recovery::recover;
use crate::resolver::Resolver;
use async_trait::async_trait;
use k6x_builder::Builder;
use k6x_config::ServiceConfig;
use k6x_errors::{Error, ServiceError};
use k6x_types::{Dependency, Modules, Platform};
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncSeekExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay before accepting again after an accept error
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Produces a response for one request
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

/// Listener settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub connection_limit: usize,
    /// Deadline for receiving the request head
    pub read_timeout: Duration,
    /// Deadline for writing the whole response
    pub write_timeout: Duration,
}

impl ServerOptions {
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            connection_limit: config.connection_limit(),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
        }
    }
}

/// A bound listener serving one handler
pub struct Server<H> {
    listener: TcpListener,
    handler: Arc<H>,
    limiter: ConnectionLimiter,
    options: ServerOptions,
}

impl<H: Handler> Server<H> {
    /// Bind the listen address
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Bind` if the address cannot be bound.
    pub async fn bind(addr: &str, handler: H, options: ServerOptions) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::Bind {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            listener,
            handler: Arc::new(handler),
            limiter: ConnectionLimiter::new(options.connection_limit),
            options,
        })
    }

    /// Address actually bound, useful with port 0
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns an error if the connection limiter is closed.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), Error> {
        info!(
            addr = %self.local_addr()?,
            limit = self.limiter.limit(),
            "Build service listening"
        );

        loop {
            let permit = tokio::select! {
                () = shutdown.cancelled() => break,
                permit = self.limiter.acquire() => permit?,
            };

            let (stream, peer) = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            debug!(%peer, "Accepted connection");
            let handler = Arc::clone(&self.handler);
            let options = self.options;

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = serve_connection(stream, handler.as_ref(), options).await {
                    debug!(%peer, error = %e, "Connection ended with error");
                }
            });
        }

        info!("Build service stopped");
        Ok(())
    }
}

async fn serve_connection<H: Handler>(
    stream: TcpStream,
    handler: &H,
    options: ServerOptions,
) -> Result<(), Error> {
    let mut stream = BufReader::new(stream);

    let request = match tokio::time::timeout(options.read_timeout, read_request(&mut stream)).await
    {
        Ok(Ok(request)) => request,
        Ok(Err(e @ Error::Service(ServiceError::Protocol { .. }))) => {
            debug!(error = %e, "Malformed request");
            return write_response(&mut stream, Response::status(400), options).await;
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(ServiceError::Timeout {
                seconds: options.read_timeout.as_secs(),
            }
            .into())
        }
    };

    debug!(method = %request.method, path = %request.path, "Handling request");
    let response = recover(handler.handle(request)).await;
    write_response(&mut stream, response, options).await
}

async fn write_response(
    stream: &mut BufReader<TcpStream>,
    response: Response,
    options: ServerOptions,
) -> Result<(), Error> {
    let status = response.status;
    match tokio::time::timeout(options.write_timeout, response.write_to(stream.get_mut())).await {
        Ok(result) => {
            debug!(status, "Response written");
            result
        }
        Err(_) => Err(ServiceError::Timeout {
            seconds: options.write_timeout.as_secs(),
        }
        .into()),
    }
}

/// Routes requests to the build endpoint
pub struct BuildService<R> {
    resolver: R,
    builder: Arc<dyn Builder>,
    filter: String,
    shutdown: CancellationToken,
}

impl<R: Resolver + 'static> BuildService<R> {
    #[must_use]
    pub fn new(resolver: R, builder: Arc<dyn Builder>, filter: impl Into<String>) -> Self {
        Self {
            resolver,
            builder,
            filter: filter.into(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel running builds when `shutdown` fires
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    async fn build(&self, request: &Request) -> Response {
        let (platform, dependencies) = match build_params(request) {
            Ok(params) => params,
            Err(e) => {
                debug!(error = %e, "Rejected build request");
                return Response::status(400);
            }
        };

        let modules = match resolve_modules(&self.resolver, &dependencies, &self.filter).await {
            Ok(modules) => modules,
            Err(e) => {
                error!(error = %e, "Dependency resolution failed");
                return Response::status(500);
            }
        };

        match self.spool(&platform, &modules).await {
            Ok((file, len)) => {
                info!(%platform, %modules, bytes = len, "Build finished");
                Response::binary(file, len)
            }
            Err(e) => {
                error!(%platform, %modules, error = %e, "Build failed");
                Response::status(500)
            }
        }
    }

    /// Build into an anonymous temporary file and rewind it
    async fn spool(
        &self,
        platform: &Platform,
        modules: &Modules,
    ) -> Result<(tokio::fs::File, u64), Error> {
        let file = tokio::task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(|e| Error::internal(e.to_string()))??;
        let mut file = tokio::fs::File::from_std(file);

        let cancel = self.shutdown.child_token();
        self.builder
            .build(&cancel, Some(platform), modules, &mut file)
            .await?;

        let len = file.seek(SeekFrom::End(0)).await?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok((file, len))
    }
}

async fn resolve_modules<R: Resolver>(
    resolver: &R,
    dependencies: &[Dependency],
    filter: &str,
) -> Result<Modules, Error> {
    resolver
        .resolve(dependencies, filter)
        .await
        .map_err(|e| match e {
            Error::Service(ServiceError::ResolveFailed { .. }) => e,
            other => ServiceError::ResolveFailed {
                message: other.to_string(),
            }
            .into(),
        })
}

/// Platform and dependency list of a `/build` request
fn build_params(request: &Request) -> Result<(Platform, Vec<Dependency>), Error> {
    let host = Platform::host();
    let platform = Platform::new(
        request.param("os").unwrap_or(&host.os),
        request.param("arch").unwrap_or(&host.arch),
    );
    if platform.os.is_empty() || platform.arch.is_empty() {
        return Err(ServiceError::BadRequest {
            message: "empty os or arch".to_string(),
        }
        .into());
    }

    let dependencies = request
        .params("with")
        .map(|with| {
            with.parse::<Dependency>().map_err(|e| {
                Error::from(ServiceError::BadRequest {
                    message: e.to_string(),
                })
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((platform, dependencies))
}

#[async_trait]
impl<R: Resolver + 'static> Handler for BuildService<R> {
    async fn handle(&self, request: Request) -> Response {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/build") => self.build(&request).await,
            ("GET", "/health") => Response::text(200, "ok\n"),
            (_, "/build" | "/health") => Response::status(405),
            _ => Response::status(404),
        }
    }
}
