//! Docker implementation of the container runtime seam, via bollard

mod tunnel;

pub use tunnel::{SshTarget, SshTunnel};

use crate::runtime::{
    ByteStream, ContainerRuntime, ContainerSpec, LogChunk, LogStream, RecordStream,
    RuntimeConnector, WaitSignals,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use k6x_config::constants::DOCKER_HOST_ENV;
use k6x_errors::{Error, RuntimeError};
use tracing::debug;
use url::Url;

/// Client side timeout for runtime requests, in seconds
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Creates Docker connections from the environment's host configuration
#[derive(Debug, Clone, Default)]
pub struct DockerConnector {
    host: Option<String>,
}

impl DockerConnector {
    /// Use `DOCKER_HOST` if set, the platform default socket otherwise
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            host: std::env::var(DOCKER_HOST_ENV)
                .ok()
                .filter(|host| !host.trim().is_empty()),
        }
    }

    #[must_use]
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
        }
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

#[async_trait]
impl RuntimeConnector for DockerConnector {
    async fn connect(&self) -> Result<Box<dyn ContainerRuntime>, Error> {
        Ok(Box::new(DockerRuntime::connect(self.host()).await?))
    }
}

/// One Docker connection; dropping it closes the connection and any tunnel
pub struct DockerRuntime {
    docker: Docker,
    _tunnel: Option<SshTunnel>,
}

/// Where a runtime host setting points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerHost {
    /// No host configured, use the platform default socket
    Local,
    /// `unix://` socket path
    Unix(String),
    /// `tcp://` or `http://` address
    Http(String),
    Ssh(SshTarget),
}

impl DockerHost {
    /// Classify a host setting by scheme without dialing it
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::InvalidHost` for unknown schemes, unparsable
    /// addresses and malformed ssh URLs.
    pub fn parse(host: Option<&str>) -> Result<Self, RuntimeError> {
        let Some(host) = host else {
            return Ok(Self::Local);
        };
        let invalid = |message: String| RuntimeError::InvalidHost {
            host: host.to_string(),
            message,
        };

        let (scheme, rest) = host
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme".to_string()))?;

        match scheme {
            "ssh" => Ok(Self::Ssh(SshTarget::parse(host)?)),
            "unix" if !rest.is_empty() => Ok(Self::Unix(rest.to_string())),
            "unix" => Err(invalid("missing socket path".to_string())),
            "tcp" | "http" => {
                let url = Url::parse(&format!("http://{rest}"))
                    .map_err(|e| invalid(e.to_string()))?;
                if url.host_str().is_none_or(str::is_empty) {
                    return Err(invalid("missing host".to_string()));
                }
                Ok(Self::Http(host.to_string()))
            }
            other => Err(invalid(format!("unsupported scheme {other}"))),
        }
    }
}

impl DockerRuntime {
    /// Connect to the runtime named by `host` and negotiate the API version
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::InvalidHost` for malformed host settings,
    /// `Tunnel` if an ssh tunnel cannot be established and `Connection` if
    /// the runtime cannot be reached or does not answer version negotiation.
    pub async fn connect(host: Option<&str>) -> Result<Self, Error> {
        let connection_error = |e: bollard::errors::Error| RuntimeError::Connection {
            message: e.to_string(),
        };

        let (docker, tunnel) = match DockerHost::parse(host)? {
            DockerHost::Local => (
                Docker::connect_with_local_defaults().map_err(connection_error)?,
                None,
            ),
            DockerHost::Unix(path) => (
                Docker::connect_with_unix(&path, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                    .map_err(connection_error)?,
                None,
            ),
            DockerHost::Http(addr) => (
                Docker::connect_with_http(&addr, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                    .map_err(connection_error)?,
                None,
            ),
            DockerHost::Ssh(target) => {
                let tunnel = SshTunnel::open(&target).await?;
                let socket = tunnel.socket().to_string_lossy().into_owned();
                let docker =
                    Docker::connect_with_unix(&socket, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                        .map_err(connection_error)?;
                (docker, Some(tunnel))
            }
        };

        let docker = docker.negotiate_version().await.map_err(connection_error)?;
        debug!(version = ?docker.client_version(), "Connected to container runtime");

        Ok(Self {
            docker,
            _tunnel: tunnel,
        })
    }
}

fn operation(name: &'static str) -> impl Fn(bollard::errors::Error) -> Error {
    move |e| RuntimeError::operation(name, e.to_string()).into()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), Error> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| {
                RuntimeError::Unreachable {
                    message: e.to_string(),
                }
                .into()
            })
    }

    fn pull_image(&self, image: &str) -> RecordStream {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .map(|info| {
                let info = info.map_err(operation("pull"))?;
                serde_json::to_value(info).map_err(Error::from)
            })
            .boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, Error> {
        let mounts = spec
            .mounts
            .iter()
            .map(|mount| Mount {
                typ: Some(MountTypeEnum::VOLUME),
                source: Some(mount.source.clone()),
                target: Some(mount.target.clone()),
                ..Default::default()
            })
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            tty: Some(spec.tty),
            host_config: Some(HostConfig {
                mounts: Some(mounts),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(operation("create"))?;

        for warning in &response.warnings {
            debug!(id = %response.id, "{warning}");
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), Error> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(operation("start"))
    }

    fn wait_container(&self, id: &str) -> WaitSignals {
        let (senders, signals) = WaitSignals::channel();
        let docker = self.docker.clone();
        let id = id.to_string();

        let task = tokio::spawn(async move {
            let options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut responses = docker.wait_container(&id, Some(options));

            match responses.next().await {
                Some(Ok(response)) => {
                    let _ = senders.status.send(response.status_code);
                }
                // Non-zero exit: the container stopped running, which is all
                // the wait reports on.
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    let _ = senders.status.send(code);
                }
                Some(Err(e)) => {
                    let _ = senders.error.send(operation("wait")(e));
                }
                None => {}
            }
        });

        signals.with_task(task)
    }

    fn container_logs(&self, id: &str) -> LogStream {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            since: 0,
            until: 0,
            timestamps: false,
            tail: "all".to_string(),
        };

        self.docker
            .logs(id, Some(options))
            .map(|output| {
                Ok(match output.map_err(operation("logs"))? {
                    LogOutput::StdErr { message } => LogChunk::Stderr(message),
                    LogOutput::StdOut { message }
                    | LogOutput::StdIn { message }
                    | LogOutput::Console { message } => LogChunk::Stdout(message),
                })
            })
            .boxed()
    }

    fn download_archive(&self, id: &str, path: &str) -> ByteStream {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };

        self.docker
            .download_from_container(id, Some(options))
            .map(|chunk| chunk.map_err(operation("copy")))
            .boxed()
    }

    async fn remove_container(&self, id: &str) -> Result<(), Error> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(operation("remove"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_dispatch_by_scheme() {
        assert_eq!(DockerHost::parse(None).unwrap(), DockerHost::Local);
        assert_eq!(
            DockerHost::parse(Some("unix:///run/user/1000/docker.sock")).unwrap(),
            DockerHost::Unix("/run/user/1000/docker.sock".to_string())
        );
        assert_eq!(
            DockerHost::parse(Some("tcp://10.0.0.5:2375")).unwrap(),
            DockerHost::Http("tcp://10.0.0.5:2375".to_string())
        );
        assert!(matches!(
            DockerHost::parse(Some("ssh://builder@remote")).unwrap(),
            DockerHost::Ssh(target) if target.destination == "builder@remote"
        ));
    }

    #[test]
    fn test_malformed_hosts_are_invalid() {
        for host in ["npipe:////./pipe/docker", "unix://", "tcp://", "localhost:2375", "ssh://"] {
            assert!(
                matches!(
                    DockerHost::parse(Some(host)),
                    Err(RuntimeError::InvalidHost { .. })
                ),
                "{host}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_socket_is_a_connection_error() {
        let err = DockerRuntime::connect(Some("unix:///nonexistent/k6x/docker.sock"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Runtime(RuntimeError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_tcp_host_is_dialed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = DockerRuntime::connect(Some(&format!("tcp://{addr}")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Runtime(RuntimeError::Connection { .. })));
    }
}
