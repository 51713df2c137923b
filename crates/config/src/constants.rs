//! Fixed names shared by the builder image and the orchestrator
//!
//! These are part of the contract with the builder image and are not
//! exposed via TOML configuration.

/// Image that carries the Go toolchain and the build entrypoint
pub const BUILDER_IMAGE: &str = "szkiba/k6x";

/// Runtime managed volume that survives across builds
pub const CACHE_VOLUME: &str = "k6x-cache";

/// Mount point of the cache volume inside the build container
pub const CACHE_PATH: &str = "/cache";

/// Working directory of the build container; the artifact lands here
pub const WORKDIR_PATH: &str = "/home/k6x";

/// File name prefix of the produced binary
pub const ARTIFACT_PREFIX: &str = "k6";

/// Subcommand of the builder image entrypoint
pub const BUILD_COMMAND: &str = "build";

pub const DEFAULT_ADDR: &str = "127.0.0.1:8787";

pub const DEFAULT_FILTER: &str = "[*]";

/// Environment variable selecting the container runtime endpoint
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";
