#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]
//! Container based k6 builds for k6x
//!
//! This crate selects a builder engine, drives a container runtime through
//! one build per session, and streams the resulting binary to the caller.

mod archive;
mod command;
pub mod docker;
mod engine;
mod orchestrator;
mod pull;
pub mod runtime;

pub use archive::{copy_artifacts, extract_artifacts, ArtifactReport};
pub use command::{container_spec, BuildCommand};
pub use engine::{probe_runtime, Builder, ContainerProbe, EngineProbe, EngineRegistry, Probe};
pub use orchestrator::{cancellable, keep_first_error, BuildSession, ContainerBuilder};
pub use pull::{drain_pull_progress, log_record, PullSummary, RecordKind};
pub use runtime::{
    ByteStream, ContainerRuntime, ContainerSpec, LogChunk, LogStream, RecordStream,
    RuntimeConnector, VolumeMount, WaitSenders, WaitSignals,
};

// Re-exported so callers can cancel builds without a direct tokio-util dependency
pub use tokio_util::sync::CancellationToken;
