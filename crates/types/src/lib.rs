#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for k6x
//!
//! Plain data shared by the builder, the service and the CLI: the target
//! platform, the ordered module list, dependency requests and engine tags.

pub mod engine;
pub mod module;
pub mod platform;

pub use engine::Engine;
pub use module::{Dependency, Module, Modules, LATEST_TAG};
pub use platform::Platform;
