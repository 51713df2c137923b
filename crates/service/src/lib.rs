#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]
//! Network build service for k6x
//!
//! Serves `GET /build` over HTTP/1.1: the requested extensions are resolved,
//! built by the selected builder, and the binary is returned as the response
//! body. Accepted connections are bounded and a panicking request never takes
//! the process down.

pub mod http;
mod limiter;
mod recovery;
mod resolver;
mod server;

pub use http::{Body, Request, Response};
pub use limiter::ConnectionLimiter;
pub use recovery::{install_panic_hook, panic_message, recover};
pub use resolver::{PassthroughResolver, Resolver};
pub use server::{BuildService, Handler, Server, ServerOptions};
