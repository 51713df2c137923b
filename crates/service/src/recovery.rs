//! Panic boundary around request handling

use crate::http::Response;
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Run a handler future, turning a panic into a generic 500 response
///
/// The panic payload is logged; the stack of the panicking task is logged
/// by the hook from [`install_panic_hook`] when installed.
pub async fn recover<F>(handler: F) -> Response
where
    F: Future<Output = Response>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "Request handler panicked");
            Response::status(500)
        }
    }
}

/// Best effort text of a panic payload
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Log panics through `tracing`, with the backtrace of the panicking thread
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(ToString::to_string)
            .unwrap_or_default();
        let backtrace = Backtrace::force_capture();
        error!(
            panic = %panic_message(info.payload()),
            %location,
            "{backtrace}"
        );
    }));
}
