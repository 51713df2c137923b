//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub fn default_directives(debug: bool) -> &'static str {
    if debug {
        "info,k6x=debug,k6x_builder=debug,k6x_service=debug,k6x_config=debug"
    } else {
        "info"
    }
}

/// Install the global subscriber; logs go to stderr so stdout stays clean
pub fn init_tracing(json: bool, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
