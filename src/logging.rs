// src/logging.rs
//! Tracing initialization. Call [`init_logging`] once, before starting the
//! server, to see logs; the `RUST_LOG` environment variable controls the
//! level (`info` when unset).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logging() {
    init_logging_with("info");
}

/// Like [`init_logging`] but with an explicit default filter, e.g.
/// `"pyspeed=debug"`. `RUST_LOG` still wins when set.
pub fn init_logging_with(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    // try_init: harmless to call twice (tests, embedders that already set one up).
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
