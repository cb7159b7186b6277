//! Structured logging setup.
//!
//! `tracing_subscriber::fmt` init, in the same shape as `ampactor-sonido`'s
//! logging setup — an env-filter-driven fmt layer installed once. The
//! teacher depends on `tracing` but never installs a subscriber for it,
//! pulling in `log`/`env_logger` instead without ever wiring them up; this
//! standardizes on `tracing` alone.
//!
//! The realtime hot path (the rendezvous cycle and the guest thread loop)
//! never logs: a `tracing` event allocates and may hit a subscriber-side
//! lock, which is unacceptable inside a JACK process callback. Everything
//! logged here happens on control-plane threads.

use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Installs a `tracing_subscriber` fmt layer at the given default level,
/// honoring `RUST_LOG` if set. Safe to call more than once per process —
/// only the first call has any effect, so repeated `Driver::open`/`close`
/// cycles don't try to double-install a global subscriber.
pub fn init(default_level: Level) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
