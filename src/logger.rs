//! Logging.
//!
//! A small `init()` shim around the `log` facade, wired up with
//! `env_logger` rather than a hand-rolled `Log` implementation.

/// Installs `env_logger` as the global logger, honouring `RUST_LOG` and
/// defaulting to `info` when unset.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
