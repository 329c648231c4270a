//! Process-wide runtime.
//!
//! Hosts that prefer a singleton initialize it once and fetch it anywhere.
//! Initialization is guarded by a single [`OnceLock`], so concurrent callers
//! observe exactly one runtime.

use crate::config::RuntimeOptions;
use crate::error::ConfigError;
use crate::identity;
use crate::runtime::Runtime;
use std::sync::OnceLock;

static INSTANCE: OnceLock<Runtime> = OnceLock::new();

fn build(
    group_name: &str,
    access_token: &str,
    options: RuntimeOptions,
) -> Result<Runtime, ConfigError> {
    identity::validate(group_name, access_token)?;
    Runtime::new(options.with_identity(group_name, access_token))
}

/// Creates the process-wide runtime.
///
/// Fails with [`ConfigError::AlreadyInitialized`] if a runtime already exists.
pub fn initialize(
    group_name: &str,
    access_token: &str,
    options: RuntimeOptions,
) -> Result<&'static Runtime, ConfigError> {
    if INSTANCE.get().is_some() {
        return Err(ConfigError::AlreadyInitialized);
    }
    let runtime = build(group_name, access_token, options)?;
    // Lost a race with another initializer; the spare runtime is dropped.
    INSTANCE
        .set(runtime)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    INSTANCE.get().ok_or(ConfigError::AlreadyInitialized)
}

/// The process-wide runtime, if initialized.
pub fn instance() -> Option<&'static Runtime> {
    INSTANCE.get()
}

/// Returns the process-wide runtime, creating it on first use.
///
/// Arguments are ignored once a runtime exists.
pub fn get_or_init(
    group_name: &str,
    access_token: &str,
    options: RuntimeOptions,
) -> Result<&'static Runtime, ConfigError> {
    if let Some(runtime) = INSTANCE.get() {
        return Ok(runtime);
    }
    match initialize(group_name, access_token, options) {
        Err(ConfigError::AlreadyInitialized) => {
            INSTANCE.get().ok_or(ConfigError::AlreadyInitialized)
        }
        other => other,
    }
}

/// Flushes and closes the process-wide runtime.
///
/// Statics are never dropped, so hosts call this before exiting. The runtime
/// stays reachable afterwards; its final flush has already run.
pub fn shutdown() {
    if let Some(runtime) = INSTANCE.get() {
        runtime.shutdown();
    }
}
