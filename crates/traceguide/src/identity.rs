//! Runtime identity and guid generation.
//!
//! The runtime guid is derived deterministically from the process id and the
//! credential pair so that the same process reports under the same identity
//! even when the runtime is re-created. Span guids are random.

use crate::error::ConfigError;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Identity of one instrumented process/credential pair. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    access_token: String,
    group_name: String,
    runtime_guid: String,
    start_micros: i64,
}

impl Identity {
    /// Builds an identity for the current process.
    pub fn new(
        group_name: &str,
        access_token: &str,
        start_micros: i64,
    ) -> Result<Self, ConfigError> {
        Self::for_process(std::process::id(), group_name, access_token, start_micros)
    }

    /// Builds an identity for an explicit process id.
    pub fn for_process(
        process_id: u32,
        group_name: &str,
        access_token: &str,
        start_micros: i64,
    ) -> Result<Self, ConfigError> {
        validate(group_name, access_token)?;
        Ok(Self {
            access_token: access_token.to_owned(),
            group_name: group_name.to_owned(),
            runtime_guid: derive_runtime_guid(process_id, access_token, group_name),
            start_micros,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn runtime_guid(&self) -> &str {
        &self.runtime_guid
    }

    pub fn start_micros(&self) -> i64 {
        self.start_micros
    }

    /// Checks a later identity request against this one.
    ///
    /// Identical values are accepted silently; any difference is an error.
    pub fn check_consistent(&self, group_name: &str, access_token: &str) -> Result<(), ConfigError> {
        if self.access_token != access_token {
            return Err(ConfigError::AccessTokenChanged);
        }
        if self.group_name != group_name {
            return Err(ConfigError::GroupNameChanged);
        }
        Ok(())
    }
}

/// Rejects empty identity strings.
pub fn validate(group_name: &str, access_token: &str) -> Result<(), ConfigError> {
    if access_token.is_empty() {
        return Err(ConfigError::EmptyAccessToken);
    }
    if group_name.is_empty() {
        return Err(ConfigError::EmptyGroupName);
    }
    Ok(())
}

/// Derives the stable runtime guid: 32 hex chars of SHA-256 over the
/// length-prefixed inputs. Not a security property.
pub fn derive_runtime_guid(process_id: u32, access_token: &str, group_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(process_id.to_le_bytes());
    for part in [access_token, group_name] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Generates a random 32-hex-char id (not a true UUID).
pub fn generate_guid() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{:08x}{:08x}{:08x}{:08x}",
        rng.gen::<u32>(),
        rng.gen::<u32>(),
        rng.gen::<u32>(),
        rng.gen::<u32>()
    )
}
