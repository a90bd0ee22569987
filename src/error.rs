use std::io;
use std::path::PathBuf;

use crate::types::Tier;

/// Failure of a single external tool invocation.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConsolidateError {
    #[error("manifest '{}' not found", .0.display())]
    ManifestMissing(PathBuf),

    #[error("manifest '{}' is malformed: {source}", path.display())]
    ManifestMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest {tier} tier is inconsistent: {reason}")]
    ManifestInconsistent { tier: Tier, reason: String },

    #[error("invalid {tier} descriptor name '{name}'")]
    InvalidDescriptor { tier: Tier, name: String },

    #[error("invalid timestamp '{0}' (expected YYYYMMDDHHMMSS)")]
    InvalidTimestamp(String),

    #[error("{what} '{}' not found", path.display())]
    PreconditionMissing { what: &'static str, path: PathBuf },

    #[error("{stage} '{name}' failed: {source}")]
    RemoteUnavailable {
        stage: &'static str,
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("validation rejected merged archive '{}'", .0.display())]
    ValidationFailed(PathBuf),

    #[error("validator could not run on '{}': {source}", path.display())]
    ValidatorUnavailable {
        path: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("long-term store is not authenticated: {0}")]
    StoreUnauthenticated(String),

    #[error("failed to {action} '{}': {source}", path.display())]
    CompressionFailed {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("version control {action} for '{name}' failed: {source}")]
    VersionControl {
        action: &'static str,
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("cleanup of '{name}' ({what}) failed: {source}")]
    CleanupFailed {
        what: &'static str,
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("required command '{0}' not found on PATH")]
    ToolMissing(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub(crate) type Result<T, E = ConsolidateError> = std::result::Result<T, E>;
