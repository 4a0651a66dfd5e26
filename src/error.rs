//! Error taxonomy for analysis, execution, and sealing.
//!
//! Every failure the pipeline can raise is a distinct variant so callers can
//! branch on [`ErrorKind`] instead of matching message text.
use crate::service::ExecutionFailure;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Coarse family of a [`ScriptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Collision,
    Discovery,
    Execution,
    Artifact,
    Environment,
    Io,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("expected exactly one environment pointer (#^), found {found}")]
    EnvironmentPointer { found: usize },

    #[error("environment pointer on line {line} must carry one path, got {tags:?}")]
    EnvironmentPointerTags { line: usize, tags: Vec<String> },

    #[error("multiple imports on relocation line {line} ({text}): {imports:?}")]
    AmbiguousRelocation {
        line: usize,
        text: String,
        imports: Vec<String>,
    },

    #[error("relocation line {line} ({text}) does not import anything")]
    MissingRelocationImport { line: usize, text: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("collision for '{tag}' in line {line} ({text}): {candidates:?}")]
    DependencyCollision {
        tag: String,
        line: usize,
        text: String,
        candidates: Vec<String>,
    },

    #[error("no dataset registrations found in source")]
    NoRegistrations,

    #[error("symbol {symbol} not found")]
    MissingSymbol { symbol: String },

    #[error("registration stack for {symbol} is empty")]
    EmptyRegistrationStack { symbol: String },

    #[error("no datasets exported")]
    NoExportedDatasets,

    #[error("malformed registration report: {0}")]
    MalformedReport(String),

    #[error("no output was produced; exactly one is required")]
    NoOutputs,

    #[error("more than one output is not supported yet: {identities:?}")]
    MultipleOutputs { identities: Vec<String> },

    #[error("{0} is not supported for this ecosystem")]
    Unsupported(String),

    #[error("script execution failed: {0}")]
    Execution(ExecutionFailure),

    #[error("execution service failed during {step}: {message}")]
    Service { step: &'static str, message: String },

    #[error("product {product} not found")]
    ProductNotFound { product: String },

    #[error("product {product} points outside its directory: {filename}")]
    ProductOutsideWorkspace { product: String, filename: String },

    #[error("multiple products found for {product}: {candidates:?}")]
    AmbiguousProduct {
        product: String,
        candidates: Vec<PathBuf>,
    },

    #[error("hash mismatch for {identity}: sealed {expected}, artifact has {actual}")]
    HashMismatch {
        identity: String,
        expected: String,
        actual: String,
    },

    #[error("malformed produce identity: {0}")]
    MalformedIdentity(String),

    #[error("unsupported hash method: {0}")]
    UnknownHashMethod(String),

    #[error("round-trip consistency check failed for {0}")]
    RoundTrip(String),

    #[error("environment checksum mismatch: recorded {recorded}, computed {computed}")]
    ChecksumMismatch { recorded: String, computed: String },

    #[error("manifest {} not materialized after {attempts} attempts", path.display())]
    ManifestNotReady { path: PathBuf, attempts: u32 },

    #[error("workspace {} already holds a manifest", path.display())]
    WorkspaceOccupied { path: PathBuf },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EnvironmentPointer { .. }
            | Self::EnvironmentPointerTags { .. }
            | Self::AmbiguousRelocation { .. }
            | Self::MissingRelocationImport { .. }
            | Self::InvalidConfig(_)
            | Self::Unsupported(_) => ErrorKind::Configuration,
            Self::DependencyCollision { .. } => ErrorKind::Collision,
            Self::NoRegistrations
            | Self::MissingSymbol { .. }
            | Self::EmptyRegistrationStack { .. }
            | Self::NoExportedDatasets
            | Self::MalformedReport(_)
            | Self::NoOutputs
            | Self::MultipleOutputs { .. } => ErrorKind::Discovery,
            Self::Execution(_) | Self::Service { .. } => ErrorKind::Execution,
            Self::ProductNotFound { .. }
            | Self::AmbiguousProduct { .. }
            | Self::ProductOutsideWorkspace { .. }
            | Self::HashMismatch { .. }
            | Self::MalformedIdentity(_)
            | Self::UnknownHashMethod(_) => ErrorKind::Artifact,
            Self::RoundTrip(_)
            | Self::ChecksumMismatch { .. }
            | Self::ManifestNotReady { .. }
            | Self::WorkspaceOccupied { .. }
            | Self::InvalidManifest(_) => ErrorKind::Environment,
            Self::Io { .. } | Self::Json { .. } => ErrorKind::Io,
        }
    }

    /// Only a manifest that has not been written yet is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ManifestNotReady { .. })
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }
}

/// `with_context`-style helper for I/O results.
pub trait IoContext<T> {
    fn io_context<F, C>(self, context: F) -> Result<T, ScriptError>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, C>(self, context: F) -> Result<T, ScriptError>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|source| ScriptError::Io {
            context: context().into(),
            source,
        })
    }
}

pub(crate) fn read_text(path: &Path) -> Result<String, ScriptError> {
    std::fs::read_to_string(path).io_context(|| format!("read {}", path.display()))
}
