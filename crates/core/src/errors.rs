//! Error types and handling
//!
//! The taxonomy mirrors how a pipeline run can fail: flag problems detected
//! before any side effect (`ConfigError`), missing or failing external tools
//! (`ToolError`), an external installation that cannot be found
//! (`DiscoveryError`) and optimization-data problems (`OptimizationError`).
//! Everything is wrapped in `BuildError` for unified propagation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating command-line intent
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Malformed or conflicting flags; usage is printed before exiting
    #[error("{message}")]
    Usage { message: String },

    /// Official-build fields missing their required companions
    #[error("{message}")]
    Precondition { message: String },
}

/// External tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    /// A required executable or tool package is absent
    #[error("Required tool not found: {}", path.display())]
    Missing { path: PathBuf },

    /// The tool ran and returned a nonzero exit code
    #[error("{tool} failed with exit code {code}")]
    Failed { tool: String, code: i32 },

    /// The tool could not be started or was killed by a signal
    #[error("Failed to run {tool}: {message}")]
    Launch { tool: String, message: String },

    /// The test runner has not been built yet
    #[error("Test runner not found: '{}'. Run a build first.", path.display())]
    TestRunnerMissing { path: PathBuf },
}

/// Errors locating an external installation
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// No host IDE installation could be located
    #[error("Unable to locate required Visual Studio installation")]
    IdeNotFound,

    /// The discovery tool produced output that could not be understood
    #[error("Failed to parse discovery output: {message}")]
    Parsing { message: String },

    /// An extension package named in the deployment order was not built
    #[error("Extension package not found: {}", path.display())]
    PackageMissing { path: PathBuf },

    /// The per-user data directory holding the extension cache is unknown
    #[error("Unable to resolve the local application data directory")]
    LocalDataDirUnknown,
}

/// Optimization-data errors
#[derive(Error, Debug)]
pub enum OptimizationError {
    /// The artifact service returned no drop under the expected prefix
    #[error("No drop matching given name found: '{service}/{prefix}/*'")]
    NoMatchingDrop { service: String, prefix: String },

    /// The drop listing could not be parsed
    #[error("Failed to parse drop listing: {0}")]
    Listing(#[from] serde_json::Error),
}

/// Failures that escape every other category
#[derive(Error, Debug)]
pub enum InternalError {
    /// A panic escaped the pipeline; `backtrace` is captured at the panic site
    #[error("Unhandled fault: {message}\n{backtrace}")]
    Fault { message: String, backtrace: String },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Flag validation errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// External tool errors
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Discovery errors
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Optimization data errors
    #[error(transparent)]
    Optimization(#[from] OptimizationError),

    /// Network errors while downloading tools
    #[error("Network error: {message}")]
    Network { message: String },

    /// Filesystem errors with the path that triggered them
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An archive could not be unpacked
    #[error("Failed to extract archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    /// Internal errors
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl BuildError {
    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether usage text should be shown alongside this error
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Config(ConfigError::Usage { .. }))
    }

    /// Process exit code for this error. Every failure maps to 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Convenience type alias for Results with BuildError
pub type Result<T> = std::result::Result<T, BuildError>;
