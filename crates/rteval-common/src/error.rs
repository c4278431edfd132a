use thiserror::Error;

/// Errors raised by the module engine, the managers and the run loop.
///
/// Transient conditions (out-of-memory restarts, early completion of a
/// measurement, a user stop request) are not errors and never appear here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RtevalError {
    /// Bad or missing module parameter; disables only the offending module.
    #[error("configuration error in {module}: {reason}")]
    Config {
        /// Module (or config section) the problem belongs to.
        module: String,
        /// Human readable description.
        reason: String,
    },

    /// NUMA topology could not be discovered or is inconsistent.
    #[error("topology error: {0}")]
    Topology(String),

    /// One-time module preparation failed; aborts the run.
    #[error("{module} failed to build: {reason}")]
    ModuleBuild {
        /// Module name.
        module: String,
        /// Failure description.
        reason: String,
    },

    /// A work unit exited with an unexpected status; aborts the run.
    #[error("{module} failed to run ({status}), please check logs for more detail")]
    ModuleFailure {
        /// Module name.
        module: String,
        /// Rendered exit status of the failing unit.
        status: String,
    },

    /// A load module thread terminated while the run was in progress.
    #[error("load thread died: {alive} of {expected} load threads alive{}", render_cause(.cause))]
    LoadThreadDied {
        /// Thread count recorded right after unleashing.
        expected: usize,
        /// Thread count observed at the failing check.
        alive: usize,
        /// Failure recorded by the dead module, if any.
        cause: Option<String>,
    },

    /// A module lifecycle transition skipped or reversed a state.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// I/O operation error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl RtevalError {
    /// Shorthand for a [`RtevalError::Config`] error.
    pub fn config(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an [`std::io::Error`] with a short context string.
    pub fn io(context: impl std::fmt::Display, err: &std::io::Error) -> Self {
        Self::Io(format!("{context}: {err}"))
    }

    /// Whether this error only disables a single module instead of the run.
    #[must_use]
    pub fn is_module_local(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

fn render_cause(cause: &Option<String>) -> String {
    cause.as_ref().map(|c| format!(" ({c})")).unwrap_or_default()
}

/// Convenience type alias for rteval operations.
pub type RtevalResult<T> = Result<T, RtevalError>;
