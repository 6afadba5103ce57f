// Copyright 2025 Cowboy AI, LLC.

//! Error types for the COPF runtime core.

use thiserror::Error;

/// Errors that can occur while the synchronization engine, transport, or
/// storage layer is running.
#[derive(Debug, Clone, Error)]
pub enum CopfError {
    /// A transport lookup found no handler registered for a URI.
    #[error("no handler registered for {0}")]
    RegistryMissing(String),

    /// A concept handler raised an error while executing an action.
    #[error("handler error in {concept}/{action}: {reason}")]
    HandlerError {
        /// Concept the handler belongs to.
        concept: String,
        /// Action that was invoked.
        action: String,
        /// Reason reported by the handler.
        reason: String,
    },

    /// A flow exceeded the configured recursion depth.
    #[error("flow {flow} exceeded max depth {max_depth}")]
    FlowOverflow {
        /// Flow that overflowed.
        flow: String,
        /// Configured maximum depth.
        max_depth: usize,
    },

    /// A cooperative deadline elapsed before a flow completed.
    #[error("flow {0} exceeded its deadline")]
    Timeout(String),

    /// An action invocation targeted a concept pending a migration.
    #[error("concept {concept} requires migration before {action} can run")]
    MigrationRequired {
        /// Concept awaiting migration.
        concept: String,
        /// Action that was blocked.
        action: String,
    },

    /// A storage operation referenced a collection/key pair that is invalid
    /// for the requesting handle.
    #[error("storage error: {0}")]
    Storage(String),

    /// A `then` template referenced a variable that was never bound.
    #[error("unbound variable ?{0} in then template")]
    UnboundVariable(String),

    /// Generic invalid operation, used sparingly for conditions that do not
    /// warrant a dedicated variant.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result alias for fallible COPF runtime operations.
pub type CopfResult<T> = Result<T, CopfError>;

impl CopfError {
    /// True for errors that should surface as an `error`-variant completion
    /// rather than abort the caller.
    pub fn is_runtime_fault(&self) -> bool {
        matches!(
            self,
            CopfError::RegistryMissing(_)
                | CopfError::HandlerError { .. }
                | CopfError::FlowOverflow { .. }
                | CopfError::Timeout(_)
                | CopfError::MigrationRequired { .. }
        )
    }
}
