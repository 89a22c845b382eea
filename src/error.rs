// src/error.rs
//! Crate-wide error type: one enum per §7 taxonomy member, plus a category()
//! mapping back to {Usage, Transient, Data, Cancellation} for retry dispatch.

use std::fmt;
use thiserror::Error;

use crate::graph::{NodeId, PortName};

/// Which of the §7 taxonomy buckets an error falls into, so the scheduler
/// can dispatch retry policy on category rather than matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller bug: invalid graph, unknown kernel, invalid descriptor. Never retried.
    Usage,
    /// Allocation exhaustion, device lost. Worker may retry with a smaller budget.
    Transient,
    /// Asset missing, corrupted payload. Job fails; dependents stay Blocked.
    Data,
    /// Not an error — the terminal `Cancelled` state.
    Cancellation,
}

#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("graph contains a cycle reachable from root {root:?}")]
    Cycle { root: NodeId },

    #[error("node {node:?} input port {port:?} references unknown node {target:?}")]
    DanglingInput {
        node: NodeId,
        port: PortName,
        target: NodeId,
    },

    #[error("kernel '{0}' is not registered")]
    MissingKernel(String),

    #[error("adapter kernel '{0}' is not registered")]
    MissingAdapterPSO(String),

    #[error("invalid texture descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("texture pool exhausted: requested {requested} bytes, budget {budget} bytes")]
    AllocationExhausted { requested: u64, budget: u64 },

    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    #[error("asset {0} missing")]
    AssetMissing(String),

    #[error("corrupted job payload: {0}")]
    InvalidPayload(String),

    #[error("kernel missing for job: {0}")]
    KernelMissing(String),

    #[error("encoder failure: {0}")]
    EncoderFailure(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Custom(String),

    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Map this error back to its §7 taxonomy bucket.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Cycle { .. }
            | Error::DanglingInput { .. }
            | Error::MissingKernel(_)
            | Error::MissingAdapterPSO(_)
            | Error::InvalidDescriptor(_) => ErrorCategory::Usage,

            Error::AllocationExhausted { .. } | Error::DeviceLost(_) => ErrorCategory::Transient,

            Error::AssetMissing(_)
            | Error::KernelMissing(_)
            | Error::EncoderFailure(_)
            | Error::InvalidPayload(_)
            | Error::Storage(_) => ErrorCategory::Data,

            Error::Cancelled => ErrorCategory::Cancellation,

            Error::Custom(_) => ErrorCategory::Usage,
            Error::WithContext { source, .. } => source.category(),
        }
    }

    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self.category(), ErrorCategory::Cancellation)
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

/// Convenient `Result` alias — use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping_matches_taxonomy() {
        assert_eq!(
            Error::Cycle { root: NodeId::new("root") }.category(),
            ErrorCategory::Usage
        );
        assert_eq!(
            Error::AllocationExhausted { requested: 10, budget: 5 }.category(),
            ErrorCategory::Transient
        );
        assert_eq!(Error::AssetMissing("a".into()).category(), ErrorCategory::Data);
        assert_eq!(Error::Cancelled.category(), ErrorCategory::Cancellation);
    }

    #[test]
    fn with_context_inherits_source_category() {
        let e = Error::AssetMissing("a".into()).context("loading frame 3");
        assert_eq!(e.category(), ErrorCategory::Data);
        assert!(e.to_string().contains("loading frame 3"));
    }
}
