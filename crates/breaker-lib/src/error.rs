//! Caller-facing error kinds
//!
//! Only two kinds ever reach the caller of [`execute`]: an admission denial
//! from an open circuit, or the wrapped operation's own error. Every internal
//! failure of the learning stack is contained and logged instead.
//!
//! [`execute`]: crate::breaker::MlCircuitBreaker::execute

use thiserror::Error;

/// Error returned by a protected call
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Admission denied. The operation was not invoked and no side effects
    /// were produced.
    #[error("circuit breaker is open, call rejected")]
    Open,

    /// The wrapped operation failed. The cause is propagated verbatim; a
    /// failure record was written to the metric window.
    #[error("protected operation failed")]
    Operation(#[source] E),
}

impl<E> BreakerError<E> {
    /// True when the call was rejected without invoking the operation
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }

    /// The underlying operation error, if any
    pub fn into_cause(self) -> Option<E> {
        match self {
            BreakerError::Open => None,
            BreakerError::Operation(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn open_has_no_cause() {
        let err: BreakerError<io::Error> = BreakerError::Open;
        assert!(err.is_open());
        assert!(err.into_cause().is_none());
    }

    #[test]
    fn operation_preserves_cause() {
        let cause = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err: BreakerError<io::Error> = BreakerError::Operation(cause);
        assert!(!err.is_open());
        let inner = err.into_cause().expect("cause");
        assert_eq!(inner.kind(), io::ErrorKind::ConnectionRefused);
    }
}
