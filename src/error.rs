//! Error returned by the admission middleware.
use crate::admission::{RetryAfter, Rejection};
use std::fmt;

/// Failure of a service wrapped by [`AdmissionLayer`](crate::AdmissionLayer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError<E> {
    /// Admission refused the request; the inner service was never called.
    Rejected(Rejection),
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(rejection) => match rejection.retry_after {
                RetryAfter::Seconds(secs) => {
                    write!(f, "too many requests, retry after {}s", secs)
                }
                RetryAfter::Unbounded => write!(f, "too many requests, permanently banned"),
            },
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected(_) => None,
        }
    }
}

impl<E> AdmissionError<E> {
    /// Check if admission refused the request
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// The rejection, if admission refused the request.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            Self::Inner(_) => None,
        }
    }
    /// Retry hint for a rejected request.
    pub fn retry_after(&self) -> Option<RetryAfter> {
        self.rejection().map(|r| r.retry_after)
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected(_) => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected(_) => None,
        }
    }
}
