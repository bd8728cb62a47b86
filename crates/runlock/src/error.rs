//! The façade-level error type, unifying acquisition failures with
//! whatever the caller's own critical section can fail with.

use std::fmt;

use runlock_core::LockError;

/// Either the coordinator failed to acquire the lease, or the caller's
/// body returned an error once it held one.
///
/// Body errors are never wrapped further or inspected -- they propagate
/// through unchanged, exactly as `body` produced them.
#[derive(Debug, Clone)]
pub enum LockOrBodyError<E> {
    /// The coordinator itself failed -- acquisition timeout or invalid
    /// configuration.
    Lock(LockError),

    /// The caller's critical section returned this error after the lease
    /// was held.
    Body(E),
}

impl<E> From<LockError> for LockOrBodyError<E> {
    fn from(err: LockError) -> Self {
        LockOrBodyError::Lock(err)
    }
}

impl<E: fmt::Display> fmt::Display for LockOrBodyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOrBodyError::Lock(e) => write!(f, "{e}"),
            LockOrBodyError::Body(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for LockOrBodyError<E> {}

impl<E> LockOrBodyError<E> {
    /// Returns `true` if this is a [`LockError::AcquisitionTimeout`]
    /// wrapped as [`LockOrBodyError::Lock`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockOrBodyError::Lock(e) if e.is_timeout())
    }

    /// Returns the body error, if this is a [`LockOrBodyError::Body`].
    pub fn into_body_error(self) -> Option<E> {
        match self {
            LockOrBodyError::Body(e) => Some(e),
            LockOrBodyError::Lock(_) => None,
        }
    }
}
