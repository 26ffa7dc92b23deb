// src/error.rs
//! Error types for pool operations with advanced conversion support.

use std::fmt;

/// Errors that can occur during handle recycling.
///
/// Under correct use, these are never observed: a handle's owner calls
/// `recycle()` at most once between `get()`s, and never passes a handle
/// to a `Pool` that didn't issue it. See [`Pool`](crate::Pool) for the
/// contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// `recycle()` was called twice on the same handle without an
    /// intervening `get()`. A programming error; fail-fast on both the
    /// direct and queued recycle paths.
    DoubleRecycle,
    /// A handle's `recycle_id` was neither zero nor equal to its
    /// `last_recycled_id` during a cross-thread transfer. Treated as
    /// corruption; the offending slot is dropped rather than transferred.
    StateInvariant {
        /// Human-readable detail about the mismatch, for diagnostics.
        detail: String,
    },
    /// [`Pool::recycle`](crate::Pool::recycle) was called with a handle
    /// whose home stack belongs to a different `Pool`. The handle has no
    /// effect on either pool; the caller should drop it.
    AlienHandle,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoubleRecycle => write!(f, "handle recycled twice without an intervening get()"),
            Self::StateInvariant { detail } => write!(f, "pool state invariant violated: {detail}"),
            Self::AlienHandle => write!(f, "handle was not issued by this pool"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Convert `PoolError` to `anyhow::Error` (for callers already using `anyhow`).
#[cfg(feature = "anyhow")]
impl From<PoolError> for anyhow::Error {
    fn from(err: PoolError) -> Self {
        anyhow::anyhow!("{}", err)
    }
}

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Extension trait for converting pool `Result`s to other error types.
pub trait ResultExt<T> {
    /// Convert to `anyhow::Result`.
    #[cfg(feature = "anyhow")]
    fn into_anyhow(self) -> anyhow::Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    #[cfg(feature = "anyhow")]
    fn into_anyhow(self) -> anyhow::Result<T> {
        self.map_err(Into::into)
    }
}

/// Convenience macro for converting pool operations to any `Result` type.
///
/// Requires an explicit target error type as the second argument so the
/// conversion is unambiguous.
///
/// # Example
/// ```ignore
/// use recycler::recycler_op;
///
/// fn handler() -> anyhow::Result<()> {
///     recycler_op!(handle.recycle(), anyhow::Error)?;
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! recycler_op {
    ($expr:expr, $target:ty) => {
        $expr.map_err(|e: $crate::PoolError| -> $target { e.into() })
    };
}

/// Try a pool operation with automatic error conversion.
#[macro_export]
macro_rules! recycler_try {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(e) => return Err(e.into()),
        }
    };
}
