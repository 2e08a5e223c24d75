//! Allocation error type.
//!
//! Exhaustion of either pool resource (buffer bytes or descriptor slots) is an
//! expected operational outcome and surfaces as an `Err`; contract violations
//! (double free, foreign pointer) are debug-asserted, and state corruption is
//! fatal. Transient CAS contention is retried internally and never surfaced.

use core::fmt;

/// The specific reason an allocation request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum AllocErrorKind {
    /// Every descriptor slot is occupied by an in-flight or unreclaimed block.
    #[error("descriptor table exhausted")]
    DescriptorsExhausted,
    /// The buffer cannot hold the request, even with a wrap-around gap.
    #[error("buffer capacity exhausted")]
    OutOfMemory,
    /// Zero-sized requests are not representable as blocks.
    #[error("requested size is zero")]
    InvalidSize,
    /// The request can never fit this pool, regardless of current load.
    #[error("requested size exceeds pool maximum")]
    ExceedsMaxSize,
    /// Alignment stricter than the pool's fixed block alignment.
    #[error("unsupported alignment")]
    InvalidAlignment,
    /// Pool geometry rejected at construction time.
    #[error("invalid pool geometry")]
    InvalidConfig,
    /// Size arithmetic overflowed.
    #[error("size calculation overflow")]
    SizeOverflow,
}

/// Error returned by allocation operations.
///
/// Carries the failure kind and, where meaningful, the size that was
/// requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    kind: AllocErrorKind,
    size: Option<usize>,
}

impl AllocError {
    /// Creates an error with the given kind.
    #[inline]
    pub const fn new(kind: AllocErrorKind) -> Self {
        Self { kind, size: None }
    }

    /// Creates an error carrying the requested size.
    #[inline]
    pub const fn with_size(kind: AllocErrorKind, size: usize) -> Self {
        Self {
            kind,
            size: Some(size),
        }
    }

    /// Returns the failure kind.
    #[inline]
    pub const fn kind(&self) -> AllocErrorKind {
        self.kind
    }

    /// Returns the requested size, if recorded.
    #[inline]
    pub const fn size(&self) -> Option<usize> {
        self.size
    }

    /// True for transient exhaustion that may clear once older blocks retire.
    #[inline]
    pub const fn is_exhausted(&self) -> bool {
        matches!(
            self.kind,
            AllocErrorKind::DescriptorsExhausted | AllocErrorKind::OutOfMemory
        )
    }

    /// Convenience constructor for descriptor exhaustion.
    #[inline]
    pub const fn descriptors_exhausted() -> Self {
        Self::new(AllocErrorKind::DescriptorsExhausted)
    }

    /// Convenience constructor for buffer exhaustion.
    #[inline]
    pub const fn out_of_memory() -> Self {
        Self::new(AllocErrorKind::OutOfMemory)
    }

    /// Convenience constructor for rejected pool geometry.
    #[inline]
    pub const fn invalid_config() -> Self {
        Self::new(AllocErrorKind::InvalidConfig)
    }
}

impl From<AllocErrorKind> for AllocError {
    #[inline]
    fn from(kind: AllocErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "allocation of {size} bytes failed: {}", self.kind),
            None => write!(f, "allocation failed: {}", self.kind),
        }
    }
}

impl core::error::Error for AllocError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Result type for allocation operations.
pub type AllocResult<T> = Result<T, AllocError>;
