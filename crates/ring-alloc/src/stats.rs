//! Allocator statistics.

use core::fmt;

/// Aggregate counters reported by [`StatisticsProvider`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Bytes currently allocated (including not-yet-reclaimed dead blocks).
    pub allocated_bytes: usize,
    /// Peak of `allocated_bytes` over the allocator's lifetime.
    pub peak_allocated_bytes: usize,
    /// Successful allocations.
    pub allocation_count: usize,
    /// Deallocations.
    pub deallocation_count: usize,
    /// Allocations rejected for exhaustion.
    pub failed_allocations: usize,
}

impl AllocatorStats {
    /// Creates an all-zero stats value.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocated_bytes: 0,
            peak_allocated_bytes: 0,
            allocation_count: 0,
            deallocation_count: 0,
            failed_allocations: 0,
        }
    }

    /// Whether more allocations than deallocations have been observed.
    #[must_use]
    pub fn has_active_allocations(&self) -> bool {
        self.allocation_count > self.deallocation_count
    }

    /// Fraction of allocation attempts that succeeded, 0.0 to 1.0.
    #[must_use]
    pub fn allocation_efficiency(&self) -> f64 {
        let attempts = self.allocation_count + self.failed_allocations;
        if attempts > 0 {
            self.allocation_count as f64 / attempts as f64
        } else {
            1.0
        }
    }
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Allocator statistics:")?;
        writeln!(f, "  current allocated: {} bytes", self.allocated_bytes)?;
        writeln!(f, "  peak allocated: {} bytes", self.peak_allocated_bytes)?;
        writeln!(f, "  allocations: {}", self.allocation_count)?;
        writeln!(f, "  deallocations: {}", self.deallocation_count)?;
        writeln!(f, "  failed allocations: {}", self.failed_allocations)?;
        write!(
            f,
            "  efficiency: {:.2}%",
            self.allocation_efficiency() * 100.0
        )
    }
}

/// Allocators that can report [`AllocatorStats`].
pub trait StatisticsProvider {
    /// Current statistics snapshot.
    fn statistics(&self) -> AllocatorStats;

    /// Resets all counters to zero.
    fn reset_statistics(&self);

    /// Whether counters are being maintained.
    fn statistics_enabled(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efficiency() {
        let mut stats = AllocatorStats::new();
        assert_eq!(stats.allocation_efficiency(), 1.0);
        stats.allocation_count = 3;
        stats.failed_allocations = 1;
        assert_eq!(stats.allocation_efficiency(), 0.75);
        assert!(stats.has_active_allocations());

        let text = stats.to_string();
        assert!(text.contains("allocations: 3"));
        assert!(text.contains("75.00%"));
    }
}
