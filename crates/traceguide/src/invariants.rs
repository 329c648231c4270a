//! Debug assertion macros for buffering invariants.
//!
//! Only active in debug builds (`debug_assert!`), so there is zero overhead in
//! release builds.

// =============================================================================
// Bounded buffer size
// =============================================================================

/// Assert that a buffer never holds more than its maximum.
///
/// **Invariant**: `len ≤ max` after every push.
///
/// Used in: `BoundedBuffer::push()`, `BoundedBuffer::restore()`
macro_rules! debug_assert_bounded {
    ($len:expr, $max:expr) => {
        debug_assert!(
            $len <= $max,
            "bounded buffer violated: len {} exceeds max {}",
            $len,
            $max
        )
    };
}

// =============================================================================
// Eviction index range
// =============================================================================

/// Assert that a random eviction slot lies in `[0, max)`.
///
/// Used in: `BoundedBuffer::push()` on overflow
macro_rules! debug_assert_eviction_in_range {
    ($index:expr, $max:expr) => {
        debug_assert!(
            $index < $max,
            "eviction index {} outside [0, {})",
            $index,
            $max
        )
    };
}

// =============================================================================
// Report window ordering
// =============================================================================

/// Assert that a report window is well ordered.
///
/// **Invariant**: `oldest_micros ≤ youngest_micros`
///
/// Used in: `Runtime::flush()` when building the request
macro_rules! debug_assert_window_ordered {
    ($oldest:expr, $youngest:expr) => {
        debug_assert!(
            $oldest <= $youngest,
            "report window inverted: oldest {} > youngest {}",
            $oldest,
            $youngest
        )
    };
}

pub(crate) use debug_assert_bounded;
pub(crate) use debug_assert_eviction_in_range;
pub(crate) use debug_assert_window_ordered;
