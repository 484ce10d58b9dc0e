//! Virtual time.
//!
//! Simulation time is a totally ordered pair of a coordinate on the
//! simulated timeline and a causal counter that disambiguates events sharing
//! the same coordinate, in the manner of a Lamport clock. All kernel
//! components compare, add and subtract time exclusively through
//! [`VirtualTime`]; the floating-point realization underneath is an
//! implementation detail.
//!
//! Comparisons of the time coordinate are tolerant: two coordinates closer
//! than [`VirtualTime::TOLERANCE`] are considered equal and ordering falls
//! back to the causal counter. [`VirtualTime::INFINITY`] is the distinguished
//! upper bound used to mark passive models and empty schedules.

use std::fmt;

/// A timestamp on the simulated timeline.
///
/// The natural order compares the time coordinate first, with a tolerance of
/// [`VirtualTime::TOLERANCE`], and breaks ties on the causal counter.
#[derive(Copy, Clone, Debug, Default)]
pub struct VirtualTime {
    time: f64,
    causal: u64,
}

/// Tolerant coordinate equality.
///
/// Exact equality is checked first so that infinities compare equal to
/// themselves despite `INFINITY - INFINITY` being NaN.
fn nearly_equal(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() < VirtualTime::TOLERANCE
}

impl VirtualTime {
    /// The multiplier applied to the machine epsilon to obtain the comparison
    /// tolerance.
    pub const ULP_FACTOR: f64 = 1000.0;

    /// Comparison tolerance of the time coordinate (approx. 2.2e-13).
    pub const TOLERANCE: f64 = f64::EPSILON * Self::ULP_FACTOR;

    /// The smallest time increment guaranteed to register as strictly later
    /// under the tolerant order.
    ///
    /// Models that need a positive-but-minimal lookahead in parallel modes
    /// should advertise this value rather than `0`.
    pub const EPSILON: Self = Self {
        time: f64::EPSILON * Self::ULP_FACTOR * 2.0,
        causal: 0,
    };

    /// The origin of the simulated timeline.
    pub const ZERO: Self = Self {
        time: 0.0,
        causal: 0,
    };

    /// The distinguished upper bound; strictly greater than any finite
    /// timestamp.
    pub const INFINITY: Self = Self {
        time: f64::INFINITY,
        causal: 0,
    };

    /// Creates a timestamp from a time coordinate and a causal counter.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate is NaN.
    pub fn new(time: f64, causal: u64) -> Self {
        assert!(!time.is_nan(), "virtual time cannot be NaN");

        Self { time, causal }
    }

    /// Creates a timestamp at the given coordinate with a zero causal
    /// counter.
    pub fn at(time: f64) -> Self {
        Self::new(time, 0)
    }

    /// Returns the time coordinate.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Returns the causal counter.
    pub fn causal(&self) -> u64 {
        self.causal
    }

    /// Whether this is the distinguished infinity value.
    pub fn is_infinite(&self) -> bool {
        self.time.is_infinite()
    }

    /// Returns a timestamp at the same coordinate that happens strictly after
    /// this one.
    pub fn next_causal(self) -> Self {
        Self {
            time: self.time,
            causal: self.causal + 1,
        }
    }

    /// Returns the latest timestamp sharing this coordinate.
    ///
    /// Used as the inclusive bound when draining all entries of a schedule
    /// slot regardless of their causal counters.
    pub fn latest_at(self) -> Self {
        Self {
            time: self.time,
            causal: u64::MAX,
        }
    }

    /// Adds a duration-like timestamp, saturating at infinity.
    ///
    /// The causal counter of the result is reset to zero: the sum denotes a
    /// fresh point on the timeline, not an event within an existing slot.
    pub fn saturating_add(self, rhs: Self) -> Self {
        if self.is_infinite() || rhs.is_infinite() {
            return Self::INFINITY;
        }

        Self {
            time: self.time + rhs.time,
            causal: 0,
        }
    }

    /// Subtracts an earlier timestamp, yielding the elapsed duration.
    ///
    /// Returns `None` when the result would be negative, i.e. when `rhs` does
    /// not precede `self` under the tolerant order.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        if self < rhs {
            return None;
        }
        if self.is_infinite() {
            return Some(Self::INFINITY);
        }

        Some(Self {
            time: (self.time - rhs.time).max(0.0),
            causal: 0,
        })
    }
}

impl PartialEq for VirtualTime {
    fn eq(&self, other: &Self) -> bool {
        nearly_equal(self.time, other.time) && self.causal == other.causal
    }
}

impl Eq for VirtualTime {}

impl PartialOrd for VirtualTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VirtualTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if nearly_equal(self.time, other.time) {
            self.causal.cmp(&other.causal)
        } else {
            self.time.total_cmp(&other.time)
        }
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            return write!(f, "inf");
        }
        if self.causal == 0 {
            write!(f, "{}", self.time)
        } else {
            write!(f, "{}+{}", self.time, self.causal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_compares_coordinate_first() {
        assert!(VirtualTime::at(1.0) < VirtualTime::at(2.0));
        assert!(VirtualTime::new(2.0, 7) < VirtualTime::at(3.0));
    }

    #[test]
    fn causal_breaks_coordinate_ties() {
        let t = VirtualTime::at(5.0);
        assert!(t < t.next_causal());
        assert!(t.next_causal() < t.latest_at());
        assert_eq!(t.next_causal().causal(), 1);
    }

    #[test]
    fn tolerance_collapses_nearby_coordinates() {
        let t = VirtualTime::at(1.0);
        let nudged = VirtualTime::at(1.0 + VirtualTime::TOLERANCE / 2.0);
        assert_eq!(t, nudged);
    }

    #[test]
    fn epsilon_is_strictly_later() {
        let t = VirtualTime::ZERO;
        assert!(t.saturating_add(VirtualTime::EPSILON) > t);
    }

    #[test]
    fn infinity_is_absorbing_and_self_equal() {
        let inf = VirtualTime::INFINITY;
        assert_eq!(inf, inf);
        assert!(VirtualTime::at(1e12) < inf);
        assert_eq!(VirtualTime::at(3.0).saturating_add(inf), inf);
        assert_eq!(inf.saturating_add(VirtualTime::at(1.0)), inf);
    }

    #[test]
    fn addition_resets_causality() {
        let t = VirtualTime::new(1.0, 4);
        let sum = t.saturating_add(VirtualTime::at(1.0));
        assert_eq!(sum, VirtualTime::at(2.0));
        assert_eq!(sum.causal(), 0);
    }

    #[test]
    fn subtraction_requires_order() {
        let early = VirtualTime::at(2.0);
        let late = VirtualTime::at(5.0);
        assert_eq!(late.checked_sub(early), Some(VirtualTime::at(3.0)));
        assert_eq!(early.checked_sub(late), None);
        assert_eq!(early.checked_sub(early), Some(VirtualTime::ZERO));
    }
}
