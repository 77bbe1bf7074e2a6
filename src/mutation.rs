//! Mutation policies: whether a proposed value may replace the current one.
//!
//! A policy is consulted before anything observable happens; `apply` only
//! runs after `verify` accepted the same pair of values. Policies never
//! touch persistent state.

use std::fmt;

/// Strategy deciding if and how a proposed value replaces the current one.
pub trait MutationPolicy<T>: Send + Sync {
    /// Whether `proposed` may replace `current`.
    fn verify(&self, current: &T, proposed: &T) -> bool;

    /// Replace `current` with `proposed`.
    fn apply(&self, current: &mut T, proposed: T) {
        *current = proposed;
    }

    /// The accepted range `[min, max)`, if the policy has one.
    fn bounds(&self) -> Option<(&T, &T)> {
        None
    }
}

/// Accepts every value, including the current one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl<T> MutationPolicy<T> for Always {
    fn verify(&self, _current: &T, _proposed: &T) -> bool {
        true
    }
}

/// Accepts any value that differs from the current one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Different;

impl<T: PartialEq> MutationPolicy<T> for Different {
    fn verify(&self, current: &T, proposed: &T) -> bool {
        current != proposed
    }
}

/// Accepts values in `[min, max)` that differ from the current one.
#[derive(Clone)]
pub struct Bounded<T> {
    min: T,
    max: T,
}

impl<T> Bounded<T> {
    /// Create a policy accepting `min <= v < max`.
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    /// Inclusive lower bound.
    pub fn min(&self) -> &T {
        &self.min
    }

    /// Exclusive upper bound.
    pub fn max(&self) -> &T {
        &self.max
    }
}

impl<T: PartialOrd + Send + Sync> MutationPolicy<T> for Bounded<T> {
    fn verify(&self, current: &T, proposed: &T) -> bool {
        current != proposed && self.min <= *proposed && *proposed < self.max
    }

    fn bounds(&self) -> Option<(&T, &T)> {
        Some((&self.min, &self.max))
    }
}

impl<T: fmt::Debug> fmt::Debug for Bounded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bounded[{:?}, {:?})", self.min, self.max)
    }
}
