//! Value objects: compared by value, never by identity.
//!
//! Computed amount sets (invoice totals, residual breakdowns, line prices) are value
//! objects: two results with the same numbers are the same result, which is what makes
//! recomputation idempotence checkable with `==`.

/// Marker trait for immutable, value-compared domain types.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
