//! Aggregate traits shared by invoices, payments and sale orders.

use crate::error::{DomainError, DomainResult};

/// Identity and version of a consistency boundary (invoice, payment, order).
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far.
    ///
    /// The event store compares this against the stream revision when appending, so
    /// two sessions editing the same invoice cannot both win.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation used when appending to a stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check (first write of a freshly created document, replays).
    Any,
    /// The stream must be at exactly this revision.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale document (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Decide/evolve contract.
///
/// - `handle(&self, cmd)` validates a command and returns the resulting events.
/// - `apply(&mut self, event)` evolves state, including every derived field that depends
///   on the event (totals, residuals, payment state). Derived fields are never written
///   from outside `apply`.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Must be deterministic and bump `version()` by one.
    fn apply(&mut self, event: &Self::Event);

    /// Must not mutate state.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}
