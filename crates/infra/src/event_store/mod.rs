//! Append-only event store boundary.
//!
//! Tenant-scoped document streams (invoices, payments, sale orders) without any
//! storage assumption. `InMemoryEventStore` backs tests and the dev bootstrap.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
