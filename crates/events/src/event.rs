use chrono::{DateTime, Utc};

/// A fact recorded against an invoice, payment or sale order.
///
/// Events are immutable and versioned; the store only ever appends them.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable name (e.g. "invoicing.invoice.posted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time.
    fn occurred_at(&self) -> DateTime<Utc>;
}
