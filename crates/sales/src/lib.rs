//! Sales Orders domain module (event-sourced).
//!
//! Sale orders with priced lines and derived totals, plus the notification hook
//! run after confirmation. Deterministic domain logic only; messaging is reached
//! through the [`NotificationSink`] port.

pub mod confirmation;
pub mod line;
pub mod order;

pub use confirmation::{
    ChannelId, ChannelKind, ChannelSpec, ChannelVisibility, DEFAULT_NOTIFICATION_CHANNEL,
    MessageSubtype, NotificationSink, OutboundMessage, confirmation_message, on_confirm,
};
pub use line::{LinePricing, LineTerms, OrderLine};
pub use order::{
    AddLine, CancelOrder, ConfirmOrder, CreateSalesOrder, LineAdded, LineRemoved, LineUpdated,
    MarkSent, OrderCancelled, OrderConfirmed, OrderTotals, QuotationSent, RemoveLine,
    SaleOrderState, SalesOrder, SalesOrderCommand, SalesOrderCreated, SalesOrderEvent,
    SalesOrderId, UpdateLine,
};
