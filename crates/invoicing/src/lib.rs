//! Invoicing domain module (event-sourced).
//!
//! Invoices carry priced lines, the ledger postings written against them and the
//! payments linked through those postings. Amounts, residual and payment state are
//! derived from those facts on every applied event (see [`amounts`]).

pub mod amounts;
pub mod invoice;

pub use amounts::{
    AmountTotals, InvoiceInputs, InvoiceTotals, MoveType, PaymentState, PaymentStateInputs,
    UntaxedBasis, aggregate_amounts, classify_payment_state, compute, resolve_residual,
};
pub use invoice::{
    AddLine, CancelInvoice, CreateInvoice, Invoice, InvoiceCancelled, InvoiceCommand,
    InvoiceCreated, InvoiceEvent, InvoiceId, InvoiceLine, InvoicePosted, InvoiceStatus,
    LineAdded, LineInput, LineRemoved, LineUpdated, LinkedPayment, PaymentSynced, PostInvoice,
    PostingRecorded, PostingResidualChanged, RecordPosting, RemoveLine, Reversal, ReversalSynced,
    SyncPayment, SyncReversal, UpdateLine, UpdatePostingResidual,
};
