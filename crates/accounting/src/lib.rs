//! Accounting module: journals, payments, ledger postings and the payment
//! registration wizard.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod journal;
pub mod payment;
pub mod posting;
pub mod register;

pub use journal::{
    DEFAULT_TRANSACTION_ID_JOURNALS, Journal, JournalId, JournalKind, TransactionIdPolicy,
};
pub use payment::{
    CancelPayment, CreatePayment, Payment, PaymentCancelled, PaymentCommand, PaymentCreated,
    PaymentEvent, PaymentId, PaymentPosted, PaymentStatus, PostPayment,
};
pub use posting::{AccountType, LedgerPosting, PostingId};
pub use register::{PaymentRegister, TRANSACTION_ID_REQUIRED};
