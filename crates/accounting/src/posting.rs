use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tillerp_core::Entity;

use crate::payment::PaymentId;

/// Identifier of a ledger line, assigned by the ledger store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostingId(pub Uuid);

impl PostingId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PostingId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PostingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Account classification of a ledger line.
///
/// Only receivable and payable lines take part in residual computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Receivable,
    Payable,
    Liquidity,
    Income,
    Expense,
    Tax,
    Other,
}

impl AccountType {
    pub fn is_receivable_or_payable(self) -> bool {
        matches!(self, AccountType::Receivable | AccountType::Payable)
    }
}

/// A ledger line recorded against an invoice.
///
/// `amount_residual` is signed: the document's open line is positive, payment
/// counterparts are negative and a cancelled payment's line is zeroed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPosting {
    pub id: PostingId,
    pub account_type: AccountType,
    pub amount_residual: Decimal,
    pub payment_id: Option<PaymentId>,
}

impl LedgerPosting {
    pub fn new(account_type: AccountType, amount_residual: Decimal) -> Self {
        Self {
            id: PostingId::new(),
            account_type,
            amount_residual,
            payment_id: None,
        }
    }

    pub fn with_payment(mut self, payment_id: PaymentId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }
}

impl Entity for LedgerPosting {
    type Id = PostingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
