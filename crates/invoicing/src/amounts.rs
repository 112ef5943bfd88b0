//! Invoice amount, residual and payment-state computation.
//!
//! Everything here is a pure function of the invoice's lines, ledger postings,
//! linked payments and state. `Invoice::apply` calls [`compute`] after every event
//! that touches one of those inputs, so the derived fields never drift.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tillerp_accounting::{AccountType, LedgerPosting, PaymentId};
use tillerp_core::ValueObject;

use crate::invoice::{InvoiceLine, InvoiceStatus};

/// Document kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    /// Journal entry that is not an invoice.
    Entry,
    OutInvoice,
    InInvoice,
    OutRefund,
    InRefund,
}

impl MoveType {
    pub fn is_refund(self) -> bool {
        matches!(self, MoveType::OutRefund | MoveType::InRefund)
    }

    /// -1 for refunds, +1 otherwise.
    pub fn sign(self) -> Decimal {
        if self.is_refund() {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ONE
        }
    }

    /// Account the open balance of this document is carried on.
    ///
    /// The open line is recorded as `+amount_total` whatever the side, and payment
    /// counterparts as negative amounts, so the residual shrinks towards zero.
    pub fn ledger_account(self) -> AccountType {
        match self {
            MoveType::Entry | MoveType::OutInvoice | MoveType::OutRefund => AccountType::Receivable,
            MoveType::InInvoice | MoveType::InRefund => AccountType::Payable,
        }
    }
}

/// How `amount_untaxed` is derived from the lines.
///
/// `NetOfTax` keeps the historical behaviour: tax is subtracted from the sum of
/// subtotals even though subtotals already exclude tax. `Standard` uses the plain sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UntaxedBasis {
    #[default]
    NetOfTax,
    Standard,
}

/// Categorical settlement state of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    NotPaid,
    InPayment,
    Paid,
    Partial,
    Reversed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountTotals {
    pub amount_untaxed: Decimal,
    pub amount_tax: Decimal,
    pub amount_total: Decimal,
}

impl ValueObject for AmountTotals {}

/// All derived fields of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub amount_untaxed: Decimal,
    pub amount_tax: Decimal,
    pub amount_total: Decimal,
    pub amount_residual: Decimal,
    pub amount_untaxed_signed: Decimal,
    pub amount_tax_signed: Decimal,
    pub amount_total_signed: Decimal,
    pub amount_residual_signed: Decimal,
    pub payment_state: PaymentState,
}

impl ValueObject for InvoiceTotals {}

impl Default for InvoiceTotals {
    fn default() -> Self {
        Self {
            amount_untaxed: Decimal::ZERO,
            amount_tax: Decimal::ZERO,
            amount_total: Decimal::ZERO,
            amount_residual: Decimal::ZERO,
            amount_untaxed_signed: Decimal::ZERO,
            amount_tax_signed: Decimal::ZERO,
            amount_total_signed: Decimal::ZERO,
            amount_residual_signed: Decimal::ZERO,
            payment_state: PaymentState::NotPaid,
        }
    }
}

/// Sum line amounts into untaxed / tax / total.
pub fn aggregate_amounts(lines: &[InvoiceLine], basis: UntaxedBasis) -> AmountTotals {
    let mut subtotal = Decimal::ZERO;
    let mut total_tax = Decimal::ZERO;
    for line in lines {
        subtotal += line.price_subtotal;
        total_tax += line.price_total - line.price_subtotal;
    }

    let amount_untaxed = match basis {
        UntaxedBasis::NetOfTax => subtotal - total_tax,
        UntaxedBasis::Standard => subtotal,
    };

    AmountTotals {
        amount_untaxed,
        amount_tax: total_tax,
        amount_total: amount_untaxed + total_tax,
    }
}

/// Remaining open amount.
///
/// The sum of receivable/payable residuals replaces the total only when it is strictly
/// smaller in magnitude. Without any receivable/payable posting the invoice is fully
/// outstanding.
pub fn resolve_residual(amount_total: Decimal, postings: &[LedgerPosting]) -> Decimal {
    let mut open = postings
        .iter()
        .filter(|p| p.account_type.is_receivable_or_payable())
        .map(|p| p.amount_residual)
        .peekable();

    if open.peek().is_none() {
        return amount_total;
    }

    let sum_residuals: Decimal = open.sum();
    if sum_residuals.abs() < amount_total.abs() {
        sum_residuals
    } else {
        amount_total
    }
}

/// Inputs of the payment-state classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentStateInputs {
    pub status: InvoiceStatus,
    pub amount_residual: Decimal,
    pub amount_total: Decimal,
    pub has_posted_payment: bool,
    pub reversal_posted: bool,
}

/// First matching rule wins.
pub fn classify_payment_state(inputs: PaymentStateInputs) -> PaymentState {
    if inputs.status != InvoiceStatus::Posted {
        return PaymentState::NotPaid;
    }
    if inputs.amount_residual.is_zero() {
        return PaymentState::Paid;
    }
    if Decimal::ZERO < inputs.amount_residual && inputs.amount_residual < inputs.amount_total {
        return PaymentState::Partial;
    }
    if inputs.has_posted_payment {
        return PaymentState::InPayment;
    }
    if inputs.reversal_posted {
        return PaymentState::Reversed;
    }
    PaymentState::NotPaid
}

/// Everything [`compute`] reads from an invoice.
#[derive(Debug, Clone, Copy)]
pub struct InvoiceInputs<'a> {
    pub move_type: MoveType,
    pub status: InvoiceStatus,
    pub basis: UntaxedBasis,
    pub lines: &'a [InvoiceLine],
    pub postings: &'a [LedgerPosting],
    pub posted_payments: &'a [PaymentId],
    pub reversal_posted: bool,
}

pub fn compute(inputs: InvoiceInputs<'_>) -> InvoiceTotals {
    let amounts = aggregate_amounts(inputs.lines, inputs.basis);
    let amount_residual = resolve_residual(amounts.amount_total, inputs.postings);
    let sign = inputs.move_type.sign();

    let has_posted_payment = inputs
        .postings
        .iter()
        .filter_map(|p| p.payment_id)
        .any(|id| inputs.posted_payments.contains(&id));

    let payment_state = classify_payment_state(PaymentStateInputs {
        status: inputs.status,
        amount_residual,
        amount_total: amounts.amount_total,
        has_posted_payment,
        reversal_posted: inputs.reversal_posted,
    });

    InvoiceTotals {
        amount_untaxed: amounts.amount_untaxed,
        amount_tax: amounts.amount_tax,
        amount_total: amounts.amount_total,
        amount_residual,
        amount_untaxed_signed: sign * amounts.amount_untaxed,
        amount_tax_signed: sign * amounts.amount_tax,
        amount_total_signed: sign * amounts.amount_total,
        amount_residual_signed: sign * amount_residual.abs(),
        payment_state,
    }
}
