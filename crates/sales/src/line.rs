//! Sale-order line pricing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tillerp_core::{DomainError, DomainResult, ValueObject};

/// Commercial terms of a line as entered by the user.
///
/// `tax_rate` is a percentage supplied by the tax engine for the line's taxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTerms {
    pub description: Option<String>,
    pub price_unit: Decimal,
    /// Percent.
    pub discount: Decimal,
    pub quantity: Decimal,
    /// Percent.
    pub tax_rate: Decimal,
}

impl LineTerms {
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity < Decimal::ZERO {
            return Err(DomainError::validation("quantity must not be negative"));
        }
        if self.discount < Decimal::ZERO || self.discount > Decimal::ONE_HUNDRED {
            return Err(DomainError::validation("discount must be between 0 and 100"));
        }
        if self.tax_rate < Decimal::ZERO {
            return Err(DomainError::validation("tax_rate must not be negative"));
        }
        Ok(())
    }

    pub fn price(&self) -> LinePricing {
        LinePricing::compute(self)
    }
}

/// Amounts derived from [`LineTerms`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePricing {
    pub price_subtotal: Decimal,
    pub price_tax: Decimal,
    pub price_total: Decimal,
    pub price_reduce: Decimal,
    pub price_reduce_taxinc: Decimal,
    pub price_reduce_taxexcl: Decimal,
}

impl ValueObject for LinePricing {}

impl LinePricing {
    pub fn compute(terms: &LineTerms) -> Self {
        let price = terms.price_unit * (Decimal::ONE - terms.discount / Decimal::ONE_HUNDRED);
        let price_total = price * terms.quantity;
        let price_tax = price_total * terms.tax_rate / Decimal::ONE_HUNDRED;
        let price_subtotal = price_total - price_tax;

        let per_unit = |amount: Decimal| {
            if terms.quantity.is_zero() {
                Decimal::ZERO
            } else {
                amount / terms.quantity
            }
        };

        Self {
            price_subtotal,
            price_tax,
            price_total,
            price_reduce: per_unit(price_total),
            price_reduce_taxinc: per_unit(price_total),
            price_reduce_taxexcl: per_unit(price_subtotal),
        }
    }
}

/// Priced order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub terms: LineTerms,
    pub pricing: LinePricing,
}

impl OrderLine {
    pub fn new(line_no: u32, terms: LineTerms) -> Self {
        let pricing = terms.price();
        Self {
            line_no,
            terms,
            pricing,
        }
    }
}
