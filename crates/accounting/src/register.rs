//! Payment registration wizard.
//!
//! Transient state collected before a payment is created: the target journal, the
//! amount and, for mobile-money journals, the transaction id. Nothing here is
//! persisted; `payment_values` turns a valid wizard into a `CreatePayment` command.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use tillerp_core::{DomainError, DomainResult, TenantId};

use crate::journal::Journal;
use crate::payment::{CreatePayment, PaymentId};

pub const TRANSACTION_ID_REQUIRED: &str = "Transaction ID is required for this journal.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRegister {
    journal: Option<Journal>,
    amount: Decimal,
    transaction_id: Option<String>,
}

impl PaymentRegister {
    pub fn new(amount: Decimal) -> Self {
        Self {
            journal: None,
            amount,
            transaction_id: None,
        }
    }

    /// Change the target journal.
    ///
    /// Resets the transaction id: an empty string when the new journal requires one
    /// (so the field shows up blank), `None` otherwise.
    pub fn select_journal(&mut self, journal: Option<Journal>) {
        self.transaction_id = match &journal {
            Some(j) if j.show_transaction_id() => Some(String::new()),
            _ => None,
        };
        self.journal = journal;
    }

    pub fn set_transaction_id(&mut self, transaction_id: impl Into<String>) {
        self.transaction_id = Some(transaction_id.into());
    }

    pub fn set_amount(&mut self, amount: Decimal) {
        self.amount = amount;
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Mirrors the selected journal's flag; false while no journal is selected.
    pub fn show_transaction_id(&self) -> bool {
        self.journal
            .as_ref()
            .is_some_and(Journal::show_transaction_id)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.show_transaction_id() && self.filled_transaction_id().is_none() {
            return Err(DomainError::validation(TRANSACTION_ID_REQUIRED));
        }
        Ok(())
    }

    /// Build the create command for the payment this wizard describes.
    ///
    /// The transaction id is forwarded only when non-empty, whatever the journal.
    pub fn payment_values(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<CreatePayment> {
        self.validate()?;

        let journal = self
            .journal
            .as_ref()
            .ok_or_else(|| DomainError::validation("a journal is required to register a payment"))?;

        Ok(CreatePayment {
            tenant_id,
            payment_id,
            journal_id: journal.id_typed(),
            amount: self.amount,
            transaction_id: self.filled_transaction_id().map(str::to_string),
            occurred_at,
        })
    }

    fn filled_transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalId, JournalKind, TransactionIdPolicy};
    use rust_decimal_macros::dec;
    use tillerp_core::AggregateId;

    fn journal(name: &str) -> Journal {
        Journal::new(
            JournalId::new(AggregateId::new()),
            name,
            JournalKind::Bank,
            &TransactionIdPolicy::default(),
        )
    }

    fn payment_id() -> PaymentId {
        PaymentId::new(AggregateId::new())
    }

    #[test]
    fn momo_pay_without_transaction_id_is_rejected() {
        let mut wizard = PaymentRegister::new(dec!(100));
        wizard.select_journal(Some(journal("Momo Pay")));

        let err = wizard
            .payment_values(TenantId::new(), payment_id(), Utc::now())
            .unwrap_err();
        assert_eq!(err, DomainError::validation(TRANSACTION_ID_REQUIRED));
        assert_eq!(err.to_string(), "Transaction ID is required for this journal.");
    }

    #[test]
    fn momo_pay_with_transaction_id_forwards_it() {
        let momo = journal("Momo Pay");
        let mut wizard = PaymentRegister::new(dec!(100));
        wizard.select_journal(Some(momo.clone()));
        wizard.set_transaction_id("TX123");

        let cmd = wizard
            .payment_values(TenantId::new(), payment_id(), Utc::now())
            .unwrap();
        assert_eq!(cmd.transaction_id.as_deref(), Some("TX123"));
        assert_eq!(cmd.amount, dec!(100));
        assert_eq!(cmd.journal_id, momo.id_typed());
    }

    #[test]
    fn selecting_journal_resets_transaction_id() {
        let mut wizard = PaymentRegister::new(dec!(10));

        wizard.select_journal(Some(journal("Airtel Pay")));
        assert!(wizard.show_transaction_id());
        assert_eq!(wizard.transaction_id(), Some(""));

        wizard.set_transaction_id("AT-9");
        wizard.select_journal(Some(journal("Cash")));
        assert!(!wizard.show_transaction_id());
        assert_eq!(wizard.transaction_id(), None);
    }

    #[test]
    fn ordinary_journal_needs_no_transaction_id() {
        let mut wizard = PaymentRegister::new(dec!(10));
        wizard.select_journal(Some(journal("Cash")));

        assert!(wizard.validate().is_ok());
        let cmd = wizard
            .payment_values(TenantId::new(), payment_id(), Utc::now())
            .unwrap();
        assert_eq!(cmd.transaction_id, None);
    }

    #[test]
    fn transaction_id_is_forwarded_even_for_ordinary_journals() {
        let mut wizard = PaymentRegister::new(dec!(10));
        wizard.select_journal(Some(journal("Bank")));
        wizard.set_transaction_id("BANK-REF-1");

        let cmd = wizard
            .payment_values(TenantId::new(), payment_id(), Utc::now())
            .unwrap();
        assert_eq!(cmd.transaction_id.as_deref(), Some("BANK-REF-1"));
    }

    #[test]
    fn no_journal_hides_field_but_cannot_create() {
        let wizard = PaymentRegister::new(dec!(10));
        assert!(!wizard.show_transaction_id());
        assert!(wizard.validate().is_ok());

        match wizard.payment_values(TenantId::new(), payment_id(), Utc::now()) {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("journal is required")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
