use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tillerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use tillerp_events::Event;

use crate::journal::JournalId;

/// Payment identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Payment status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Draft,
    Posted,
    Cancelled,
}

/// Aggregate root: Payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    id: PaymentId,
    tenant_id: Option<TenantId>,
    journal_id: Option<JournalId>,
    amount: Decimal,
    transaction_id: Option<String>,
    status: PaymentStatus,
    version: u64,
    created: bool,
}

impl Payment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PaymentId) -> Self {
        Self {
            id,
            tenant_id: None,
            journal_id: None,
            amount: Decimal::ZERO,
            transaction_id: None,
            status: PaymentStatus::Draft,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn journal_id(&self) -> Option<JournalId> {
        self.journal_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Mobile-money reference captured by the registration wizard.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn is_posted(&self) -> bool {
        self.status == PaymentStatus::Posted
    }
}

impl AggregateRoot for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePayment (draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayment {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub journal_id: JournalId,
    pub amount: Decimal,
    pub transaction_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPayment {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPayment {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentCommand {
    CreatePayment(CreatePayment),
    PostPayment(PostPayment),
    CancelPayment(CancelPayment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCreated {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub journal_id: JournalId,
    pub amount: Decimal,
    pub transaction_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPosted {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCancelled {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    PaymentCreated(PaymentCreated),
    PaymentPosted(PaymentPosted),
    PaymentCancelled(PaymentCancelled),
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => "accounting.payment.created",
            PaymentEvent::PaymentPosted(_) => "accounting.payment.posted",
            PaymentEvent::PaymentCancelled(_) => "accounting.payment.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::PaymentCreated(e) => e.occurred_at,
            PaymentEvent::PaymentPosted(e) => e.occurred_at,
            PaymentEvent::PaymentCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Payment {
    type Command = PaymentCommand;
    type Event = PaymentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PaymentEvent::PaymentCreated(e) => {
                self.id = e.payment_id;
                self.tenant_id = Some(e.tenant_id);
                self.journal_id = Some(e.journal_id);
                self.amount = e.amount;
                self.transaction_id = e.transaction_id.clone();
                self.status = PaymentStatus::Draft;
                self.created = true;
            }
            PaymentEvent::PaymentPosted(_) => {
                self.status = PaymentStatus::Posted;
            }
            PaymentEvent::PaymentCancelled(_) => {
                self.status = PaymentStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PaymentCommand::CreatePayment(cmd) => self.handle_create(cmd),
            PaymentCommand::PostPayment(cmd) => self.handle_post(cmd),
            PaymentCommand::CancelPayment(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Payment {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_payment_id(&self, payment_id: PaymentId) -> Result<(), DomainError> {
        if self.id != payment_id {
            return Err(DomainError::invariant("payment_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePayment) -> Result<Vec<PaymentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("payment already exists"));
        }

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        // Blank references are dropped rather than stored.
        let transaction_id = cmd
            .transaction_id
            .as_ref()
            .filter(|t| !t.trim().is_empty())
            .cloned();

        Ok(vec![PaymentEvent::PaymentCreated(PaymentCreated {
            tenant_id: cmd.tenant_id,
            payment_id: cmd.payment_id,
            journal_id: cmd.journal_id,
            amount: cmd.amount,
            transaction_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_payment_id(cmd.payment_id)?;

        if self.status != PaymentStatus::Draft {
            return Err(DomainError::invariant("only draft payments can be posted"));
        }

        Ok(vec![PaymentEvent::PaymentPosted(PaymentPosted {
            tenant_id: cmd.tenant_id,
            payment_id: cmd.payment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_payment_id(cmd.payment_id)?;

        if self.status == PaymentStatus::Cancelled {
            return Err(DomainError::conflict("payment is already cancelled"));
        }

        Ok(vec![PaymentEvent::PaymentCancelled(PaymentCancelled {
            tenant_id: cmd.tenant_id,
            payment_id: cmd.payment_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tillerp_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn create_cmd(tenant_id: TenantId, payment_id: PaymentId) -> CreatePayment {
        CreatePayment {
            tenant_id,
            payment_id,
            journal_id: JournalId::new(AggregateId::new()),
            amount: dec!(50.00),
            transaction_id: Some("TX123".to_string()),
            occurred_at: test_time(),
        }
    }

    #[test]
    fn create_then_post_carries_transaction_id() {
        let tenant_id = TenantId::new();
        let payment_id = PaymentId::new(AggregateId::new());
        let mut payment = Payment::empty(payment_id);

        execute(
            &mut payment,
            &PaymentCommand::CreatePayment(create_cmd(tenant_id, payment_id)),
        )
        .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Draft);
        assert_eq!(payment.transaction_id(), Some("TX123"));
        assert_eq!(payment.amount(), dec!(50.00));

        execute(
            &mut payment,
            &PaymentCommand::PostPayment(PostPayment {
                tenant_id,
                payment_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(payment.is_posted());
        assert_eq!(payment.version(), 2);
    }

    #[test]
    fn blank_transaction_id_is_not_stored() {
        let tenant_id = TenantId::new();
        let payment_id = PaymentId::new(AggregateId::new());
        let payment = Payment::empty(payment_id);

        let mut cmd = create_cmd(tenant_id, payment_id);
        cmd.transaction_id = Some("   ".to_string());
        let events = payment.handle(&PaymentCommand::CreatePayment(cmd)).unwrap();
        match &events[0] {
            PaymentEvent::PaymentCreated(e) => assert_eq!(e.transaction_id, None),
            _ => panic!("Expected PaymentCreated event"),
        }
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let tenant_id = TenantId::new();
        let payment_id = PaymentId::new(AggregateId::new());
        let payment = Payment::empty(payment_id);

        let mut cmd = create_cmd(tenant_id, payment_id);
        cmd.amount = Decimal::ZERO;
        let err = payment.handle(&PaymentCommand::CreatePayment(cmd)).unwrap_err();
        assert_eq!(err, DomainError::validation("payment amount must be positive"));
    }

    #[test]
    fn cannot_post_twice() {
        let tenant_id = TenantId::new();
        let payment_id = PaymentId::new(AggregateId::new());
        let mut payment = Payment::empty(payment_id);
        execute(
            &mut payment,
            &PaymentCommand::CreatePayment(create_cmd(tenant_id, payment_id)),
        )
        .unwrap();

        let post = PaymentCommand::PostPayment(PostPayment {
            tenant_id,
            payment_id,
            occurred_at: test_time(),
        });
        execute(&mut payment, &post).unwrap();

        match payment.handle(&post).unwrap_err() {
            DomainError::InvariantViolation(msg) if msg.contains("only draft payments") => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn other_tenant_cannot_cancel() {
        let tenant_id = TenantId::new();
        let payment_id = PaymentId::new(AggregateId::new());
        let mut payment = Payment::empty(payment_id);
        execute(
            &mut payment,
            &PaymentCommand::CreatePayment(create_cmd(tenant_id, payment_id)),
        )
        .unwrap();

        let err = payment
            .handle(&PaymentCommand::CancelPayment(CancelPayment {
                tenant_id: TenantId::new(),
                payment_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::invariant("tenant mismatch"));
    }
}
