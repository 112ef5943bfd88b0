//! Application services: the operations users trigger, wired through the dispatcher.
//!
//! Each operation dispatches one or more commands and returns the rehydrated
//! document(s), so callers always see freshly recomputed amounts and states.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use tillerp_accounting::{
    CancelPayment, Journal, JournalId, JournalKind, LedgerPosting, Payment,
    PaymentCommand, PaymentId, PaymentRegister, PostPayment, PostingId,
};
use tillerp_core::{AggregateId, DomainError, TenantId};
use tillerp_events::{EventBus, EventEnvelope};
use tillerp_invoicing::{
    CreateInvoice, Invoice, InvoiceCommand, InvoiceId, InvoiceStatus, LineInput, MoveType,
    PostInvoice, RecordPosting, SyncPayment, SyncReversal, UpdatePostingResidual,
};
use tillerp_sales::{
    AddLine, ChannelId, ConfirmOrder, CreateSalesOrder, LineTerms, NotificationSink, SalesOrder,
    SalesOrderCommand, SalesOrderId, on_confirm,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::AppConfig;
use crate::event_store::EventStore;

pub const INVOICE_AGGREGATE: &str = "invoicing.invoice";
pub const PAYMENT_AGGREGATE: &str = "accounting.payment";
pub const SALES_ORDER_AGGREGATE: &str = "sales.order";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The order was confirmed but announcing it failed.
    #[error("notification failed: {0}")]
    Notification(String),
}

fn make_invoice(_: TenantId, id: AggregateId) -> Invoice {
    Invoice::empty(InvoiceId::new(id))
}

fn make_payment(_: TenantId, id: AggregateId) -> Payment {
    Payment::empty(PaymentId::new(id))
}

fn make_order(_: TenantId, id: AggregateId) -> SalesOrder {
    SalesOrder::empty(SalesOrderId::new(id))
}

fn reversal_type(move_type: MoveType) -> MoveType {
    match move_type {
        MoveType::Entry => MoveType::Entry,
        MoveType::OutInvoice => MoveType::OutRefund,
        MoveType::OutRefund => MoveType::OutInvoice,
        MoveType::InInvoice => MoveType::InRefund,
        MoveType::InRefund => MoveType::InInvoice,
    }
}

/// Outcome of [`ErpServices::register_payment`].
#[derive(Debug, Clone)]
pub struct RegisteredPayment {
    pub payment: Payment,
    pub invoice: Invoice,
}

pub struct ErpServices<S, B, N> {
    dispatcher: CommandDispatcher<S, B>,
    notifications: N,
    config: AppConfig,
}

impl<S, B, N> ErpServices<S, B, N>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    N: NotificationSink,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, notifications: N, config: AppConfig) -> Self {
        Self {
            dispatcher,
            notifications,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn notifications(&self) -> &N {
        &self.notifications
    }

    /// A journal whose transaction-id flag follows the configured policy.
    pub fn journal(&self, name: &str, kind: JournalKind) -> Journal {
        Journal::new(
            JournalId::new(AggregateId::new()),
            name,
            kind,
            &self.config.transaction_id_policy(),
        )
    }

    // ---- invoices ----

    pub fn load_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Invoice, ServiceError> {
        let invoice = self.dispatcher.load(tenant_id, invoice_id.0, make_invoice)?;
        if invoice.tenant_id().is_none() {
            return Err(DomainError::not_found().into());
        }
        Ok(invoice)
    }

    /// Create a draft invoice using the configured untaxed-amount basis.
    pub fn create_invoice(
        &self,
        tenant_id: TenantId,
        move_type: MoveType,
        lines: Vec<LineInput>,
    ) -> Result<Invoice, ServiceError> {
        let invoice_id = InvoiceId::new(AggregateId::new());
        self.invoice_command(
            tenant_id,
            invoice_id,
            InvoiceCommand::CreateInvoice(CreateInvoice {
                tenant_id,
                invoice_id,
                move_type,
                untaxed_basis: self.config.untaxed_basis,
                lines,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Dispatch any invoice command and return the updated invoice.
    pub fn invoice_command(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        command: InvoiceCommand,
    ) -> Result<Invoice, ServiceError> {
        self.dispatcher
            .dispatch(tenant_id, invoice_id.0, INVOICE_AGGREGATE, command, make_invoice)?;
        self.load_invoice(tenant_id, invoice_id)
    }

    /// Post a draft invoice and write its open receivable/payable line.
    pub fn post_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Invoice, ServiceError> {
        let invoice = self.invoice_command(
            tenant_id,
            invoice_id,
            InvoiceCommand::PostInvoice(PostInvoice {
                tenant_id,
                invoice_id,
                occurred_at: Utc::now(),
            }),
        )?;

        let posting = LedgerPosting::new(invoice.move_type().ledger_account(), invoice.amount_total());
        let invoice = self.record_posting(tenant_id, invoice_id, posting)?;

        tracing::info!(
            %tenant_id,
            %invoice_id,
            amount_total = %invoice.amount_total(),
            payment_state = ?invoice.payment_state(),
            "invoice posted"
        );
        Ok(invoice)
    }

    pub fn record_posting(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        posting: LedgerPosting,
    ) -> Result<Invoice, ServiceError> {
        self.invoice_command(
            tenant_id,
            invoice_id,
            InvoiceCommand::RecordPosting(RecordPosting {
                tenant_id,
                invoice_id,
                posting,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn update_posting_residual(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        posting_id: PostingId,
        amount_residual: Decimal,
    ) -> Result<Invoice, ServiceError> {
        self.invoice_command(
            tenant_id,
            invoice_id,
            InvoiceCommand::UpdatePostingResidual(UpdatePostingResidual {
                tenant_id,
                invoice_id,
                posting_id,
                amount_residual,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Create and post the reversal document, then mark the original as reversed.
    ///
    /// Returns `(original, reversal)`.
    pub fn reverse_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<(Invoice, Invoice), ServiceError> {
        let original = self.load_invoice(tenant_id, invoice_id)?;
        if original.status() != InvoiceStatus::Posted {
            return Err(DomainError::invariant("only posted invoices can be reversed").into());
        }
        if original.reversal().is_some() {
            return Err(DomainError::conflict("invoice is already reversed").into());
        }

        let lines = original
            .lines()
            .iter()
            .map(|l| LineInput {
                description: l.description.clone(),
                price_subtotal: l.price_subtotal,
                price_total: l.price_total,
            })
            .collect();

        let reversal_id = InvoiceId::new(AggregateId::new());
        self.invoice_command(
            tenant_id,
            reversal_id,
            InvoiceCommand::CreateInvoice(CreateInvoice {
                tenant_id,
                invoice_id: reversal_id,
                move_type: reversal_type(original.move_type()),
                untaxed_basis: original.untaxed_basis(),
                lines,
                occurred_at: Utc::now(),
            }),
        )?;
        let reversal = self.post_invoice(tenant_id, reversal_id)?;

        let original = self.invoice_command(
            tenant_id,
            invoice_id,
            InvoiceCommand::SyncReversal(SyncReversal {
                tenant_id,
                invoice_id,
                reversal_id,
                posted: true,
                occurred_at: Utc::now(),
            }),
        )?;

        Ok((original, reversal))
    }

    // ---- payments ----

    pub fn load_payment(&self, tenant_id: TenantId, payment_id: PaymentId) -> Result<Payment, ServiceError> {
        let payment = self.dispatcher.load(tenant_id, payment_id.0, make_payment)?;
        if payment.tenant_id().is_none() {
            return Err(DomainError::not_found().into());
        }
        Ok(payment)
    }

    /// Confirm the payment wizard against a posted invoice.
    ///
    /// The payment is created as a draft, its counterpart ledger line is written
    /// against the invoice, then the payment is posted and linked so the invoice
    /// mirrors its transaction id. If any step after creation fails, the payment is
    /// cancelled and its ledger line zeroed before the error is returned.
    pub fn register_payment(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        wizard: &PaymentRegister,
    ) -> Result<RegisteredPayment, ServiceError> {
        let invoice = self.load_invoice(tenant_id, invoice_id)?;
        if invoice.status() != InvoiceStatus::Posted {
            return Err(DomainError::invariant("payments can only be registered on posted invoices").into());
        }

        let payment_id = PaymentId::new(AggregateId::new());
        let create = wizard.payment_values(tenant_id, payment_id, Utc::now())?;
        let counterpart =
            LedgerPosting::new(invoice.move_type().ledger_account(), -create.amount).with_payment(payment_id);

        self.dispatcher.dispatch(
            tenant_id,
            payment_id.0,
            PAYMENT_AGGREGATE,
            PaymentCommand::CreatePayment(create),
            make_payment,
        )?;

        let settled = self
            .record_posting(tenant_id, invoice_id, counterpart)
            .and_then(|_| self.post_payment(tenant_id, payment_id))
            .and_then(|payment| {
                let invoice = self.sync_payment(tenant_id, invoice_id, &payment)?;
                Ok(RegisteredPayment { payment, invoice })
            });

        let registered = match settled {
            Ok(registered) => registered,
            Err(e) => {
                tracing::warn!(%tenant_id, %invoice_id, %payment_id, error = %e, "payment registration failed; compensating");
                self.compensate_payment(tenant_id, invoice_id, payment_id);
                return Err(e);
            }
        };

        tracing::info!(
            %tenant_id,
            %invoice_id,
            %payment_id,
            amount = %registered.payment.amount(),
            has_transaction_id = registered.payment.transaction_id().is_some(),
            payment_state = ?registered.invoice.payment_state(),
            "payment registered"
        );

        Ok(registered)
    }

    /// Cancel a payment, zero its ledger lines on the invoice and mirror its new state.
    pub fn cancel_payment(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
    ) -> Result<RegisteredPayment, ServiceError> {
        self.dispatcher.dispatch(
            tenant_id,
            payment_id.0,
            PAYMENT_AGGREGATE,
            PaymentCommand::CancelPayment(CancelPayment {
                tenant_id,
                payment_id,
                occurred_at: Utc::now(),
            }),
            make_payment,
        )?;
        let payment = self.load_payment(tenant_id, payment_id)?;

        self.release_payment_postings(tenant_id, invoice_id, payment_id)?;
        let invoice = self.sync_payment(tenant_id, invoice_id, &payment)?;
        Ok(RegisteredPayment { payment, invoice })
    }

    fn post_payment(&self, tenant_id: TenantId, payment_id: PaymentId) -> Result<Payment, ServiceError> {
        self.dispatcher.dispatch(
            tenant_id,
            payment_id.0,
            PAYMENT_AGGREGATE,
            PaymentCommand::PostPayment(PostPayment {
                tenant_id,
                payment_id,
                occurred_at: Utc::now(),
            }),
            make_payment,
        )?;
        self.load_payment(tenant_id, payment_id)
    }

    /// Zero every open ledger line the payment wrote against the invoice.
    fn release_payment_postings(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
    ) -> Result<(), ServiceError> {
        let invoice = self.load_invoice(tenant_id, invoice_id)?;
        let open: Vec<PostingId> = invoice
            .postings()
            .iter()
            .filter(|p| p.payment_id == Some(payment_id) && !p.amount_residual.is_zero())
            .map(|p| p.id)
            .collect();

        for posting_id in open {
            self.update_posting_residual(tenant_id, invoice_id, posting_id, Decimal::ZERO)?;
        }
        Ok(())
    }

    /// Undo a half-registered payment. Failures are logged, never raised, so the
    /// caller keeps reporting the error that triggered the rollback.
    fn compensate_payment(&self, tenant_id: TenantId, invoice_id: InvoiceId, payment_id: PaymentId) {
        if let Err(e) = self.release_payment_postings(tenant_id, invoice_id, payment_id) {
            tracing::error!(%tenant_id, %invoice_id, %payment_id, error = %e, "could not release payment ledger lines");
        }

        let cancelled = self.dispatcher.dispatch(
            tenant_id,
            payment_id.0,
            PAYMENT_AGGREGATE,
            PaymentCommand::CancelPayment(CancelPayment {
                tenant_id,
                payment_id,
                occurred_at: Utc::now(),
            }),
            make_payment,
        );
        if let Err(e) = cancelled {
            tracing::error!(%tenant_id, %payment_id, error = %e, "could not cancel half-registered payment");
        }
    }

    fn sync_payment(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment: &Payment,
    ) -> Result<Invoice, ServiceError> {
        self.invoice_command(
            tenant_id,
            invoice_id,
            InvoiceCommand::SyncPayment(SyncPayment {
                tenant_id,
                invoice_id,
                payment_id: payment.id_typed(),
                status: payment.status(),
                transaction_id: payment.transaction_id().map(str::to_string),
                occurred_at: Utc::now(),
            }),
        )
    }

    // ---- sale orders ----

    pub fn load_order(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<SalesOrder, ServiceError> {
        let order = self.dispatcher.load(tenant_id, order_id.0, make_order)?;
        if order.tenant_id().is_none() {
            return Err(DomainError::not_found().into());
        }
        Ok(order)
    }

    pub fn order_command(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        command: SalesOrderCommand,
    ) -> Result<SalesOrder, ServiceError> {
        self.dispatcher
            .dispatch(tenant_id, order_id.0, SALES_ORDER_AGGREGATE, command, make_order)?;
        self.load_order(tenant_id, order_id)
    }

    pub fn create_order(&self, tenant_id: TenantId, name: &str) -> Result<SalesOrder, ServiceError> {
        let order_id = SalesOrderId::new(AggregateId::new());
        self.order_command(
            tenant_id,
            order_id,
            SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id,
                order_id,
                name: name.to_string(),
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn add_order_line(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        terms: LineTerms,
    ) -> Result<SalesOrder, ServiceError> {
        self.order_command(
            tenant_id,
            order_id,
            SalesOrderCommand::AddLine(AddLine {
                tenant_id,
                order_id,
                terms,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Confirm the order, then announce it on the configured channel.
    ///
    /// The confirmation is committed before any message is sent; a messaging failure
    /// is reported as `ServiceError::Notification` with the order already confirmed.
    pub fn confirm_order(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
    ) -> Result<(SalesOrder, Option<ChannelId>), ServiceError> {
        let order = self.order_command(
            tenant_id,
            order_id,
            SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;

        let channel = on_confirm(&order, &self.config.notification_channel, &self.notifications)
            .map_err(|e| {
                tracing::error!(%tenant_id, %order_id, error = %e, "confirmation notification failed");
                ServiceError::Notification(e.to_string())
            })?;

        tracing::info!(%tenant_id, %order_id, name = order.name(), "sale order confirmed");
        Ok((order, channel))
    }
}
