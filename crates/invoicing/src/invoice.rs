use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tillerp_accounting::{LedgerPosting, PaymentId, PaymentStatus, PostingId};
use tillerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use tillerp_events::Event;

use crate::amounts::{self, InvoiceInputs, InvoiceTotals, MoveType, PaymentState, UntaxedBasis};

/// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Posted,
    Cancel,
}

/// Invoice line with amounts already priced by the tax engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    pub description: Option<String>,
    /// Tax excluded.
    pub price_subtotal: Decimal,
    /// Tax included.
    pub price_total: Decimal,
}

/// Line input for commands; `line_no` is assigned by the invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub description: Option<String>,
    pub price_subtotal: Decimal,
    pub price_total: Decimal,
}

/// Payment known to the invoice through one of its postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedPayment {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

/// Reversal document created for this invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reversal {
    pub invoice_id: InvoiceId,
    pub posted: bool,
}

/// Aggregate root: Invoice.
///
/// `totals` is derived: it is recomputed at the end of every `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    move_type: MoveType,
    status: InvoiceStatus,
    untaxed_basis: UntaxedBasis,
    lines: Vec<InvoiceLine>,
    next_line_no: u32,
    postings: Vec<LedgerPosting>,
    payments: Vec<LinkedPayment>,
    reversal: Option<Reversal>,
    totals: InvoiceTotals,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            move_type: MoveType::OutInvoice,
            status: InvoiceStatus::Draft,
            untaxed_basis: UntaxedBasis::default(),
            lines: Vec::new(),
            next_line_no: 1,
            postings: Vec::new(),
            payments: Vec::new(),
            reversal: None,
            totals: InvoiceTotals::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn move_type(&self) -> MoveType {
        self.move_type
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn untaxed_basis(&self) -> UntaxedBasis {
        self.untaxed_basis
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn postings(&self) -> &[LedgerPosting] {
        &self.postings
    }

    pub fn payments(&self) -> &[LinkedPayment] {
        &self.payments
    }

    pub fn reversal(&self) -> Option<Reversal> {
        self.reversal
    }

    pub fn totals(&self) -> &InvoiceTotals {
        &self.totals
    }

    pub fn amount_untaxed(&self) -> Decimal {
        self.totals.amount_untaxed
    }

    pub fn amount_tax(&self) -> Decimal {
        self.totals.amount_tax
    }

    pub fn amount_total(&self) -> Decimal {
        self.totals.amount_total
    }

    pub fn amount_residual(&self) -> Decimal {
        self.totals.amount_residual
    }

    pub fn amount_untaxed_signed(&self) -> Decimal {
        self.totals.amount_untaxed_signed
    }

    pub fn amount_tax_signed(&self) -> Decimal {
        self.totals.amount_tax_signed
    }

    pub fn amount_total_signed(&self) -> Decimal {
        self.totals.amount_total_signed
    }

    pub fn amount_residual_signed(&self) -> Decimal {
        self.totals.amount_residual_signed
    }

    pub fn payment_state(&self) -> PaymentState {
        self.totals.payment_state
    }

    /// Transaction id of the most recently linked payment that carries one.
    pub fn transaction_id(&self) -> Option<&str> {
        self.payments
            .iter()
            .rev()
            .find_map(|p| p.transaction_id.as_deref())
    }

    pub fn is_modifiable(&self) -> bool {
        self.status == InvoiceStatus::Draft
    }

    fn recompute(&mut self) {
        let posted_payments: Vec<PaymentId> = self
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Posted)
            .map(|p| p.payment_id)
            .collect();

        self.totals = amounts::compute(InvoiceInputs {
            move_type: self.move_type,
            status: self.status,
            basis: self.untaxed_basis,
            lines: &self.lines,
            postings: &self.postings,
            posted_payments: &posted_payments,
            reversal_posted: self.reversal.is_some_and(|r| r.posted),
        });
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice (draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub move_type: MoveType,
    pub untaxed_basis: UntaxedBasis,
    pub lines: Vec<LineInput>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line: LineInput,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLine {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line_no: u32,
    pub line: LineInput,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPosting (a ledger line was written against the invoice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPosting {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub posting: LedgerPosting,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePostingResidual (the ledger store re-matched a line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePostingResidual {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub posting_id: PostingId,
    pub amount_residual: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SyncPayment (a linked payment was created or changed state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SyncReversal (a reversal document was linked or posted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReversal {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reversal_id: InvoiceId,
    pub posted: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    AddLine(AddLine),
    UpdateLine(UpdateLine),
    RemoveLine(RemoveLine),
    PostInvoice(PostInvoice),
    CancelInvoice(CancelInvoice),
    RecordPosting(RecordPosting),
    UpdatePostingResidual(UpdatePostingResidual),
    SyncPayment(SyncPayment),
    SyncReversal(SyncReversal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub move_type: MoveType,
    pub untaxed_basis: UntaxedBasis,
    pub lines: Vec<InvoiceLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line: InvoiceLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineUpdated {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line: InvoiceLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePosted {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRecorded {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub posting: LedgerPosting,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingResidualChanged {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub posting_id: PostingId,
    pub amount_residual: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSynced {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment: LinkedPayment,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalSynced {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reversal: Reversal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    LineAdded(LineAdded),
    LineUpdated(LineUpdated),
    LineRemoved(LineRemoved),
    InvoicePosted(InvoicePosted),
    InvoiceCancelled(InvoiceCancelled),
    PostingRecorded(PostingRecorded),
    PostingResidualChanged(PostingResidualChanged),
    PaymentSynced(PaymentSynced),
    ReversalSynced(ReversalSynced),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::LineAdded(_) => "invoicing.invoice.line_added",
            InvoiceEvent::LineUpdated(_) => "invoicing.invoice.line_updated",
            InvoiceEvent::LineRemoved(_) => "invoicing.invoice.line_removed",
            InvoiceEvent::InvoicePosted(_) => "invoicing.invoice.posted",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
            InvoiceEvent::PostingRecorded(_) => "invoicing.invoice.posting_recorded",
            InvoiceEvent::PostingResidualChanged(_) => "invoicing.invoice.posting_residual_changed",
            InvoiceEvent::PaymentSynced(_) => "invoicing.invoice.payment_synced",
            InvoiceEvent::ReversalSynced(_) => "invoicing.invoice.reversal_synced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::LineAdded(e) => e.occurred_at,
            InvoiceEvent::LineUpdated(e) => e.occurred_at,
            InvoiceEvent::LineRemoved(e) => e.occurred_at,
            InvoiceEvent::InvoicePosted(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
            InvoiceEvent::PostingRecorded(e) => e.occurred_at,
            InvoiceEvent::PostingResidualChanged(e) => e.occurred_at,
            InvoiceEvent::PaymentSynced(e) => e.occurred_at,
            InvoiceEvent::ReversalSynced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.move_type = e.move_type;
                self.untaxed_basis = e.untaxed_basis;
                self.lines = e.lines.clone();
                self.next_line_no = e.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
                self.status = InvoiceStatus::Draft;
                self.created = true;
            }
            InvoiceEvent::LineAdded(e) => {
                self.next_line_no = self.next_line_no.max(e.line.line_no + 1);
                self.lines.push(e.line.clone());
            }
            InvoiceEvent::LineUpdated(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line.line_no) {
                    *line = e.line.clone();
                }
            }
            InvoiceEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            InvoiceEvent::InvoicePosted(_) => {
                self.status = InvoiceStatus::Posted;
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.status = InvoiceStatus::Cancel;
            }
            InvoiceEvent::PostingRecorded(e) => {
                self.postings.push(e.posting.clone());
            }
            InvoiceEvent::PostingResidualChanged(e) => {
                if let Some(p) = self.postings.iter_mut().find(|p| p.id == e.posting_id) {
                    p.amount_residual = e.amount_residual;
                }
            }
            InvoiceEvent::PaymentSynced(e) => {
                match self
                    .payments
                    .iter_mut()
                    .find(|p| p.payment_id == e.payment.payment_id)
                {
                    Some(existing) => *existing = e.payment.clone(),
                    None => self.payments.push(e.payment.clone()),
                }
            }
            InvoiceEvent::ReversalSynced(e) => {
                self.reversal = Some(e.reversal);
            }
        }

        self.recompute();

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::AddLine(cmd) => self.handle_add_line(cmd),
            InvoiceCommand::UpdateLine(cmd) => self.handle_update_line(cmd),
            InvoiceCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            InvoiceCommand::PostInvoice(cmd) => self.handle_post(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::RecordPosting(cmd) => self.handle_record_posting(cmd),
            InvoiceCommand::UpdatePostingResidual(cmd) => self.handle_update_residual(cmd),
            InvoiceCommand::SyncPayment(cmd) => self.handle_sync_payment(cmd),
            InvoiceCommand::SyncReversal(cmd) => self.handle_sync_reversal(cmd),
        }
    }
}

impl Invoice {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_invoice_id(invoice_id)
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "cannot modify lines of a posted or cancelled invoice",
            ));
        }
        Ok(())
    }

    fn ensure_posted(&self, what: &str) -> Result<(), DomainError> {
        if self.status != InvoiceStatus::Posted {
            return Err(DomainError::invariant(format!(
                "{what} requires a posted invoice"
            )));
        }
        Ok(())
    }

    fn has_line(&self, line_no: u32) -> bool {
        self.lines.iter().any(|l| l.line_no == line_no)
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }

        let lines = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(input, line_no)| to_line(line_no, input))
            .collect();

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            move_type: cmd.move_type,
            untaxed_basis: cmd.untaxed_basis,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        self.ensure_draft()?;

        Ok(vec![InvoiceEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            line: to_line(self.next_line_no, &cmd.line),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_line(&self, cmd: &UpdateLine) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        self.ensure_draft()?;

        if !self.has_line(cmd.line_no) {
            return Err(DomainError::validation(format!(
                "invoice has no line {}",
                cmd.line_no
            )));
        }

        Ok(vec![InvoiceEvent::LineUpdated(LineUpdated {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            line: to_line(cmd.line_no, &cmd.line),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        self.ensure_draft()?;

        if !self.has_line(cmd.line_no) {
            return Err(DomainError::validation(format!(
                "invoice has no line {}",
                cmd.line_no
            )));
        }

        Ok(vec![InvoiceEvent::LineRemoved(LineRemoved {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;

        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invariant("only draft invoices can be posted"));
        }

        Ok(vec![InvoiceEvent::InvoicePosted(InvoicePosted {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;

        // Posted invoices are reversed, never cancelled.
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invariant("only draft invoices can be cancelled"));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_posting(&self, cmd: &RecordPosting) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        self.ensure_posted("recording a ledger posting")?;

        if self.postings.iter().any(|p| p.id == cmd.posting.id) {
            return Err(DomainError::conflict("posting already recorded"));
        }

        Ok(vec![InvoiceEvent::PostingRecorded(PostingRecorded {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            posting: cmd.posting.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_residual(
        &self,
        cmd: &UpdatePostingResidual,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;

        if !self.postings.iter().any(|p| p.id == cmd.posting_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![InvoiceEvent::PostingResidualChanged(PostingResidualChanged {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            posting_id: cmd.posting_id,
            amount_residual: cmd.amount_residual,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_sync_payment(&self, cmd: &SyncPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        self.ensure_posted("linking a payment")?;

        let payment = LinkedPayment {
            payment_id: cmd.payment_id,
            status: cmd.status,
            transaction_id: cmd.transaction_id.clone(),
        };

        // Nothing changed: no event, no version bump.
        if self.payments.contains(&payment) {
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::PaymentSynced(PaymentSynced {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            payment,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_sync_reversal(&self, cmd: &SyncReversal) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.invoice_id)?;
        self.ensure_posted("linking a reversal")?;

        if cmd.reversal_id == self.id {
            return Err(DomainError::invariant("an invoice cannot reverse itself"));
        }
        if let Some(existing) = self.reversal {
            if existing.invoice_id != cmd.reversal_id {
                return Err(DomainError::conflict("invoice is already reversed by another document"));
            }
        }

        Ok(vec![InvoiceEvent::ReversalSynced(ReversalSynced {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reversal: Reversal {
                invoice_id: cmd.reversal_id,
                posted: cmd.posted,
            },
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn to_line(line_no: u32, input: &LineInput) -> InvoiceLine {
    InvoiceLine {
        line_no,
        description: input.description.clone(),
        price_subtotal: input.price_subtotal,
        price_total: input.price_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tillerp_accounting::AccountType;
    use tillerp_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn test_payment_id() -> PaymentId {
        PaymentId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(subtotal: Decimal, total: Decimal) -> LineInput {
        LineInput {
            description: None,
            price_subtotal: subtotal,
            price_total: total,
        }
    }

    struct Fixture {
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        invoice: Invoice,
    }

    impl Fixture {
        fn draft(move_type: MoveType, lines: Vec<LineInput>) -> Self {
            let tenant_id = test_tenant_id();
            let invoice_id = test_invoice_id();
            let mut invoice = Invoice::empty(invoice_id);
            execute(
                &mut invoice,
                &InvoiceCommand::CreateInvoice(CreateInvoice {
                    tenant_id,
                    invoice_id,
                    move_type,
                    untaxed_basis: UntaxedBasis::NetOfTax,
                    lines,
                    occurred_at: test_time(),
                }),
            )
            .unwrap();
            Self {
                tenant_id,
                invoice_id,
                invoice,
            }
        }

        fn posted(move_type: MoveType, lines: Vec<LineInput>) -> Self {
            let mut f = Self::draft(move_type, lines);
            f.run(InvoiceCommand::PostInvoice(PostInvoice {
                tenant_id: f.tenant_id,
                invoice_id: f.invoice_id,
                occurred_at: test_time(),
            }))
            .unwrap();
            f
        }

        fn run(&mut self, cmd: InvoiceCommand) -> Result<Vec<InvoiceEvent>, DomainError> {
            execute(&mut self.invoice, &cmd)
        }

        fn record(&mut self, posting: LedgerPosting) {
            self.run(InvoiceCommand::RecordPosting(RecordPosting {
                tenant_id: self.tenant_id,
                invoice_id: self.invoice_id,
                posting,
                occurred_at: test_time(),
            }))
            .unwrap();
        }

        fn sync_payment(&mut self, payment_id: PaymentId, status: PaymentStatus, tx: Option<&str>) {
            self.run(InvoiceCommand::SyncPayment(SyncPayment {
                tenant_id: self.tenant_id,
                invoice_id: self.invoice_id,
                payment_id,
                status,
                transaction_id: tx.map(str::to_string),
                occurred_at: test_time(),
            }))
            .unwrap();
        }
    }

    #[test]
    fn create_invoice_numbers_lines_and_computes_totals() {
        let f = Fixture::draft(
            MoveType::OutInvoice,
            vec![line(dec!(100), dec!(118)), line(dec!(50), dec!(50))],
        );

        let nos: Vec<u32> = f.invoice.lines().iter().map(|l| l.line_no).collect();
        assert_eq!(nos, vec![1, 2]);
        assert_eq!(f.invoice.amount_tax(), dec!(18));
        assert_eq!(f.invoice.amount_untaxed(), dec!(132));
        assert_eq!(f.invoice.amount_total(), dec!(150));
        assert_eq!(f.invoice.status(), InvoiceStatus::Draft);
        assert_eq!(f.invoice.payment_state(), PaymentState::NotPaid);
    }

    #[test]
    fn editing_lines_recomputes_totals() {
        let mut f = Fixture::draft(MoveType::OutInvoice, vec![line(dec!(100), dec!(118))]);
        let (tenant_id, invoice_id) = (f.tenant_id, f.invoice_id);

        f.run(InvoiceCommand::AddLine(AddLine {
            tenant_id,
            invoice_id,
            line: line(dec!(10), dec!(12)),
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.invoice.amount_tax(), dec!(20));
        assert_eq!(f.invoice.amount_total(), dec!(110));

        f.run(InvoiceCommand::UpdateLine(UpdateLine {
            tenant_id,
            invoice_id,
            line_no: 1,
            line: line(dec!(200), dec!(200)),
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.invoice.amount_tax(), dec!(2));
        assert_eq!(f.invoice.amount_total(), dec!(210));

        f.run(InvoiceCommand::RemoveLine(RemoveLine {
            tenant_id,
            invoice_id,
            line_no: 2,
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.invoice.amount_total(), dec!(200));
        assert_eq!(f.invoice.amount_residual(), dec!(200));
    }

    #[test]
    fn removed_line_numbers_are_not_reused() {
        let mut f = Fixture::draft(
            MoveType::OutInvoice,
            vec![line(dec!(1), dec!(1)), line(dec!(2), dec!(2))],
        );
        let (tenant_id, invoice_id) = (f.tenant_id, f.invoice_id);

        f.run(InvoiceCommand::RemoveLine(RemoveLine {
            tenant_id,
            invoice_id,
            line_no: 2,
            occurred_at: test_time(),
        }))
        .unwrap();
        let events = f
            .run(InvoiceCommand::AddLine(AddLine {
                tenant_id,
                invoice_id,
                line: line(dec!(3), dec!(3)),
                occurred_at: test_time(),
            }))
            .unwrap();

        match &events[0] {
            InvoiceEvent::LineAdded(e) => assert_eq!(e.line.line_no, 3),
            _ => panic!("Expected LineAdded event"),
        }
    }

    #[test]
    fn cannot_edit_lines_once_posted() {
        let mut f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(100), dec!(118))]);
        let err = f
            .run(InvoiceCommand::AddLine(AddLine {
                tenant_id: f.tenant_id,
                invoice_id: f.invoice_id,
                line: line(dec!(1), dec!(1)),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("cannot modify lines") => {}
            _ => panic!("Expected InvariantViolation for editing a posted invoice"),
        }
    }

    #[test]
    fn posted_single_line_without_postings_is_not_paid() {
        let f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(100), dec!(118))]);

        assert_eq!(f.invoice.amount_tax(), dec!(18));
        assert_eq!(f.invoice.amount_untaxed(), dec!(82));
        assert_eq!(f.invoice.amount_total(), dec!(100));
        assert_eq!(f.invoice.amount_residual(), dec!(100));
        assert_eq!(f.invoice.payment_state(), PaymentState::NotPaid);
    }

    #[test]
    fn posted_empty_invoice_is_paid() {
        let f = Fixture::posted(MoveType::OutInvoice, vec![]);
        assert_eq!(f.invoice.amount_total(), Decimal::ZERO);
        assert_eq!(f.invoice.payment_state(), PaymentState::Paid);
    }

    #[test]
    fn payment_lifecycle_partial_then_paid() {
        let mut f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(100), dec!(100))]);
        let receivable = LedgerPosting::new(AccountType::Receivable, dec!(100));
        let receivable_id = receivable.id;
        f.record(receivable);
        assert_eq!(f.invoice.amount_residual(), dec!(100));
        assert_eq!(f.invoice.payment_state(), PaymentState::NotPaid);

        f.run(InvoiceCommand::UpdatePostingResidual(UpdatePostingResidual {
            tenant_id: f.tenant_id,
            invoice_id: f.invoice_id,
            posting_id: receivable_id,
            amount_residual: dec!(40),
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.invoice.amount_residual(), dec!(40));
        assert_eq!(f.invoice.amount_residual_signed(), dec!(40));
        assert_eq!(f.invoice.payment_state(), PaymentState::Partial);

        f.run(InvoiceCommand::UpdatePostingResidual(UpdatePostingResidual {
            tenant_id: f.tenant_id,
            invoice_id: f.invoice_id,
            posting_id: receivable_id,
            amount_residual: Decimal::ZERO,
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.invoice.amount_residual(), Decimal::ZERO);
        assert_eq!(f.invoice.payment_state(), PaymentState::Paid);
    }

    #[test]
    fn posted_payment_with_open_residual_is_in_payment() {
        let mut f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(100), dec!(100))]);
        let payment_id = test_payment_id();
        f.record(LedgerPosting::new(AccountType::Receivable, dec!(100)).with_payment(payment_id));

        f.sync_payment(payment_id, PaymentStatus::Draft, Some("TX123"));
        assert_eq!(f.invoice.payment_state(), PaymentState::NotPaid);
        assert_eq!(f.invoice.transaction_id(), Some("TX123"));

        f.sync_payment(payment_id, PaymentStatus::Posted, Some("TX123"));
        assert_eq!(f.invoice.payment_state(), PaymentState::InPayment);
        assert_eq!(f.invoice.payments().len(), 1);
    }

    #[test]
    fn unchanged_payment_sync_emits_nothing() {
        let mut f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(10), dec!(10))]);
        let payment_id = test_payment_id();
        f.sync_payment(payment_id, PaymentStatus::Posted, None);
        let version = f.invoice.version();

        let events = f
            .run(InvoiceCommand::SyncPayment(SyncPayment {
                tenant_id: f.tenant_id,
                invoice_id: f.invoice_id,
                payment_id,
                status: PaymentStatus::Posted,
                transaction_id: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(f.invoice.version(), version);
    }

    #[test]
    fn transaction_id_follows_latest_payment_with_one() {
        let mut f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(10), dec!(10))]);
        f.sync_payment(test_payment_id(), PaymentStatus::Posted, Some("MOMO-1"));
        f.sync_payment(test_payment_id(), PaymentStatus::Posted, Some("AIRTEL-2"));
        f.sync_payment(test_payment_id(), PaymentStatus::Posted, None);

        assert_eq!(f.invoice.transaction_id(), Some("AIRTEL-2"));
    }

    #[test]
    fn posted_reversal_marks_invoice_reversed() {
        let mut f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(100), dec!(100))]);
        let reversal_id = test_invoice_id();

        let sync = |posted| {
            InvoiceCommand::SyncReversal(SyncReversal {
                tenant_id: f.tenant_id,
                invoice_id: f.invoice_id,
                reversal_id,
                posted,
                occurred_at: test_time(),
            })
        };
        let (draft_link, posted_link) = (sync(false), sync(true));

        f.run(draft_link).unwrap();
        assert_eq!(f.invoice.payment_state(), PaymentState::NotPaid);

        f.run(posted_link).unwrap();
        assert_eq!(f.invoice.payment_state(), PaymentState::Reversed);
        assert_eq!(
            f.invoice.reversal(),
            Some(Reversal {
                invoice_id: reversal_id,
                posted: true
            })
        );
    }

    #[test]
    fn second_reversal_document_is_rejected() {
        let mut f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(1), dec!(1))]);
        let (tenant_id, invoice_id) = (f.tenant_id, f.invoice_id);
        f.run(InvoiceCommand::SyncReversal(SyncReversal {
            tenant_id,
            invoice_id,
            reversal_id: test_invoice_id(),
            posted: true,
            occurred_at: test_time(),
        }))
        .unwrap();

        let err = f
            .run(InvoiceCommand::SyncReversal(SyncReversal {
                tenant_id,
                invoice_id,
                reversal_id: test_invoice_id(),
                posted: true,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::conflict("invoice is already reversed by another document")
        );
    }

    #[test]
    fn refund_signed_amounts_are_negative() {
        let mut f = Fixture::posted(MoveType::InRefund, vec![line(dec!(100), dec!(110))]);
        f.record(LedgerPosting::new(AccountType::Payable, dec!(-30)));

        assert_eq!(f.invoice.amount_total(), dec!(100));
        assert_eq!(f.invoice.amount_total_signed(), dec!(-100));
        assert_eq!(f.invoice.amount_untaxed_signed(), dec!(-90));
        assert_eq!(f.invoice.amount_tax_signed(), dec!(-10));
        assert_eq!(f.invoice.amount_residual(), dec!(-30));
        assert_eq!(f.invoice.amount_residual_signed(), dec!(-30));
    }

    #[test]
    fn postings_require_posted_invoice() {
        let mut f = Fixture::draft(MoveType::OutInvoice, vec![line(dec!(1), dec!(1))]);
        let err = f
            .run(InvoiceCommand::RecordPosting(RecordPosting {
                tenant_id: f.tenant_id,
                invoice_id: f.invoice_id,
                posting: LedgerPosting::new(AccountType::Receivable, dec!(1)),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("requires a posted invoice") => {}
            _ => panic!("Expected InvariantViolation for posting on a draft"),
        }
    }

    #[test]
    fn duplicate_posting_is_a_conflict() {
        let mut f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(1), dec!(1))]);
        let posting = LedgerPosting::new(AccountType::Receivable, dec!(1));
        f.record(posting.clone());

        let err = f
            .run(InvoiceCommand::RecordPosting(RecordPosting {
                tenant_id: f.tenant_id,
                invoice_id: f.invoice_id,
                posting,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::conflict("posting already recorded"));
    }

    #[test]
    fn cancelled_draft_cannot_be_posted() {
        let mut f = Fixture::draft(MoveType::OutInvoice, vec![line(dec!(1), dec!(1))]);
        let (tenant_id, invoice_id) = (f.tenant_id, f.invoice_id);
        f.run(InvoiceCommand::CancelInvoice(CancelInvoice {
            tenant_id,
            invoice_id,
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(f.invoice.status(), InvoiceStatus::Cancel);

        let err = f
            .run(InvoiceCommand::PostInvoice(PostInvoice {
                tenant_id,
                invoice_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::invariant("only draft invoices can be posted"));
    }

    #[test]
    fn other_tenant_is_rejected() {
        let f = Fixture::posted(MoveType::OutInvoice, vec![line(dec!(1), dec!(1))]);
        let err = f
            .invoice
            .handle(&InvoiceCommand::RecordPosting(RecordPosting {
                tenant_id: test_tenant_id(),
                invoice_id: f.invoice_id,
                posting: LedgerPosting::new(AccountType::Receivable, dec!(1)),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::invariant("tenant mismatch"));
    }

    #[test]
    fn replaying_events_rebuilds_identical_state() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let mut invoice = Invoice::empty(invoice_id);
        let mut history = Vec::new();

        let commands = [
            InvoiceCommand::CreateInvoice(CreateInvoice {
                tenant_id,
                invoice_id,
                move_type: MoveType::OutInvoice,
                untaxed_basis: UntaxedBasis::NetOfTax,
                lines: vec![line(dec!(100), dec!(118))],
                occurred_at: test_time(),
            }),
            InvoiceCommand::PostInvoice(PostInvoice {
                tenant_id,
                invoice_id,
                occurred_at: test_time(),
            }),
            InvoiceCommand::RecordPosting(RecordPosting {
                tenant_id,
                invoice_id,
                posting: LedgerPosting::new(AccountType::Receivable, dec!(30)),
                occurred_at: test_time(),
            }),
            InvoiceCommand::SyncPayment(SyncPayment {
                tenant_id,
                invoice_id,
                payment_id: test_payment_id(),
                status: PaymentStatus::Posted,
                transaction_id: Some("TX9".to_string()),
                occurred_at: test_time(),
            }),
        ];
        for cmd in &commands {
            history.extend(execute(&mut invoice, cmd).unwrap());
        }

        let mut rebuilt = Invoice::empty(invoice_id);
        for ev in &history {
            rebuilt.apply(ev);
        }

        assert_eq!(rebuilt, invoice);
        assert_eq!(rebuilt.amount_residual(), dec!(30));
        assert_eq!(rebuilt.payment_state(), PaymentState::Partial);
        assert_eq!(rebuilt.transaction_id(), Some("TX9"));
        assert_eq!(rebuilt.version(), 4);
    }
}
