use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tillerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, ValueObject};
use tillerp_events::Event;

use crate::line::{LineTerms, OrderLine};

/// Sales order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sale order state lifecycle: quotation (`Draft`/`Sent`), confirmed (`Sale`), `Cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleOrderState {
    Draft,
    Sent,
    Sale,
    Cancel,
}

impl SaleOrderState {
    pub fn is_quotation(self) -> bool {
        matches!(self, SaleOrderState::Draft | SaleOrderState::Sent)
    }
}

/// Order totals: sums of the line amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub amount_untaxed: Decimal,
    pub amount_tax: Decimal,
    pub amount_total: Decimal,
}

impl ValueObject for OrderTotals {}

impl OrderTotals {
    pub fn from_lines(lines: &[OrderLine]) -> Self {
        lines.iter().fold(Self::default(), |acc, line| Self {
            amount_untaxed: acc.amount_untaxed + line.pricing.price_subtotal,
            amount_tax: acc.amount_tax + line.pricing.price_tax,
            amount_total: acc.amount_total + line.pricing.price_total,
        })
    }
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: SalesOrderId,
    tenant_id: Option<TenantId>,
    name: String,
    state: SaleOrderState,
    lines: Vec<OrderLine>,
    next_line_no: u32,
    totals: OrderTotals,
    version: u64,
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            state: SaleOrderState::Draft,
            lines: Vec::new(),
            next_line_no: 1,
            totals: OrderTotals::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SaleOrderState {
        self.state
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn totals(&self) -> OrderTotals {
        self.totals
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

    pub fn is_modifiable(&self) -> bool {
        self.state.is_quotation()
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    /// Human reference, e.g. `S00042`.
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub terms: LineTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub terms: LineTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkSent (quotation sent to the customer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSent {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateSalesOrder(CreateSalesOrder),
    AddLine(AddLine),
    UpdateLine(UpdateLine),
    RemoveLine(RemoveLine),
    MarkSent(MarkSent),
    ConfirmOrder(ConfirmOrder),
    CancelOrder(CancelOrder),
}

/// Event: SalesOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub terms: LineTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineUpdated {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub terms: LineTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotationSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationSent {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    SalesOrderCreated(SalesOrderCreated),
    LineAdded(LineAdded),
    LineUpdated(LineUpdated),
    LineRemoved(LineRemoved),
    QuotationSent(QuotationSent),
    OrderConfirmed(OrderConfirmed),
    OrderCancelled(OrderCancelled),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::SalesOrderCreated(_) => "sales.order.created",
            SalesOrderEvent::LineAdded(_) => "sales.order.line_added",
            SalesOrderEvent::LineUpdated(_) => "sales.order.line_updated",
            SalesOrderEvent::LineRemoved(_) => "sales.order.line_removed",
            SalesOrderEvent::QuotationSent(_) => "sales.order.sent",
            SalesOrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::OrderCancelled(_) => "sales.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.occurred_at,
            SalesOrderEvent::LineAdded(e) => e.occurred_at,
            SalesOrderEvent::LineUpdated(e) => e.occurred_at,
            SalesOrderEvent::LineRemoved(e) => e.occurred_at,
            SalesOrderEvent::QuotationSent(e) => e.occurred_at,
            SalesOrderEvent::OrderConfirmed(e) => e.occurred_at,
            SalesOrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.state = SaleOrderState::Draft;
                self.lines.clear();
                self.created = true;
            }
            SalesOrderEvent::LineAdded(e) => {
                self.next_line_no = self.next_line_no.max(e.line_no + 1);
                self.lines.push(OrderLine::new(e.line_no, e.terms.clone()));
            }
            SalesOrderEvent::LineUpdated(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    *line = OrderLine::new(e.line_no, e.terms.clone());
                }
            }
            SalesOrderEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            SalesOrderEvent::QuotationSent(_) => {
                self.state = SaleOrderState::Sent;
            }
            SalesOrderEvent::OrderConfirmed(_) => {
                self.state = SaleOrderState::Sale;
            }
            SalesOrderEvent::OrderCancelled(_) => {
                self.state = SaleOrderState::Cancel;
            }
        }

        self.totals = OrderTotals::from_lines(&self.lines);

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateSalesOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            SalesOrderCommand::UpdateLine(cmd) => self.handle_update_line(cmd),
            SalesOrderCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            SalesOrderCommand::MarkSent(cmd) => self.handle_mark_sent(cmd),
            SalesOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl SalesOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: SalesOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_order_id(order_id)
    }

    fn ensure_modifiable(&self) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "cannot modify order once it is confirmed or cancelled",
            ));
        }
        Ok(())
    }

    fn ensure_line(&self, line_no: u32) -> Result<(), DomainError> {
        if !self.lines.iter().any(|l| l.line_no == line_no) {
            return Err(DomainError::validation(format!("order has no line {line_no}")));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreateSalesOrder,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("order name must not be empty"));
        }

        Ok(vec![SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_modifiable()?;
        cmd.terms.validate()?;

        Ok(vec![SalesOrderEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: self.next_line_no,
            terms: cmd.terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_line(&self, cmd: &UpdateLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_modifiable()?;
        self.ensure_line(cmd.line_no)?;
        cmd.terms.validate()?;

        Ok(vec![SalesOrderEvent::LineUpdated(LineUpdated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            terms: cmd.terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_modifiable()?;
        self.ensure_line(cmd.line_no)?;

        Ok(vec![SalesOrderEvent::LineRemoved(LineRemoved {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_sent(&self, cmd: &MarkSent) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        match self.state {
            SaleOrderState::Draft => {}
            // Re-sending a quotation changes nothing.
            SaleOrderState::Sent => return Ok(vec![]),
            _ => {
                return Err(DomainError::invariant(
                    "only quotations can be sent",
                ));
            }
        }

        Ok(vec![SalesOrderEvent::QuotationSent(QuotationSent {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(
        &self,
        cmd: &ConfirmOrder,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if !self.state.is_quotation() {
            return Err(DomainError::invariant(
                "only quotations can be confirmed",
            ));
        }

        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot confirm order without lines",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderConfirmed(OrderConfirmed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if self.state == SaleOrderState::Cancel {
            return Err(DomainError::conflict("sales order already cancelled"));
        }

        Ok(vec![SalesOrderEvent::OrderCancelled(OrderCancelled {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
